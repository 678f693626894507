//! OS-level thread identifiers, used to keep in-flight calls of different
//! threads apart.

/// Return the OS thread ID (TID) as u64.
///
/// - **Linux**: `syscall(SYS_gettid)`
/// - **macOS**: `pthread_self()` + `pthread_mach_thread_np()`
/// - elsewhere: a hash of the std thread id, stable for the thread's lifetime
#[inline]
pub fn current_tid() -> u64 {
    #[cfg(target_os = "linux")]
    {
        current_tid_linux()
    }

    #[cfg(target_os = "macos")]
    {
        current_tid_macos()
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        current_tid_fallback()
    }
}

#[cfg(target_os = "linux")]
#[inline]
fn current_tid_linux() -> u64 {
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}

#[cfg(target_os = "macos")]
#[inline]
fn current_tid_macos() -> u64 {
    unsafe {
        let pthread = libc::pthread_self();
        libc::pthread_mach_thread_np(pthread) as u64
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn current_tid_fallback() -> u64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tid_differs_between_threads() {
        let main_tid = current_tid();
        assert_eq!(main_tid, current_tid());

        let other = std::thread::spawn(current_tid).join().unwrap();
        assert_ne!(main_tid, other);
    }
}
