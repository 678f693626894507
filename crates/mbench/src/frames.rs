//! Event source for `#[mbench::track]`.
//!
//! Each tracked function pushes its defining module onto a thread-local frame
//! stack for the duration of the call. The module on top of the stack when a
//! tracked function is entered is its invoking module, which is what caller
//! mode filters on. Calls made from untracked code inherit the innermost
//! tracked frame, or the thread's base module when no tracked call is active.
//! `profileme!` sets the base module of the thread it runs on, so untracked
//! code there (typically `main`) counts as the target module.

use std::cell::{Cell, RefCell};

use crate::profiler::Profiler;
use crate::tracker::CallSite;

thread_local! {
    static FRAMES: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
    static BASE: Cell<&'static str> = const { Cell::new("") };
}

/// Module of the innermost tracked call on this thread.
pub fn invoking_module() -> &'static str {
    FRAMES.with(|frames| frames.borrow().last().copied())
        .unwrap_or_else(|| BASE.with(|base| base.get()))
}

/// Module untracked code on this thread is attributed to.
pub(crate) fn set_base_module(module: &'static str) {
    BASE.with(|base| base.set(module));
}

fn push_frame(module: &'static str) {
    FRAMES.with(|frames| frames.borrow_mut().push(module));
}

fn pop_frame() {
    FRAMES.with(|frames| {
        frames.borrow_mut().pop();
    });
}

/// Emits `enter` on creation and `exit` on drop for one call.
#[doc(hidden)]
#[must_use]
pub struct CallGuard {
    profiler: Option<&'static Profiler>,
    name: &'static str,
    module: &'static str,
    invoking: &'static str,
}

impl CallGuard {
    #[inline]
    pub fn enter(name: &'static str, module: &'static str) -> Self {
        let profiler = crate::global();
        if !profiler.is_enabled() {
            return Self {
                profiler: None,
                name,
                module,
                invoking: "",
            };
        }

        let invoking = invoking_module();
        push_frame(module);
        profiler.enter(&CallSite::new(name, module), invoking);

        Self {
            profiler: Some(profiler),
            name,
            module,
            invoking,
        }
    }
}

impl Drop for CallGuard {
    #[inline]
    fn drop(&mut self) {
        let Some(profiler) = self.profiler else {
            return;
        };
        pop_frame();
        profiler.exit(&CallSite::new(self.name, self.module), self.invoking);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_stack_tracks_innermost_module() {
        assert_eq!(invoking_module(), "");
        push_frame("app");
        push_frame("app::db");
        assert_eq!(invoking_module(), "app::db");
        pop_frame();
        assert_eq!(invoking_module(), "app");
        pop_frame();
        assert_eq!(invoking_module(), "");
    }

    #[test]
    fn base_module_applies_below_tracked_frames() {
        set_base_module("app::main");
        assert_eq!(invoking_module(), "app::main");
        push_frame("app::db");
        assert_eq!(invoking_module(), "app::db");
        pop_frame();
        assert_eq!(invoking_module(), "app::main");
        set_base_module("");
    }

    #[test]
    fn frames_are_per_thread() {
        push_frame("main_thread");
        let seen = std::thread::spawn(invoking_module).join().unwrap();
        assert_eq!(seen, "");
        pop_frame();
    }
}
