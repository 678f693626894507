//! Resource counters read around every measured call.
//!
//! The profiler never talks to the OS directly; it asks a [`ResourceSampler`]
//! for the current reading of each counter and subtracts two [`Snapshot`]s.
//! [`SystemSampler`] is the default implementation: memory and disk I/O come
//! from `sysinfo`, CPU time from `getrusage`, GPU memory from a pluggable
//! [`GpuProbe`]. With the `nvml` feature the default probe is [`NvmlGpu`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::error::SamplerError;

#[cfg(target_os = "linux")]
pub use quanta::Instant;

#[cfg(not(target_os = "linux"))]
pub use std::time::Instant;

/// Point-in-time reading of every counter.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub at: Instant,
    /// Process CPU time in seconds.
    pub cpu: f64,
    pub memory: u64,
    pub gpu: u64,
    pub io: u64,
}

/// Difference between two snapshots.
///
/// Byte deltas are signed: memory can be released inside a measured call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Deltas {
    pub elapsed: Duration,
    pub cpu: f64,
    pub memory: i64,
    pub gpu: i64,
    pub io: i64,
}

impl Deltas {
    pub fn between(start: &Snapshot, end: &Snapshot) -> Self {
        Self {
            elapsed: end.at.duration_since(start.at),
            cpu: end.cpu - start.cpu,
            memory: signed_delta(start.memory, end.memory),
            gpu: signed_delta(start.gpu, end.gpu),
            io: signed_delta(start.io, end.io),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

// Two's complement wrap gives the signed difference for any pair of readings
// below i64::MAX.
#[inline]
fn signed_delta(start: u64, end: u64) -> i64 {
    end.wrapping_sub(start) as i64
}

/// Source of resource readings.
///
/// Implementations must not fail: a counter that cannot be read reports `0`.
pub trait ResourceSampler: Send + Sync {
    /// Resident memory of the current process, in bytes.
    fn memory_used(&self) -> u64;

    /// Used memory summed over every detected GPU, in bytes.
    fn gpu_memory_used(&self) -> u64;

    /// Cumulative bytes read plus bytes written by the current process.
    fn io_bytes(&self) -> u64;

    /// Process CPU time (user + system), in seconds.
    fn cpu_time(&self) -> f64;

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            at: Instant::now(),
            cpu: self.cpu_time(),
            memory: self.memory_used(),
            gpu: self.gpu_memory_used(),
            io: self.io_bytes(),
        }
    }
}

/// Per-device GPU memory query.
pub trait GpuProbe: Send + Sync {
    fn device_count(&self) -> Result<usize, SamplerError>;

    fn memory_used(&self, device: usize) -> Result<u64, SamplerError>;
}

/// Probe for machines without a supported GPU.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGpu;

impl GpuProbe for NoGpu {
    fn device_count(&self) -> Result<usize, SamplerError> {
        Ok(0)
    }

    fn memory_used(&self, device: usize) -> Result<u64, SamplerError> {
        Err(SamplerError::Device {
            index: device,
            message: "no GPU devices".to_string(),
        })
    }
}

/// NVIDIA GPUs queried through NVML.
#[cfg(feature = "nvml")]
pub struct NvmlGpu {
    nvml: nvml_wrapper::Nvml,
}

#[cfg(feature = "nvml")]
impl NvmlGpu {
    /// Loads the NVML library and initializes it.
    pub fn init() -> Result<Self, SamplerError> {
        nvml_wrapper::Nvml::init()
            .map(|nvml| Self { nvml })
            .map_err(|e| SamplerError::Driver(e.to_string()))
    }
}

#[cfg(feature = "nvml")]
impl GpuProbe for NvmlGpu {
    fn device_count(&self) -> Result<usize, SamplerError> {
        self.nvml
            .device_count()
            .map(|count| count as usize)
            .map_err(|e| SamplerError::Driver(e.to_string()))
    }

    fn memory_used(&self, device: usize) -> Result<u64, SamplerError> {
        let index = u32::try_from(device).map_err(|_| SamplerError::Device {
            index: device,
            message: "index out of range".to_string(),
        })?;
        self.nvml
            .device_by_index(index)
            .and_then(|gpu| gpu.memory_info())
            .map(|info| info.used)
            .map_err(|e| SamplerError::Device {
                index: device,
                message: e.to_string(),
            })
    }
}

/// The probe [`SystemSampler::new`] uses: NVML when the `nvml` feature is on
/// and the driver loads, otherwise [`NoGpu`].
pub fn default_gpu_probe() -> Box<dyn GpuProbe> {
    #[cfg(feature = "nvml")]
    {
        match NvmlGpu::init() {
            Ok(probe) => return Box::new(probe),
            Err(e) => tracing::warn!("[mbench] NVML init failed, GPU memory reads as 0: {e}"),
        }
    }
    Box::new(NoGpu)
}

/// Sums used memory over `devices` GPUs. Unreadable devices count as zero.
pub fn sum_device_memory(probe: &dyn GpuProbe, devices: usize) -> u64 {
    (0..devices)
        .map(|index| match probe.memory_used(index) {
            Ok(used) => used,
            Err(e) => {
                tracing::warn!("[mbench] GPU memory unavailable: {e}");
                0
            }
        })
        .sum()
}

/// Logs the first failure of a counter, then stays quiet.
#[derive(Default)]
struct WarnOnce(AtomicBool);

impl WarnOnce {
    fn report(&self, counter: &str, err: &SamplerError) {
        if !self.0.swap(true, Ordering::Relaxed) {
            tracing::warn!("[mbench] {counter} counter unavailable, reading 0: {err}");
        } else {
            tracing::debug!("[mbench] {counter} counter unavailable: {err}");
        }
    }
}

/// Default sampler backed by `sysinfo` and `libc`.
pub struct SystemSampler {
    system: Mutex<System>,
    pid: Option<Pid>,
    gpu: Box<dyn GpuProbe>,
    gpu_devices: usize,
    memory_warning: WarnOnce,
    io_warning: WarnOnce,
    cpu_warning: WarnOnce,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self::with_gpu(default_gpu_probe())
    }

    /// Creates a sampler reading GPU memory through `gpu`.
    ///
    /// The device count is queried once here and cached for the lifetime of
    /// the sampler.
    pub fn with_gpu(gpu: Box<dyn GpuProbe>) -> Self {
        let gpu_devices = match gpu.device_count() {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("[mbench] GPU discovery failed, GPU memory reads as 0: {e}");
                0
            }
        };

        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!("[mbench] cannot resolve current pid: {e}");
                None
            }
        };

        Self {
            system: Mutex::new(System::new()),
            pid,
            gpu,
            gpu_devices,
            memory_warning: WarnOnce::default(),
            io_warning: WarnOnce::default(),
            cpu_warning: WarnOnce::default(),
        }
    }

    pub fn gpu_devices(&self) -> usize {
        self.gpu_devices
    }

    fn with_process<T>(
        &self,
        kind: ProcessRefreshKind,
        read: impl FnOnce(&Process) -> T,
    ) -> Result<T, SamplerError> {
        let pid = self.pid.ok_or(SamplerError::ProcessNotFound)?;
        let Ok(mut system) = self.system.lock() else {
            return Err(SamplerError::Poisoned);
        };
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), false, kind);
        system
            .process(pid)
            .map(read)
            .ok_or(SamplerError::ProcessNotFound)
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SystemSampler {
    fn memory_used(&self) -> u64 {
        self.with_process(ProcessRefreshKind::nothing().with_memory(), |p| {
            p.memory()
        })
        .unwrap_or_else(|e| {
            self.memory_warning.report("memory", &e);
            0
        })
    }

    fn gpu_memory_used(&self) -> u64 {
        if self.gpu_devices == 0 {
            return 0;
        }
        sum_device_memory(self.gpu.as_ref(), self.gpu_devices)
    }

    fn io_bytes(&self) -> u64 {
        self.with_process(ProcessRefreshKind::nothing().with_disk_usage(), |p| {
            let usage = p.disk_usage();
            usage.total_read_bytes + usage.total_written_bytes
        })
        .unwrap_or_else(|e| {
            self.io_warning.report("disk I/O", &e);
            0
        })
    }

    fn cpu_time(&self) -> f64 {
        #[cfg(unix)]
        let reading = rusage_cpu_seconds();

        #[cfg(not(unix))]
        let reading = self.with_process(ProcessRefreshKind::nothing().with_cpu(), |p| {
            p.accumulated_cpu_time() as f64 / 1_000.0
        });

        reading.unwrap_or_else(|e| {
            self.cpu_warning.report("CPU time", &e);
            0.0
        })
    }
}

#[cfg(unix)]
fn rusage_cpu_seconds() -> Result<f64, SamplerError> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let usage = unsafe { usage.assume_init() };

    let secs = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0;
    Ok(secs(usage.ru_utime) + secs(usage.ru_stime))
}

/// Sampler whose readings are set by hand.
///
/// Useful for replaying recorded counters and for deterministic tests. CPU time
/// is stored in microseconds.
#[derive(Debug, Default)]
pub struct ManualSampler {
    memory: AtomicU64,
    gpu: AtomicU64,
    io: AtomicU64,
    cpu_micros: AtomicU64,
}

impl ManualSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_memory(&self, bytes: u64) {
        self.memory.store(bytes, Ordering::SeqCst);
    }

    pub fn set_gpu(&self, bytes: u64) {
        self.gpu.store(bytes, Ordering::SeqCst);
    }

    pub fn set_io(&self, bytes: u64) {
        self.io.store(bytes, Ordering::SeqCst);
    }

    pub fn set_cpu(&self, seconds: f64) {
        self.cpu_micros
            .store((seconds * 1_000_000.0).round() as u64, Ordering::SeqCst);
    }
}

impl ResourceSampler for ManualSampler {
    fn memory_used(&self) -> u64 {
        self.memory.load(Ordering::SeqCst)
    }

    fn gpu_memory_used(&self) -> u64 {
        self.gpu.load(Ordering::SeqCst)
    }

    fn io_bytes(&self) -> u64 {
        self.io.load(Ordering::SeqCst)
    }

    fn cpu_time(&self) -> f64 {
        self.cpu_micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}

impl<S: ResourceSampler + ?Sized> ResourceSampler for std::sync::Arc<S> {
    fn memory_used(&self) -> u64 {
        (**self).memory_used()
    }

    fn gpu_memory_used(&self) -> u64 {
        (**self).gpu_memory_used()
    }

    fn io_bytes(&self) -> u64 {
        (**self).io_bytes()
    }

    fn cpu_time(&self) -> f64 {
        (**self).cpu_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedGpu {
        devices: usize,
        used: u64,
    }

    impl GpuProbe for FixedGpu {
        fn device_count(&self) -> Result<usize, SamplerError> {
            Ok(self.devices)
        }

        fn memory_used(&self, _device: usize) -> Result<u64, SamplerError> {
            Ok(self.used)
        }
    }

    struct BrokenGpu;

    impl GpuProbe for BrokenGpu {
        fn device_count(&self) -> Result<usize, SamplerError> {
            Err(SamplerError::Unsupported("GPU discovery"))
        }

        fn memory_used(&self, index: usize) -> Result<u64, SamplerError> {
            Err(SamplerError::Device {
                index,
                message: "driver gone".to_string(),
            })
        }
    }

    #[test]
    fn gpu_memory_is_summed_over_devices() {
        let cases = [(1024, 1, 1024), (1024, 8, 8192), (2048, 8, 16384), (0, 1, 0)];
        for (used, devices, expected) in cases {
            let sampler = SystemSampler::with_gpu(Box::new(FixedGpu { devices, used }));
            assert_eq!(sampler.gpu_devices(), devices);
            assert_eq!(
                sampler.gpu_memory_used(),
                expected,
                "{devices} devices x {used} bytes"
            );
        }
    }

    #[test]
    fn no_gpu_reads_zero() {
        let sampler = SystemSampler::with_gpu(Box::new(NoGpu));
        assert_eq!(sampler.gpu_devices(), 0);
        assert_eq!(sampler.gpu_memory_used(), 0);
    }

    #[test]
    fn failed_gpu_discovery_degrades_to_zero() {
        let sampler = SystemSampler::with_gpu(Box::new(BrokenGpu));
        assert_eq!(sampler.gpu_devices(), 0);
        assert_eq!(sampler.gpu_memory_used(), 0);
        assert_eq!(sum_device_memory(&BrokenGpu, 3), 0);
    }

    #[cfg(not(feature = "nvml"))]
    #[test]
    fn default_gpu_without_nvml_has_no_devices() {
        assert_eq!(default_gpu_probe().device_count().unwrap(), 0);
    }

    #[cfg(feature = "nvml")]
    #[test]
    fn nvml_reads_every_device_or_falls_back() {
        let sampler = SystemSampler::new();
        match NvmlGpu::init() {
            Ok(probe) => {
                let devices = probe.device_count().unwrap();
                assert_eq!(sampler.gpu_devices(), devices);
                for index in 0..devices {
                    assert!(probe.memory_used(index).is_ok(), "device {index}");
                }
            }
            Err(_) => {
                assert_eq!(sampler.gpu_devices(), 0);
                assert_eq!(sampler.gpu_memory_used(), 0);
            }
        }
    }

    #[test]
    fn system_sampler_smoke_test() {
        let sampler = SystemSampler::new();
        let first = sampler.snapshot();

        let mut spin = 0u64;
        for i in 0..2_000_000u64 {
            spin = spin.wrapping_add(i * i);
        }
        std::hint::black_box(spin);

        let second = sampler.snapshot();
        let deltas = Deltas::between(&first, &second);
        assert!(second.memory > 0, "resident memory should be visible");
        assert!(deltas.cpu >= 0.0, "cpu time went backwards: {}", deltas.cpu);
        assert!(second.io >= first.io);
    }

    #[test]
    fn deltas_are_signed() {
        let sampler = ManualSampler::new();
        sampler.set_memory(4096);
        sampler.set_io(10);
        sampler.set_cpu(1.0);
        let start = sampler.snapshot();

        sampler.set_memory(1024);
        sampler.set_io(30);
        sampler.set_cpu(1.5);
        let end = sampler.snapshot();

        let deltas = Deltas::between(&start, &end);
        assert_eq!(deltas.memory, -3072);
        assert_eq!(deltas.io, 20);
        assert_eq!(deltas.gpu, 0);
        assert!((deltas.cpu - 0.5).abs() < 1e-9);
    }
}
