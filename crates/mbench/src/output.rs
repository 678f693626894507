use serde::{Deserialize, Serialize};
use std::fmt;

use crate::sampler::Deltas;
use crate::store::{AggregateProfile, Averages};

/// Formats a byte count with binary units and two decimals.
///
/// The largest unit up to GB is picked; anything bigger stays in GB.
///
/// ```rust
/// assert_eq!(mbench::format_bytes(500), "500.00 B");
/// assert_eq!(mbench::format_bytes(1024), "1.00 KB");
/// assert_eq!(mbench::format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    format_byte_value(bytes as f64)
}

/// Like [`format_bytes`] for signed or fractional values such as memory
/// deltas and averages. Negative values keep their sign.
pub fn format_signed_bytes(bytes: f64) -> String {
    if bytes < 0.0 {
        format!("-{}", format_byte_value(-bytes))
    } else {
        format_byte_value(bytes)
    }
}

fn format_byte_value(mut value: f64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB"];
    const THRESHOLD: f64 = 1024.0;

    for unit in UNITS {
        if value < THRESHOLD {
            return format!("{value:.2} {unit}");
        }
        value /= THRESHOLD;
    }
    format!("{value:.2} GB")
}

/// Formats seconds into a human-readable string with appropriate units.
pub fn format_duration(secs: f64) -> String {
    let ns = secs * 1_000_000_000.0;
    if ns.abs() < 1_000.0 {
        format!("{:.0} ns", ns)
    } else if ns.abs() < 1_000_000.0 {
        format!("{:.2} µs", ns / 1_000.0)
    } else if ns.abs() < 1_000_000_000.0 {
        format!("{:.2} ms", ns / 1_000_000.0)
    } else {
        format!("{:.2} s", secs)
    }
}

pub fn shorten_function_name(function_name: &str) -> String {
    let parts: Vec<&str> = function_name.split("::").collect();
    if parts.len() > 2 {
        parts[parts.len() - 2..].join("::")
    } else {
        function_name.to_string()
    }
}

/// Decides whether a measurement is worth showing.
///
/// `quiet` always wins; otherwise measurements shorter than `min_duration`
/// (both in seconds) are suppressed.
///
/// ```rust
/// assert!(!mbench::should_display(0.4, 0.5, false));
/// assert!(mbench::should_display(1.0, 0.5, false));
/// assert!(!mbench::should_display(1.0, 0.5, true));
/// ```
pub fn should_display(duration: f64, min_duration: f64, quiet: bool) -> bool {
    !quiet && duration >= min_duration
}

/// The fixed set of fields handed to a [`Reporter`] for one measurement.
///
/// Times are in seconds, memory/GPU/IO in bytes. For a single-shot record the
/// averages equal the raw values and `calls` is 1; for a cumulative record the
/// usage fields hold running totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub name: String,
    pub duration: f64,
    pub cpu_usage: f64,
    pub mem_usage: f64,
    pub gpu_usage: f64,
    pub io_usage: f64,
    pub avg_time: f64,
    pub avg_cpu: f64,
    pub avg_memory: f64,
    pub avg_gpu: f64,
    pub avg_io: f64,
    pub calls: u64,
}

impl ProfileRecord {
    /// Record of one measurement that is not accumulated anywhere.
    pub fn single(name: &str, deltas: &Deltas) -> Self {
        let duration = deltas.elapsed_secs();
        Self {
            name: name.to_string(),
            duration,
            cpu_usage: deltas.cpu,
            mem_usage: deltas.memory as f64,
            gpu_usage: deltas.gpu as f64,
            io_usage: deltas.io as f64,
            avg_time: duration,
            avg_cpu: deltas.cpu,
            avg_memory: deltas.memory as f64,
            avg_gpu: deltas.gpu as f64,
            avg_io: deltas.io as f64,
            calls: 1,
        }
    }

    /// Record of the running totals and averages of an aggregate.
    pub fn cumulative(profile: &AggregateProfile) -> Self {
        let avg = profile.averages();
        Self {
            name: profile.name.clone(),
            duration: profile.total_time,
            cpu_usage: profile.total_cpu,
            mem_usage: profile.total_memory as f64,
            gpu_usage: profile.total_gpu as f64,
            io_usage: profile.total_io as f64,
            avg_time: avg.time,
            avg_cpu: avg.cpu,
            avg_memory: avg.memory,
            avg_gpu: avg.gpu,
            avg_io: avg.io,
            calls: profile.calls,
        }
    }
}

impl fmt::Display for ProfileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (cpu {}, mem {}, gpu {}, io {}) | avg {} over {} calls",
            self.name,
            format_duration(self.duration),
            format_duration(self.cpu_usage),
            format_signed_bytes(self.mem_usage),
            format_signed_bytes(self.gpu_usage),
            format_signed_bytes(self.io_usage),
            format_duration(self.avg_time),
            self.calls
        )
    }
}

/// One row of the cumulative summary, with derived averages filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub function: String,
    pub calls: u64,
    pub total_time: f64,
    pub total_cpu: f64,
    pub total_memory: i64,
    pub total_gpu: i64,
    pub total_io: i64,
    pub avg_time: f64,
    pub avg_cpu: f64,
    pub avg_memory: f64,
    pub avg_gpu: f64,
    pub avg_io: f64,
    pub notes: String,
}

impl SummaryRow {
    pub fn new(profile: &AggregateProfile, avg: &Averages) -> Self {
        Self {
            function: profile.name.clone(),
            calls: profile.calls,
            total_time: profile.total_time,
            total_cpu: profile.total_cpu,
            total_memory: profile.total_memory,
            total_gpu: profile.total_gpu,
            total_io: profile.total_io,
            avg_time: avg.time,
            avg_cpu: avg.cpu,
            avg_memory: avg.memory,
            avg_gpu: avg.gpu,
            avg_io: avg.io,
            notes: profile.notes.clone(),
        }
    }
}

/// Serializable summary of every aggregate, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryJson {
    pub rows: Vec<SummaryRow>,
}

impl SummaryJson {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Trait for rendering profiling results.
///
/// Implement this to route measurements to a logger, a file or a test probe
/// instead of the console.
///
/// # Examples
///
/// ```rust
/// use mbench::{ProfileRecord, Reporter, SummaryJson};
/// use std::error::Error;
///
/// struct Slowest;
///
/// impl Reporter for Slowest {
///     fn report_call(&self, record: &ProfileRecord) -> Result<(), Box<dyn Error>> {
///         eprintln!("{} took {:.3}s", record.name, record.duration);
///         Ok(())
///     }
///
///     fn report_summary(&self, summary: &SummaryJson) -> Result<(), Box<dyn Error>> {
///         eprintln!("{} functions measured", summary.rows.len());
///         Ok(())
///     }
/// }
/// ```
pub trait Reporter: Send + Sync {
    fn report_call(&self, record: &ProfileRecord) -> Result<(), Box<dyn std::error::Error>>;

    fn report_summary(&self, summary: &SummaryJson) -> Result<(), Box<dyn std::error::Error>>;
}

/// Output format of the built-in reporters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Table,
    Json,
    JsonPretty,
}

/// Presentation gate entry point.
///
/// Hands `record` to `reporter` when [`should_display`] allows it and returns
/// whether it did. Reporter failures are logged, never propagated.
pub fn display_profile_info(
    reporter: &dyn Reporter,
    record: &ProfileRecord,
    min_duration: f64,
    quiet: bool,
) -> bool {
    if !should_display(record.duration, min_duration, quiet) {
        return false;
    }
    if let Err(e) = reporter.report_call(record) {
        tracing::warn!("[mbench] failed to report {}: {e}", record.name);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProfileRecord>>);

    impl Reporter for Recorder {
        fn report_call(&self, record: &ProfileRecord) -> Result<(), Box<dyn std::error::Error>> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }

        fn report_summary(&self, _summary: &SummaryJson) -> Result<(), Box<dyn std::error::Error>> {
            Ok(())
        }
    }

    fn record(duration: f64) -> ProfileRecord {
        ProfileRecord {
            name: "test_func".to_string(),
            duration,
            cpu_usage: 0.5,
            mem_usage: 1024.0,
            gpu_usage: 2048.0,
            io_usage: 4096.0,
            avg_time: duration,
            avg_cpu: 0.5,
            avg_memory: 1024.0,
            avg_gpu: 2048.0,
            avg_io: 4096.0,
            calls: 1,
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
        assert_eq!(format_bytes(500), "500.00 B");
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        // no TB unit
        assert_eq!(format_bytes(2048 * 1024 * 1024 * 1024), "2048.00 GB");
    }

    #[test]
    fn test_format_signed_bytes() {
        assert_eq!(format_signed_bytes(-2048.0), "-2.00 KB");
        assert_eq!(format_signed_bytes(512.5), "512.50 B");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.000_000_5), "500 ns");
        assert_eq!(format_duration(0.000_25), "250.00 µs");
        assert_eq!(format_duration(0.012), "12.00 ms");
        assert_eq!(format_duration(1.5), "1.50 s");
    }

    #[test]
    fn test_shorten_function_name() {
        assert_eq!(shorten_function_name("app::db::query::run"), "query::run");
        assert_eq!(shorten_function_name("work"), "work");
    }

    #[test]
    fn test_should_display() {
        assert!(!should_display(0.4, 0.5, false));
        assert!(should_display(1.0, 0.5, false));
        assert!(!should_display(1.0, 0.5, true));
        assert!(should_display(0.0, 0.0, false));
    }

    #[test]
    fn test_display_profile_info_gates_reporter() {
        let reporter = Recorder::default();

        assert!(display_profile_info(&reporter, &record(1.0), 0.5, false));
        assert_eq!(reporter.0.lock().unwrap().len(), 1);

        assert!(!display_profile_info(&reporter, &record(0.4), 0.5, false));
        assert!(!display_profile_info(&reporter, &record(1.0), 0.5, true));
        assert_eq!(reporter.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_single_record_uses_raw_values_as_averages() {
        let deltas = Deltas {
            elapsed: Duration::from_millis(250),
            cpu: 0.2,
            memory: -4096,
            gpu: 0,
            io: 512,
        };
        let record = ProfileRecord::single("block", &deltas);
        assert_eq!(record.calls, 1);
        assert_eq!(record.duration, 0.25);
        assert_eq!(record.avg_time, 0.25);
        assert_eq!(record.mem_usage, -4096.0);
        assert_eq!(record.avg_io, 512.0);
    }
}
