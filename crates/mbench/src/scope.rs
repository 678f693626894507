use std::borrow::Cow;
use std::time::Duration;

use crate::output::{display_profile_info, ProfileRecord};
use crate::profiler::Profiler;
use crate::sampler::{Deltas, Snapshot};

/// Options of a scoped measurement, see [`Profiler::profiling`].
#[must_use = "call `.start()` to begin measuring"]
pub struct ScopeBuilder<'a> {
    profiler: &'a Profiler,
    name: Cow<'static, str>,
    min_duration: Duration,
    quiet: bool,
    summary: Option<bool>,
}

impl<'a> ScopeBuilder<'a> {
    pub(crate) fn new(profiler: &'a Profiler, name: Cow<'static, str>) -> Self {
        Self {
            profiler,
            name,
            min_duration: Duration::ZERO,
            quiet: false,
            summary: None,
        }
    }

    /// Measurements shorter than this are not displayed.
    pub fn min_duration(mut self, min_duration: Duration) -> Self {
        self.min_duration = min_duration;
        self
    }

    /// Neither display nor accumulate the measurement.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Display the cumulative record instead of the single measurement.
    /// Defaults to the profiler's configuration.
    pub fn summary(mut self, summary: bool) -> Self {
        self.summary = Some(summary);
        self
    }

    /// Takes the start snapshot. Measurement ends when the guard is dropped.
    pub fn start(self) -> ProfileGuard<'a> {
        let start = self
            .profiler
            .is_enabled()
            .then(|| self.profiler.sampler().snapshot());

        ProfileGuard {
            summary: self
                .summary
                .unwrap_or(self.profiler.config().summary),
            profiler: self.profiler,
            name: self.name,
            min_duration: self.min_duration,
            quiet: self.quiet,
            start,
        }
    }

    /// Measures `f` and returns its result.
    pub fn run<T>(self, f: impl FnOnce() -> T) -> T {
        let _guard = self.start();
        f()
    }
}

/// Scoped measurement. Ends on drop, including during unwinding.
///
/// Inert when the profiler is disabled.
#[must_use = "the measurement ends when the guard is dropped"]
pub struct ProfileGuard<'a> {
    profiler: &'a Profiler,
    name: Cow<'static, str>,
    min_duration: Duration,
    quiet: bool,
    summary: bool,
    start: Option<Snapshot>,
}

impl ProfileGuard<'static> {
    /// Guard on the global profiler, used by `#[mbench::profile]`.
    #[doc(hidden)]
    pub fn build(
        name: &'static str,
        min_duration: Duration,
        quiet: bool,
        summary: Option<bool>,
    ) -> Self {
        let mut builder = crate::global()
            .profiling(name)
            .min_duration(min_duration)
            .quiet(quiet);
        if let Some(summary) = summary {
            builder = builder.summary(summary);
        }
        builder.start()
    }
}

impl ProfileGuard<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_measuring(&self) -> bool {
        self.start.is_some()
    }

    /// Ends the measurement now and returns its deltas.
    ///
    /// `None` when the profiler is disabled. Quiet measurements still return
    /// their deltas so the caller can decide what to do with them.
    pub fn finish(mut self) -> Option<Deltas> {
        self.complete()
    }

    fn complete(&mut self) -> Option<Deltas> {
        let start = self.start.take()?;
        let end = self.profiler.sampler().snapshot();
        let deltas = Deltas::between(&start, &end);

        if self.quiet {
            return Some(deltas);
        }

        let cumulative = self.profiler.record(&self.name, &deltas);
        let record = match cumulative {
            Some(record) if self.summary => record,
            _ => ProfileRecord::single(&self.name, &deltas),
        };
        display_profile_info(
            self.profiler.reporter(),
            &record,
            self.min_duration.as_secs_f64(),
            false,
        );
        Some(deltas)
    }
}

impl Drop for ProfileGuard<'_> {
    fn drop(&mut self) {
        self.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Reporter, SummaryJson};
    use crate::sampler::ManualSampler;
    use crate::ProfilerBuilder;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProfileRecord>>);

    impl Recorder {
        fn records(&self) -> Vec<ProfileRecord> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Reporter for Arc<Recorder> {
        fn report_call(&self, record: &ProfileRecord) -> Result<(), Box<dyn std::error::Error>> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }

        fn report_summary(&self, _summary: &SummaryJson) -> Result<(), Box<dyn std::error::Error>> {
            Ok(())
        }
    }

    fn profiler(enabled: bool) -> (Profiler, Arc<Recorder>, Arc<ManualSampler>) {
        let recorder = Arc::new(Recorder::default());
        let sampler = Arc::new(ManualSampler::new());
        let profiler = ProfilerBuilder::new()
            .enabled(enabled)
            .reporter(Box::new(Arc::clone(&recorder)))
            .sampler(Box::new(Arc::clone(&sampler)))
            .build();
        (profiler, recorder, sampler)
    }

    #[test]
    fn test_single_shot_record_is_displayed_and_accumulated() {
        let (profiler, recorder, sampler) = profiler(true);

        for memory in [4096, 8192] {
            let guard = profiler.profiling("block").start();
            sampler.set_memory(memory);
            drop(guard);
        }

        let records = recorder.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.calls == 1));
        assert_eq!(records[0].mem_usage, 4096.0);
        assert_eq!(records[1].mem_usage, 4096.0);
        assert_eq!(profiler.profile("block").unwrap().calls, 2);
    }

    #[test]
    fn test_summary_mode_reports_cumulative_record() {
        let (profiler, recorder, sampler) = profiler(true);

        for io in [100, 300] {
            profiler.profiling("summed").summary(true).run(|| sampler.set_io(io));
        }

        let last = recorder.records().pop().unwrap();
        assert_eq!(last.calls, 2);
        assert_eq!(last.io_usage, 300.0);
        assert_eq!(last.avg_io, 150.0);
    }

    #[test]
    fn test_quiet_neither_displays_nor_accumulates() {
        let (profiler, recorder, sampler) = profiler(true);

        let guard = profiler.profiling("quiet_block").quiet(true).start();
        sampler.set_io(64);
        let deltas = guard.finish().unwrap();

        assert_eq!(deltas.io, 64);
        assert!(recorder.records().is_empty());
        assert!(profiler.profile("quiet_block").is_none());
    }

    #[test]
    fn test_min_duration_suppresses_display_only() {
        let (profiler, recorder, _sampler) = profiler(true);

        profiler
            .profiling("short_block")
            .min_duration(Duration::from_secs(1))
            .run(|| std::thread::sleep(Duration::from_millis(5)));

        assert!(recorder.records().is_empty());
        assert_eq!(profiler.profile("short_block").unwrap().calls, 1);
    }

    #[test]
    fn test_disabled_guard_is_passthrough() {
        let (profiler, recorder, _sampler) = profiler(false);

        let guard = profiler.profiling("off").start();
        assert!(!guard.is_measuring());
        assert!(guard.finish().is_none());

        let value = profiler.profiling("off").run(|| 42);
        assert_eq!(value, 42);
        assert!(recorder.records().is_empty());
        assert!(profiler.profile("off").is_none());
    }

    #[test]
    fn test_measurement_survives_panic() {
        let (profiler, recorder, _sampler) = profiler(true);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = profiler.profiling("panicky").start();
            panic!("boom");
        }));

        assert!(result.is_err());
        assert_eq!(recorder.records().len(), 1);
        assert_eq!(profiler.profile("panicky").unwrap().calls, 1);
    }
}
