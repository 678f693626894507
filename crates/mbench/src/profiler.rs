use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::error::{Error, Result};
use crate::output::{Format, ProfileRecord, Reporter, SummaryJson};
use crate::reporters;
use crate::sampler::{Deltas, ResourceSampler, SystemSampler};
use crate::scope::ScopeBuilder;
use crate::store::{AggregateProfile, AggregateStore};
use crate::tracker::{
    CallSite, CallTracker, Filter, InFlightStore, Keying, Mode, SlotPolicy,
};

pub const DEFAULT_CSV_PATH: &str = "mbench_profile.csv";

/// Settings fixed when a [`Profiler`] is built.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Read once; a disabled profiler is an inert passthrough.
    pub enabled: bool,
    /// Table the aggregates are loaded from and saved to.
    pub csv_path: Option<PathBuf>,
    /// Default for scoped measurements: show cumulative records.
    pub summary: bool,
}

struct State {
    tracker: CallTracker,
    store: AggregateStore,
}

/// A profiler instance: call tracker, aggregate store, sampler and reporter.
///
/// Create one with [`ProfilerBuilder`] and pass it by reference to measurement
/// sites, or install it process-wide with [`init`](crate::init).
pub struct Profiler {
    config: Config,
    sampler: Box<dyn ResourceSampler>,
    reporter: Box<dyn Reporter>,
    state: Mutex<State>,
    /// False while the configured table exists but could not be loaded.
    table_loaded: AtomicBool,
}

impl Profiler {
    pub fn builder() -> ProfilerBuilder {
        ProfilerBuilder::new()
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sampler(&self) -> &dyn ResourceSampler {
        self.sampler.as_ref()
    }

    pub fn reporter(&self) -> &dyn Reporter {
        self.reporter.as_ref()
    }

    fn state(&self) -> Option<MutexGuard<'_, State>> {
        match self.state.lock() {
            Ok(state) => Some(state),
            Err(_) => {
                tracing::warn!("[mbench] profiler state poisoned, measurement dropped");
                None
            }
        }
    }

    /// Start of a call reported by an event source.
    pub fn enter(&self, site: &CallSite<'_>, invoking_module: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        let Some(mut state) = self.state() else {
            return false;
        };
        state
            .tracker
            .enter(site, invoking_module, self.sampler.as_ref())
    }

    /// End of a call reported by an event source.
    pub fn exit(&self, site: &CallSite<'_>, invoking_module: &str) -> Option<Deltas> {
        if !self.config.enabled {
            return None;
        }
        let mut state = self.state()?;
        let State { tracker, store } = &mut *state;
        tracker.exit(site, invoking_module, self.sampler.as_ref(), store)
    }

    /// Restricts call tracking to `module` according to `mode`.
    pub fn set_target(&self, module: &str, mode: Mode) {
        if let Some(mut state) = self.state() {
            state.tracker.set_filter(Filter::new(module, mode));
        }
    }

    pub fn filter(&self) -> Filter {
        self.state()
            .map(|state| state.tracker.filter().clone())
            .unwrap_or_default()
    }

    pub fn in_flight(&self) -> usize {
        self.state().map_or(0, |state| state.tracker.in_flight())
    }

    /// Starts building a scoped measurement named `name`.
    pub fn profiling(&self, name: impl Into<std::borrow::Cow<'static, str>>) -> ScopeBuilder<'_> {
        ScopeBuilder::new(self, name.into())
    }

    /// Folds `deltas` into the aggregate for `name` and returns the cumulative
    /// record.
    pub fn record(&self, name: &str, deltas: &Deltas) -> Option<ProfileRecord> {
        let mut state = self.state()?;
        let profile = state.store.update(name, deltas);
        Some(ProfileRecord::cumulative(profile))
    }

    pub fn profile(&self, name: &str) -> Option<AggregateProfile> {
        self.state()?.store.get(name).cloned()
    }

    /// Runs `read` against the aggregate store.
    pub fn with_store<R>(&self, read: impl FnOnce(&AggregateStore) -> R) -> Option<R> {
        self.state().map(|state| read(&state.store))
    }

    pub fn set_notes(&self, name: &str, notes: impl Into<String>) -> bool {
        self.state()
            .is_some_and(|mut state| state.store.set_notes(name, notes))
    }

    pub fn summary(&self) -> SummaryJson {
        self.with_store(AggregateStore::summary_json)
            .unwrap_or_default()
    }

    /// Hands the cumulative summary to the reporter.
    pub fn report_summary(&self) {
        let summary = self.summary();
        if let Err(e) = self.reporter.report_summary(&summary) {
            tracing::warn!("[mbench] failed to report summary: {e}");
        }
    }

    /// Replaces the aggregates with the configured table. No-op without a path.
    pub fn load(&self) -> Result<usize> {
        let Some(path) = &self.config.csv_path else {
            return Ok(0);
        };
        let loaded = self.load_from(path)?;
        self.table_loaded.store(true, Ordering::Release);
        Ok(loaded)
    }

    pub fn load_from(&self, path: &Path) -> Result<usize> {
        let fresh = AggregateStore::from_path(path)?;
        let loaded = fresh.len();
        if let Some(mut state) = self.state() {
            state.store = fresh;
        }
        Ok(loaded)
    }

    /// Persists the aggregates to the configured table. No-op without a path.
    ///
    /// Fails with [`Error::Unloaded`] when the table could not be loaded at
    /// startup, leaving the file untouched until [`load`](Self::load) succeeds.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.config.csv_path else {
            return Ok(());
        };
        if !self.table_loaded.load(Ordering::Acquire) {
            return Err(Error::Unloaded { path: path.clone() });
        }
        self.save_to(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Clone so the file write happens outside the lock.
        let store = self.with_store(AggregateStore::clone).unwrap_or_default();
        store.save(path)
    }

    /// Final flush: saves the table and, in summary mode, reports the summary.
    pub fn shutdown(&self) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        if self.config.summary {
            self.report_summary();
        }
        self.save()
    }

    /// Guard that calls [`shutdown`](Self::shutdown) when dropped.
    pub fn session(&self) -> SessionGuard<'_> {
        SessionGuard { profiler: self }
    }
}

/// Flushes a profiler when it goes out of scope.
///
/// Returned by [`Profiler::session`] and created by `#[mbench::main]`.
#[must_use = "the profiler is flushed when the guard is dropped"]
pub struct SessionGuard<'a> {
    profiler: &'a Profiler,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.profiler.shutdown() {
            eprintln!("[mbench] {e}");
        }
    }
}

/// Builder for a [`Profiler`].
///
/// # Examples
///
/// ```rust
/// use mbench::{Format, Mode, ProfilerBuilder};
///
/// let profiler = ProfilerBuilder::new()
///     .enabled(true)
///     .target("my_app::db", Mode::Callee)
///     .format(Format::Json)
///     .build();
/// assert!(profiler.is_enabled());
/// ```
pub struct ProfilerBuilder {
    config: Config,
    format: Format,
    filter: Filter,
    slot_policy: SlotPolicy,
    keying: Keying,
    in_flight_store: Option<Box<dyn InFlightStore>>,
    sampler: Option<Box<dyn ResourceSampler>>,
    reporter: Option<Box<dyn Reporter>>,
}

impl Default for ProfilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.trim();
            v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
        })
        .unwrap_or(false)
}

impl ProfilerBuilder {
    /// A disabled profiler without persistence; enable it explicitly.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            format: Format::Table,
            filter: Filter::all(),
            slot_policy: SlotPolicy::default(),
            keying: Keying::default(),
            in_flight_store: None,
            sampler: None,
            reporter: None,
        }
    }

    /// Builder configured from the environment.
    ///
    /// * `MBENCH` - enables profiling (`1`, `true` or `yes`)
    /// * `MBENCH_CSV` - table path, default [`DEFAULT_CSV_PATH`]
    /// * `MBENCH_SUMMARY` - cumulative records for scoped measurements
    /// * `MBENCH_JSON` - JSON reporter instead of the table reporter
    /// * `MBENCH_TARGET` - module call tracking is restricted to
    /// * `MBENCH_MODE` - `caller` (default), `callee` or `all`, applied to `MBENCH_TARGET`
    pub fn from_env() -> Self {
        let csv_path = std::env::var("MBENCH_CSV")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CSV_PATH.to_string());

        let mut builder = Self::new()
            .enabled(env_flag("MBENCH"))
            .csv_path(csv_path)
            .summary(env_flag("MBENCH_SUMMARY"));

        if env_flag("MBENCH_JSON") {
            builder = builder.format(Format::Json);
        }

        if let Ok(target) = std::env::var("MBENCH_TARGET") {
            let mode = match std::env::var("MBENCH_MODE") {
                Ok(raw) => raw.parse::<Mode>().unwrap_or_else(|e| {
                    tracing::warn!("[mbench] {e}, using caller mode");
                    Mode::Caller
                }),
                Err(_) => Mode::Caller,
            };
            builder = builder.target(target, mode);
        }

        builder
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn csv_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.csv_path = Some(path.into());
        self
    }

    pub fn summary(mut self, summary: bool) -> Self {
        self.config.summary = summary;
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Tracks calls relative to `module`, see [`Mode`].
    pub fn target(mut self, module: impl Into<String>, mode: Mode) -> Self {
        self.filter = Filter::new(module, mode);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn slot_policy(mut self, policy: SlotPolicy) -> Self {
        self.slot_policy = policy;
        self
    }

    pub fn keying(mut self, keying: Keying) -> Self {
        self.keying = keying;
        self
    }

    pub fn in_flight_store(mut self, store: Box<dyn InFlightStore>) -> Self {
        self.in_flight_store = Some(store);
        self
    }

    pub fn sampler(mut self, sampler: Box<dyn ResourceSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Custom reporter; overrides any format setting.
    pub fn reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Builds the profiler, seeding the store from the table when enabled.
    ///
    /// An unreadable table is logged and the profiler starts empty. It then
    /// refuses to [`save`](Profiler::save) over that table.
    pub fn build(self) -> Profiler {
        let reporter = self
            .reporter
            .unwrap_or_else(|| reporters::for_format(self.format));
        let sampler = self
            .sampler
            .unwrap_or_else(|| Box::new(SystemSampler::new()));

        let mut tracker = CallTracker::new(self.filter)
            .slot_policy(self.slot_policy)
            .keying(self.keying);
        if let Some(store) = self.in_flight_store {
            tracker = tracker.in_flight_store(store);
        }

        let mut table_loaded = true;
        let store = match (&self.config.csv_path, self.config.enabled) {
            (Some(path), true) => AggregateStore::from_path(path).unwrap_or_else(|e| {
                tracing::warn!(
                    "[mbench] starting with empty profiles, {} will not be overwritten: {e}",
                    path.display()
                );
                table_loaded = false;
                AggregateStore::new()
            }),
            _ => AggregateStore::new(),
        };

        Profiler {
            config: self.config,
            sampler,
            reporter,
            state: Mutex::new(State { tracker, store }),
            table_loaded: AtomicBool::new(table_loaded),
        }
    }
}

static PROFILER: OnceLock<Profiler> = OnceLock::new();

/// Installs the process-wide profiler.
///
/// Fails with [`Error::AlreadyInitialized`] when a profiler was already
/// installed, including one created lazily by [`global`].
pub fn init(builder: ProfilerBuilder) -> Result<&'static Profiler> {
    let mut installed = false;
    let profiler = PROFILER.get_or_init(|| {
        installed = true;
        builder.build()
    });
    if installed {
        Ok(profiler)
    } else {
        Err(Error::AlreadyInitialized)
    }
}

/// The process-wide profiler, created from the environment on first use.
///
/// Initialization is not reentrant: do not call this from a custom sampler or
/// reporter used to build the global profiler.
pub fn global() -> &'static Profiler {
    PROFILER.get_or_init(|| ProfilerBuilder::from_env().build())
}

/// The process-wide profiler if one exists, without creating it.
pub fn try_global() -> Option<&'static Profiler> {
    PROFILER.get()
}

/// Flushes the process-wide profiler, if one was created.
pub fn shutdown() -> Result<()> {
    match PROFILER.get() {
        Some(profiler) => profiler.shutdown(),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::ManualSampler;
    use std::sync::Arc;

    fn is_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_profiler_is_send_sync() {
        is_send_sync::<Profiler>();
    }

    #[test]
    fn test_disabled_profiler_is_inert() {
        let profiler = ProfilerBuilder::new().build();
        let site = CallSite::new("f", "m");
        assert!(!profiler.enter(&site, "m"));
        assert!(profiler.exit(&site, "m").is_none());
        assert!(profiler.summary().is_empty());
        assert!(profiler.shutdown().is_ok());
    }

    #[test]
    fn test_set_target_changes_filter() {
        let sampler = Arc::new(ManualSampler::new());
        let profiler = ProfilerBuilder::new()
            .enabled(true)
            .sampler(Box::new(Arc::clone(&sampler)))
            .build();

        profiler.set_target("my_app", Mode::Callee);
        assert_eq!(profiler.filter(), Filter::new("my_app", Mode::Callee));

        let inside = CallSite::new("my_app::run", "my_app");
        let outside = CallSite::new("dep::run", "dep");
        for site in [inside, outside] {
            profiler.enter(&site, "main");
            profiler.exit(&site, "main");
        }
        assert_eq!(profiler.profile("my_app::run").unwrap().calls, 1);
        assert!(profiler.profile("dep::run").is_none());
    }

    #[test]
    fn test_builder_loads_table_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.csv");
        let seeded = ProfilerBuilder::new().enabled(true).csv_path(&path).build();
        seeded.record("warm", &Deltas::default());
        seeded.set_notes("warm", "cache primed");
        seeded.save().unwrap();

        let reloaded = ProfilerBuilder::new().enabled(true).csv_path(&path).build();
        let profile = reloaded.profile("warm").unwrap();
        assert_eq!(profile.calls, 1);
        assert_eq!(profile.notes, "cache primed");

        let disabled = ProfilerBuilder::new().csv_path(&path).build();
        assert!(disabled.profile("warm").is_none());
    }

    #[test]
    fn test_builder_survives_corrupt_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.csv");
        std::fs::write(&path, "not,a,profile\n1,2,3\n").unwrap();

        let profiler = ProfilerBuilder::new().enabled(true).csv_path(&path).build();
        assert!(profiler.summary().is_empty());
        assert!(matches!(
            profiler.load(),
            Err(Error::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_unloaded_table_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.csv");
        let hand_edited = "Fn,Calls\ntrain,4\n";
        std::fs::write(&path, hand_edited).unwrap();

        let profiler = ProfilerBuilder::new()
            .enabled(true)
            .csv_path(&path)
            .sampler(Box::new(ManualSampler::new()))
            .build();
        profiler.record("fresh", &Deltas::default());

        assert!(matches!(profiler.save(), Err(Error::Unloaded { .. })));
        assert!(matches!(profiler.shutdown(), Err(Error::Unloaded { .. })));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), hand_edited);

        // an explicit path is still honoured
        let elsewhere = dir.path().join("elsewhere.csv");
        profiler.save_to(&elsewhere).unwrap();
        assert!(AggregateStore::from_path(&elsewhere).unwrap().get("fresh").is_some());

        // once the table is repaired and loaded, saving resumes
        std::fs::write(&path, "Function,Calls\ntrain,4\n").unwrap();
        assert_eq!(profiler.load().unwrap(), 1);
        profiler.record("fresh", &Deltas::default());
        profiler.save().unwrap();
        let saved = AggregateStore::from_path(&path).unwrap();
        assert_eq!(saved.get("train").unwrap().calls, 4);
        assert_eq!(saved.get("fresh").unwrap().calls, 1);
    }
}
