//! Call-level resource profiler: wall time, CPU time, memory, GPU memory and
//! disk I/O deltas per function or block, aggregated across calls and
//! persisted to a CSV table between runs.
//!
//! Profiling is off unless `MBENCH=1` is set (or a profiler is built with
//! [`ProfilerBuilder::enabled`]). When off, every instrumented function and
//! block runs as a plain passthrough.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! #[mbench::profile(min_duration_ms = 100)]
//! fn load_model() {
//!     std::thread::sleep(Duration::from_millis(150));
//! }
//!
//! #[mbench::main]
//! fn main() {
//!     load_model();
//!
//!     mbench::profile_block!("warmup", {
//!         std::thread::sleep(Duration::from_millis(10));
//!     });
//! }
//! ```
//!
//! Call tracking relative to a module is available through
//! [`#[track]`](track) together with [`profileme!`]:
//!
//! ```rust,no_run
//! mod db {
//!     #[mbench::track]
//!     pub fn query() {}
//! }
//!
//! fn main() {
//!     // record every tracked call made from this module
//!     mbench::profileme!(mbench::Mode::Caller);
//!     db::query();
//!     mbench::shutdown().ok();
//! }
//! ```

pub mod error;
mod frames;
pub mod output;
mod profiler;
mod reporters;
pub mod sampler;
mod scope;
pub mod store;
mod table;
pub(crate) mod tid;
pub mod tracker;

pub use mbench_macros::{main, profile, skip, track, track_all};

pub use error::{Error, Result};
pub use output::{
    display_profile_info, format_bytes, format_duration, format_signed_bytes,
    shorten_function_name, should_display, Format, ProfileRecord, Reporter, SummaryJson,
    SummaryRow,
};
pub use profiler::{
    global, init, shutdown, try_global, Config, Profiler, ProfilerBuilder, SessionGuard,
    DEFAULT_CSV_PATH,
};
pub use reporters::{
    display_table, print_rows, sorted_rows, JsonPrettyReporter, JsonReporter, TableReporter,
};
pub use sampler::{
    default_gpu_probe, Deltas, GpuProbe, ManualSampler, NoGpu, ResourceSampler, Snapshot,
    SystemSampler,
};
#[cfg(feature = "nvml")]
pub use sampler::NvmlGpu;
pub use scope::{ProfileGuard, ScopeBuilder};
pub use store::{AggregateProfile, AggregateStore, Averages};
pub use table::HEADER as CSV_HEADER;
pub use tracker::{CallSite, Filter, Keying, Mode, SlotPolicy};

#[doc(hidden)]
pub use frames::CallGuard;

/// Starts building a scoped measurement on the global profiler.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
///
/// let total = mbench::profiling("sum")
///     .min_duration(Duration::from_millis(5))
///     .run(|| (1..=10).sum::<u32>());
/// assert_eq!(total, 55);
/// ```
pub fn profiling(name: impl Into<std::borrow::Cow<'static, str>>) -> ScopeBuilder<'static> {
    global().profiling(name)
}

/// Reports the start of a call to the global profiler.
///
/// Returns whether the call is being tracked. Pair every `enter` with an
/// [`exit`] for the same site and invoking module.
pub fn enter(site: &CallSite<'_>, invoking_module: &str) -> bool {
    global().enter(site, invoking_module)
}

/// Reports the end of a call to the global profiler.
pub fn exit(site: &CallSite<'_>, invoking_module: &str) -> Option<Deltas> {
    global().exit(site, invoking_module)
}

/// Points the global call tracker at `module`. Prefer [`profileme!`].
pub fn profileme(module: &str, mode: Mode) {
    global().set_target(module, mode);
}

/// Target module for [`profileme!`]: also attributes untracked code on the
/// current thread to `module`.
#[doc(hidden)]
pub fn profileme_here(module: &'static str, mode: Mode) {
    frames::set_base_module(module);
    profileme(module, mode);
}

#[doc(hidden)]
pub fn profileme_str(module: &'static str, mode: &str) {
    match mode.parse::<Mode>() {
        Ok(mode) => profileme_here(module, mode),
        Err(e) => tracing::warn!("[mbench] {e}, call tracking target unchanged"),
    }
}

/// Restricts call tracking to the invoking module.
///
/// Untracked code on the current thread, such as the body of `main`, counts as
/// the invoking module for caller mode.
///
/// Accepts a [`Mode`] or one of `"caller"`, `"callee"` and `"all"`. An
/// unknown mode string is logged and leaves the tracker unchanged.
///
/// # Examples
///
/// ```rust
/// mbench::profileme!(mbench::Mode::Callee);
/// mbench::profileme!("caller");
/// ```
#[macro_export]
macro_rules! profileme {
    () => {
        $crate::profileme_here(module_path!(), $crate::Mode::Caller)
    };
    ($mode:literal) => {
        $crate::profileme_str(module_path!(), $mode)
    };
    ($mode:expr) => {
        $crate::profileme_here(module_path!(), $mode)
    };
}

/// Measures a code block on the global profiler.
///
/// The block's value is returned. Equivalent to wrapping the block in
/// [`profiling`] with default options.
///
/// # Examples
///
/// ```rust
/// let squares: Vec<u64> = mbench::profile_block!("squares", {
///     (0..100u64).map(|n| n * n).collect()
/// });
/// assert_eq!(squares.len(), 100);
/// ```
#[macro_export]
macro_rules! profile_block {
    ($label:expr, $expr:expr) => {{
        let _guard = $crate::profiling($label).start();

        $expr
    }};
}
