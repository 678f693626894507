use std::path::PathBuf;

/// Errors surfaced to callers of the profiler API.
///
/// Measurement itself never fails: sampler faults degrade to zero readings and
/// malformed table rows are skipped. Only operations the caller explicitly asks
/// for (saving, loading, installing the global profiler) report errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to write profile table {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read profile table {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("profile table {} has no `{missing}` column", path.display())]
    InvalidHeader { path: PathBuf, missing: &'static str },

    #[error("profile table {} failed to load at startup, refusing to overwrite it", path.display())]
    Unloaded { path: PathBuf },

    #[error("the global profiler is already initialized")]
    AlreadyInitialized,

    #[error("unknown tracking mode {0:?}, expected one of: \"caller\", \"callee\", \"all\"")]
    InvalidMode(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure of a single resource counter. Never leaves the sampler layer.
#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("current process is not visible to the system sampler")]
    ProcessNotFound,

    #[error("sampler state poisoned by a panic")]
    Poisoned,

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error("GPU driver unavailable: {0}")]
    Driver(String),

    #[error("GPU device {index}: {message}")]
    Device { index: usize, message: String },

    #[error(transparent)]
    Os(#[from] std::io::Error),
}
