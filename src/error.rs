use std::fmt;

/// Errors the driver can surface to a caller without aborting the process.
///
/// Precondition violations (malformed configuration, size mismatches, an
/// out-of-range conditioned ancestor) are programmer errors and are raised via
/// `assert!`/`panic!` at the call site instead of through this enum, matching
/// the teacher's own precondition style (e.g. `extended_kalman_filter.rs`
/// unwraps a non-invertible innovation covariance rather than threading a
/// `Result` through the estimate step).
#[derive(Debug)]
pub enum ApfError {
    /// The output sink failed to persist a flushed step. The cache entry for
    /// that step is retained so the caller may retry `flush()`.
    SinkWrite { step: usize, source: String },
    /// The simulator reported a numerical failure it could not recover from.
    Simulator(String),
    /// The resampler failed; the driver has no fallback once ESS has chosen
    /// to resample.
    Resampler(String),
}

impl fmt::Display for ApfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApfError::SinkWrite { step, source } => {
                write!(f, "output sink failed writing step {step}: {source}")
            }
            ApfError::Simulator(msg) => write!(f, "simulator failure: {msg}"),
            ApfError::Resampler(msg) => write!(f, "resampler failure: {msg}"),
        }
    }
}

impl std::error::Error for ApfError {}

pub type ApfResult<T> = Result<T, ApfError>;
