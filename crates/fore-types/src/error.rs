use thiserror::Error;

/// Error taxonomy for the orchestration core.
///
/// Propagation policy:
/// - `Validation` and `InvalidState` are local and synchronous — always
///   reported back to the caller, never fatal to the session.
/// - `RateLimit` is surfaced distinctly so callers can back off and retry
///   later instead of treating it as a generic failure.
/// - `Timeout` and `Cancelled` both force-kill the process tree first;
///   `Cancelled` is a normal outcome, not a failure.
/// - Artifact-cleanup IO failures are logged and swallowed at the call
///   site; spawn failures are fatal to that run.
#[derive(Debug, Error)]
pub enum ForemanError {
    #[error("command rejected: {0}")]
    Validation(String),

    #[error("agent rate limit hit: {0}")]
    RateLimit(String),

    #[error("agent run exceeded {0}s ceiling")]
    Timeout(u64),

    #[error("run cancelled by user")]
    Cancelled,

    #[error("unknown project: {0}")]
    NotFound(String),

    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("failed to spawn agent process: {0}")]
    Spawn(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ForemanError {
    /// True for outcomes that should be shown as notices, not failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
