// =============================================================================
// Error taxonomy
// =============================================================================
//
// Six kinds, matching the propagation policy: transient transport is
// retried by the caller up to its own attempt cap; precondition and
// not-found are returned, never retried; invariant violations fail fast in
// debug and quarantine the symbol in release; timeouts are left to the
// caller; fatal errors are logged at ERROR and the process exits non-zero.
// =============================================================================

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum FlowtraceError {
    #[error("transient transport error: {0}")]
    Transient(String),

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl FlowtraceError {
    pub fn invalid_symbol(symbol: &str) -> Self {
        FlowtraceError::Precondition(format!(
            "symbol '{symbol}' does not match ^[A-Z0-9_]{{3,30}}$"
        ))
    }

    pub fn no_workers() -> Self {
        FlowtraceError::Precondition("hash ring has no workers".to_string())
    }

    pub fn backpressure(worker_id: &str) -> Self {
        FlowtraceError::Transient(format!("worker '{worker_id}' over max_queue, backpressure"))
    }

    pub fn not_connected() -> Self {
        FlowtraceError::Transient("IPC client not connected".to_string())
    }

    pub fn connection_closed() -> Self {
        FlowtraceError::Transient("IPC connection closed".to_string())
    }

    /// `true` for kinds that a caller may retry without further judgment
    /// (idempotent actions only — see §7 propagation policy).
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlowtraceError::Transient(_) | FlowtraceError::Timeout(_))
    }
}

pub type FlowtraceResult<T> = Result<T, FlowtraceError>;
