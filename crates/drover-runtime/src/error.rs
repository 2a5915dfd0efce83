use std::time::Duration;

use drover_store::StoreError;
use thiserror::Error;

/// Outcome of a reconcile that is not a plain success.
///
/// `Skip` and `RequeueAfter` are control flow, not failures: a handler that
/// cannot make progress returns one of them instead of blocking, and the
/// runtime waits for the next input event or the given delay.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("skipped: {0}")]
    Skip(String),

    #[error("requeue after {0:?}")]
    RequeueAfter(Duration),

    /// The output should be removed although the input still lives.
    #[error("output destruction requested")]
    DestroyOutput,

    /// Transient failure; the runtime requeues with exponential backoff.
    #[error("transient: {0}")]
    Retry(String),

    /// Contract violation; logged at error level and retried at the backoff
    /// ceiling.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    pub fn skip(reason: impl Into<String>) -> Self {
        ReconcileError::Skip(reason.into())
    }

    pub fn retry(message: impl Into<String>) -> Self {
        ReconcileError::Retry(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        ReconcileError::Fatal(message.into())
    }

    pub fn requeue_after(delay: Duration) -> Self {
        ReconcileError::RequeueAfter(delay)
    }

    /// Missing inputs wait for the next input event like an explicit skip.
    pub fn is_skip(&self) -> bool {
        match self {
            ReconcileError::Skip(_) => true,
            ReconcileError::Store(e) => e.is_not_found(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("controller graph rejected: {0}")]
    Graph(#[from] drover_graph::GraphError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
