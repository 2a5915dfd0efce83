use std::sync::Arc;

use async_trait::async_trait;
use drover_graph::{ControllerMeta, InputDecl, OutputDecl};
use drover_store::ResourceStore;
use tokio_util::sync::CancellationToken;

use crate::error::ReconcileError;

/// Per-controller handle into the runtime: store access plus shutdown signal.
#[derive(Clone)]
pub struct ControllerCtx {
    pub store: Arc<dyn ResourceStore>,
    cancel: CancellationToken,
}

impl ControllerCtx {
    pub fn new(store: Arc<dyn ResourceStore>, cancel: CancellationToken) -> Self {
        Self { store, cancel }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the runtime is shutting down. Handlers blocked on I/O
    /// select against this and propagate cancellation into outbound RPCs.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// A reconciler registered with the runtime.
///
/// The runtime maintains a strict per-id FIFO for the primary input: a given
/// id is never reconciled concurrently with itself, while up to
/// `concurrency()` distinct ids run in parallel.
#[async_trait]
pub trait Controller: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn inputs(&self) -> Vec<InputDecl>;

    fn outputs(&self) -> Vec<OutputDecl>;

    fn concurrency(&self) -> usize {
        1
    }

    async fn reconcile(&self, ctx: &ControllerCtx, id: &str) -> Result<(), ReconcileError>;

    /// Hook for non-per-id work (e.g. draining a push channel). The default
    /// parks until shutdown; an implementation that returns an error is
    /// restarted with backoff.
    async fn run(&self, ctx: &ControllerCtx) -> Result<(), ReconcileError> {
        ctx.cancelled().await;
        Ok(())
    }

    fn meta(&self) -> ControllerMeta {
        ControllerMeta {
            name: self.name().to_string(),
            inputs: self.inputs(),
            outputs: self.outputs(),
            concurrency: self.concurrency(),
        }
    }
}
