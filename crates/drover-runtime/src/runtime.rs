use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use drover_domain::labels::{LABEL_CLUSTER, LABEL_ROLE_CONTROL_PLANE};
use drover_domain::{AnyResource, LabelQuery, Namespace};
use drover_graph::{validate, ControllerMeta, InputDecl, InputKind, Mapper, ResolvedGraph};
use drover_store::{Event, ResourceStore};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamMap;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::controller::{Controller, ControllerCtx};
use crate::error::{ReconcileError, RuntimeError};

/// Hosts registered controllers: validates the graph, subscribes watches,
/// maintains per-id FIFO queues with bounded concurrency and drives the
/// requeue/backoff machinery.
pub struct Runtime {
    store: Arc<dyn ResourceStore>,
    controllers: Vec<Arc<dyn Controller>>,
    cancel: CancellationToken,
    backoff: Backoff,
}

impl Runtime {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            controllers: Vec::new(),
            cancel: CancellationToken::new(),
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn register<C: Controller>(&mut self, controller: C) -> &mut Self {
        self.controllers.push(Arc::new(controller));
        self
    }

    pub fn register_arc(&mut self, controller: Arc<dyn Controller>) -> &mut Self {
        self.controllers.push(controller);
        self
    }

    pub fn metas(&self) -> Vec<ControllerMeta> {
        self.controllers.iter().map(|c| c.meta()).collect()
    }

    /// Validate the registered controller graph without starting anything.
    pub fn validate(&self) -> Result<ResolvedGraph, RuntimeError> {
        Ok(validate(&self.metas())?)
    }

    /// Token that stops the runtime when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run all controllers until the cancellation token fires.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        let resolved = self.validate()?;
        info!(order = ?resolved.topo_order, "controller graph validated");

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        for ctrl in &self.controllers {
            let ctx = ControllerCtx::new(self.store.clone(), self.cancel.child_token());
            handles.push(tokio::spawn(supervise(ctrl.clone(), ctx, self.backoff)));

            let hook_ctx = ControllerCtx::new(self.store.clone(), self.cancel.child_token());
            handles.push(tokio::spawn(run_hook(ctrl.clone(), hook_ctx, self.backoff)));
        }
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}

// ── Per-controller supervision ────────────────────────────────────────────────

#[derive(Default)]
struct QueueState {
    queued: VecDeque<String>,
    queued_set: HashSet<String>,
    running: HashSet<String>,
    /// Ids that received an event while running; rescheduled on completion.
    dirty: HashSet<String>,
    attempts: HashMap<String, u32>,
}

impl QueueState {
    fn schedule(&mut self, id: String) {
        if self.running.contains(&id) {
            self.dirty.insert(id);
            return;
        }
        if self.queued_set.insert(id.clone()) {
            self.queued.push_back(id);
        }
    }

    fn next_ready(&mut self) -> Option<String> {
        let id = self.queued.pop_front()?;
        self.queued_set.remove(&id);
        self.running.insert(id.clone());
        Some(id)
    }
}

async fn supervise(ctrl: Arc<dyn Controller>, ctx: ControllerCtx, backoff: Backoff) {
    let name = ctrl.name();
    let inputs = ctrl.inputs();
    let primary = inputs
        .iter()
        .find(|input| input.input_kind == InputKind::Primary)
        .map(|input| (input.namespace, input.kind));

    let mut streams: StreamMap<usize, UnboundedReceiverStream<Event>> = StreamMap::new();
    for (idx, input) in inputs.iter().enumerate() {
        if input.input_kind == InputKind::Weak {
            continue;
        }
        match ctx.store.watch(input.namespace, input.kind).await {
            Ok(rx) => {
                streams.insert(idx, UnboundedReceiverStream::new(rx));
            }
            Err(e) => {
                error!(controller = name, kind = input.kind, error = %e, "watch failed");
                return;
            }
        }
    }

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(String, Result<(), ReconcileError>)>();
    let mut delays: DelayQueue<String> = DelayQueue::new();
    let mut state = QueueState::default();
    let concurrency = ctrl.concurrency().max(1);

    loop {
        tokio::select! {
            _ = ctx.cancelled() => break,
            Some((idx, event)) = streams.next(), if !streams.is_empty() => {
                for id in map_event(&ctx, &inputs[idx], primary, &event).await {
                    state.schedule(id);
                }
            }
            Some(expired) = delays.next(), if !delays.is_empty() => {
                state.schedule(expired.into_inner());
            }
            Some((id, result)) = done_rx.recv() => {
                complete(name, &mut state, &mut delays, backoff, id, result);
            }
        }

        // Dispatch up to the concurrency bound; per-id FIFO is preserved
        // because a running id is never re-dispatched.
        while state.running.len() < concurrency {
            let Some(id) = state.next_ready() else { break };
            let ctrl = ctrl.clone();
            let worker_ctx = ctx.clone();
            let done_tx = done_tx.clone();
            tokio::spawn(async move {
                let result = tokio::select! {
                    r = ctrl.reconcile(&worker_ctx, &id) => r,
                    _ = worker_ctx.cancelled() => Err(ReconcileError::retry("runtime shutdown")),
                };
                let _ = done_tx.send((id, result));
            });
        }
    }
}

fn complete(
    name: &str,
    state: &mut QueueState,
    delays: &mut DelayQueue<String>,
    backoff: Backoff,
    id: String,
    result: Result<(), ReconcileError>,
) {
    state.running.remove(&id);

    match result {
        Ok(()) | Err(ReconcileError::DestroyOutput) => {
            state.attempts.remove(&id);
        }
        Err(ref e) if e.is_skip() => {
            debug!(controller = name, id = %id, reason = %e, "reconcile skipped");
            state.attempts.remove(&id);
        }
        Err(ReconcileError::RequeueAfter(delay)) => {
            debug!(controller = name, id = %id, ?delay, "requeue requested");
            state.attempts.remove(&id);
            delays.insert(id.clone(), delay);
        }
        Err(ReconcileError::Fatal(message)) => {
            // Contract violation: retried only at the ceiling.
            error!(controller = name, id = %id, %message, "fatal reconcile error");
            delays.insert(id.clone(), backoff.cap());
        }
        Err(e) => {
            let attempt = bump(&mut state.attempts, &id);
            warn!(controller = name, id = %id, error = %e, attempt, "reconcile failed, backing off");
            delays.insert(id.clone(), backoff.delay(attempt));
        }
    }

    if state.dirty.remove(&id) {
        state.schedule(id);
    }
}

fn bump(attempts: &mut HashMap<String, u32>, id: &str) -> u32 {
    let counter = attempts.entry(id.to_string()).or_insert(0);
    *counter += 1;
    *counter
}

async fn map_event(
    ctx: &ControllerCtx,
    input: &InputDecl,
    primary: Option<(Namespace, &'static str)>,
    event: &Event,
) -> Vec<String> {
    if let Event::Error(message) = event {
        warn!(kind = input.kind, %message, "watch reported an error");
        return Vec::new();
    }
    let Some(res) = event.resource() else { return Vec::new() };
    match input.input_kind {
        InputKind::Primary => vec![res.meta.id.clone()],
        InputKind::Weak => Vec::new(),
        // Plain mapped inputs stop being delivered once the resource is gone.
        InputKind::Mapped if event.is_destroyed() => Vec::new(),
        InputKind::Mapped | InputKind::MappedDestroyReady => {
            resolve_mapper(ctx, &input.mapper, primary, res).await
        }
    }
}

async fn resolve_mapper(
    ctx: &ControllerCtx,
    mapper: &Mapper,
    primary: Option<(Namespace, &'static str)>,
    res: &AnyResource,
) -> Vec<String> {
    match mapper {
        Mapper::SameId => vec![res.meta.id.clone()],
        Mapper::None => Vec::new(),
        Mapper::ExtractLabelValue(key) => {
            res.meta.label(key).map(|v| vec![v.to_string()]).unwrap_or_default()
        }
        Mapper::ByLabel(key) => {
            let Some((namespace, kind)) = primary else { return Vec::new() };
            let query = LabelQuery::new().eq(*key, res.meta.id.clone());
            match ctx.store.list_any(namespace, kind, &query).await {
                Ok(list) => list.into_iter().map(|r| r.meta.id).collect(),
                Err(e) => {
                    warn!(error = %e, "label mapper list failed");
                    Vec::new()
                }
            }
        }
        Mapper::Custom(map) => map(res),
        Mapper::ByClusterLabel { control_plane_only } => {
            let Some((namespace, kind)) = primary else { return Vec::new() };
            let Some(cluster) = res.meta.label(LABEL_CLUSTER) else { return Vec::new() };
            let mut query = LabelQuery::new().eq(LABEL_CLUSTER, cluster);
            if *control_plane_only {
                query = query.exists(LABEL_ROLE_CONTROL_PLANE);
            }
            match ctx.store.list_any(namespace, kind, &query).await {
                Ok(list) => list.into_iter().map(|r| r.meta.id).collect(),
                Err(e) => {
                    warn!(error = %e, "cluster-label mapper list failed");
                    Vec::new()
                }
            }
        }
    }
}

async fn run_hook(ctrl: Arc<dyn Controller>, ctx: ControllerCtx, backoff: Backoff) {
    let mut attempt = 0u32;
    loop {
        match ctrl.run(&ctx).await {
            Ok(()) => break,
            Err(e) => {
                if ctx.is_cancelled() {
                    break;
                }
                attempt += 1;
                error!(controller = ctrl.name(), error = %e, attempt, "run hook failed, restarting");
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = tokio::time::sleep(backoff.delay(attempt)) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use drover_domain::{Machine, Resource};
    use drover_graph::OutputDecl;
    use drover_store::{InMemoryStore, ResourceStoreExt};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    fn machine(id: &str) -> Resource<Machine> {
        Resource::new(id, Machine::default())
    }

    struct RecordingController {
        concurrency: usize,
        hold: Duration,
        spans: Mutex<Vec<(String, Instant, Instant)>>,
    }

    #[async_trait]
    impl Controller for RecordingController {
        fn name(&self) -> &'static str {
            "RecordingController"
        }

        fn inputs(&self) -> Vec<InputDecl> {
            vec![InputDecl::primary::<Machine>()]
        }

        fn outputs(&self) -> Vec<OutputDecl> {
            Vec::new()
        }

        fn concurrency(&self) -> usize {
            self.concurrency
        }

        async fn reconcile(&self, _ctx: &ControllerCtx, id: &str) -> Result<(), ReconcileError> {
            let start = Instant::now();
            tokio::time::sleep(self.hold).await;
            self.spans.lock().unwrap().push((id.to_string(), start, Instant::now()));
            Ok(())
        }
    }

    struct OutcomeController {
        outcomes: Mutex<HashMap<String, VecDeque<Result<(), ReconcileError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl OutcomeController {
        fn new(scripted: Vec<(&str, Vec<Result<(), ReconcileError>>)>) -> Self {
            let outcomes = scripted
                .into_iter()
                .map(|(id, results)| (id.to_string(), results.into_iter().collect()))
                .collect();
            Self { outcomes: Mutex::new(outcomes), calls: Mutex::new(Vec::new()) }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Controller for OutcomeController {
        fn name(&self) -> &'static str {
            "OutcomeController"
        }

        fn inputs(&self) -> Vec<InputDecl> {
            vec![InputDecl::primary::<Machine>()]
        }

        fn outputs(&self) -> Vec<OutputDecl> {
            Vec::new()
        }

        async fn reconcile(&self, _ctx: &ControllerCtx, id: &str) -> Result<(), ReconcileError> {
            self.calls.lock().unwrap().push(id.to_string());
            self.outcomes
                .lock()
                .unwrap()
                .get_mut(id)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(Ok(()))
        }
    }

    async fn run_until<F: Fn() -> bool>(runtime: Arc<Runtime>, deadline: Duration, done: F) {
        let handle = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.run().await.unwrap() })
        };
        let start = Instant::now();
        while start.elapsed() < deadline && !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        runtime.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn per_id_serial_but_ids_run_in_parallel() {
        let store = Arc::new(InMemoryStore::new());
        let ctrl = Arc::new(RecordingController {
            concurrency: 4,
            hold: Duration::from_millis(40),
            spans: Mutex::new(Vec::new()),
        });
        let mut runtime = Runtime::new(store.clone());
        runtime.register_arc(ctrl.clone());
        let runtime = Arc::new(runtime);

        for id in ["a", "b", "c"] {
            store.create(machine(id)).await.unwrap();
        }

        let handle = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.run().await.unwrap() })
        };

        // Pile extra events onto "a" while the first batch reconciles so it is
        // re-queued behind its running reconcile.
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            store.modify::<Machine, _>("a", |m| m.spec.connected = !m.spec.connected).await.unwrap();
            let spans = ctrl.spans.lock().unwrap();
            if spans.iter().filter(|(id, ..)| id == "a").count() >= 2
                && spans.iter().filter(|(id, ..)| id != "a").count() >= 2
            {
                break;
            }
            drop(spans);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        runtime.shutdown();
        handle.await.unwrap();

        let spans = ctrl.spans.lock().unwrap().clone();

        // No two reconciles of the same id overlap in wall time.
        for (i, (id_a, start_a, end_a)) in spans.iter().enumerate() {
            for (id_b, start_b, end_b) in spans.iter().skip(i + 1) {
                if id_a == id_b {
                    let disjoint = end_a <= start_b || end_b <= start_a;
                    assert!(disjoint, "overlapping reconciles for id {}", id_a);
                }
            }
        }

        // Distinct ids did overlap: the initial batch runs concurrently.
        let overlapping_pair = spans.iter().enumerate().any(|(i, (id_a, start_a, end_a))| {
            spans.iter().skip(i + 1).any(|(id_b, start_b, end_b)| {
                id_a != id_b && start_a < end_b && start_b < end_a
            })
        });
        assert!(overlapping_pair, "expected cross-id parallelism, got {:?}", spans);
    }

    #[tokio::test]
    async fn requeue_after_fires_again_without_new_events() {
        let store = Arc::new(InMemoryStore::new());
        let ctrl = Arc::new(OutcomeController::new(vec![(
            "a",
            vec![Err(ReconcileError::requeue_after(Duration::from_millis(20)))],
        )]));
        let mut runtime = Runtime::new(store.clone());
        runtime.register_arc(ctrl.clone());
        let runtime = Arc::new(runtime);

        store.create(machine("a")).await.unwrap();
        let probe = ctrl.clone();
        run_until(runtime, Duration::from_secs(5), move || probe.calls().len() >= 2).await;

        assert!(ctrl.calls().len() >= 2, "requeue must re-run the id");
    }

    #[tokio::test]
    async fn failures_back_off_and_eventually_succeed() {
        let store = Arc::new(InMemoryStore::new());
        let ctrl = Arc::new(OutcomeController::new(vec![(
            "a",
            vec![
                Err(ReconcileError::retry("transient one")),
                Err(ReconcileError::retry("transient two")),
            ],
        )]));
        let mut runtime = Runtime::new(store.clone())
            .with_backoff(Backoff::new(Duration::from_millis(10), Duration::from_millis(50)));
        runtime.register_arc(ctrl.clone());
        let runtime = Arc::new(runtime);

        store.create(machine("a")).await.unwrap();
        let probe = ctrl.clone();
        run_until(runtime, Duration::from_secs(5), move || probe.calls().len() >= 3).await;

        assert!(ctrl.calls().len() >= 3);
    }

    #[tokio::test]
    async fn skip_waits_for_the_next_input_event() {
        let store = Arc::new(InMemoryStore::new());
        let ctrl = Arc::new(OutcomeController::new(vec![(
            "a",
            vec![Err(ReconcileError::skip("missing input")), Ok(())],
        )]));
        let mut runtime = Runtime::new(store.clone());
        runtime.register_arc(ctrl.clone());
        let runtime = Arc::new(runtime);

        store.create(machine("a")).await.unwrap();

        let handle = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.run().await.unwrap() })
        };
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) && ctrl.calls().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Settle: a skip must not requeue by itself.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ctrl.calls().len(), 1);

        store.modify::<Machine, _>("a", |m| m.spec.connected = true).await.unwrap();
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) && ctrl.calls().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        runtime.shutdown();
        handle.await.unwrap();
        assert_eq!(ctrl.calls().len(), 2);
    }
}
