use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use drover_domain::labels::{ANNOTATION_OWNER, LABEL_CLUSTER};
use drover_domain::{
    Machine, MachineStage, MachineStatus, MachineStatusSnapshot, PowerStage, Resource,
    ResourceRef, ResourceSpec, TalosConfig,
};
use drover_graph::{InputDecl, OutputDecl};
use drover_machine::ClientProvider;
use drover_runtime::{Controller, ControllerCtx, ReconcileError};
use drover_store::{ResourceStore, ResourceStoreExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const NAME: &str = "MachineStatusSnapshotController";

/// Capacity of the push channels; senders back-pressure instead of queueing
/// unbounded deltas.
const PUSH_CHANNEL_CAPACITY: usize = 64;

/// One stage/power delta for a machine, pushed over the link or by the infra
/// provider, or produced by the periodic pull task.
#[derive(Debug, Clone)]
pub struct InboundSnapshot {
    pub machine_id: String,
    pub stage: Option<MachineStage>,
    pub ready: Option<bool>,
    pub power_stage: Option<PowerStage>,
}

/// Ingests `MachineStatusSnapshot` deltas from two push channels and a
/// per-machine pull task started while the machine is connected.
pub struct MachineStatusSnapshotController {
    provider: Arc<dyn ClientProvider>,
    link_rx: Mutex<Option<mpsc::Receiver<InboundSnapshot>>>,
    power_rx: Mutex<Option<mpsc::Receiver<InboundSnapshot>>>,
    link_tx: mpsc::Sender<InboundSnapshot>,
    pull_tasks: Mutex<HashMap<String, CancellationToken>>,
    pull_interval: Duration,
}

impl MachineStatusSnapshotController {
    /// Returns the controller plus the link and power senders for the
    /// inbound event plumbing.
    pub fn new(
        provider: Arc<dyn ClientProvider>,
        pull_interval: Duration,
    ) -> (Self, mpsc::Sender<InboundSnapshot>, mpsc::Sender<InboundSnapshot>) {
        let (link_tx, link_rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
        let (power_tx, power_rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
        let controller = Self {
            provider,
            link_rx: Mutex::new(Some(link_rx)),
            power_rx: Mutex::new(Some(power_rx)),
            link_tx: link_tx.clone(),
            pull_tasks: Mutex::new(HashMap::new()),
            pull_interval,
        };
        (controller, link_tx, power_tx)
    }

    async fn apply_delta(
        &self,
        ctx: &ControllerCtx,
        delta: &InboundSnapshot,
    ) -> Result<(), ReconcileError> {
        let machine = ctx.store.get_opt::<Machine>(&delta.machine_id).await?;
        let known = machine.map(|m| !m.meta.is_tearing_down()).unwrap_or(false);
        if !known {
            debug!(machine = %delta.machine_id, "dropping delta for unknown machine");
            return Ok(());
        }

        loop {
            match ctx.store.get_opt::<MachineStatusSnapshot>(&delta.machine_id).await? {
                Some(existing) => {
                    let mut updated = existing.clone();
                    merge(&mut updated, delta);
                    if updated.spec == existing.spec {
                        return Ok(());
                    }
                    match ctx.store.update(updated).await {
                        Ok(_) => return Ok(()),
                        Err(e) if e.is_version_conflict() => continue,
                        Err(e) if e.is_phase_conflict() => {
                            debug!(machine = %delta.machine_id, "snapshot tearing down, delta dropped");
                            return Ok(());
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                None => {
                    let mut snapshot = Resource::<MachineStatusSnapshot>::fresh(&delta.machine_id);
                    merge(&mut snapshot, delta);
                    snapshot.meta.set_annotation(ANNOTATION_OWNER, NAME);
                    match ctx.store.create(snapshot).await {
                        Ok(_) => return Ok(()),
                        // Lost the creation race; merge into the winner.
                        Err(e) if e.is_already_exists() => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }
}

fn merge(snapshot: &mut Resource<MachineStatusSnapshot>, delta: &InboundSnapshot) {
    if let Some(stage) = delta.stage {
        snapshot.spec.stage = stage;
    }
    if let Some(ready) = delta.ready {
        snapshot.spec.ready = ready;
    }
    if let Some(power_stage) = delta.power_stage {
        snapshot.spec.power_stage = power_stage;
    }
}

#[async_trait]
impl Controller for MachineStatusSnapshotController {
    fn name(&self) -> &'static str {
        NAME
    }

    fn inputs(&self) -> Vec<InputDecl> {
        vec![InputDecl::primary::<Machine>()]
    }

    fn outputs(&self) -> Vec<OutputDecl> {
        vec![OutputDecl::exclusive::<MachineStatusSnapshot>()]
    }

    /// Starts and stops the per-machine pull task; the snapshot itself is
    /// written by the run hook draining the channels.
    async fn reconcile(&self, ctx: &ControllerCtx, id: &str) -> Result<(), ReconcileError> {
        let machine = ctx.store.get_opt::<Machine>(id).await?;
        let pull_wanted =
            machine.as_ref().map(|m| m.spec.connected && !m.meta.is_tearing_down()).unwrap_or(false);

        if pull_wanted {
            let mut tasks = self.pull_tasks.lock().unwrap();
            if !tasks.contains_key(id) {
                let token = ctx.cancellation().child_token();
                tasks.insert(id.to_string(), token.clone());
                tokio::spawn(pull_loop(
                    self.provider.clone(),
                    ctx.store.clone(),
                    self.link_tx.clone(),
                    id.to_string(),
                    token,
                    self.pull_interval,
                ));
            }
        } else if let Some(token) = self.pull_tasks.lock().unwrap().remove(id) {
            debug!(machine = %id, "stopping stage pull task");
            token.cancel();
        }

        if machine.is_none() {
            let snapshot_ref = ResourceRef::new(
                MachineStatusSnapshot::NAMESPACE,
                MachineStatusSnapshot::KIND,
                id,
            );
            ctx.store.teardown_and_destroy(&snapshot_ref, Some(NAME)).await?;
        }
        Ok(())
    }

    async fn run(&self, ctx: &ControllerCtx) -> Result<(), ReconcileError> {
        let mut link_rx = match self.link_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => return Err(ReconcileError::fatal("snapshot run hook started twice")),
        };
        let mut power_rx = self.power_rx.lock().unwrap().take().expect("taken with link_rx");

        loop {
            let delta = tokio::select! {
                _ = ctx.cancelled() => break,
                delta = link_rx.recv() => delta,
                delta = power_rx.recv() => delta,
            };
            let Some(delta) = delta else { break };
            if let Err(e) = self.apply_delta(ctx, &delta).await {
                warn!(machine = %delta.machine_id, error = %e, "snapshot merge failed");
            }
        }

        *self.link_rx.lock().unwrap() = Some(link_rx);
        *self.power_rx.lock().unwrap() = Some(power_rx);
        Ok(())
    }
}

/// Periodically refresh a connected machine's stage through its own API.
async fn pull_loop(
    provider: Arc<dyn ClientProvider>,
    store: Arc<dyn ResourceStore>,
    tx: mpsc::Sender<InboundSnapshot>,
    machine_id: String,
    token: CancellationToken,
    interval: Duration,
) {
    debug!(machine = %machine_id, "starting stage pull task");
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let machine_status = match store.get_opt::<MachineStatus>(&machine_id).await {
            Ok(Some(status)) if status.spec.connected => status,
            _ => continue,
        };
        let address = machine_status.spec.management_address.clone();

        let client = if machine_status.spec.maintenance {
            provider.maintenance(&address).await
        } else {
            let cluster = match store.get_opt::<Machine>(&machine_id).await {
                Ok(Some(machine)) => machine.meta.label(LABEL_CLUSTER).map(str::to_string),
                _ => None,
            };
            let Some(cluster) = cluster else { continue };
            let talosconfig = match store.get_opt::<TalosConfig>(&cluster).await {
                Ok(Some(config)) => config,
                _ => continue,
            };
            provider.cluster(&talosconfig.spec, &address).await
        };
        let client = match client {
            Ok(client) => client,
            Err(e) => {
                debug!(machine = %machine_id, error = %e, "pull connect failed");
                continue;
            }
        };

        match client.machine_status().await {
            Ok(status) => {
                let delta = InboundSnapshot {
                    machine_id: machine_id.clone(),
                    stage: Some(status.stage),
                    ready: Some(status.ready),
                    power_stage: None,
                };
                if tx.send(delta).await.is_err() {
                    break;
                }
            }
            Err(e) => debug!(machine = %machine_id, error = %e, "stage pull failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_machine::MockProvider;
    use drover_store::{InMemoryStore, ResourceStore};

    const MACHINE: &str = "m1";
    const ADDRESS: &str = "10.0.0.7:50000";

    struct Senders {
        _link: mpsc::Sender<InboundSnapshot>,
        _power: mpsc::Sender<InboundSnapshot>,
    }

    fn fixture() -> (
        Arc<InMemoryStore>,
        Arc<MockProvider>,
        Arc<MachineStatusSnapshotController>,
        Senders,
    ) {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        let (ctrl, link, power) =
            MachineStatusSnapshotController::new(provider.clone(), Duration::from_millis(20));
        (store, provider, Arc::new(ctrl), Senders { _link: link, _power: power })
    }

    fn ctx(store: &Arc<InMemoryStore>) -> ControllerCtx {
        ControllerCtx::new(store.clone(), CancellationToken::new())
    }

    async fn create_machine(store: &Arc<InMemoryStore>, connected: bool) {
        store
            .create(Resource::new(MACHINE, Machine {
                connected,
                management_address: ADDRESS.into(),
                use_grpc_tunnel: false,
            }))
            .await
            .unwrap();
    }

    fn delta(stage: Option<MachineStage>, power: Option<PowerStage>) -> InboundSnapshot {
        InboundSnapshot { machine_id: MACHINE.into(), stage, ready: stage.map(|_| true), power_stage: power }
    }

    #[tokio::test]
    async fn deltas_for_unknown_machines_are_dropped() {
        let (store, _provider, ctrl, _senders) = fixture();
        ctrl.apply_delta(&ctx(&store), &delta(Some(MachineStage::Running), None)).await.unwrap();
        assert!(store.get_opt::<MachineStatusSnapshot>(MACHINE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stage_and_power_merge_independently() {
        let (store, _provider, ctrl, _senders) = fixture();
        create_machine(&store, true).await;
        let ctx = ctx(&store);

        ctrl.apply_delta(&ctx, &delta(Some(MachineStage::Booting), None)).await.unwrap();
        ctrl.apply_delta(&ctx, &delta(None, Some(PowerStage::PoweringOn))).await.unwrap();

        let snapshot = store.get::<MachineStatusSnapshot>(MACHINE).await.unwrap();
        assert_eq!(snapshot.spec.stage, MachineStage::Booting, "power delta keeps the stage");
        assert_eq!(snapshot.spec.power_stage, PowerStage::PoweringOn);
    }

    #[tokio::test]
    async fn phase_conflict_on_merge_is_tolerated() {
        let (store, _provider, ctrl, _senders) = fixture();
        create_machine(&store, true).await;
        let ctx = ctx(&store);
        ctrl.apply_delta(&ctx, &delta(Some(MachineStage::Running), None)).await.unwrap();

        let snapshot_ref = ResourceRef::new(
            MachineStatusSnapshot::NAMESPACE,
            MachineStatusSnapshot::KIND,
            MACHINE,
        );
        store.add_finalizer(&snapshot_ref, "hold").await.unwrap();
        store.teardown(&snapshot_ref).await.unwrap();

        ctrl.apply_delta(&ctx, &delta(Some(MachineStage::Resetting), None)).await.unwrap();
        let snapshot = store.get::<MachineStatusSnapshot>(MACHINE).await.unwrap();
        assert_eq!(snapshot.spec.stage, MachineStage::Running, "delta must be dropped");
    }

    #[tokio::test]
    async fn pull_task_follows_connectivity() {
        let (store, provider, ctrl, _senders) = fixture();
        create_machine(&store, true).await;
        store
            .create(Resource::new(MACHINE, MachineStatus {
                talos_version: "v1.9.3".into(),
                schematic: None,
                management_address: ADDRESS.into(),
                connected: true,
                maintenance: true,
                managed_by_static_infra_provider: false,
            }))
            .await
            .unwrap();

        let ctx = ctx(&store);
        let hook = {
            let ctrl = ctrl.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { ctrl.run(&ctx).await })
        };

        ctrl.reconcile(&ctx, MACHINE).await.unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(snapshot) =
                store.get_opt::<MachineStatusSnapshot>(MACHINE).await.unwrap()
            {
                // Mock default node status: Running, ready.
                assert_eq!(snapshot.spec.stage, MachineStage::Running);
                break;
            }
            assert!(std::time::Instant::now() < deadline, "pull never produced a snapshot");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Disconnect: the pull task stops polling.
        store.modify::<Machine, _>(MACHINE, |m| m.spec.connected = false).await.unwrap();
        store
            .modify::<MachineStatus, _>(MACHINE, |ms| ms.spec.connected = false)
            .await
            .unwrap();
        ctrl.reconcile(&ctx, MACHINE).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let calls_after_stop = provider.machine(ADDRESS).calls().len();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(provider.machine(ADDRESS).calls().len(), calls_after_stop);

        ctx.cancellation().cancel();
        hook.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn machine_destruction_sweeps_the_snapshot() {
        let (store, _provider, ctrl, _senders) = fixture();
        create_machine(&store, true).await;
        let ctx = ctx(&store);
        ctrl.apply_delta(&ctx, &delta(Some(MachineStage::Running), None)).await.unwrap();

        let machine_ref = ResourceRef::new(Machine::NAMESPACE, Machine::KIND, MACHINE);
        store.teardown(&machine_ref).await.unwrap();
        store.destroy(&machine_ref, None).await.unwrap();

        ctrl.reconcile(&ctx, MACHINE).await.unwrap();
        assert!(store.get_opt::<MachineStatusSnapshot>(MACHINE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn run_hook_drains_pushed_deltas() {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        let (ctrl, link_tx, power_tx) =
            MachineStatusSnapshotController::new(provider, Duration::from_secs(3600));
        let ctrl = Arc::new(ctrl);
        create_machine(&store, true).await;

        let ctx = ControllerCtx::new(store.clone(), CancellationToken::new());
        let hook = {
            let ctrl = ctrl.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { ctrl.run(&ctx).await })
        };

        link_tx.send(delta(Some(MachineStage::Installing), None)).await.unwrap();
        power_tx.send(delta(None, Some(PowerStage::PoweredOff))).await.unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(snapshot) =
                store.get_opt::<MachineStatusSnapshot>(MACHINE).await.unwrap()
            {
                if snapshot.spec.stage == MachineStage::Installing
                    && snapshot.spec.power_stage == PowerStage::PoweredOff
                {
                    break;
                }
            }
            assert!(std::time::Instant::now() < deadline, "deltas were not drained");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        ctx.cancellation().cancel();
        hook.await.unwrap().unwrap();
    }
}
