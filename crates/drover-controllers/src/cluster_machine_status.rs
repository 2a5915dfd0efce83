use async_trait::async_trait;
use drover_domain::labels::{
    ANNOTATION_OWNER, LABEL_CLUSTER, LABEL_CONNECTED, LABEL_MACHINE_SET,
    LABEL_ROLE_CONTROL_PLANE, LABEL_ROLE_WORKER,
};
use drover_domain::{
    ClusterMachine, ClusterMachineConfig, ClusterMachineConfigStatus, ClusterMachineStage,
    ClusterMachineStatus, Machine, MachineSetNode, MachineStage, MachineStatusSnapshot,
    PowerStage, Resource, ResourceRef, ResourceSpec,
};
use drover_graph::{InputDecl, Mapper, OutputDecl};
use drover_runtime::{Controller, ControllerCtx, ReconcileError};
use drover_store::ResourceStoreExt;

const NAME: &str = "ClusterMachineStatusController";

/// Folds node stage, identity and config status into the aggregate
/// `ClusterMachineStatus`.
///
/// Not a plain transform: the aggregate must stay visible (showing
/// Destroying) while the cluster machine tears down, and is only swept once
/// the input is gone.
pub struct ClusterMachineStatusController;

fn fold_stage(node_stage: MachineStage) -> ClusterMachineStage {
    match node_stage {
        MachineStage::Unknown => ClusterMachineStage::Unknown,
        MachineStage::Resetting => ClusterMachineStage::Destroying,
        MachineStage::Installing => ClusterMachineStage::Installing,
        MachineStage::Upgrading => ClusterMachineStage::Upgrading,
        MachineStage::Rebooting => ClusterMachineStage::Rebooting,
        MachineStage::ShuttingDown => ClusterMachineStage::ShuttingDown,
        MachineStage::Booting => ClusterMachineStage::Booting,
        MachineStage::Running => ClusterMachineStage::Running,
        // A machine parked in maintenance is waiting for its config.
        MachineStage::Maintenance => ClusterMachineStage::Configuring,
    }
}

impl ClusterMachineStatusController {
    async fn upsert<F>(
        &self,
        ctx: &ControllerCtx,
        id: &str,
        build: F,
    ) -> Result<(), ReconcileError>
    where
        F: FnOnce(&mut Resource<ClusterMachineStatus>) + Send,
    {
        let existing = ctx.store.get_opt::<ClusterMachineStatus>(id).await?;
        let mut status = existing.clone().unwrap_or_else(|| Resource::fresh(id));
        build(&mut status);
        match existing {
            Some(old) => {
                if old.spec == status.spec
                    && old.meta.labels == status.meta.labels
                    && old.meta.annotations == status.meta.annotations
                {
                    return Ok(());
                }
                status.meta.version = old.meta.version;
                ctx.store.update(status).await?;
            }
            None => {
                status.meta.set_annotation(ANNOTATION_OWNER, NAME);
                ctx.store.create(status).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Controller for ClusterMachineStatusController {
    fn name(&self) -> &'static str {
        NAME
    }

    fn inputs(&self) -> Vec<InputDecl> {
        vec![
            InputDecl::primary::<ClusterMachine>(),
            InputDecl::mapped::<Machine>(Mapper::SameId),
            InputDecl::mapped::<MachineStatusSnapshot>(Mapper::SameId),
            InputDecl::mapped_destroy_ready::<MachineSetNode>(Mapper::SameId),
            InputDecl::mapped::<ClusterMachineConfig>(Mapper::SameId),
            InputDecl::mapped::<ClusterMachineConfigStatus>(Mapper::SameId),
            InputDecl::mapped_destroy_ready::<ClusterMachineStatus>(Mapper::SameId),
        ]
    }

    fn outputs(&self) -> Vec<OutputDecl> {
        vec![OutputDecl::exclusive::<ClusterMachineStatus>()]
    }

    async fn reconcile(&self, ctx: &ControllerCtx, id: &str) -> Result<(), ReconcileError> {
        let output_ref =
            ResourceRef::new(ClusterMachineStatus::NAMESPACE, ClusterMachineStatus::KIND, id);

        let Some(cluster_machine) = ctx.store.get_opt::<ClusterMachine>(id).await? else {
            ctx.store.teardown_and_destroy(&output_ref, Some(NAME)).await?;
            return Ok(());
        };

        if cluster_machine.meta.is_tearing_down() {
            self.upsert(ctx, id, |status| {
                status.spec.stage = ClusterMachineStage::Destroying;
                status.spec.ready = false;
                status.spec.apid_available = false;
            })
            .await?;
            // Release the input so the teardown can finish; the aggregate is
            // swept when the destroy event arrives.
            if cluster_machine.meta.has_finalizer(NAME) {
                ctx.store.remove_finalizer(&cluster_machine.reference(), NAME).await?;
            }
            return Ok(());
        }
        ctx.store.add_finalizer(&cluster_machine.reference(), NAME).await?;

        let machine = ctx.store.get_opt::<Machine>(id).await?;
        let snapshot = ctx.store.get_opt::<MachineStatusSnapshot>(id).await?;
        let set_node = ctx.store.get_opt::<MachineSetNode>(id).await?;
        let config = ctx.store.get_opt::<ClusterMachineConfig>(id).await?;
        let config_status = ctx.store.get_opt::<ClusterMachineConfigStatus>(id).await?;

        let connected = machine.map(|m| m.spec.connected).unwrap_or(false);
        let (node_stage, node_ready, power_stage) = snapshot
            .map(|s| (s.spec.stage, s.spec.ready, s.spec.power_stage))
            .unwrap_or((MachineStage::Unknown, false, PowerStage::None));

        let mut stage = fold_stage(node_stage);
        match power_stage {
            PowerStage::PoweredOff => stage = ClusterMachineStage::PoweredOff,
            PowerStage::PoweringOn => stage = ClusterMachineStage::PoweringOn,
            PowerStage::None => {}
        }
        if set_node.is_none() {
            stage = ClusterMachineStage::BeforeDestroy;
        }

        let control_plane = cluster_machine.meta.has_label(LABEL_ROLE_CONTROL_PLANE);
        let apid_available = control_plane
            && matches!(node_stage, MachineStage::Booting | MachineStage::Running)
            && connected;
        let ready = node_ready && connected;

        let (config_up_to_date, last_config_error) = match (&config, &config_status) {
            (Some(config), Some(status)) => (
                config.spec.cluster_machine_version
                    == status.spec.cluster_machine_config_version
                    && status.spec.last_config_error.is_empty(),
                status.spec.last_config_error.clone(),
            ),
            _ => (false, String::new()),
        };

        self.upsert(ctx, id, |status| {
            for key in
                [LABEL_CLUSTER, LABEL_MACHINE_SET, LABEL_ROLE_CONTROL_PLANE, LABEL_ROLE_WORKER]
            {
                crate::helpers::sync_label(&cluster_machine.meta, &mut status.meta, key);
            }
            if connected {
                status.meta.set_label(LABEL_CONNECTED, "");
            } else {
                status.meta.labels.remove(LABEL_CONNECTED);
            }
            status.spec = ClusterMachineStatus {
                stage,
                ready,
                apid_available,
                config_up_to_date,
                last_config_error,
            };
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_store::{InMemoryStore, ResourceStore};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    const MACHINE: &str = "m1";

    struct Fixture {
        store: Arc<InMemoryStore>,
        ctrl: ClusterMachineStatusController,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let mut cluster_machine =
                Resource::new(MACHINE, ClusterMachine { kubernetes_version: "1.31.0".into() });
            cluster_machine.meta.set_label(LABEL_CLUSTER, "c1");
            cluster_machine.meta.set_label(LABEL_ROLE_CONTROL_PLANE, "");
            store.create(cluster_machine).await.unwrap();
            store
                .create(Resource::new(MACHINE, Machine {
                    connected: true,
                    management_address: "10.0.0.1:50000".into(),
                    use_grpc_tunnel: false,
                }))
                .await
                .unwrap();
            store
                .create(Resource::new(MACHINE, MachineStatusSnapshot {
                    stage: MachineStage::Running,
                    ready: true,
                    power_stage: PowerStage::None,
                }))
                .await
                .unwrap();
            store.create(Resource::new(MACHINE, MachineSetNode {})).await.unwrap();
            Self { store, ctrl: ClusterMachineStatusController }
        }

        fn ctx(&self) -> ControllerCtx {
            ControllerCtx::new(self.store.clone(), CancellationToken::new())
        }

        async fn reconcile(&self) -> Resource<ClusterMachineStatus> {
            self.ctrl.reconcile(&self.ctx(), MACHINE).await.unwrap();
            self.store.get::<ClusterMachineStatus>(MACHINE).await.unwrap()
        }
    }

    #[tokio::test]
    async fn running_control_plane_is_ready_with_apid() {
        let fixture = Fixture::new().await;
        let status = fixture.reconcile().await;
        assert_eq!(status.spec.stage, ClusterMachineStage::Running);
        assert!(status.spec.ready);
        assert!(status.spec.apid_available);
        assert!(status.meta.has_label(LABEL_CONNECTED));
        assert_eq!(status.meta.label(LABEL_CLUSTER), Some("c1"));
    }

    #[tokio::test]
    async fn maintenance_folds_to_configuring() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .modify::<MachineStatusSnapshot, _>(MACHINE, |snapshot| {
                snapshot.spec.stage = MachineStage::Maintenance;
            })
            .await
            .unwrap();
        let status = fixture.reconcile().await;
        assert_eq!(status.spec.stage, ClusterMachineStage::Configuring);
        assert!(!status.spec.apid_available);
    }

    #[tokio::test]
    async fn power_stage_overrides_node_stage() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .modify::<MachineStatusSnapshot, _>(MACHINE, |snapshot| {
                snapshot.spec.power_stage = PowerStage::PoweredOff;
            })
            .await
            .unwrap();
        let status = fixture.reconcile().await;
        assert_eq!(status.spec.stage, ClusterMachineStage::PoweredOff);
    }

    #[tokio::test]
    async fn missing_set_node_means_before_destroy() {
        let fixture = Fixture::new().await;
        let node_ref =
            ResourceRef::new(MachineSetNode::NAMESPACE, MachineSetNode::KIND, MACHINE);
        fixture.store.teardown(&node_ref).await.unwrap();
        fixture.store.destroy(&node_ref, None).await.unwrap();

        let status = fixture.reconcile().await;
        assert_eq!(status.spec.stage, ClusterMachineStage::BeforeDestroy);
    }

    #[tokio::test]
    async fn connectivity_loss_clears_ready_and_apid_in_one_pass() {
        let fixture = Fixture::new().await;
        let first = fixture.reconcile().await;
        assert!(first.spec.ready && first.spec.apid_available);

        fixture
            .store
            .modify::<Machine, _>(MACHINE, |machine| machine.spec.connected = false)
            .await
            .unwrap();
        let status = fixture.reconcile().await;
        assert!(!status.spec.ready);
        assert!(!status.spec.apid_available);
        assert!(!status.meta.has_label(LABEL_CONNECTED));
    }

    #[tokio::test]
    async fn config_up_to_date_requires_matching_versions_and_no_error() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .create(Resource::new(MACHINE, ClusterMachineConfig {
                data: vec![1],
                cluster_machine_version: "7".into(),
                generation_error: String::new(),
            }))
            .await
            .unwrap();
        fixture
            .store
            .create(Resource::new(MACHINE, ClusterMachineConfigStatus {
                cluster_machine_config_version: "7".into(),
                ..ClusterMachineConfigStatus::default()
            }))
            .await
            .unwrap();
        assert!(fixture.reconcile().await.spec.config_up_to_date);

        fixture
            .store
            .modify::<ClusterMachineConfigStatus, _>(MACHINE, |status| {
                status.spec.last_config_error = "bad patch".into();
            })
            .await
            .unwrap();
        let status = fixture.reconcile().await;
        assert!(!status.spec.config_up_to_date);
        assert_eq!(status.spec.last_config_error, "bad patch");
    }

    #[tokio::test]
    async fn teardown_shows_destroying_then_sweeps() {
        let fixture = Fixture::new().await;
        fixture.reconcile().await;

        let input_ref =
            ResourceRef::new(ClusterMachine::NAMESPACE, ClusterMachine::KIND, MACHINE);
        fixture.store.teardown(&input_ref).await.unwrap();
        fixture.ctrl.reconcile(&fixture.ctx(), MACHINE).await.unwrap();

        let status = fixture.store.get::<ClusterMachineStatus>(MACHINE).await.unwrap();
        assert_eq!(status.spec.stage, ClusterMachineStage::Destroying);
        // Our finalizer is gone, so the input can be destroyed.
        assert!(fixture.store.teardown(&input_ref).await.unwrap());
        fixture.store.destroy(&input_ref, None).await.unwrap();

        fixture.ctrl.reconcile(&fixture.ctx(), MACHINE).await.unwrap();
        assert!(fixture
            .store
            .get_opt::<ClusterMachineStatus>(MACHINE)
            .await
            .unwrap()
            .is_none());
    }
}
