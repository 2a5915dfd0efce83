use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drover_config::{decompress, install_image_ref, sha256_hex};
use drover_domain::labels::{
    ANNOTATION_FORCE_DESTROY, LABEL_CLUSTER, LABEL_MACHINE_SET, LABEL_ROLE_CONTROL_PLANE,
    LABEL_ROLE_WORKER, LABEL_TAINTED_EXPORTING, LABEL_TAINTED_IMPORTING,
};
use drover_domain::{
    Cluster, ClusterMachine, ClusterMachineConfig, ClusterMachineConfigStatus, ClusterStatus,
    InfraMachineStatus, InstallImage, Machine, MachineConfigGenOptions, MachineSet, MachineStage,
    MachineStatus, MachineStatusSnapshot, Resource, TalosConfig,
};
use drover_graph::{InputDecl, Mapper};
use drover_machine::{
    ApplyRequestMode, AppliedMode, Client, ClientProvider, ResetRequest, UpgradeRequest,
    WipePartition, STATE_ENCRYPTION_META_KEY, UPGRADE_META_KEY,
};
use drover_runtime::{ControllerCtx, ReconcileError, Transform};
use drover_store::ResourceStoreExt;
use tracing::{info, warn};

use crate::counters::TeardownCounters;
use crate::helpers::{cluster_of, is_control_plane, machine_err, sync_label};

/// Graceful resets are abandoned after this many attempts.
const RESET_GRACEFUL_ATTEMPTS: u32 = 4;
/// Etcd leave is tried at most this often per teardown.
const ETCD_LEAVE_ATTEMPTS: u32 = 2;
/// Maintenance-mode version probes before giving up on confirming a reset.
const MAINTENANCE_CHECK_ATTEMPTS: u32 = 5;
/// Requeue interval while a reset is in flight on the node.
const RESET_IN_PROGRESS_REQUEUE: Duration = Duration::from_secs(60);

/// Drives each machine to carry its generated config: applies config
/// documents, upgrades the node image and schematic when they diverge, and
/// runs the reset protocol when the config is torn down.
pub struct ConfigStatusController {
    provider: Arc<dyn ClientProvider>,
    counters: TeardownCounters,
    image_factory_host: String,
    default_installer: String,
}

impl ConfigStatusController {
    pub fn new(
        provider: Arc<dyn ClientProvider>,
        image_factory_host: impl Into<String>,
        default_installer: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            counters: TeardownCounters::new(),
            image_factory_host: image_factory_host.into(),
            default_installer: default_installer.into(),
        }
    }

    pub fn counters(&self) -> &TeardownCounters {
        &self.counters
    }

    async fn cluster_client(
        &self,
        ctx: &ControllerCtx,
        cluster: &str,
        address: &str,
    ) -> Result<Client, ReconcileError> {
        let talosconfig = ctx
            .store
            .get_opt::<TalosConfig>(cluster)
            .await?
            .ok_or_else(|| ReconcileError::skip(format!("no talosconfig for cluster {cluster}")))?;
        self.provider.cluster(&talosconfig.spec, address).await.map_err(machine_err)
    }

    async fn node_client(
        &self,
        ctx: &ControllerCtx,
        cluster: &str,
        address: &str,
        maintenance: bool,
    ) -> Result<Client, ReconcileError> {
        if maintenance {
            self.provider.maintenance(address).await.map_err(machine_err)
        } else {
            self.cluster_client(ctx, cluster, address).await
        }
    }

    /// Upgrade sub-machine: converge the node image and schematic.
    #[allow(clippy::too_many_arguments)]
    async fn reconcile_upgrade(
        &self,
        ctx: &ControllerCtx,
        status: &mut Resource<ClusterMachineConfigStatus>,
        cluster: &str,
        stage: MachineStage,
        address: &str,
        install_image: &InstallImage,
        observed_version: &str,
        expected_schematic: &str,
    ) -> Result<(), ReconcileError> {
        let in_maintenance = match stage {
            MachineStage::Maintenance => true,
            MachineStage::Booting | MachineStage::Running => false,
            other => {
                return Err(ReconcileError::skip(format!(
                    "version known, not in sync yet (stage {other})"
                )))
            }
        };

        let image =
            install_image_ref(&self.image_factory_host, &self.default_installer, install_image);
        let client = self.node_client(ctx, cluster, address, in_maintenance).await?;

        info!(
            machine = %status.meta.id,
            image = %image,
            in_maintenance,
            "upgrading machine to match the install image"
        );
        let request = UpgradeRequest {
            image,
            preserve: !in_maintenance,
            // Staged upgrades work around nodes that refuse a live one.
            stage: true,
            force: false,
        };
        match client.upgrade(request).await {
            Ok(()) => Err(ReconcileError::skip("upgrade issued, waiting for the node to converge")),
            // The node will reach the target on its own schedule, or the
            // image predates upgrade-in-maintenance; either way it now
            // counts as in sync.
            Err(e) if e.is_failed_precondition() || e.is_unimplemented() => {
                status.spec.talos_version = observed_version.to_string();
                status.spec.schematic_id = expected_schematic.to_string();
                Ok(())
            }
            Err(e) => Err(machine_err(e)),
        }
    }
}

#[async_trait]
impl Transform for ConfigStatusController {
    type Input = ClusterMachineConfig;
    type Output = ClusterMachineConfigStatus;

    fn name(&self) -> &'static str {
        "ClusterMachineConfigStatusController"
    }

    fn concurrency(&self) -> usize {
        8
    }

    fn extra_inputs(&self) -> Vec<InputDecl> {
        vec![
            InputDecl::mapped::<MachineStatusSnapshot>(Mapper::SameId),
            InputDecl::mapped::<MachineStatus>(Mapper::SameId),
            InputDecl::mapped::<MachineConfigGenOptions>(Mapper::SameId),
            InputDecl::mapped::<ClusterMachine>(Mapper::SameId),
            InputDecl::mapped::<Machine>(Mapper::SameId),
            InputDecl::mapped::<InfraMachineStatus>(Mapper::SameId),
            InputDecl::mapped::<Cluster>(Mapper::ByClusterLabel { control_plane_only: false }),
            InputDecl::mapped::<TalosConfig>(Mapper::ByClusterLabel { control_plane_only: false }),
            InputDecl::mapped::<ClusterStatus>(Mapper::ByClusterLabel {
                control_plane_only: false,
            }),
            InputDecl::mapped::<MachineSet>(Mapper::ByClusterLabel { control_plane_only: false }),
        ]
    }

    async fn transform(
        &self,
        ctx: &ControllerCtx,
        config: &Resource<ClusterMachineConfig>,
        status: &mut Resource<ClusterMachineConfigStatus>,
    ) -> Result<(), ReconcileError> {
        let machine_id = config.id();

        // Generation failures are mirrored, not acted on.
        if !config.spec.generation_error.is_empty() {
            status.spec.last_config_error = config.spec.generation_error.clone();
            return Ok(());
        }

        let cluster_name = cluster_of(&config.meta)?.to_string();
        let cluster = ctx
            .store
            .get_opt::<Cluster>(&cluster_name)
            .await?
            .ok_or_else(|| ReconcileError::skip("owning cluster not found"))?;
        // A locked running cluster is mid-transfer: hands off. A locked
        // cluster that began tearing down aborted the transfer and proceeds.
        if cluster.spec.locked && !cluster.meta.is_tearing_down() {
            return Err(ReconcileError::skip("cluster is locked"));
        }

        let snapshot = ctx
            .store
            .get_opt::<MachineStatusSnapshot>(machine_id)
            .await?
            .ok_or_else(|| ReconcileError::skip("no machine status snapshot yet"))?;
        let stage = snapshot.spec.stage;

        let machine_status = ctx
            .store
            .get_opt::<MachineStatus>(machine_id)
            .await?
            .ok_or_else(|| ReconcileError::skip("machine status not collected yet"))?;
        if !machine_status.spec.connected {
            return Err(ReconcileError::skip("machine is not connected"));
        }
        let address = machine_status.spec.management_address.clone();

        let schematic = machine_status
            .spec
            .schematic
            .as_ref()
            .ok_or_else(|| ReconcileError::skip("machine schematic not reported yet"))?;
        if schematic.in_agent_mode {
            return Err(ReconcileError::skip("machine is in agent mode"));
        }

        if machine_status.spec.managed_by_static_infra_provider {
            let ready = ctx
                .store
                .get_opt::<InfraMachineStatus>(machine_id)
                .await?
                .map(|s| s.spec.ready_to_use)
                .unwrap_or(false);
            if !ready {
                return Err(ReconcileError::skip("infra machine is not ready to use"));
            }
        }

        let gen_options = ctx
            .store
            .get_opt::<MachineConfigGenOptions>(machine_id)
            .await?
            .ok_or_else(|| ReconcileError::skip("no config generation options yet"))?;
        let install_image = gen_options
            .spec
            .install_image
            .as_ref()
            .ok_or_else(|| ReconcileError::skip("install image not collected yet"))?;
        if !install_image.schematic_initialized {
            return Err(ReconcileError::skip("install image schematic not collected yet"));
        }

        // ── Version / schematic reconciliation ───────────────────────────────
        let observed_version =
            machine_status.spec.talos_version.trim_start_matches('v').to_string();
        // Nodes reporting an unresolvable schematic are legacy images;
        // schematic comparison is disabled for them.
        let (expected_schematic, node_schematic) = if schematic.invalid {
            (String::new(), String::new())
        } else {
            let node_schematic = if install_image.compare_full_schematic_id {
                schematic.full_id.clone()
            } else {
                schematic.id.clone()
            };
            (install_image.schematic_id.clone(), node_schematic)
        };

        // A status with no recorded identity adopts what the node reports.
        if status.spec.talos_version.is_empty() {
            status.spec.talos_version = observed_version.clone();
        }
        if status.spec.schematic_id.is_empty() {
            status.spec.schematic_id = node_schematic.clone();
        }

        let talos_mismatch = observed_version != status.spec.talos_version
            || status.spec.talos_version != install_image.talos_version;
        let schematic_mismatch = status.spec.schematic_id != expected_schematic
            || node_schematic != expected_schematic;

        if (talos_mismatch || schematic_mismatch) && !install_image.talos_version.is_empty() {
            return self
                .reconcile_upgrade(
                    ctx,
                    status,
                    &cluster_name,
                    stage,
                    &address,
                    install_image,
                    &observed_version,
                    &expected_schematic,
                )
                .await;
        }

        status.spec.talos_version = observed_version;
        status.spec.schematic_id = expected_schematic;

        // ── Config apply ─────────────────────────────────────────────────────
        let data = decompress(&config.spec.data)
            .map_err(|e| ReconcileError::fatal(format!("stored config is corrupt: {e}")))?;
        let sha = sha256_hex(&data);
        if status.spec.cluster_machine_config_sha256 == sha {
            // The node already carries this exact document; keep the version
            // stamp and labels aligned without touching the node.
            status.spec.cluster_machine_config_version =
                config.spec.cluster_machine_version.clone();
            for key in
                [LABEL_CLUSTER, LABEL_MACHINE_SET, LABEL_ROLE_CONTROL_PLANE, LABEL_ROLE_WORKER]
            {
                sync_label(&config.meta, &mut status.meta, key);
            }
            return Ok(());
        }

        let in_maintenance = match stage {
            MachineStage::Booting | MachineStage::Running => false,
            MachineStage::Maintenance => {
                if !status.spec.cluster_machine_config_sha256.is_empty() {
                    // The node dropped back to maintenance after having had a
                    // config. Applying there would wipe its identity.
                    return Err(ReconcileError::fatal(format!(
                        "machine {machine_id} is expected to be running in normal mode"
                    )));
                }
                true
            }
            other => {
                return Err(ReconcileError::skip(format!(
                    "stage {other} does not accept config application"
                )))
            }
        };

        let client = self.node_client(ctx, &cluster_name, &address, in_maintenance).await?;
        let response = match client.apply_configuration(data, ApplyRequestMode::Auto).await {
            Ok(response) => response,
            Err(e) if e.is_invalid_argument() => {
                // The config itself is bad; retrying cannot help until the
                // user fixes their patches.
                warn!(machine = %machine_id, error = %e.message, "config rejected by the node");
                status.spec.last_config_error = e.message;
                return Ok(());
            }
            Err(e) => return Err(machine_err(e)),
        };

        if response.mode != AppliedMode::NoReboot {
            return Err(ReconcileError::skip("node is rebooting to apply the config"));
        }

        for key in
            [LABEL_CLUSTER, LABEL_MACHINE_SET, LABEL_ROLE_CONTROL_PLANE, LABEL_ROLE_WORKER]
        {
            sync_label(&config.meta, &mut status.meta, key);
        }
        status.spec.cluster_machine_config_version = config.spec.cluster_machine_version.clone();
        status.spec.cluster_machine_config_sha256 = sha;
        status.spec.last_config_error.clear();
        info!(machine = %machine_id, "config applied");

        // Clean the staged-upgrade meta key so subsequent boots are clean.
        if matches!(stage, MachineStage::Booting | MachineStage::Running) {
            match client.meta_delete(UPGRADE_META_KEY).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() || e.is_unimplemented() => {}
                Err(e) => return Err(machine_err(e)),
            }
        }
        Ok(())
    }

    /// Teardown / reset sub-machine: bring the node back to maintenance
    /// before the config is allowed to disappear.
    async fn finalizer_removal(
        &self,
        ctx: &ControllerCtx,
        config: &Resource<ClusterMachineConfig>,
    ) -> Result<(), ReconcileError> {
        let machine_id = config.id();

        // The machine itself is going away; nothing to reset.
        let machine = ctx.store.get_opt::<Machine>(machine_id).await?;
        let machine_gone = machine.map(|m| m.meta.is_tearing_down()).unwrap_or(true);
        if machine_gone {
            self.counters.clear(machine_id);
            return Ok(());
        }

        // A cluster mid-import/export must not have its nodes touched.
        if let Some(cluster_name) = config.meta.label(LABEL_CLUSTER) {
            if let Some(cluster_status) =
                ctx.store.get_opt::<ClusterStatus>(cluster_name).await?
            {
                if cluster_status.meta.has_label(LABEL_TAINTED_IMPORTING)
                    || cluster_status.meta.has_label(LABEL_TAINTED_EXPORTING)
                {
                    self.counters.clear(machine_id);
                    return Ok(());
                }
            }
        }

        let machine_status = ctx
            .store
            .get_opt::<MachineStatus>(machine_id)
            .await?
            .ok_or_else(|| ReconcileError::skip("machine status missing"))?;
        if !machine_status.spec.connected {
            return Err(ReconcileError::skip("machine is not connected"));
        }
        let address = machine_status.spec.management_address.clone();

        let snapshot = ctx
            .store
            .get_opt::<MachineStatusSnapshot>(machine_id)
            .await?
            .ok_or_else(|| ReconcileError::skip("no machine status snapshot"))?;
        let stage = snapshot.spec.stage;

        match stage {
            MachineStage::Resetting => {
                return Err(ReconcileError::requeue_after(RESET_IN_PROGRESS_REQUEUE));
            }
            MachineStage::Maintenance => {
                // Confirm the node actually answers in maintenance mode.
                let probe = match self.provider.maintenance(&address).await {
                    Ok(client) => client.version().await,
                    Err(e) => Err(e),
                };
                return match probe {
                    Ok(_) => {
                        info!(machine = %machine_id, "machine is back in maintenance, reset done");
                        self.counters.clear(machine_id);
                        Ok(())
                    }
                    Err(e) => {
                        let attempt = self.counters.bump_maintenance_checks(machine_id);
                        if attempt <= MAINTENANCE_CHECK_ATTEMPTS {
                            warn!(machine = %machine_id, error = %e, attempt, "maintenance probe failed");
                            Err(ReconcileError::requeue_after(Duration::from_secs(attempt as u64)))
                        } else {
                            Err(ReconcileError::skip("maintenance probe budget exhausted"))
                        }
                    }
                };
            }
            _ => {}
        }

        let control_plane = is_control_plane(&config.meta);

        // Graceful departure unless the set is going away, the user forced
        // destruction, or we already burned the graceful budget.
        let force_destroy = config.meta.annotation(ANNOTATION_FORCE_DESTROY).is_some()
            || ctx
                .store
                .get_opt::<ClusterMachine>(machine_id)
                .await?
                .map(|cm| cm.meta.annotation(ANNOTATION_FORCE_DESTROY).is_some())
                .unwrap_or(false);
        let machine_set_running = match config.meta.label(LABEL_MACHINE_SET) {
            Some(set_id) => ctx
                .store
                .get_opt::<MachineSet>(set_id)
                .await?
                .map(|set| !set.meta.is_tearing_down())
                .unwrap_or(false),
            None => false,
        };
        let mut graceful = machine_set_running && !force_destroy;
        if self.counters.reset_attempts(machine_id) >= RESET_GRACEFUL_ATTEMPTS {
            graceful = false;
        }

        let stage_allows_reset = match stage {
            MachineStage::Running => true,
            MachineStage::Booting => !graceful || !control_plane,
            _ => false,
        };
        if !stage_allows_reset {
            return Err(ReconcileError::skip(format!("stage {stage} does not allow reset")));
        }

        let cluster_name = cluster_of(&config.meta)?.to_string();
        let client = self.cluster_client(ctx, &cluster_name, &address).await?;

        // Best effort: drop the state-encryption meta key first.
        match client.meta_delete(STATE_ENCRYPTION_META_KEY).await {
            Ok(()) => {}
            Err(e)
                if e.is_not_found() || e.is_unimplemented() || e.is_failed_precondition() => {}
            Err(e) => return Err(machine_err(e)),
        }

        if control_plane && self.counters.try_etcd_leave(machine_id, ETCD_LEAVE_ATTEMPTS) {
            let etcd_result = async {
                client.etcd_forfeit_leadership().await?;
                client.etcd_leave_cluster().await
            }
            .await;
            if let Err(e) = etcd_result {
                warn!(machine = %machine_id, error = %e, "etcd leave failed");
                return Err(ReconcileError::requeue_after(Duration::from_secs(1)));
            }
        }

        let attempt = self.counters.bump_reset_attempts(machine_id);
        let request = ResetRequest {
            graceful,
            reboot: true,
            wipe: vec![WipePartition::Ephemeral, WipePartition::State],
        };
        match client.reset(request).await {
            Ok(()) => {
                info!(machine = %machine_id, graceful, attempt, "reset issued");
                Err(ReconcileError::skip("reset issued, waiting for the node to reach maintenance"))
            }
            Err(e) => Err(machine_err(e)),
        }
    }
}
