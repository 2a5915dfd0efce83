use async_trait::async_trait;
use drover_config::{compress, generate, GenerationInput};
use drover_domain::labels::{
    ANNOTATION_INPUT_VERSIONS, LABEL_CLUSTER, LABEL_MACHINE_SET, LABEL_ROLE_CONTROL_PLANE,
    LABEL_ROLE_WORKER,
};
use drover_domain::{
    Cluster, ClusterConfigVersion, ClusterMachine, ClusterMachineConfig,
    ClusterMachineConfigPatches, ClusterSecrets, JoinConfig, Link, LoadBalancerConfig,
    MachineConfigGenOptions, Resource,
};
use drover_graph::{InputDecl, Mapper};
use drover_runtime::{encode_input_versions, input_versions_match, ControllerCtx, ReconcileError, Transform};
use drover_store::ResourceStoreExt;
use tracing::warn;

use crate::helpers::{cluster_of, sync_label};

/// The join-config resource is a deployment-wide singleton.
pub const JOIN_CONFIG_ID: &str = "default";

#[derive(Debug, Clone, Default)]
pub struct MachineConfigOptions {
    pub image_factory_host: String,
    pub default_installer: String,
    pub registry_mirrors: Vec<String>,
}

/// Generates the on-node config document for each cluster machine, recording
/// generation failures on the output instead of failing the reconcile.
pub struct MachineConfigController {
    options: MachineConfigOptions,
}

impl MachineConfigController {
    pub fn new(options: MachineConfigOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Transform for MachineConfigController {
    type Input = ClusterMachine;
    type Output = ClusterMachineConfig;

    fn name(&self) -> &'static str {
        "ClusterMachineConfigController"
    }

    fn extra_inputs(&self) -> Vec<InputDecl> {
        vec![
            InputDecl::mapped::<ClusterMachineConfigPatches>(Mapper::SameId),
            InputDecl::mapped::<MachineConfigGenOptions>(Mapper::SameId),
            InputDecl::mapped::<Link>(Mapper::SameId),
            InputDecl::mapped::<Cluster>(Mapper::ByClusterLabel { control_plane_only: false }),
            InputDecl::mapped::<ClusterSecrets>(Mapper::ByClusterLabel {
                control_plane_only: false,
            }),
            InputDecl::mapped::<ClusterConfigVersion>(Mapper::ByClusterLabel {
                control_plane_only: false,
            }),
            InputDecl::mapped::<LoadBalancerConfig>(Mapper::ByClusterLabel {
                control_plane_only: false,
            }),
            // Deployment-wide; changes are picked up on the next machine event.
            InputDecl::weak::<JoinConfig>(),
        ]
    }

    async fn transform(
        &self,
        ctx: &ControllerCtx,
        machine: &Resource<ClusterMachine>,
        config: &mut Resource<ClusterMachineConfig>,
    ) -> Result<(), ReconcileError> {
        let machine_id = machine.id();
        let cluster_name = cluster_of(&machine.meta)?.to_string();

        let cluster = ctx
            .store
            .get_opt::<Cluster>(&cluster_name)
            .await?
            .ok_or_else(|| ReconcileError::skip("owning cluster not found"))?;
        let secrets = ctx
            .store
            .get_opt::<ClusterSecrets>(&cluster_name)
            .await?
            .ok_or_else(|| ReconcileError::skip("cluster secrets not generated yet"))?;
        let config_version = ctx
            .store
            .get_opt::<ClusterConfigVersion>(&cluster_name)
            .await?
            .ok_or_else(|| ReconcileError::skip("cluster config version contract not set"))?;
        let gen_options = ctx
            .store
            .get_opt::<MachineConfigGenOptions>(machine_id)
            .await?
            .ok_or_else(|| ReconcileError::skip("no config generation options yet"))?;
        if gen_options.spec.install_image.is_none() {
            return Err(ReconcileError::skip("install image not collected yet"));
        }

        let patches = ctx.store.get_opt::<ClusterMachineConfigPatches>(machine_id).await?;
        let load_balancer = ctx.store.get_opt::<LoadBalancerConfig>(&cluster_name).await?;
        let join_config = ctx.store.get_opt::<JoinConfig>(JOIN_CONFIG_ID).await?;
        let link = ctx.store.get_opt::<Link>(machine_id).await?;

        // Skip regeneration when nothing we read has moved.
        let mut versions = vec![
            (machine.reference(), machine.meta.version),
            (cluster.reference(), cluster.meta.version),
            (secrets.reference(), secrets.meta.version),
            (config_version.reference(), config_version.meta.version),
            (gen_options.reference(), gen_options.meta.version),
        ];
        for optional in [
            patches.as_ref().map(|r| (r.reference(), r.meta.version)),
            load_balancer.as_ref().map(|r| (r.reference(), r.meta.version)),
            join_config.as_ref().map(|r| (r.reference(), r.meta.version)),
            link.as_ref().map(|r| (r.reference(), r.meta.version)),
        ] {
            if let Some(pair) = optional {
                versions.push(pair);
            }
        }
        let encoded = encode_input_versions(&versions);
        let already_generated =
            !config.spec.data.is_empty() || !config.spec.generation_error.is_empty();
        if already_generated && input_versions_match(&config.meta, &encoded) {
            return Ok(());
        }

        for key in
            [LABEL_CLUSTER, LABEL_MACHINE_SET, LABEL_ROLE_CONTROL_PLANE, LABEL_ROLE_WORKER]
        {
            sync_label(&machine.meta, &mut config.meta, key);
        }
        config.meta.set_annotation(ANNOTATION_INPUT_VERSIONS, encoded);
        config.spec.cluster_machine_version = machine.meta.version.to_string();

        let generation = GenerationInput {
            cluster,
            secrets,
            config_version,
            cluster_machine: machine.clone(),
            patches: patches.map(|p| p.spec.patches).unwrap_or_default(),
            gen_options,
            load_balancer,
            join_config,
            link,
            registry_mirrors: self.options.registry_mirrors.clone(),
            image_factory_host: self.options.image_factory_host.clone(),
            default_installer: self.options.default_installer.clone(),
        };
        match generate(&generation) {
            Ok(document) => {
                config.spec.data = compress(&document)
                    .map_err(|e| ReconcileError::fatal(format!("compression failed: {e}")))?;
                config.spec.generation_error.clear();
            }
            Err(e) => {
                // Surfaced on the resource; the apply controller mirrors it
                // into the status instead of acting on a broken document.
                warn!(machine = %machine_id, error = %e, "config generation failed");
                config.spec.generation_error = e.to_string();
                config.spec.data.clear();
            }
        }
        Ok(())
    }
}
