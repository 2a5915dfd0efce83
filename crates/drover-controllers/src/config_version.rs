use async_trait::async_trait;
use drover_domain::labels::LABEL_CLUSTER;
use drover_domain::{Cluster, ClusterConfigVersion, Resource};
use drover_runtime::{ControllerCtx, ReconcileError, Transform};

/// Freezes the Talos contract version for a cluster at creation time.
///
/// The generator keys its defaults off this resource; it is written once and
/// never follows later cluster version changes, so generated configs cannot
/// drift between applies.
pub struct ConfigVersionController;

#[async_trait]
impl Transform for ConfigVersionController {
    type Input = Cluster;
    type Output = ClusterConfigVersion;

    fn name(&self) -> &'static str {
        "ClusterConfigVersionController"
    }

    async fn transform(
        &self,
        _ctx: &ControllerCtx,
        cluster: &Resource<Cluster>,
        contract: &mut Resource<ClusterConfigVersion>,
    ) -> Result<(), ReconcileError> {
        if !contract.spec.version.is_empty() {
            return Ok(());
        }
        if cluster.spec.talos_version.is_empty() {
            return Err(ReconcileError::skip("cluster has no talos version yet"));
        }
        contract.meta.set_label(LABEL_CLUSTER, cluster.id());
        contract.spec.version =
            cluster.spec.talos_version.trim_start_matches('v').to_string();
        Ok(())
    }
}
