use async_trait::async_trait;
use base64::Engine;
use drover_config::SecretBundle;
use drover_domain::labels::LABEL_CLUSTER;
use drover_domain::{Cluster, ClusterSecrets, Resource};
use drover_runtime::{ControllerCtx, ReconcileError, Transform};
use drover_store::ResourceStoreExt;
use rand::RngCore;
use tracing::info;

/// Generates the per-cluster secret bundle exactly once.
///
/// The existence check runs uncached: generating a second bundle because of a
/// stale read would permanently diverge the cluster from its machines, so
/// this is one of the few paths that must not trust a caching layer.
pub struct ClusterSecretsController;

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    base64::engine::general_purpose::STANDARD_NO_PAD.encode(buf)
}

#[async_trait]
impl Transform for ClusterSecretsController {
    type Input = Cluster;
    type Output = ClusterSecrets;

    fn name(&self) -> &'static str {
        "ClusterSecretsController"
    }

    async fn transform(
        &self,
        ctx: &ControllerCtx,
        cluster: &Resource<Cluster>,
        secrets: &mut Resource<ClusterSecrets>,
    ) -> Result<(), ReconcileError> {
        // Bundles are immutable: generated once, imported ones never touched.
        if secrets.spec.imported || !secrets.spec.data.is_empty() {
            return Ok(());
        }

        match ctx.store.get_uncached::<ClusterSecrets>(cluster.id()).await {
            Ok(_) => {
                // Another writer (e.g. a cluster import) got there first.
                return Err(ReconcileError::skip("secrets already exist"));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let bundle = SecretBundle {
            bootstrap_token: random_token(24),
            trustd_token: random_token(24),
            secretbox_key: random_token(32),
            ca_crt: random_token(48),
            ca_key: random_token(48),
        };
        secrets.meta.set_label(LABEL_CLUSTER, cluster.id());
        secrets.spec.data =
            bundle.to_bytes().map_err(|e| ReconcileError::fatal(e.to_string()))?;
        secrets.spec.imported = false;
        info!(cluster = %cluster.id(), "generated cluster secret bundle");
        Ok(())
    }
}
