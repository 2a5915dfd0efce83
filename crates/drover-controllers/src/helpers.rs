use drover_domain::labels::{LABEL_CLUSTER, LABEL_ROLE_CONTROL_PLANE};
use drover_domain::ResourceMeta;
use drover_machine::MachineError;
use drover_runtime::ReconcileError;

/// Cluster a resource belongs to; resources without the label skip-reconcile
/// until a label event arrives.
pub(crate) fn cluster_of(meta: &ResourceMeta) -> Result<&str, ReconcileError> {
    meta.label(LABEL_CLUSTER)
        .ok_or_else(|| ReconcileError::skip(format!("{} has no cluster label", meta.id)))
}

pub(crate) fn is_control_plane(meta: &ResourceMeta) -> bool {
    meta.has_label(LABEL_ROLE_CONTROL_PLANE)
}

/// Mirror a label from one resource to another, removing it when absent.
pub(crate) fn sync_label(from: &ResourceMeta, to: &mut ResourceMeta, key: &str) {
    match from.label(key) {
        Some(value) => {
            let value = value.to_string();
            to.set_label(key, value);
        }
        None => {
            to.labels.remove(key);
        }
    }
}

/// Default disposition for node API failures the call site has not already
/// classified: retry with backoff.
pub(crate) fn machine_err(e: MachineError) -> ReconcileError {
    ReconcileError::retry(e.to_string())
}
