use serde::{Deserialize, Serialize};

use crate::error::GenError;

/// Per-cluster secret bundle stored opaquely in `ClusterSecrets.data`.
///
/// The bundle is generated once at cluster creation (or imported) and parsed
/// by the config generator on every machine; it is never regenerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretBundle {
    /// Token nodes present when joining the cluster.
    pub bootstrap_token: String,
    /// Token for the node↔control-plane trust daemon.
    pub trustd_token: String,
    /// Key sealing cluster-internal secret boxes.
    pub secretbox_key: String,
    /// Cluster CA, PEM-encoded.
    pub ca_crt: String,
    pub ca_key: String,
}

impl SecretBundle {
    pub fn from_bytes(data: &[u8]) -> Result<Self, GenError> {
        serde_json::from_slice(data).map_err(|e| GenError::SecretsCorrupt(e.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, GenError> {
        serde_json::to_vec(self).map_err(|e| GenError::SecretsCorrupt(e.to_string()))
    }
}
