use serde::{Deserialize, Serialize};

use crate::resource::resource_spec;

// ── Cluster ───────────────────────────────────────────────────────────────────

/// User-declared cluster. The Talos version recorded here is the version the
/// cluster was created with; per-machine target versions come from
/// `MachineConfigGenOptions`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cluster {
    pub talos_version: String,
    pub kubernetes_version: String,
    #[serde(default)]
    pub features: ClusterFeatures,
    /// A locked cluster is mid-transfer; mutating reconciles are suspended
    /// while it is locked and still running.
    #[serde(default)]
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterFeatures {
    #[serde(default)]
    pub encrypt_disks: bool,
    #[serde(default)]
    pub embedded_discovery: bool,
    #[serde(default)]
    pub use_grpc_tunnel: bool,
}

resource_spec!(Cluster, "Cluster");

// ── ClusterSecrets ────────────────────────────────────────────────────────────

/// Generated per-cluster secret bundle. Immutable after creation; imported
/// bundles are never regenerated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterSecrets {
    pub data: Vec<u8>,
    #[serde(default)]
    pub imported: bool,
}

resource_spec!(ClusterSecrets, "ClusterSecrets");

// ── ClusterConfigVersion ──────────────────────────────────────────────────────

/// The Talos contract version frozen at cluster creation. Config generation
/// keys its defaults off this value so they never drift across applies.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterConfigVersion {
    pub version: String,
}

resource_spec!(ClusterConfigVersion, "ClusterConfigVersion");

// ── ClusterStatus ─────────────────────────────────────────────────────────────

/// Aggregate cluster availability; import/export taints are carried as labels.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterStatus {
    #[serde(default)]
    pub available: bool,
}

resource_spec!(ClusterStatus, "ClusterStatus");

// ── TalosConfig ───────────────────────────────────────────────────────────────

/// Cluster PKI material used to build authenticated node clients. PEM-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TalosConfig {
    pub ca: String,
    pub crt: String,
    pub key: String,
}

resource_spec!(TalosConfig, "TalosConfig");

// ── LoadBalancerConfig ────────────────────────────────────────────────────────

/// Control-plane endpoint machines join through.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    pub endpoint: String,
}

resource_spec!(LoadBalancerConfig, "LoadBalancerConfig");

// ── MachineSet ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    #[default]
    Rolling,
    Parallel,
}

/// Group of machines sharing a role within a cluster; membership is expressed
/// by `MachineSetNode` resources labeled with the set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineSet {
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
}

resource_spec!(MachineSet, "MachineSet");

/// Membership marker: a machine belongs to a machine set. All payload is in
/// the labels (cluster, machine-set, role).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineSetNode {}

resource_spec!(MachineSetNode, "MachineSetNode");
