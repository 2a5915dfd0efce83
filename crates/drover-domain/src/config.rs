use serde::{Deserialize, Serialize};

use crate::resource::resource_spec;

// ── ClusterMachine ────────────────────────────────────────────────────────────

/// Allocation of a machine to a cluster. The Kubernetes version is fixed at
/// join time and feeds the config generator's version contract.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterMachine {
    pub kubernetes_version: String,
}

resource_spec!(ClusterMachine, "ClusterMachine");

// ── ClusterMachineConfig ──────────────────────────────────────────────────────

/// Generated on-node config document for one machine.
///
/// `data` is zstd-compressed; `generation_error` is set instead of `data`
/// when generation failed, and mirrored to the config status downstream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterMachineConfig {
    pub data: Vec<u8>,
    /// Version of the `ClusterMachine` this document was generated from.
    pub cluster_machine_version: String,
    #[serde(default)]
    pub generation_error: String,
}

resource_spec!(ClusterMachineConfig, "ClusterMachineConfig");

// ── ClusterMachineConfigPatches ───────────────────────────────────────────────

/// Ordered user/system config patches, applied over the generated document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterMachineConfigPatches {
    pub patches: Vec<String>,
}

resource_spec!(ClusterMachineConfigPatches, "ClusterMachineConfigPatches");

// ── MachineConfigGenOptions ───────────────────────────────────────────────────

/// Install image reference a machine should converge to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstallImage {
    pub talos_version: String,
    pub schematic_id: String,
    /// False until the schematic collector has filled in `schematic_id`.
    #[serde(default)]
    pub schematic_initialized: bool,
    #[serde(default)]
    pub secure_boot: bool,
    /// Compare schematics on the full id (covers extra-kernel-args variants).
    #[serde(default)]
    pub compare_full_schematic_id: bool,
}

/// Per-machine generation inputs collected from the machine and its cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineConfigGenOptions {
    pub install_disk: String,
    pub install_image: Option<InstallImage>,
}

resource_spec!(MachineConfigGenOptions, "MachineConfigGenOptions");

// ── ClusterMachineConfigStatus ────────────────────────────────────────────────

/// Result of driving a machine towards its generated config.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterMachineConfigStatus {
    /// sha256 of the uncompressed config document the node last acknowledged.
    pub cluster_machine_config_sha256: String,
    /// `ClusterMachineConfig.cluster_machine_version` at last successful apply.
    pub cluster_machine_config_version: String,
    #[serde(default)]
    pub last_config_error: String,
    /// Talos version most recently observed on the node.
    pub talos_version: String,
    /// Schematic id the node is considered to be running.
    pub schematic_id: String,
}

/// User-facing summary of where a machine stands relative to the config it
/// should carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigApplyStatus {
    Applied,
    Pending,
    Failed,
}

impl ClusterMachineConfigStatus {
    /// Derive the apply status against the sha of the currently generated
    /// document.
    pub fn apply_status(&self, current_sha: &str) -> ConfigApplyStatus {
        if !self.last_config_error.is_empty() {
            ConfigApplyStatus::Failed
        } else if !current_sha.is_empty() && self.cluster_machine_config_sha256 == current_sha {
            ConfigApplyStatus::Applied
        } else {
            ConfigApplyStatus::Pending
        }
    }
}

resource_spec!(ClusterMachineConfigStatus, "ClusterMachineConfigStatus");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_status_is_derived_from_error_then_sha() {
        let mut status = ClusterMachineConfigStatus {
            cluster_machine_config_sha256: "abc".into(),
            ..ClusterMachineConfigStatus::default()
        };
        assert_eq!(status.apply_status("abc"), ConfigApplyStatus::Applied);
        assert_eq!(status.apply_status("def"), ConfigApplyStatus::Pending);
        assert_eq!(status.apply_status(""), ConfigApplyStatus::Pending);

        status.last_config_error = "unknown field".into();
        assert_eq!(status.apply_status("abc"), ConfigApplyStatus::Failed);
    }
}

// ── ClusterMachineStatus ──────────────────────────────────────────────────────

/// Domain-level stage of a cluster machine, folded from the node stage and
/// resource lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMachineStage {
    #[default]
    Unknown,
    BeforeDestroy,
    Destroying,
    Installing,
    Upgrading,
    Rebooting,
    ShuttingDown,
    Booting,
    Running,
    Configuring,
    PoweredOff,
    PoweringOn,
}

impl std::fmt::Display for ClusterMachineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClusterMachineStage::Unknown => "unknown",
            ClusterMachineStage::BeforeDestroy => "before_destroy",
            ClusterMachineStage::Destroying => "destroying",
            ClusterMachineStage::Installing => "installing",
            ClusterMachineStage::Upgrading => "upgrading",
            ClusterMachineStage::Rebooting => "rebooting",
            ClusterMachineStage::ShuttingDown => "shutting_down",
            ClusterMachineStage::Booting => "booting",
            ClusterMachineStage::Running => "running",
            ClusterMachineStage::Configuring => "configuring",
            ClusterMachineStage::PoweredOff => "powered_off",
            ClusterMachineStage::PoweringOn => "powering_on",
        };
        write!(f, "{}", s)
    }
}

/// Aggregate per-machine status derived from already-reconciled resources.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterMachineStatus {
    #[serde(default)]
    pub stage: ClusterMachineStage,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub apid_available: bool,
    #[serde(default)]
    pub config_up_to_date: bool,
    #[serde(default)]
    pub last_config_error: String,
}

resource_spec!(ClusterMachineStatus, "ClusterMachineStatus");

// ── JoinConfig ────────────────────────────────────────────────────────────────

/// Parameters of the node join document emitted for multi-doc-capable nodes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JoinConfig {
    pub siderolink_api_url: String,
    pub event_sink_port: u16,
    pub kmsg_log_url: String,
    #[serde(default)]
    pub use_grpc_tunnel: bool,
}

resource_spec!(JoinConfig, "JoinConfig");
