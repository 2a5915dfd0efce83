use serde::{Deserialize, Serialize};

use crate::resource::resource_spec;

// ── Machine ───────────────────────────────────────────────────────────────────

/// A discovered node and its connection liveness. Created on first contact.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Machine {
    #[serde(default)]
    pub connected: bool,
    pub management_address: String,
    #[serde(default)]
    pub use_grpc_tunnel: bool,
}

resource_spec!(Machine, "Machine");

// ── MachineStatus ─────────────────────────────────────────────────────────────

/// Image variant the node reports it is running.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schematic {
    pub id: String,
    /// Schematic id including extra kernel args; some deployments compare on
    /// this instead of the plain id.
    pub full_id: String,
    /// The node reports a schematic drover cannot resolve (pre-factory image).
    #[serde(default)]
    pub invalid: bool,
    #[serde(default)]
    pub in_agent_mode: bool,
}

/// Facts observed about a node by pulling its API.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineStatus {
    pub talos_version: String,
    pub schematic: Option<Schematic>,
    pub management_address: String,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub maintenance: bool,
    /// Set when a static infra provider manages this machine; gates config
    /// application on the provider reporting the machine ready.
    #[serde(default)]
    pub managed_by_static_infra_provider: bool,
}

resource_spec!(MachineStatus, "MachineStatus");

// ── MachineStatusSnapshot ─────────────────────────────────────────────────────

/// Node lifecycle stage as reported by the node itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStage {
    #[default]
    Unknown,
    Booting,
    Running,
    Maintenance,
    Installing,
    Rebooting,
    Resetting,
    ShuttingDown,
    Upgrading,
}

impl std::fmt::Display for MachineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MachineStage::Unknown => "unknown",
            MachineStage::Booting => "booting",
            MachineStage::Running => "running",
            MachineStage::Maintenance => "maintenance",
            MachineStage::Installing => "installing",
            MachineStage::Rebooting => "rebooting",
            MachineStage::Resetting => "resetting",
            MachineStage::ShuttingDown => "shutting_down",
            MachineStage::Upgrading => "upgrading",
        };
        write!(f, "{}", s)
    }
}

/// Power stage pushed by the infra provider, when it knows one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerStage {
    #[default]
    None,
    PoweredOff,
    PoweringOn,
}

/// Latest stage and power state reported for a machine, merged from push
/// events and periodic pulls.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineStatusSnapshot {
    #[serde(default)]
    pub stage: MachineStage,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub power_stage: PowerStage,
}

resource_spec!(MachineStatusSnapshot, "MachineStatusSnapshot");

// ── Link / NodeUniqueToken ────────────────────────────────────────────────────

/// Node↔control-plane tunnel endpoint state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Link {
    pub node_public_key: String,
    pub virtual_addrport: String,
    #[serde(default)]
    pub connected: bool,
}

resource_spec!(Link, "Link");

/// Per-node join secret issued on first contact.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeUniqueToken {
    pub token: String,
}

resource_spec!(NodeUniqueToken, "NodeUniqueToken");
