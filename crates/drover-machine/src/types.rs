use std::time::Duration;

use drover_domain::MachineStage;

/// META partition key cleared after a successful config apply so subsequent
/// boots are clean.
pub const UPGRADE_META_KEY: u32 = 8;

/// META partition key holding the state-partition encryption config; cleared
/// best-effort before a reset.
pub const STATE_ENCRYPTION_META_KEY: u32 = 9;

/// Node OS version as reported by the `Version` RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Version tag including the leading `v`, e.g. `v1.9.3`.
    pub tag: String,
}

/// Mode requested for a configuration apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyRequestMode {
    /// Let the node pick: reboot only when the diff requires it.
    Auto,
    NoReboot,
}

/// Mode the node actually applied the configuration with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedMode {
    NoReboot,
    Reboot,
    Staged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyResponse {
    pub mode: AppliedMode,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Installer image reference.
    pub image: String,
    /// Keep ephemeral data across the upgrade. Off in maintenance mode where
    /// there is nothing to preserve.
    pub preserve: bool,
    /// Stage the upgrade to apply on the next reboot.
    pub stage: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipePartition {
    Ephemeral,
    State,
}

impl WipePartition {
    pub fn label(&self) -> &'static str {
        match self {
            WipePartition::Ephemeral => "EPHEMERAL",
            WipePartition::State => "STATE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetRequest {
    pub graceful: bool,
    pub reboot: bool,
    pub wipe: Vec<WipePartition>,
}

/// Stage and readiness read back from the node, used by the snapshot pull
/// path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub stage: MachineStage,
    pub ready: bool,
}

/// Per-call deadlines. Expiry is a transient error and yields a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub read: Duration,
    pub apply: Duration,
    pub upgrade: Duration,
    pub reset_prep: Duration,
    pub reset: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(5),
            apply: Duration::from_secs(60),
            upgrade: Duration::from_secs(300),
            reset_prep: Duration::from_secs(10),
            reset: Duration::from_secs(60),
        }
    }
}
