use async_trait::async_trait;

use crate::error::MachineError;
use crate::types::{
    ApplyRequestMode, ApplyResponse, NodeStatus, ResetRequest, UpgradeRequest, VersionInfo,
};

/// Typed surface of the node OS control API the core consumes.
///
/// Every method runs under a per-call deadline chosen by the implementation;
/// deadline expiry surfaces as a transient [`MachineError`].
#[async_trait]
pub trait MachineApi: Send + Sync {
    async fn version(&self) -> Result<VersionInfo, MachineError>;

    async fn apply_configuration(
        &self,
        data: Vec<u8>,
        mode: ApplyRequestMode,
    ) -> Result<ApplyResponse, MachineError>;

    async fn upgrade(&self, request: UpgradeRequest) -> Result<(), MachineError>;

    async fn reset(&self, request: ResetRequest) -> Result<(), MachineError>;

    async fn meta_write(&self, key: u32, value: Vec<u8>) -> Result<(), MachineError>;

    async fn meta_delete(&self, key: u32) -> Result<(), MachineError>;

    async fn etcd_forfeit_leadership(&self) -> Result<(), MachineError>;

    async fn etcd_leave_cluster(&self) -> Result<(), MachineError>;

    /// Read the node's current stage and readiness (the in-band resource-read
    /// channel, reduced to what the snapshot pull path needs).
    async fn machine_status(&self) -> Result<NodeStatus, MachineError>;
}
