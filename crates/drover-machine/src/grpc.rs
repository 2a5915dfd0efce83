use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use drover_domain::MachineStage;
use tonic::transport::Channel;

use crate::api::MachineApi;
use crate::error::MachineError;
use crate::types::{
    ApplyRequestMode, ApplyResponse, AppliedMode, NodeStatus, ResetRequest, Timeouts,
    UpgradeRequest, VersionInfo,
};
use crate::wire;

/// gRPC-backed [`MachineApi`] over an established channel.
///
/// Connections close when the last clone of the underlying channel drops, so
/// a client built per reconcile is released on every exit path.
pub struct GrpcMachine {
    client: wire::MachineServiceClient,
    timeouts: Timeouts,
}

impl GrpcMachine {
    pub fn new(channel: Channel, timeouts: Timeouts) -> Self {
        Self { client: wire::MachineServiceClient::new(channel), timeouts }
    }

    async fn call<T, F>(&self, deadline: Duration, fut: F) -> Result<T, MachineError>
    where
        F: Future<Output = Result<T, tonic::Status>>,
    {
        match tokio::time::timeout(deadline, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(status)) => Err(status.into()),
            Err(_) => Err(MachineError::deadline()),
        }
    }
}

#[async_trait]
impl MachineApi for GrpcMachine {
    async fn version(&self) -> Result<VersionInfo, MachineError> {
        let mut client = self.client.clone();
        let resp = self
            .call(self.timeouts.read, async move { client.version(wire::VersionRequest {}).await })
            .await?;
        Ok(VersionInfo { tag: resp.tag })
    }

    async fn apply_configuration(
        &self,
        data: Vec<u8>,
        mode: ApplyRequestMode,
    ) -> Result<ApplyResponse, MachineError> {
        let mut client = self.client.clone();
        let mode = match mode {
            ApplyRequestMode::Auto => wire::ApplyMode::Auto,
            ApplyRequestMode::NoReboot => wire::ApplyMode::NoReboot,
        };
        let resp = self
            .call(self.timeouts.apply, async move {
                client
                    .apply_configuration(wire::ApplyConfigurationRequest {
                        data,
                        mode: mode as i32,
                    })
                    .await
            })
            .await?;
        let mode = match wire::ApplyMode::try_from(resp.mode) {
            Ok(wire::ApplyMode::Reboot) => AppliedMode::Reboot,
            Ok(wire::ApplyMode::Staged) => AppliedMode::Staged,
            _ => AppliedMode::NoReboot,
        };
        Ok(ApplyResponse { mode, details: resp.mode_details })
    }

    async fn upgrade(&self, request: UpgradeRequest) -> Result<(), MachineError> {
        let mut client = self.client.clone();
        self.call(self.timeouts.upgrade, async move {
            client
                .upgrade(wire::UpgradeRequest {
                    image: request.image,
                    preserve: request.preserve,
                    stage: request.stage,
                    force: request.force,
                })
                .await
        })
        .await?;
        Ok(())
    }

    async fn reset(&self, request: ResetRequest) -> Result<(), MachineError> {
        let mut client = self.client.clone();
        self.call(self.timeouts.reset, async move {
            client
                .reset(wire::ResetRequest {
                    graceful: request.graceful,
                    reboot: request.reboot,
                    system_partitions_to_wipe: request
                        .wipe
                        .iter()
                        .map(|p| wire::ResetPartitionSpec {
                            label: p.label().to_string(),
                            wipe: true,
                        })
                        .collect(),
                })
                .await
        })
        .await?;
        Ok(())
    }

    async fn meta_write(&self, key: u32, value: Vec<u8>) -> Result<(), MachineError> {
        let mut client = self.client.clone();
        self.call(self.timeouts.reset_prep, async move {
            client.meta_write(wire::MetaWriteRequest { key, value }).await
        })
        .await?;
        Ok(())
    }

    async fn meta_delete(&self, key: u32) -> Result<(), MachineError> {
        let mut client = self.client.clone();
        self.call(self.timeouts.reset_prep, async move {
            client.meta_delete(wire::MetaDeleteRequest { key }).await
        })
        .await?;
        Ok(())
    }

    async fn etcd_forfeit_leadership(&self) -> Result<(), MachineError> {
        let mut client = self.client.clone();
        self.call(self.timeouts.reset_prep, async move {
            client.etcd_forfeit_leadership(wire::EtcdForfeitLeadershipRequest {}).await
        })
        .await?;
        Ok(())
    }

    async fn etcd_leave_cluster(&self) -> Result<(), MachineError> {
        let mut client = self.client.clone();
        self.call(self.timeouts.reset_prep, async move {
            client.etcd_leave_cluster(wire::EtcdLeaveClusterRequest {}).await
        })
        .await?;
        Ok(())
    }

    async fn machine_status(&self) -> Result<NodeStatus, MachineError> {
        let mut client = self.client.clone();
        let resp = self
            .call(self.timeouts.read, async move {
                client.machine_status(wire::MachineStatusRequest {}).await
            })
            .await?;
        let stage = match wire::MachineStageWire::try_from(resp.stage) {
            Ok(wire::MachineStageWire::Booting) => MachineStage::Booting,
            Ok(wire::MachineStageWire::Running) => MachineStage::Running,
            Ok(wire::MachineStageWire::Maintenance) => MachineStage::Maintenance,
            Ok(wire::MachineStageWire::Installing) => MachineStage::Installing,
            Ok(wire::MachineStageWire::Rebooting) => MachineStage::Rebooting,
            Ok(wire::MachineStageWire::Resetting) => MachineStage::Resetting,
            Ok(wire::MachineStageWire::ShuttingDown) => MachineStage::ShuttingDown,
            Ok(wire::MachineStageWire::Upgrading) => MachineStage::Upgrading,
            _ => MachineStage::Unknown,
        };
        Ok(NodeStatus { stage, ready: resp.ready })
    }
}
