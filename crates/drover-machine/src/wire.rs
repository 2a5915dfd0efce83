//! Wire types and the raw unary client for the node OS `machine.MachineService`.
//!
//! The message set is the subset of the service the core consumes, kept in
//! sync with the node OS API by hand; tags follow the service definition.

use http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::{Request, Status};

#[derive(Clone, PartialEq, prost::Message)]
pub struct VersionRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct VersionResponse {
    /// Version tag, e.g. `v1.9.3`.
    #[prost(string, tag = "1")]
    pub tag: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ApplyMode {
    Auto = 0,
    NoReboot = 1,
    Reboot = 2,
    Staged = 3,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ApplyConfigurationRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
    #[prost(enumeration = "ApplyMode", tag = "2")]
    pub mode: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ApplyConfigurationResponse {
    /// Mode the node actually applied the config with.
    #[prost(enumeration = "ApplyMode", tag = "1")]
    pub mode: i32,
    #[prost(string, tag = "2")]
    pub mode_details: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpgradeRequest {
    #[prost(string, tag = "1")]
    pub image: String,
    #[prost(bool, tag = "2")]
    pub preserve: bool,
    #[prost(bool, tag = "3")]
    pub stage: bool,
    #[prost(bool, tag = "4")]
    pub force: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpgradeResponse {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ResetPartitionSpec {
    #[prost(string, tag = "1")]
    pub label: String,
    #[prost(bool, tag = "2")]
    pub wipe: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ResetRequest {
    #[prost(bool, tag = "1")]
    pub graceful: bool,
    #[prost(bool, tag = "2")]
    pub reboot: bool,
    #[prost(message, repeated, tag = "3")]
    pub system_partitions_to_wipe: Vec<ResetPartitionSpec>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ResetResponse {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MetaWriteRequest {
    #[prost(uint32, tag = "1")]
    pub key: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MetaWriteResponse {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MetaDeleteRequest {
    #[prost(uint32, tag = "1")]
    pub key: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MetaDeleteResponse {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EtcdForfeitLeadershipRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EtcdForfeitLeadershipResponse {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EtcdLeaveClusterRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EtcdLeaveClusterResponse {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MachineStageWire {
    Unknown = 0,
    Booting = 1,
    Running = 2,
    Maintenance = 3,
    Installing = 4,
    Rebooting = 5,
    Resetting = 6,
    ShuttingDown = 7,
    Upgrading = 8,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MachineStatusRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MachineStatusResponse {
    #[prost(enumeration = "MachineStageWire", tag = "1")]
    pub stage: i32,
    #[prost(bool, tag = "2")]
    pub ready: bool,
}

// ── Raw client ────────────────────────────────────────────────────────────────

macro_rules! unary {
    ($self:ident, $req:expr, $resp:ty, $path:literal) => {{
        $self
            .inner
            .ready()
            .await
            .map_err(|e| Status::unavailable(format!("service not ready: {e}")))?;
        let codec: tonic_prost::ProstCodec<_, $resp> = tonic_prost::ProstCodec::default();
        let path = PathAndQuery::from_static($path);
        Ok($self.inner.unary(Request::new($req), path, codec).await?.into_inner())
    }};
}

/// Unary client over an established channel. One instance per connection;
/// cheap to clone.
#[derive(Debug, Clone)]
pub struct MachineServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl MachineServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self { inner: tonic::client::Grpc::new(channel) }
    }

    pub async fn version(&mut self, req: VersionRequest) -> Result<VersionResponse, Status> {
        unary!(self, req, VersionResponse, "/machine.MachineService/Version")
    }

    pub async fn apply_configuration(
        &mut self,
        req: ApplyConfigurationRequest,
    ) -> Result<ApplyConfigurationResponse, Status> {
        unary!(
            self,
            req,
            ApplyConfigurationResponse,
            "/machine.MachineService/ApplyConfiguration"
        )
    }

    pub async fn upgrade(&mut self, req: UpgradeRequest) -> Result<UpgradeResponse, Status> {
        unary!(self, req, UpgradeResponse, "/machine.MachineService/Upgrade")
    }

    pub async fn reset(&mut self, req: ResetRequest) -> Result<ResetResponse, Status> {
        unary!(self, req, ResetResponse, "/machine.MachineService/Reset")
    }

    pub async fn meta_write(&mut self, req: MetaWriteRequest) -> Result<MetaWriteResponse, Status> {
        unary!(self, req, MetaWriteResponse, "/machine.MachineService/MetaWrite")
    }

    pub async fn meta_delete(
        &mut self,
        req: MetaDeleteRequest,
    ) -> Result<MetaDeleteResponse, Status> {
        unary!(self, req, MetaDeleteResponse, "/machine.MachineService/MetaDelete")
    }

    pub async fn etcd_forfeit_leadership(
        &mut self,
        req: EtcdForfeitLeadershipRequest,
    ) -> Result<EtcdForfeitLeadershipResponse, Status> {
        unary!(
            self,
            req,
            EtcdForfeitLeadershipResponse,
            "/machine.MachineService/EtcdForfeitLeadership"
        )
    }

    pub async fn etcd_leave_cluster(
        &mut self,
        req: EtcdLeaveClusterRequest,
    ) -> Result<EtcdLeaveClusterResponse, Status> {
        unary!(self, req, EtcdLeaveClusterResponse, "/machine.MachineService/EtcdLeaveCluster")
    }

    pub async fn machine_status(
        &mut self,
        req: MachineStatusRequest,
    ) -> Result<MachineStatusResponse, Status> {
        unary!(self, req, MachineStatusResponse, "/machine.MachineService/MachineStatus")
    }
}
