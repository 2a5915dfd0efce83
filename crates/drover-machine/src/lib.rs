pub mod api;
pub mod error;
pub mod grpc;
pub mod mock;
pub mod provider;
pub mod transport;
pub mod types;
mod wire;

pub use api::MachineApi;
pub use error::{MachineError, MachineErrorKind};
pub use grpc::GrpcMachine;
pub use mock::{MockCall, MockMachine, MockProvider};
pub use provider::{Client, ClientProvider, ConnectMode, GrpcProvider};
pub use types::{
    ApplyRequestMode, ApplyResponse, AppliedMode, NodeStatus, ResetRequest, Timeouts,
    UpgradeRequest, VersionInfo, WipePartition, STATE_ENCRYPTION_META_KEY, UPGRADE_META_KEY,
};
