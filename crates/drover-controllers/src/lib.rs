pub mod cluster_machine_status;
pub mod config_status;
pub mod config_version;
pub mod counters;
mod helpers;
pub mod machine_config;
pub mod request_set;
pub mod secrets;
pub mod snapshot;

pub use cluster_machine_status::ClusterMachineStatusController;
pub use config_status::ConfigStatusController;
pub use config_version::ConfigVersionController;
pub use counters::TeardownCounters;
pub use machine_config::{MachineConfigController, MachineConfigOptions};
pub use request_set::MachineRequestSetController;
pub use secrets::ClusterSecretsController;
pub use snapshot::{InboundSnapshot, MachineStatusSnapshotController};
