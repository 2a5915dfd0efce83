pub mod cluster;
pub mod config;
pub mod error;
pub mod labels;
pub mod machine;
pub mod meta;
pub mod request;
pub mod resource;

pub use cluster::{
    Cluster, ClusterConfigVersion, ClusterFeatures, ClusterSecrets, ClusterStatus,
    LoadBalancerConfig, MachineSet, MachineSetNode, TalosConfig, UpdateStrategy,
};
pub use config::{
    ClusterMachine, ClusterMachineConfig, ClusterMachineConfigPatches,
    ClusterMachineConfigStatus, ClusterMachineStage, ClusterMachineStatus, ConfigApplyStatus,
    InstallImage, JoinConfig, MachineConfigGenOptions,
};
pub use error::DomainError;
pub use machine::{
    Link, Machine, MachineStage, MachineStatus, MachineStatusSnapshot, NodeUniqueToken,
    PowerStage, Schematic,
};
pub use meta::{LabelQuery, LabelTerm, Namespace, Phase, ResourceMeta, ResourceRef};
pub use request::{
    InfraMachineStatus, InfraProviderStatus, MachineRequest, MachineRequestSet,
    MachineRequestStatus, MetaValue, RequestStage,
};
pub use resource::{AnyResource, Resource, ResourceSpec};
