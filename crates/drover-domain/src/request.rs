use serde::{Deserialize, Serialize};

use crate::meta::Namespace;
use crate::resource::resource_spec;

// ── MachineRequestSet ─────────────────────────────────────────────────────────

/// A value written to the node's META partition at provision time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaValue {
    pub key: u32,
    pub value: String,
}

/// Declared number of machines to request from an infra provider, plus the
/// attributes stamped onto every request it creates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineRequestSet {
    pub provider_id: String,
    pub machine_count: u32,
    pub talos_version: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub kernel_args: Vec<String>,
    #[serde(default)]
    pub meta_values: Vec<MetaValue>,
    #[serde(default)]
    pub provider_data: String,
}

resource_spec!(MachineRequestSet, "MachineRequestSet", Namespace::Infra);

// ── MachineRequest ────────────────────────────────────────────────────────────

/// One machine asked of an infra provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineRequest {
    pub provider_id: String,
    pub talos_version: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub kernel_args: Vec<String>,
    #[serde(default)]
    pub meta_values: Vec<MetaValue>,
    #[serde(default)]
    pub provider_data: String,
}

resource_spec!(MachineRequest, "MachineRequest", Namespace::Infra);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStage {
    #[default]
    Unknown,
    Provisioning,
    Provisioned,
    Failed,
}

/// Provider-written progress of a machine request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineRequestStatus {
    #[serde(default)]
    pub stage: RequestStage,
    /// Id of the machine the provider produced, once known.
    #[serde(default)]
    pub machine_id: String,
}

resource_spec!(MachineRequestStatus, "MachineRequestStatus", Namespace::Infra);

// ── Infra provider facts ──────────────────────────────────────────────────────

/// Written by a static infra provider once a machine is fully provisioned and
/// safe to configure.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InfraMachineStatus {
    #[serde(default)]
    pub ready_to_use: bool,
}

resource_spec!(InfraMachineStatus, "InfraMachineStatus", Namespace::Infra);

/// Liveness marker for an infra provider; removal releases its requests.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InfraProviderStatus {
    pub name: String,
}

resource_spec!(InfraProviderStatus, "InfraProviderStatus", Namespace::Infra);
