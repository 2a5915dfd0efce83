//! Well-known label and annotation keys.
//!
//! Labels carry selectable relationships (cluster membership, role, request
//! backing); annotations carry per-resource switches that are never queried.

/// Cluster a resource belongs to.
pub const LABEL_CLUSTER: &str = "drover.dev/cluster";

/// Machine set a cluster machine belongs to.
pub const LABEL_MACHINE_SET: &str = "drover.dev/machine-set";

/// Present (empty value) on control-plane machines.
pub const LABEL_ROLE_CONTROL_PLANE: &str = "drover.dev/role-controlplane";

/// Present (empty value) on worker machines.
pub const LABEL_ROLE_WORKER: &str = "drover.dev/role-worker";

/// Present on resources whose backing machine is currently connected.
pub const LABEL_CONNECTED: &str = "drover.dev/connected";

/// Machine request set that created a machine request.
pub const LABEL_MACHINE_REQUEST_SET: &str = "drover.dev/machine-request-set";

/// Machine request that produced a machine.
pub const LABEL_MACHINE_REQUEST: &str = "drover.dev/machine-request";

/// Infra provider responsible for a request or machine.
pub const LABEL_INFRA_PROVIDER: &str = "drover.dev/infra-provider";

/// Present on machines managed by a static (non-scaling) infra provider.
pub const LABEL_STATIC_INFRA_PROVIDER: &str = "drover.dev/static-infra-provider";

/// Cluster-status taints set while a cluster transfer is in flight; a tainted
/// cluster's machines must not be touched by the reset path.
pub const LABEL_TAINTED_IMPORTING: &str = "drover.dev/tainted-by-importing";
pub const LABEL_TAINTED_EXPORTING: &str = "drover.dev/tainted-by-exporting";

/// Controller that owns an exclusive output resource.
pub const ANNOTATION_OWNER: &str = "drover.dev/owner";

/// Requests a non-graceful departure regardless of machine-set phase.
pub const ANNOTATION_FORCE_DESTROY: &str = "drover.dev/force-destroy";

/// Input versions recorded by a generating controller on its output,
/// serialized as `kind/id=version` pairs joined by commas.
pub const ANNOTATION_INPUT_VERSIONS: &str = "drover.dev/input-resource-versions";

/// Machine-level opt-ins for legacy config compatibility, consumed by the
/// config generator before user patches are applied.
pub const ANNOTATION_COMPAT_DISABLE_PREDICTABLE_INTERFACES: &str =
    "drover.dev/compat-predictable-interface-names-off";
pub const ANNOTATION_COMPAT_KEEP_LEGACY_RESOLVERS: &str = "drover.dev/compat-keep-legacy-resolvers";
