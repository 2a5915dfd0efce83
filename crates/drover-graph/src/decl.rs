use std::sync::Arc;

use drover_domain::{AnyResource, Namespace, ResourceSpec};

// ── Input declarations ────────────────────────────────────────────────────────

/// How an input participates in a controller's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Drives the per-id queue; one reconcile per id change.
    Primary,
    /// Fan-in: changes are translated to primary ids by the mapper.
    Mapped,
    /// Like Mapped, but destroy events are still delivered so outputs can be
    /// garbage-collected.
    MappedDestroyReady,
    /// Read-only dependency; never enqueues.
    Weak,
}

/// Translates a mapped-input change into the primary ids to enqueue.
#[derive(Clone)]
pub enum Mapper {
    /// Enqueue the primary with the same id as the input.
    SameId,
    /// Enqueue all primaries whose `cluster` label equals the input's.
    ByClusterLabel { control_plane_only: bool },
    /// Enqueue the primary whose id is the input's value for this label.
    ExtractLabelValue(&'static str),
    /// Enqueue every primary whose value for this label equals the input's
    /// id. Set-level fan-out, e.g. infra provider change → all its sets.
    ByLabel(&'static str),
    /// No enqueue.
    None,
    /// Arbitrary fan-out, computed from the input resource alone.
    Custom(Arc<dyn Fn(&AnyResource) -> Vec<String> + Send + Sync>),
}

impl std::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mapper::SameId => write!(f, "SameId"),
            Mapper::ByClusterLabel { control_plane_only } => {
                write!(f, "ByClusterLabel(control_plane_only={})", control_plane_only)
            }
            Mapper::ExtractLabelValue(key) => write!(f, "ExtractLabelValue({})", key),
            Mapper::ByLabel(key) => write!(f, "ByLabel({})", key),
            Mapper::None => write!(f, "None"),
            Mapper::Custom(_) => write!(f, "Custom"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InputDecl {
    pub namespace: Namespace,
    pub kind: &'static str,
    pub input_kind: InputKind,
    pub mapper: Mapper,
}

impl InputDecl {
    pub fn primary<S: ResourceSpec>() -> Self {
        Self {
            namespace: S::NAMESPACE,
            kind: S::KIND,
            input_kind: InputKind::Primary,
            mapper: Mapper::SameId,
        }
    }

    pub fn mapped<S: ResourceSpec>(mapper: Mapper) -> Self {
        Self { namespace: S::NAMESPACE, kind: S::KIND, input_kind: InputKind::Mapped, mapper }
    }

    pub fn mapped_destroy_ready<S: ResourceSpec>(mapper: Mapper) -> Self {
        Self {
            namespace: S::NAMESPACE,
            kind: S::KIND,
            input_kind: InputKind::MappedDestroyReady,
            mapper,
        }
    }

    pub fn weak<S: ResourceSpec>() -> Self {
        Self {
            namespace: S::NAMESPACE,
            kind: S::KIND,
            input_kind: InputKind::Weak,
            mapper: Mapper::None,
        }
    }
}

// ── Output declarations ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Only this controller writes the type.
    Exclusive,
    /// Multiple owners, distinguished by the recorded owner name.
    Shared,
}

#[derive(Debug, Clone)]
pub struct OutputDecl {
    pub namespace: Namespace,
    pub kind: &'static str,
    pub output_kind: OutputKind,
}

impl OutputDecl {
    pub fn exclusive<S: ResourceSpec>() -> Self {
        Self { namespace: S::NAMESPACE, kind: S::KIND, output_kind: OutputKind::Exclusive }
    }

    pub fn shared<S: ResourceSpec>() -> Self {
        Self { namespace: S::NAMESPACE, kind: S::KIND, output_kind: OutputKind::Shared }
    }
}

// ── Controller metadata ───────────────────────────────────────────────────────

/// Everything the runtime needs to know about a controller before running it.
#[derive(Debug, Clone)]
pub struct ControllerMeta {
    pub name: String,
    pub inputs: Vec<InputDecl>,
    pub outputs: Vec<OutputDecl>,
    pub concurrency: usize,
}
