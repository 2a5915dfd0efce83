use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Namespaces ────────────────────────────────────────────────────────────────

/// Store namespace a resource lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Cluster-scoped resources.
    Default,
    /// Short-lived observational data.
    Ephemeral,
    /// Machine requests and provider status.
    Infra,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Default => "default",
            Namespace::Ephemeral => "ephemeral",
            Namespace::Infra => "infra",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Phase ─────────────────────────────────────────────────────────────────────

/// Lifecycle phase of a resource.
///
/// A resource is created Running and flips to TearingDown exactly once; it can
/// only be destroyed in TearingDown with an empty finalizer set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Running,
    TearingDown,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Running => write!(f, "running"),
            Phase::TearingDown => write!(f, "tearing_down"),
        }
    }
}

// ── ResourceMeta ──────────────────────────────────────────────────────────────

/// Metadata attached to every resource in the store.
///
/// `version` increases monotonically on every successful write and is the
/// compare-and-swap token for updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub namespace: Namespace,
    pub id: String,
    pub version: u64,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Ordered multiset of finalizer names blocking destruction.
    #[serde(default)]
    pub finalizers: Vec<String>,
}

impl ResourceMeta {
    pub fn new(namespace: Namespace, id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            namespace,
            id: id.into(),
            version: 0,
            phase: Phase::Running,
            created_at: now,
            updated_at: now,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            finalizers: Vec::new(),
        }
    }

    pub fn is_tearing_down(&self) -> bool {
        self.phase == Phase::TearingDown
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn has_label(&self, key: &str) -> bool {
        self.labels.contains_key(key)
    }

    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels.insert(key.into(), value.into());
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.insert(key.into(), value.into());
    }

    pub fn has_finalizer(&self, name: &str) -> bool {
        self.finalizers.iter().any(|f| f == name)
    }

    /// Idempotent: adding a finalizer that is already present is a no-op.
    pub fn add_finalizer(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.has_finalizer(&name) {
            return false;
        }
        self.finalizers.push(name);
        true
    }

    /// Idempotent: removing an absent finalizer is a no-op.
    pub fn remove_finalizer(&mut self, name: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != name);
        self.finalizers.len() != before
    }
}

// ── ResourceRef ───────────────────────────────────────────────────────────────

/// Fully-qualified reference to a resource: `(namespace, kind, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub namespace: Namespace,
    pub kind: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(namespace: Namespace, kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self { namespace, kind: kind.into(), id: id.into() }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.id)
    }
}

// ── Label queries ─────────────────────────────────────────────────────────────

/// One label selector term. Queries support equality and existence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelTerm {
    Exists(String),
    Eq(String, String),
}

/// Conjunction of label terms. An empty query matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelQuery {
    terms: Vec<LabelTerm>,
}

impl LabelQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.terms.push(LabelTerm::Exists(key.into()));
        self
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.terms.push(LabelTerm::Eq(key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.terms.iter().all(|term| match term {
            LabelTerm::Exists(k) => labels.contains_key(k),
            LabelTerm::Eq(k, v) => labels.get(k).map(String::as_str) == Some(v.as_str()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalizers_are_idempotent() {
        let mut meta = ResourceMeta::new(Namespace::Default, "m1");
        assert!(meta.add_finalizer("a"));
        assert!(!meta.add_finalizer("a"));
        assert_eq!(meta.finalizers, vec!["a"]);

        assert!(meta.remove_finalizer("a"));
        assert!(!meta.remove_finalizer("a"));
        assert!(meta.finalizers.is_empty());
    }

    #[test]
    fn label_query_matches_equality_and_existence() {
        let mut labels = BTreeMap::new();
        labels.insert("cluster".to_string(), "c1".to_string());
        labels.insert("role".to_string(), String::new());

        assert!(LabelQuery::new().matches(&labels));
        assert!(LabelQuery::new().eq("cluster", "c1").matches(&labels));
        assert!(!LabelQuery::new().eq("cluster", "c2").matches(&labels));
        assert!(LabelQuery::new().exists("role").matches(&labels));
        assert!(!LabelQuery::new().exists("absent").matches(&labels));
        assert!(!LabelQuery::new().eq("cluster", "c1").exists("absent").matches(&labels));
    }
}
