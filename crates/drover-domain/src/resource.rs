use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::DomainError;
use crate::meta::{Namespace, ResourceMeta, ResourceRef};

/// A typed resource spec. Implemented by every domain entity that lives in the
/// store; `KIND` is the wire name used for watches and references.
pub trait ResourceSpec:
    Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: &'static str;
    const NAMESPACE: Namespace = Namespace::Default;
}

macro_rules! resource_spec {
    ($ty:ty, $kind:literal) => {
        impl $crate::resource::ResourceSpec for $ty {
            const KIND: &'static str = $kind;
        }
    };
    ($ty:ty, $kind:literal, $ns:expr) => {
        impl $crate::resource::ResourceSpec for $ty {
            const KIND: &'static str = $kind;
            const NAMESPACE: $crate::meta::Namespace = $ns;
        }
    };
}
pub(crate) use resource_spec;

// ── Resource ──────────────────────────────────────────────────────────────────

/// A typed resource: metadata plus the spec payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource<S> {
    pub meta: ResourceMeta,
    pub spec: S,
}

impl<S: ResourceSpec> Resource<S> {
    pub fn new(id: impl Into<String>, spec: S) -> Self {
        Self { meta: ResourceMeta::new(S::NAMESPACE, id), spec }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(S::NAMESPACE, S::KIND, self.meta.id.clone())
    }

    /// Reference to the resource of kind `T` with the same id.
    pub fn sibling_ref<T: ResourceSpec>(&self) -> ResourceRef {
        ResourceRef::new(T::NAMESPACE, T::KIND, self.meta.id.clone())
    }

    pub fn to_any(&self) -> Result<AnyResource, DomainError> {
        Ok(AnyResource {
            kind: S::KIND.to_string(),
            meta: self.meta.clone(),
            spec: serde_json::to_value(&self.spec)?,
        })
    }
}

impl<S: ResourceSpec + Default> Resource<S> {
    pub fn fresh(id: impl Into<String>) -> Self {
        Self::new(id, S::default())
    }
}

// ── AnyResource ───────────────────────────────────────────────────────────────

/// An untyped resource snapshot as it travels through the store and watch
/// streams. `spec` is the JSON form of the typed spec.
#[derive(Debug, Clone, PartialEq)]
pub struct AnyResource {
    pub kind: String,
    pub meta: ResourceMeta,
    pub spec: serde_json::Value,
}

impl AnyResource {
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.meta.namespace, self.kind.clone(), self.meta.id.clone())
    }

    pub fn decode<S: ResourceSpec>(&self) -> Result<Resource<S>, DomainError> {
        if self.kind != S::KIND {
            return Err(DomainError::KindMismatch {
                expected: S::KIND.to_string(),
                actual: self.kind.clone(),
            });
        }
        Ok(Resource { meta: self.meta.clone(), spec: serde_json::from_value(self.spec.clone())? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;

    #[test]
    fn typed_round_trip_through_any() {
        let machine = Resource::new(
            "m1",
            Machine { connected: true, management_address: "10.0.0.1:50000".into(), use_grpc_tunnel: false },
        );
        let any = machine.to_any().unwrap();
        assert_eq!(any.kind, Machine::KIND);

        let back = any.decode::<Machine>().unwrap();
        assert_eq!(back.spec, machine.spec);
        assert_eq!(back.meta.id, "m1");
    }

    #[test]
    fn decode_rejects_kind_mismatch() {
        let machine = Resource::new(
            "m1",
            Machine { connected: false, management_address: String::new(), use_grpc_tunnel: false },
        );
        let any = machine.to_any().unwrap();
        let err = any.decode::<crate::cluster::Cluster>().unwrap_err();
        assert!(matches!(err, DomainError::KindMismatch { .. }));
    }
}
