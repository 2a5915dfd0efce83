use async_trait::async_trait;
use drover_domain::{AnyResource, LabelQuery, Namespace, Resource, ResourceRef, ResourceSpec};
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::event::Event;

/// The versioned resource store the reconcilers run against.
///
/// All mutations are compare-and-swap on `meta.version`. Teardown and destroy
/// are a two-step protocol: `teardown` flips the phase and reports whether the
/// finalizer set is already empty; `destroy` is refused until it is.
#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    async fn get_any(&self, r: &ResourceRef) -> Result<AnyResource, StoreError>;

    /// Read bypassing any caching layer. Correctness-critical paths (e.g.
    /// secret generation) use this where a stale read would cause permanent
    /// divergence.
    async fn get_any_uncached(&self, r: &ResourceRef) -> Result<AnyResource, StoreError>;

    async fn list_any(
        &self,
        namespace: Namespace,
        kind: &str,
        query: &LabelQuery,
    ) -> Result<Vec<AnyResource>, StoreError>;

    /// Watch a kind. The receiver is replayed the current state first (one
    /// `Created` per resource, then `Bootstrapped`), then receives live events.
    async fn watch(
        &self,
        namespace: Namespace,
        kind: &str,
    ) -> Result<mpsc::UnboundedReceiver<Event>, StoreError>;

    /// Create; fails with `AlreadyExists` if the id is taken.
    async fn create_any(&self, resource: AnyResource) -> Result<AnyResource, StoreError>;

    /// Optimistic update keyed on `resource.meta.version`. Phase and
    /// finalizers are owned by the store and never modified through update.
    async fn update_any(&self, resource: AnyResource) -> Result<AnyResource, StoreError>;

    /// Flip the phase to TearingDown. Returns true when the resource is ready
    /// to destroy (finalizer set empty).
    async fn teardown(&self, r: &ResourceRef) -> Result<bool, StoreError>;

    /// Remove a resource. Refused unless it is TearingDown with no finalizers
    /// and, when `expected_owner` is given, the recorded owner matches.
    async fn destroy(&self, r: &ResourceRef, expected_owner: Option<&str>)
        -> Result<(), StoreError>;

    async fn add_finalizer(&self, r: &ResourceRef, finalizer: &str) -> Result<(), StoreError>;

    async fn remove_finalizer(&self, r: &ResourceRef, finalizer: &str) -> Result<(), StoreError>;
}

/// Typed convenience layer over [`ResourceStore`].
#[async_trait]
pub trait ResourceStoreExt: ResourceStore {
    async fn get<S: ResourceSpec>(&self, id: &str) -> Result<Resource<S>, StoreError> {
        let r = ResourceRef::new(S::NAMESPACE, S::KIND, id);
        Ok(self.get_any(&r).await?.decode()?)
    }

    async fn get_uncached<S: ResourceSpec>(&self, id: &str) -> Result<Resource<S>, StoreError> {
        let r = ResourceRef::new(S::NAMESPACE, S::KIND, id);
        Ok(self.get_any_uncached(&r).await?.decode()?)
    }

    /// `Ok(None)` instead of a NotFound error for optional inputs.
    async fn get_opt<S: ResourceSpec>(&self, id: &str) -> Result<Option<Resource<S>>, StoreError> {
        match self.get::<S>(id).await {
            Ok(r) => Ok(Some(r)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list<S: ResourceSpec>(
        &self,
        query: &LabelQuery,
    ) -> Result<Vec<Resource<S>>, StoreError> {
        self.list_any(S::NAMESPACE, S::KIND, query)
            .await?
            .iter()
            .map(|any| any.decode().map_err(StoreError::from))
            .collect()
    }

    async fn create<S: ResourceSpec>(
        &self,
        resource: Resource<S>,
    ) -> Result<Resource<S>, StoreError> {
        let any = resource.to_any()?;
        Ok(self.create_any(any).await?.decode()?)
    }

    async fn update<S: ResourceSpec>(
        &self,
        resource: Resource<S>,
    ) -> Result<Resource<S>, StoreError> {
        let any = resource.to_any()?;
        Ok(self.update_any(any).await?.decode()?)
    }

    /// Read-modify-write with transparent retry on version conflicts.
    async fn modify<S, F>(&self, id: &str, mut mutate: F) -> Result<Resource<S>, StoreError>
    where
        S: ResourceSpec,
        F: FnMut(&mut Resource<S>) + Send,
    {
        loop {
            let mut resource = self.get::<S>(id).await?;
            mutate(&mut resource);
            match self.update(resource).await {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_version_conflict() => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Teardown and, if no finalizers remain, destroy. Returns true once the
    /// resource is gone (a missing resource counts as gone).
    async fn teardown_and_destroy(
        &self,
        r: &ResourceRef,
        expected_owner: Option<&str>,
    ) -> Result<bool, StoreError> {
        let ready = match self.teardown(r).await {
            Ok(ready) => ready,
            Err(e) if e.is_not_found() => return Ok(true),
            Err(e) => return Err(e),
        };
        if !ready {
            return Ok(false);
        }
        match self.destroy(r, expected_owner).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    }
}

impl<T: ResourceStore + ?Sized> ResourceStoreExt for T {}
