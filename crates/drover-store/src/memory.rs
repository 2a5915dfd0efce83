use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use drover_domain::labels::ANNOTATION_OWNER;
use drover_domain::{AnyResource, LabelQuery, Namespace, Phase, ResourceRef};
use tokio::sync::{mpsc, RwLock};

use crate::error::StoreError;
use crate::event::Event;
use crate::store::ResourceStore;

type Key = (Namespace, String, String);

struct Watcher {
    namespace: Namespace,
    kind: String,
    tx: mpsc::UnboundedSender<Event>,
}

#[derive(Default)]
struct Inner {
    resources: HashMap<Key, AnyResource>,
    watchers: Vec<Watcher>,
}

impl Inner {
    fn publish(&mut self, namespace: Namespace, kind: &str, event: Event) {
        self.watchers.retain(|w| {
            if w.namespace != namespace || w.kind != kind {
                return true;
            }
            // A closed receiver unregisters the watcher.
            w.tx.send(event.clone()).is_ok()
        });
    }
}

/// In-memory implementation of [`ResourceStore`].
///
/// All data is lost on process exit. The store engine proper is an external
/// collaborator; this implementation carries the full contract (CAS versions,
/// two-step teardown, finalizer protocol, watch replay) for the runtime and
/// for tests.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(r: &ResourceRef) -> Key {
    (r.namespace, r.kind.clone(), r.id.clone())
}

fn not_found(r: &ResourceRef) -> StoreError {
    StoreError::NotFound { kind: r.kind.clone(), id: r.id.clone() }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get_any(&self, r: &ResourceRef) -> Result<AnyResource, StoreError> {
        let guard = self.inner.read().await;
        guard.resources.get(&key(r)).cloned().ok_or_else(|| not_found(r))
    }

    async fn get_any_uncached(&self, r: &ResourceRef) -> Result<AnyResource, StoreError> {
        // The in-memory store has no caching layer to bypass.
        self.get_any(r).await
    }

    async fn list_any(
        &self,
        namespace: Namespace,
        kind: &str,
        query: &LabelQuery,
    ) -> Result<Vec<AnyResource>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<AnyResource> = guard
            .resources
            .values()
            .filter(|res| {
                res.meta.namespace == namespace
                    && res.kind == kind
                    && query.matches(&res.meta.labels)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.meta.id.cmp(&b.meta.id));
        Ok(out)
    }

    async fn watch(
        &self,
        namespace: Namespace,
        kind: &str,
    ) -> Result<mpsc::UnboundedReceiver<Event>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self.inner.write().await;

        // Replay current state, then mark the bootstrap point. Registration
        // happens under the same lock, so no live event can interleave.
        let mut existing: Vec<&AnyResource> = guard
            .resources
            .values()
            .filter(|res| res.meta.namespace == namespace && res.kind == kind)
            .collect();
        existing.sort_by(|a, b| a.meta.id.cmp(&b.meta.id));
        for res in existing {
            let _ = tx.send(Event::Created(res.clone()));
        }
        let _ = tx.send(Event::Bootstrapped);

        guard.watchers.push(Watcher { namespace, kind: kind.to_string(), tx });
        Ok(rx)
    }

    async fn create_any(&self, mut resource: AnyResource) -> Result<AnyResource, StoreError> {
        let r = resource.reference();
        let mut guard = self.inner.write().await;
        if guard.resources.contains_key(&key(&r)) {
            return Err(StoreError::AlreadyExists { kind: r.kind, id: r.id });
        }
        let now = Utc::now();
        resource.meta.version = 1;
        resource.meta.phase = Phase::Running;
        resource.meta.created_at = now;
        resource.meta.updated_at = now;

        guard.resources.insert(key(&r), resource.clone());
        guard.publish(r.namespace, &r.kind, Event::Created(resource.clone()));
        Ok(resource)
    }

    async fn update_any(&self, mut resource: AnyResource) -> Result<AnyResource, StoreError> {
        let r = resource.reference();
        let mut guard = self.inner.write().await;
        let stored = guard.resources.get(&key(&r)).ok_or_else(|| not_found(&r))?;

        if stored.meta.version != resource.meta.version {
            return Err(StoreError::VersionConflict {
                kind: r.kind,
                id: r.id,
                expected: resource.meta.version,
                stored: stored.meta.version,
            });
        }
        if stored.meta.phase == Phase::TearingDown {
            return Err(StoreError::PhaseConflict { kind: r.kind, id: r.id });
        }

        // Phase, finalizers and creation time are store-owned.
        resource.meta.phase = stored.meta.phase;
        resource.meta.finalizers = stored.meta.finalizers.clone();
        resource.meta.created_at = stored.meta.created_at;
        resource.meta.version += 1;
        resource.meta.updated_at = Utc::now();

        guard.resources.insert(key(&r), resource.clone());
        guard.publish(r.namespace, &r.kind, Event::Updated(resource.clone()));
        Ok(resource)
    }

    async fn teardown(&self, r: &ResourceRef) -> Result<bool, StoreError> {
        let mut guard = self.inner.write().await;
        let stored = guard.resources.get_mut(&key(r)).ok_or_else(|| not_found(r))?;

        if stored.meta.phase != Phase::TearingDown {
            stored.meta.phase = Phase::TearingDown;
            stored.meta.version += 1;
            stored.meta.updated_at = Utc::now();
            let snapshot = stored.clone();
            guard.publish(r.namespace, &r.kind, Event::Updated(snapshot));
        }
        let ready = guard
            .resources
            .get(&key(r))
            .map(|res| res.meta.finalizers.is_empty())
            .unwrap_or(true);
        Ok(ready)
    }

    async fn destroy(
        &self,
        r: &ResourceRef,
        expected_owner: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let stored = guard.resources.get(&key(r)).ok_or_else(|| not_found(r))?;

        if stored.meta.phase != Phase::TearingDown {
            return Err(StoreError::PhaseConflict { kind: r.kind.clone(), id: r.id.clone() });
        }
        if !stored.meta.finalizers.is_empty() {
            return Err(StoreError::FinalizersPresent {
                kind: r.kind.clone(),
                id: r.id.clone(),
                finalizers: stored.meta.finalizers.clone(),
            });
        }
        if let Some(owner) = expected_owner {
            if stored.meta.annotation(ANNOTATION_OWNER) != Some(owner) {
                return Err(StoreError::OwnerMismatch { kind: r.kind.clone(), id: r.id.clone() });
            }
        }

        let removed = guard.resources.remove(&key(r)).expect("checked above");
        guard.publish(r.namespace, &r.kind, Event::Destroyed(removed));
        Ok(())
    }

    async fn add_finalizer(&self, r: &ResourceRef, finalizer: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let stored = guard.resources.get_mut(&key(r)).ok_or_else(|| not_found(r))?;
        if stored.meta.add_finalizer(finalizer) {
            stored.meta.version += 1;
            stored.meta.updated_at = Utc::now();
            let snapshot = stored.clone();
            guard.publish(r.namespace, &r.kind, Event::Updated(snapshot));
        }
        Ok(())
    }

    async fn remove_finalizer(&self, r: &ResourceRef, finalizer: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let stored = guard.resources.get_mut(&key(r)).ok_or_else(|| not_found(r))?;
        if stored.meta.remove_finalizer(finalizer) {
            stored.meta.version += 1;
            stored.meta.updated_at = Utc::now();
            let snapshot = stored.clone();
            guard.publish(r.namespace, &r.kind, Event::Updated(snapshot));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ResourceStoreExt;
    use drover_domain::{Machine, Resource, ResourceSpec};

    fn machine(id: &str) -> Resource<Machine> {
        Resource::new(
            id,
            Machine {
                connected: true,
                management_address: "10.0.0.1:50000".to_string(),
                use_grpc_tunnel: false,
            },
        )
    }

    fn machine_ref(id: &str) -> ResourceRef {
        ResourceRef::new(Machine::NAMESPACE, Machine::KIND, id)
    }

    #[tokio::test]
    async fn create_get_update_round_trip() {
        let store = InMemoryStore::new();
        let created = store.create(machine("m1")).await.unwrap();
        assert_eq!(created.meta.version, 1);

        let mut got = store.get::<Machine>("m1").await.unwrap();
        got.spec.connected = false;
        let updated = store.update(got).await.unwrap();
        assert_eq!(updated.meta.version, 2);
        assert!(!store.get::<Machine>("m1").await.unwrap().spec.connected);
    }

    #[tokio::test]
    async fn create_conflicts_on_existing_id() {
        let store = InMemoryStore::new();
        store.create(machine("m1")).await.unwrap();
        let err = store.create(machine("m1")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn stale_update_is_rejected() {
        let store = InMemoryStore::new();
        let stale = store.create(machine("m1")).await.unwrap();

        store
            .modify::<Machine, _>("m1", |m| m.spec.connected = false)
            .await
            .unwrap();

        let err = store.update(stale).await.unwrap_err();
        assert!(err.is_version_conflict());
    }

    #[tokio::test]
    async fn destroy_refused_until_torn_down_and_finalizer_free() {
        let store = InMemoryStore::new();
        store.create(machine("m1")).await.unwrap();
        let r = machine_ref("m1");

        // Running resources cannot be destroyed.
        assert!(store.destroy(&r, None).await.unwrap_err().is_phase_conflict());

        store.add_finalizer(&r, "ctrl").await.unwrap();
        let ready = store.teardown(&r).await.unwrap();
        assert!(!ready, "finalizer must block destroy readiness");

        let err = store.destroy(&r, None).await.unwrap_err();
        assert!(matches!(err, StoreError::FinalizersPresent { .. }));

        store.remove_finalizer(&r, "ctrl").await.unwrap();
        assert!(store.teardown(&r).await.unwrap());
        store.destroy(&r, None).await.unwrap();
        assert!(store.get::<Machine>("m1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn destroy_finalizer_integrity_over_interleavings() {
        // Destroy never succeeds while any finalizer remains, whatever the
        // order of teardown and finalizer operations.
        let store = InMemoryStore::new();
        store.create(machine("m1")).await.unwrap();
        let r = machine_ref("m1");

        store.add_finalizer(&r, "a").await.unwrap();
        store.add_finalizer(&r, "b").await.unwrap();
        store.teardown(&r).await.unwrap();
        store.add_finalizer(&r, "c").await.unwrap();

        for fin in ["a", "b"] {
            assert!(store.destroy(&r, None).await.is_err());
            store.remove_finalizer(&r, fin).await.unwrap();
        }
        assert!(store.destroy(&r, None).await.is_err());
        store.remove_finalizer(&r, "c").await.unwrap();
        store.destroy(&r, None).await.unwrap();
    }

    #[tokio::test]
    async fn update_rejected_while_tearing_down() {
        let store = InMemoryStore::new();
        let created = store.create(machine("m1")).await.unwrap();
        store.teardown(&machine_ref("m1")).await.unwrap();

        let mut stale = created;
        stale.meta.version += 1; // version matches the teardown bump
        let err = store.update(stale).await.unwrap_err();
        assert!(err.is_phase_conflict());
    }

    #[tokio::test]
    async fn destroy_checks_expected_owner() {
        let store = InMemoryStore::new();
        let mut res = machine("m1");
        res.meta.set_annotation(ANNOTATION_OWNER, "owner-a");
        store.create(res).await.unwrap();
        let r = machine_ref("m1");
        store.teardown(&r).await.unwrap();

        let err = store.destroy(&r, Some("owner-b")).await.unwrap_err();
        assert!(matches!(err, StoreError::OwnerMismatch { .. }));
        store.destroy(&r, Some("owner-a")).await.unwrap();
    }

    #[tokio::test]
    async fn list_filters_on_labels() {
        let store = InMemoryStore::new();
        let mut a = machine("a");
        a.meta.set_label("cluster", "c1");
        let mut b = machine("b");
        b.meta.set_label("cluster", "c2");
        store.create(a).await.unwrap();
        store.create(b).await.unwrap();

        let hits = store
            .list::<Machine>(&LabelQuery::new().eq("cluster", "c1"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].meta.id, "a");

        let all = store.list::<Machine>(&LabelQuery::new()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn watch_replays_then_streams() {
        let store = InMemoryStore::new();
        store.create(machine("m1")).await.unwrap();

        let mut rx = store.watch(Machine::NAMESPACE, Machine::KIND).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), Event::Created(_)));
        assert!(matches!(rx.recv().await.unwrap(), Event::Bootstrapped));

        store
            .modify::<Machine, _>("m1", |m| m.spec.connected = false)
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            Event::Updated(res) => assert_eq!(res.meta.id, "m1"),
            other => panic!("expected update, got {:?}", other),
        }

        let r = machine_ref("m1");
        store.teardown(&r).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), Event::Updated(_)));
        store.destroy(&r, None).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), Event::Destroyed(_)));
    }

    #[tokio::test]
    async fn update_preserves_unrelated_label_keys() {
        let store = InMemoryStore::new();
        let mut res = machine("m1");
        res.meta.set_label("cluster", "c1");
        store.create(res).await.unwrap();

        // A read-modify-write that only touches one label keeps the rest.
        store
            .modify::<Machine, _>("m1", |m| m.meta.set_label("role", "worker"))
            .await
            .unwrap();
        let got = store.get::<Machine>("m1").await.unwrap();
        assert_eq!(got.meta.label("cluster"), Some("c1"));
        assert_eq!(got.meta.label("role"), Some("worker"));
    }
}
