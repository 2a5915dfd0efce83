use async_trait::async_trait;
use drover_domain::labels::{
    ANNOTATION_OWNER, LABEL_CLUSTER, LABEL_INFRA_PROVIDER, LABEL_MACHINE_REQUEST,
    LABEL_MACHINE_REQUEST_SET,
};
use drover_domain::{
    InfraProviderStatus, LabelQuery, Machine, MachineRequest, MachineRequestSet, Namespace,
    Resource, ResourceRef, ResourceSpec,
};
use drover_graph::{InputDecl, Mapper, OutputDecl};
use drover_runtime::{Controller, ControllerCtx, ReconcileError};
use drover_store::ResourceStoreExt;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};

const NAME: &str = "MachineRequestSetController";

/// Finalizer owned by the provider-side status controller; never stripped,
/// even when the provider itself disappears.
pub const MACHINE_REQUEST_STATUS_OWNER: &str = "MachineRequestStatusController";

const SUFFIX_LEN: usize = 6;
const CREATE_COLLISION_RETRIES: usize = 100;

/// Reconciles the declared machine count of a request set against its
/// `MachineRequest` children: scale-up with random suffixes, scale-down in
/// idle-first order, cleanup when machines or the provider go away.
pub struct MachineRequestSetController;

fn request_ref(id: &str) -> ResourceRef {
    ResourceRef::new(MachineRequest::NAMESPACE, MachineRequest::KIND, id)
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl MachineRequestSetController {
    async fn scale_up(
        &self,
        ctx: &ControllerCtx,
        set: &Resource<MachineRequestSet>,
        missing: usize,
    ) -> Result<(), ReconcileError> {
        for _ in 0..missing {
            let mut created = false;
            for _ in 0..CREATE_COLLISION_RETRIES {
                let id = format!("{}-{}", set.id(), random_suffix());
                let mut request = Resource::new(id, MachineRequest {
                    provider_id: set.spec.provider_id.clone(),
                    talos_version: set.spec.talos_version.clone(),
                    extensions: set.spec.extensions.clone(),
                    kernel_args: set.spec.kernel_args.clone(),
                    meta_values: set.spec.meta_values.clone(),
                    provider_data: set.spec.provider_data.clone(),
                });
                request.meta.set_label(LABEL_MACHINE_REQUEST_SET, set.id());
                request.meta.set_label(LABEL_INFRA_PROVIDER, &set.spec.provider_id);
                request.meta.set_annotation(ANNOTATION_OWNER, NAME);
                match ctx.store.create(request).await {
                    Ok(request) => {
                        info!(set = %set.id(), request = %request.meta.id, "machine request created");
                        created = true;
                        break;
                    }
                    Err(e) if e.is_already_exists() => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            if !created {
                return Err(ReconcileError::retry("could not allocate a unique request id"));
            }
        }
        Ok(())
    }

    async fn scale_down(
        &self,
        ctx: &ControllerCtx,
        set: &Resource<MachineRequestSet>,
        live: Vec<Resource<MachineRequest>>,
        machines: &[Resource<Machine>],
        excess: usize,
    ) -> Result<(), ReconcileError> {
        // Unused requests go first, then workers, then control planes;
        // oldest first within each class.
        let mut candidates = live;
        candidates.sort_by_key(|request| {
            let matched = machines
                .iter()
                .find(|m| m.meta.label(LABEL_MACHINE_REQUEST) == Some(request.id()));
            let in_use = matched
                .map(|m| m.meta.has_label(LABEL_CLUSTER))
                .unwrap_or_else(|| request.meta.has_label(LABEL_CLUSTER));
            let control_plane = matched
                .map(|m| crate::helpers::is_control_plane(&m.meta))
                .unwrap_or_else(|| crate::helpers::is_control_plane(&request.meta));
            (in_use, control_plane, request.meta.created_at)
        });

        for request in candidates.into_iter().take(excess) {
            info!(set = %set.id(), request = %request.meta.id, "removing machine request");
            ctx.store.teardown_and_destroy(&request.reference(), Some(NAME)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Controller for MachineRequestSetController {
    fn name(&self) -> &'static str {
        NAME
    }

    fn inputs(&self) -> Vec<InputDecl> {
        vec![
            InputDecl::primary::<MachineRequestSet>(),
            InputDecl::mapped_destroy_ready::<MachineRequest>(Mapper::ExtractLabelValue(
                LABEL_MACHINE_REQUEST_SET,
            )),
            InputDecl::mapped_destroy_ready::<Machine>(Mapper::ExtractLabelValue(
                LABEL_MACHINE_REQUEST_SET,
            )),
            InputDecl::mapped_destroy_ready::<InfraProviderStatus>(Mapper::ByLabel(
                LABEL_INFRA_PROVIDER,
            )),
        ]
    }

    fn outputs(&self) -> Vec<OutputDecl> {
        vec![OutputDecl::exclusive::<MachineRequest>()]
    }

    async fn reconcile(&self, ctx: &ControllerCtx, set_id: &str) -> Result<(), ReconcileError> {
        let set = ctx.store.get_opt::<MachineRequestSet>(set_id).await?;
        let children_query = LabelQuery::new().eq(LABEL_MACHINE_REQUEST_SET, set_id);
        let requests = ctx.store.list::<MachineRequest>(&children_query).await?;

        let Some(set) = set else {
            for request in &requests {
                ctx.store.teardown_and_destroy(&request.reference(), Some(NAME)).await?;
            }
            return Ok(());
        };

        // A removed provider can no longer deprovision anything: release the
        // requests so they can be destroyed.
        let provider_gone = ctx
            .store
            .get_opt::<InfraProviderStatus>(&set.spec.provider_id)
            .await?
            .map(|p| p.meta.is_tearing_down())
            .unwrap_or(true);
        if provider_gone {
            for request in &requests {
                for finalizer in request.meta.finalizers.clone() {
                    if finalizer != MACHINE_REQUEST_STATUS_OWNER {
                        ctx.store.remove_finalizer(&request.reference(), &finalizer).await?;
                    }
                }
            }
        }

        if set.meta.is_tearing_down() {
            if !set.meta.has_finalizer(NAME) {
                return Ok(());
            }
            let mut pending = false;
            for request in &requests {
                if !ctx.store.teardown_and_destroy(&request.reference(), Some(NAME)).await? {
                    pending = true;
                }
            }
            if pending {
                return Err(ReconcileError::skip("waiting for machine requests to be released"));
            }
            ctx.store.remove_finalizer(&set.reference(), NAME).await?;
            return Ok(());
        }
        ctx.store.add_finalizer(&set.reference(), NAME).await?;

        // Machines produced by our requests: claim them while they live, and
        // remove the request (then release the machine) once they tear down.
        let machines = ctx.store.list::<Machine>(&children_query).await?;
        for machine in &machines {
            if machine.meta.is_tearing_down() {
                let released = match machine.meta.label(LABEL_MACHINE_REQUEST) {
                    Some(request_id) => {
                        ctx.store
                            .teardown_and_destroy(&request_ref(request_id), Some(NAME))
                            .await?
                    }
                    None => true,
                };
                if released && machine.meta.has_finalizer(NAME) {
                    ctx.store.remove_finalizer(&machine.reference(), NAME).await?;
                }
            } else if !machine.meta.has_finalizer(NAME) {
                ctx.store.add_finalizer(&machine.reference(), NAME).await?;
            }
        }

        let live: Vec<Resource<MachineRequest>> = ctx
            .store
            .list::<MachineRequest>(&children_query)
            .await?
            .into_iter()
            .filter(|request| !request.meta.is_tearing_down())
            .collect();
        let desired = set.spec.machine_count as usize;

        if live.len() < desired {
            self.scale_up(ctx, &set, desired - live.len()).await?;
        } else if live.len() > desired {
            let excess = live.len() - desired;
            warn!(set = %set_id, live = live.len(), desired, "scaling down machine requests");
            self.scale_down(ctx, &set, live, &machines, excess).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_domain::labels::LABEL_ROLE_CONTROL_PLANE;
    use drover_store::{InMemoryStore, ResourceStore};
    use std::collections::HashSet;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    const SET: &str = "pool-a";
    const PROVIDER: &str = "bare-metal-1";

    fn ctx(store: &Arc<InMemoryStore>) -> ControllerCtx {
        ControllerCtx::new(store.clone(), CancellationToken::new())
    }

    async fn seed_set(store: &Arc<InMemoryStore>, count: u32) {
        store
            .create(Resource::new(PROVIDER, InfraProviderStatus { name: PROVIDER.into() }))
            .await
            .unwrap();
        let mut set = Resource::new(SET, MachineRequestSet {
            provider_id: PROVIDER.into(),
            machine_count: count,
            talos_version: "1.9.3".into(),
            extensions: vec!["zfs".into()],
            kernel_args: vec!["quiet".into()],
            meta_values: Vec::new(),
            provider_data: "plan: small".into(),
        });
        set.meta.set_label(LABEL_INFRA_PROVIDER, PROVIDER);
        store.create(set).await.unwrap();
    }

    async fn requests(store: &Arc<InMemoryStore>) -> Vec<Resource<MachineRequest>> {
        store
            .list::<MachineRequest>(&LabelQuery::new().eq(LABEL_MACHINE_REQUEST_SET, SET))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn scale_up_creates_suffixed_requests_with_copied_attributes() {
        let store = Arc::new(InMemoryStore::new());
        seed_set(&store, 3).await;
        let ctrl = MachineRequestSetController;

        ctrl.reconcile(&ctx(&store), SET).await.unwrap();

        let requests = requests(&store).await;
        assert_eq!(requests.len(), 3);
        let mut ids = HashSet::new();
        for request in &requests {
            assert!(request.meta.id.starts_with("pool-a-"));
            assert_eq!(request.meta.id.len(), SET.len() + 1 + SUFFIX_LEN);
            assert_eq!(request.spec.talos_version, "1.9.3");
            assert_eq!(request.spec.extensions, vec!["zfs".to_string()]);
            assert_eq!(request.spec.provider_id, PROVIDER);
            assert_eq!(request.meta.label(LABEL_INFRA_PROVIDER), Some(PROVIDER));
            ids.insert(request.meta.id.clone());
        }
        assert_eq!(ids.len(), 3, "ids must be unique");
    }

    #[tokio::test]
    async fn reconcile_is_stable_at_the_declared_count() {
        let store = Arc::new(InMemoryStore::new());
        seed_set(&store, 2).await;
        let ctrl = MachineRequestSetController;

        ctrl.reconcile(&ctx(&store), SET).await.unwrap();
        ctrl.reconcile(&ctx(&store), SET).await.unwrap();
        assert_eq!(requests(&store).await.len(), 2);
    }

    #[tokio::test]
    async fn scale_down_removes_idle_requests_first() {
        let store = Arc::new(InMemoryStore::new());
        seed_set(&store, 4).await;
        let ctrl = MachineRequestSetController;
        ctrl.reconcile(&ctx(&store), SET).await.unwrap();

        let all = requests(&store).await;
        // Back two requests with in-use machines: one control plane, one
        // worker. The other two stay idle.
        for (index, role_cp) in [(0usize, true), (1usize, false)] {
            let request_id = all[index].meta.id.clone();
            let mut machine = Resource::new(format!("node-{index}"), Machine {
                connected: true,
                management_address: String::new(),
                use_grpc_tunnel: false,
            });
            machine.meta.set_label(LABEL_MACHINE_REQUEST_SET, SET);
            machine.meta.set_label(LABEL_MACHINE_REQUEST, request_id);
            machine.meta.set_label(LABEL_CLUSTER, "c1");
            if role_cp {
                machine.meta.set_label(LABEL_ROLE_CONTROL_PLANE, "");
            }
            store.create(machine).await.unwrap();
        }

        store
            .modify::<MachineRequestSet, _>(SET, |set| set.spec.machine_count = 2)
            .await
            .unwrap();
        ctrl.reconcile(&ctx(&store), SET).await.unwrap();

        let survivors: HashSet<String> =
            requests(&store).await.into_iter().map(|r| r.meta.id).collect();
        let expected: HashSet<String> =
            [all[0].meta.id.clone(), all[1].meta.id.clone()].into_iter().collect();
        assert_eq!(survivors, expected, "the two in-use requests must survive");
    }

    #[tokio::test]
    async fn set_teardown_destroys_children_then_releases_itself() {
        let store = Arc::new(InMemoryStore::new());
        seed_set(&store, 2).await;
        let ctrl = MachineRequestSetController;
        ctrl.reconcile(&ctx(&store), SET).await.unwrap();

        let set_ref =
            ResourceRef::new(MachineRequestSet::NAMESPACE, MachineRequestSet::KIND, SET);
        store.teardown(&set_ref).await.unwrap();
        ctrl.reconcile(&ctx(&store), SET).await.unwrap();

        assert!(requests(&store).await.is_empty());
        assert!(store.teardown(&set_ref).await.unwrap(), "finalizer must be gone");
    }

    #[tokio::test]
    async fn machine_teardown_removes_its_request_and_releases_the_machine() {
        let store = Arc::new(InMemoryStore::new());
        seed_set(&store, 1).await;
        let ctrl = MachineRequestSetController;
        ctrl.reconcile(&ctx(&store), SET).await.unwrap();

        let request_id = requests(&store).await[0].meta.id.clone();
        let mut machine = Resource::new("node-0", Machine {
            connected: true,
            management_address: String::new(),
            use_grpc_tunnel: false,
        });
        machine.meta.set_label(LABEL_MACHINE_REQUEST_SET, SET);
        machine.meta.set_label(LABEL_MACHINE_REQUEST, &request_id);
        store.create(machine).await.unwrap();

        // First reconcile claims the machine.
        ctrl.reconcile(&ctx(&store), SET).await.unwrap();
        let machine_ref = ResourceRef::new(Machine::NAMESPACE, Machine::KIND, "node-0");
        assert!(!store.teardown(&machine_ref).await.unwrap(), "claimed by the scaler");

        ctrl.reconcile(&ctx(&store), SET).await.unwrap();
        // Request gone, machine released.
        assert!(store.get_opt::<MachineRequest>(&request_id).await.unwrap().is_none());
        assert!(store.teardown(&machine_ref).await.unwrap());
        // The scaler recreates nothing for a torn-down machine's request
        // until the count says so; here count=1 and the machine is leaving,
        // so a replacement request appears.
        ctrl.reconcile(&ctx(&store), SET).await.unwrap();
        assert_eq!(requests(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn provider_removal_strips_all_but_the_status_owner_finalizer() {
        let store = Arc::new(InMemoryStore::new());
        seed_set(&store, 1).await;
        let ctrl = MachineRequestSetController;
        ctrl.reconcile(&ctx(&store), SET).await.unwrap();

        let request_id = requests(&store).await[0].meta.id.clone();
        let request = request_ref(&request_id);
        store.add_finalizer(&request, MACHINE_REQUEST_STATUS_OWNER).await.unwrap();
        store.add_finalizer(&request, "SomeProviderController").await.unwrap();

        let provider_ref = ResourceRef::new(
            InfraProviderStatus::NAMESPACE,
            InfraProviderStatus::KIND,
            PROVIDER,
        );
        store.teardown(&provider_ref).await.unwrap();
        ctrl.reconcile(&ctx(&store), SET).await.unwrap();

        let finalizers = store.get::<MachineRequest>(&request_id).await.unwrap().meta.finalizers;
        assert_eq!(finalizers, vec![MACHINE_REQUEST_STATUS_OWNER.to_string()]);
    }
}
