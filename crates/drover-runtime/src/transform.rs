use std::collections::BTreeMap;

use async_trait::async_trait;
use drover_domain::labels::{ANNOTATION_INPUT_VERSIONS, ANNOTATION_OWNER};
use drover_domain::{Resource, ResourceMeta, ResourceRef, ResourceSpec};
use drover_graph::{InputDecl, Mapper, OutputDecl};
use drover_store::ResourceStoreExt;

use crate::controller::{Controller, ControllerCtx};
use crate::error::ReconcileError;

/// Exclusive 1:1 id-matched mapping from a primary input type to an output
/// type, with the finalizer mirror handled by [`QController`].
///
/// `transform` runs while the input is Running; the output passed in is
/// either fresh or the stored one loaded for modification. `finalizer_removal`
/// runs when the input is TearingDown and must release any finalizers the
/// handler owns on other resources; once it returns Ok the controller
/// destroys the output and drops its finalizer from the input, ending the
/// relationship.
#[async_trait]
pub trait Transform: Send + Sync + 'static {
    type Input: ResourceSpec;
    type Output: ResourceSpec + Default + PartialEq;

    fn name(&self) -> &'static str;

    /// Mapped/weak inputs beyond the primary.
    fn extra_inputs(&self) -> Vec<InputDecl> {
        Vec::new()
    }

    fn concurrency(&self) -> usize {
        1
    }

    async fn transform(
        &self,
        ctx: &ControllerCtx,
        input: &Resource<Self::Input>,
        output: &mut Resource<Self::Output>,
    ) -> Result<(), ReconcileError>;

    async fn finalizer_removal(
        &self,
        _ctx: &ControllerCtx,
        _input: &Resource<Self::Input>,
    ) -> Result<(), ReconcileError> {
        Ok(())
    }
}

/// Event-driven per-id adapter turning a [`Transform`] into a [`Controller`].
pub struct QController<T: Transform> {
    transform: T,
}

impl<T: Transform> QController<T> {
    pub fn new(transform: T) -> Self {
        Self { transform }
    }

    pub fn transform_ref(&self) -> &T {
        &self.transform
    }

    fn output_ref(&self, id: &str) -> ResourceRef {
        ResourceRef::new(T::Output::NAMESPACE, T::Output::KIND, id)
    }

    /// Teardown and destroy the output. Returns false while foreign
    /// finalizers keep it alive; progress events re-enqueue the id because
    /// the controller watches its own output through teardown.
    async fn destroy_output(&self, ctx: &ControllerCtx, id: &str) -> Result<bool, ReconcileError> {
        Ok(ctx.store.teardown_and_destroy(&self.output_ref(id), Some(self.name())).await?)
    }

    async fn write_output(
        &self,
        ctx: &ControllerCtx,
        existing: Option<Resource<T::Output>>,
        mut output: Resource<T::Output>,
    ) -> Result<(), ReconcileError> {
        match existing {
            Some(old) => {
                if old.spec == output.spec
                    && old.meta.labels == output.meta.labels
                    && old.meta.annotations == output.meta.annotations
                {
                    return Ok(());
                }
                output.meta.version = old.meta.version;
                ctx.store.update(output).await?;
            }
            None => {
                output.meta.set_annotation(ANNOTATION_OWNER, self.name());
                ctx.store.create(output).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Transform> Controller for QController<T> {
    fn name(&self) -> &'static str {
        self.transform.name()
    }

    fn inputs(&self) -> Vec<InputDecl> {
        let mut inputs = vec![
            InputDecl::primary::<T::Input>(),
            // Own output, watched through teardown for garbage collection.
            InputDecl::mapped_destroy_ready::<T::Output>(Mapper::SameId),
        ];
        inputs.extend(self.transform.extra_inputs());
        inputs
    }

    fn outputs(&self) -> Vec<OutputDecl> {
        vec![OutputDecl::exclusive::<T::Output>()]
    }

    fn concurrency(&self) -> usize {
        self.transform.concurrency()
    }

    async fn reconcile(&self, ctx: &ControllerCtx, id: &str) -> Result<(), ReconcileError> {
        let input = match ctx.store.get::<T::Input>(id).await {
            Ok(input) => input,
            Err(e) if e.is_not_found() => {
                // Input gone; sweep any orphaned output.
                self.destroy_output(ctx, id).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if input.meta.is_tearing_down() {
            if !input.meta.has_finalizer(self.name()) {
                return Ok(());
            }
            self.transform.finalizer_removal(ctx, &input).await?;
            if !self.destroy_output(ctx, id).await? {
                return Err(ReconcileError::skip("waiting for output finalizers to clear"));
            }
            ctx.store.remove_finalizer(&input.reference(), self.name()).await?;
            return Ok(());
        }

        ctx.store.add_finalizer(&input.reference(), self.name()).await?;
        // Re-read: the finalizer write bumped the input version, and
        // version-tracking transforms must observe the value they record.
        let input = ctx.store.get::<T::Input>(id).await?;

        let existing = ctx.store.get_opt::<T::Output>(id).await?;
        let mut output = existing.clone().unwrap_or_else(|| Resource::fresh(id));
        match self.transform.transform(ctx, &input, &mut output).await {
            Ok(()) => self.write_output(ctx, existing, output).await,
            Err(ReconcileError::DestroyOutput) => {
                self.destroy_output(ctx, id).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

// ── Input-version tracking ────────────────────────────────────────────────────

/// Serialize the `(ref, version)` pairs a handler consumed, for recording on
/// its output. Future reconciles short-circuit when the encoding is unchanged.
pub fn encode_input_versions(inputs: &[(ResourceRef, u64)]) -> String {
    let sorted: BTreeMap<String, u64> = inputs
        .iter()
        .map(|(r, version)| (format!("{}/{}", r.kind, r.id), *version))
        .collect();
    sorted
        .into_iter()
        .map(|(key, version)| format!("{}={}", key, version))
        .collect::<Vec<_>>()
        .join(",")
}

/// True when the output already records exactly these input versions.
pub fn input_versions_match(output_meta: &ResourceMeta, encoded: &str) -> bool {
    output_meta.annotation(ANNOTATION_INPUT_VERSIONS) == Some(encoded)
}
