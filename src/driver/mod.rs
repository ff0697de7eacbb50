//! Lifecycle skeleton shared by every resource kind.
//!
//! A [`ResourceKind`] supplies the per-kind pieces (schema, expand/flatten,
//! vendor calls, terminal states); [`Reconciler`] composes them with the
//! locality codec, lock registry, wait engine and update builder into the
//! create, read, update, delete, import and apply operations the declarative
//! engine drives.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::classify_in;
use crate::error::{Diagnostics, ErrorKind, Outcome, ProviderError};
use crate::expand::ExpandError;
use crate::locality::{
    CompositeId, IdForm, Locality, LocalityDefaults, LocalityKind, extract_locality,
};
use crate::lock::LockRegistry;
use crate::lookup::{LookupError, find_by_name};
use crate::schema::{Phase, Schema, Timeouts};
use crate::update::{UpdateBuilder, UpdateError, UpdatePlan};
use crate::value::Attributes;
use crate::vendor::VendorError;
use crate::wait::{
    DEFAULT_RETRY_INTERVAL, RetryBudget, WaitError, WaitSpec, Waited, retry, wait_until,
};

/// Boxed future returned by the vendor-facing methods of a kind.
pub type KindFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, VendorError>> + Send + 'a>>;

/// Poller used to check a dependency's status.
pub type StatusPoller = Box<dyn Fn() -> KindFuture<'static, String> + Send + Sync>;

/// Where a new resource is created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Scope {
    /// Locality of the new resource.
    pub locality: Locality,
    /// Parent UUID for nested resources.
    pub parent: Option<Uuid>,
}

/// Another resource that must be ready before this one is created or updated.
pub struct Dependency {
    /// Kind of the dependency, for messages.
    pub kind: &'static str,
    /// Identifier of the dependency, for messages.
    pub id: String,
    /// Status values meaning "ready".
    pub ready_states: Vec<String>,
    /// Fetches the dependency's current status.
    pub poll: StatusPoller,
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("ready_states", &self.ready_states)
            .finish_non_exhaustive()
    }
}

/// A resource owned by another and removed after it when requested.
pub struct OwnedChild {
    /// Kind of the child, for messages.
    pub kind: &'static str,
    /// Identifier of the child, for messages.
    pub id: String,
    /// Deferred deletion; nothing is sent until it is awaited.
    pub delete: KindFuture<'static, ()>,
}

impl fmt::Debug for OwnedChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedChild")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Per-kind callbacks the reconciler is parameterised by.
pub trait ResourceKind: Send + Sync {
    /// Vendor status of the resource.
    type State: Clone + PartialEq + fmt::Debug + Send + Sync;
    /// Vendor representation of the resource.
    type Resource: Send + Sync;
    /// Vendor create request.
    type CreateRequest: Send + Sync;
    /// Vendor partial update request.
    type UpdateRequest: Send + Sync;

    /// Name of the kind as shown to users.
    fn name(&self) -> &'static str;

    /// Whether the kind is addressed by zone or region.
    fn locality_kind(&self) -> LocalityKind;

    /// Identifier layout of the kind.
    fn id_form(&self) -> IdForm {
        IdForm::Simple
    }

    /// Attribute schema.
    fn schema(&self) -> Schema;

    /// Default timeouts per phase.
    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// States in which the resource is usable.
    fn ready_states(&self) -> Vec<Self::State>;

    /// States in which the resource is stopped.
    fn stopped_states(&self) -> Vec<Self::State> {
        Vec::new()
    }

    /// Whether the resource must be stopped before it can be deleted.
    fn stop_before_delete(&self) -> bool {
        false
    }

    /// Current state of a fetched resource.
    fn state_of(&self, resource: &Self::Resource) -> Self::State;

    /// Vendor UUID of a fetched resource.
    fn id_of(&self, resource: &Self::Resource) -> Uuid;

    /// Human-readable name of a fetched resource.
    fn name_of<'r>(&self, resource: &'r Self::Resource) -> &'r str;

    /// Parent UUID of a fetched resource, for nested kinds.
    fn parent_of(&self, _resource: &Self::Resource) -> Option<Uuid> {
        None
    }

    /// Parent UUID for nested kinds, read from desired state.
    ///
    /// # Errors
    ///
    /// Returns [`ExpandError`] when the parent reference is malformed.
    fn parent(
        &self,
        _desired: &Attributes,
        _locality: &Locality,
    ) -> Result<Option<Uuid>, ExpandError> {
        Ok(None)
    }

    /// Builds the create request.
    ///
    /// # Errors
    ///
    /// Returns [`ExpandError`] when desired state cannot be expressed.
    fn expand_create(
        &self,
        desired: &Attributes,
        scope: &Scope,
    ) -> Result<Self::CreateRequest, ExpandError>;

    /// Fills the partial update request through the builder.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError`] when the diff cannot be applied in place.
    fn build_update(
        &self,
        builder: &mut UpdateBuilder<'_>,
        id: &CompositeId,
    ) -> Result<Self::UpdateRequest, UpdateError>;

    /// Translates a fetched resource into declarative attributes.
    fn flatten(&self, resource: &Self::Resource, id: &CompositeId) -> Attributes;

    /// Resources that must be ready before this one is created or updated.
    ///
    /// # Errors
    ///
    /// Returns [`ExpandError`] when a reference is malformed.
    fn dependencies(
        &self,
        _desired: &Attributes,
        _scope: &Scope,
    ) -> Result<Vec<Dependency>, ExpandError> {
        Ok(Vec::new())
    }

    /// Children to delete after the resource when `prior` asks for it.
    fn owned_children(
        &self,
        _resource: &Self::Resource,
        _id: &CompositeId,
        _prior: &Attributes,
    ) -> Vec<OwnedChild> {
        Vec::new()
    }

    /// Sends the create request.
    fn create<'a>(
        &'a self,
        scope: &'a Scope,
        request: &'a Self::CreateRequest,
    ) -> KindFuture<'a, Self::Resource>;

    /// Runs after a successful create, before waiting for readiness.
    fn after_create<'a>(
        &'a self,
        _id: &'a CompositeId,
        _resource: &'a Self::Resource,
    ) -> KindFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Fetches the resource.
    fn get<'a>(&'a self, id: &'a CompositeId) -> KindFuture<'a, Self::Resource>;

    /// Sends a partial update.
    fn update<'a>(
        &'a self,
        id: &'a CompositeId,
        request: &'a Self::UpdateRequest,
    ) -> KindFuture<'a, Self::Resource>;

    /// Sends the deletion.
    fn delete<'a>(&'a self, id: &'a CompositeId) -> KindFuture<'a, ()>;

    /// Asks the resource to stop.
    fn stop<'a>(&'a self, _id: &'a CompositeId) -> KindFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Asks the resource to start.
    fn start<'a>(&'a self, _id: &'a CompositeId) -> KindFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Lists resources in a locality, optionally filtered by name on the
    /// vendor side. Every page is fetched.
    fn list<'a>(
        &'a self,
        locality: &'a Locality,
        name: Option<&'a str>,
    ) -> KindFuture<'a, Vec<Self::Resource>>;
}

/// Per-call inputs from the engine.
#[derive(Clone, Debug, Default)]
pub struct OperationContext {
    /// Cancellation signal for the whole operation.
    pub cancellation: CancellationToken,
    /// Override of the kind's default timeout for the phase.
    pub timeout: Option<Duration>,
}

impl OperationContext {
    /// Context with a fresh token and default timeouts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the phase timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Uses the given cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Identity and flattened attributes persisted by the engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceState {
    /// Canonical composite identifier.
    pub id: CompositeId,
    /// Flattened attributes.
    pub attributes: Attributes,
}

/// A resource found by a listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListedResource {
    /// Canonical composite identifier.
    pub id: CompositeId,
    /// Human-readable name.
    pub name: String,
}

/// Drives one resource kind through its lifecycle.
#[derive(Debug)]
pub struct Reconciler<K> {
    kind: K,
    locks: LockRegistry,
    defaults: LocalityDefaults,
    retry_interval: Duration,
}

impl<K: ResourceKind> Reconciler<K> {
    /// Creates a reconciler sharing `locks` with the other kinds.
    #[must_use]
    pub const fn new(kind: K, locks: LockRegistry, defaults: LocalityDefaults) -> Self {
        Self {
            kind,
            locks,
            defaults,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Overrides the retry interval for every wait.
    #[must_use]
    pub const fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// The wrapped kind.
    #[must_use]
    pub const fn kind(&self) -> &K {
        &self.kind
    }

    /// Composite identifier of a listed resource.
    pub(crate) fn compose(&self, locality: &Locality, resource: &K::Resource) -> CompositeId {
        let uuid = self.kind.id_of(resource);
        match self.kind.parent_of(resource) {
            Some(parent) => CompositeId::nested(locality.clone(), parent, uuid),
            None => CompositeId::new(locality.clone(), uuid),
        }
    }

    fn budget(&self, phase: Phase, ctx: &OperationContext) -> RetryBudget {
        let timeout = ctx
            .timeout
            .unwrap_or_else(|| self.kind.timeouts().for_phase(phase));
        RetryBudget::new(phase, timeout, ctx.cancellation.clone())
            .with_retry_interval(self.retry_interval)
    }

    fn validation(&self, detail: impl fmt::Display) -> ProviderError {
        ProviderError::validation(self.kind.name(), detail)
    }

    fn wait_failed(&self, phase: Phase, err: WaitError<VendorError>) -> ProviderError {
        ProviderError::from_wait(self.kind.name(), phase, err)
    }

    fn parse_id(&self, raw: &str) -> Result<CompositeId, ProviderError> {
        CompositeId::parse(raw, self.kind.id_form(), self.kind.locality_kind(), &self.defaults)
            .map_err(|err| self.validation(err).with_id(raw))
    }

    async fn fetch(
        &self,
        id: &CompositeId,
        budget: &RetryBudget,
    ) -> Result<K::Resource, WaitError<VendorError>> {
        retry(budget, || self.kind.get(id)).await
    }

    async fn wait_for(
        &self,
        id: &CompositeId,
        targets: Vec<K::State>,
        budget: &RetryBudget,
    ) -> Result<K::State, ProviderError> {
        let spec = WaitSpec::reach(targets, budget.clone());
        let waited = wait_until(&spec, || async move {
            self.kind.get(id).await.map(|resource| self.kind.state_of(&resource))
        })
        .await
        .map_err(|err| self.wait_failed(budget.phase, err).with_id(id))?;
        match waited {
            Waited::Reached(state) => Ok(state),
            Waited::Gone => Err(ProviderError::new(
                ErrorKind::NotFound,
                self.kind.name(),
                "resource disappeared while waiting",
            )
            .with_id(id)),
        }
    }

    async fn await_dependencies(
        &self,
        dependencies: Vec<Dependency>,
        budget: &RetryBudget,
    ) -> Result<(), ProviderError> {
        for dependency in dependencies {
            debug!(kind = dependency.kind, id = %dependency.id, "waiting for dependency");
            let spec = WaitSpec::reach(dependency.ready_states.clone(), budget.clone());
            wait_until(&spec, || (dependency.poll)())
                .await
                .map_err(|err| {
                    let mut mapped = self.wait_failed(budget.phase, err);
                    mapped.detail = format!(
                        "{} {} is not ready: {}",
                        dependency.kind, dependency.id, mapped.detail
                    );
                    mapped
                })?;
        }
        Ok(())
    }

    fn keep_local(&self, attributes: &mut Attributes, desired: &Attributes) {
        for attribute in self.kind.schema().attributes().filter(|attribute| attribute.local) {
            attributes.set_optional(attribute.name, desired.get(attribute.name).cloned());
        }
    }

    async fn observe(
        &self,
        id: &CompositeId,
        desired: &Attributes,
        budget: &RetryBudget,
    ) -> Result<ResourceState, ProviderError> {
        let resource = self
            .fetch(id, &budget.in_phase(Phase::Read))
            .await
            .map_err(|err| self.wait_failed(budget.phase, err).with_id(id))?;
        let mut attributes = self.kind.flatten(&resource, id);
        self.keep_local(&mut attributes, desired);
        Ok(ResourceState {
            id: id.clone(),
            attributes,
        })
    }

    /// Creates the resource and waits until it is ready.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on invalid input, vendor failure, timeout or
    /// cancellation.
    pub async fn create(
        &self,
        desired: &Attributes,
        ctx: &OperationContext,
    ) -> Result<Outcome<ResourceState>, ProviderError> {
        let name = self.kind.name();
        self.kind
            .schema()
            .validate(desired)
            .map_err(|err| self.validation(err))?;
        let locality = extract_locality(desired, self.kind.locality_kind(), &self.defaults)
            .map_err(|err| self.validation(err))?;
        let parent = self
            .kind
            .parent(desired, &locality)
            .map_err(|err| self.validation(err))?;
        let scope = Scope { locality, parent };
        let request = self
            .kind
            .expand_create(desired, &scope)
            .map_err(|err| self.validation(err))?;
        let budget = self.budget(Phase::Create, ctx);

        let dependencies = self
            .kind
            .dependencies(desired, &scope)
            .map_err(|err| self.validation(err))?;
        self.await_dependencies(dependencies, &budget).await?;

        let resource = tokio::select! {
            biased;
            () = budget.cancellation.cancelled() => {
                return Err(self.wait_failed(Phase::Create, WaitError::Cancelled));
            }
            created = self.kind.create(&scope, &request) => created
                .map_err(|err| ProviderError::from_vendor(name, Phase::Create, err))?,
        };
        let uuid = self.kind.id_of(&resource);
        let id = match scope.parent {
            Some(parent) => CompositeId::nested(scope.locality.clone(), parent, uuid),
            None => CompositeId::new(scope.locality.clone(), uuid),
        };
        info!(kind = name, %id, "created resource");

        let mut partial = ResourceState {
            attributes: self.kind.flatten(&resource, &id),
            id: id.clone(),
        };
        self.keep_local(&mut partial.attributes, desired);
        let tainted = |err: ProviderError| {
            if err.kind == ErrorKind::NotFound {
                return err;
            }
            warn!(kind = name, %id, error = %err, "created resource is not ready; keeping it");
            err.with_partial(partial.clone())
        };

        self.kind
            .after_create(&id, &resource)
            .await
            .map_err(|err| tainted(ProviderError::from_vendor(name, Phase::Create, err)))?;
        let state = self
            .wait_for(&id, self.kind.ready_states(), &budget)
            .await
            .map_err(tainted)?;
        debug!(kind = name, %id, ?state, "resource is ready");

        let observed = self.observe(&id, desired, &budget).await.map_err(tainted)?;
        Ok(Outcome::clean(observed))
    }

    /// Reads the resource. `Ok(None)` means it is gone and the engine should
    /// drop it from state.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] for malformed IDs and non-absent failures.
    pub async fn read(
        &self,
        raw_id: &str,
        ctx: &OperationContext,
    ) -> Result<Option<ResourceState>, ProviderError> {
        let id = self.parse_id(raw_id)?;
        let budget = self.budget(Phase::Read, ctx);
        match self.fetch(&id, &budget).await {
            Ok(resource) => Ok(Some(ResourceState {
                attributes: self.kind.flatten(&resource, &id),
                id,
            })),
            Err(WaitError::NotFound { .. }) => {
                info!(kind = self.kind.name(), %id, "resource is gone; dropping from state");
                Ok(None)
            }
            Err(err) => Err(self.wait_failed(Phase::Read, err).with_id(&id)),
        }
    }

    /// Imports an externally supplied identifier, in any accepted form.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] with [`ErrorKind::NotFound`] when nothing
    /// exists under the identifier.
    pub async fn import(
        &self,
        raw_id: &str,
        ctx: &OperationContext,
    ) -> Result<ResourceState, ProviderError> {
        self.read(raw_id, ctx).await?.ok_or_else(|| {
            ProviderError::new(
                ErrorKind::NotFound,
                self.kind.name(),
                "cannot import a resource that does not exist",
            )
            .with_id(raw_id)
        })
    }

    /// Resolves a resource by exact name within a locality.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NotFound`] or [`ErrorKind::Ambiguous`] when the
    /// name does not match exactly one resource.
    pub async fn lookup(
        &self,
        locality: &Locality,
        name: &str,
        ctx: &OperationContext,
    ) -> Result<ResourceState, ProviderError> {
        let kind = self.kind.name();
        let budget = self.budget(Phase::Read, ctx);
        let candidates = retry(&budget, || self.kind.list(locality, Some(name)))
            .await
            .map_err(|err| self.wait_failed(Phase::Read, err))?;
        let resource =
            find_by_name(kind, name, candidates, |resource| self.kind.name_of(resource)).map_err(
                |err| {
                    let error_kind = match err {
                        LookupError::NotFound { .. } => ErrorKind::NotFound,
                        LookupError::Ambiguous { .. } => ErrorKind::Ambiguous,
                    };
                    ProviderError::new(error_kind, kind, err)
                },
            )?;
        let id = self.compose(locality, &resource);
        Ok(ResourceState {
            attributes: self.kind.flatten(&resource, &id),
            id,
        })
    }

    /// Lists every resource of the kind in a locality.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the listing fails; a listing endpoint
    /// that no longer exists surfaces as [`ErrorKind::NotFound`].
    pub async fn list(
        &self,
        locality: &Locality,
        ctx: &OperationContext,
    ) -> Result<Vec<ListedResource>, ProviderError> {
        let budget = self.budget(Phase::Read, ctx);
        let resources = retry(&budget, || self.kind.list(locality, None))
            .await
            .map_err(|err| self.wait_failed(Phase::Read, err))?;
        Ok(resources
            .iter()
            .map(|resource| ListedResource {
                id: self.compose(locality, resource),
                name: self.kind.name_of(resource).to_owned(),
            })
            .collect())
    }

    /// Applies an in-place update, stopping the resource around it when a
    /// changed attribute requires it.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`]; [`ErrorKind::NotFound`] when the resource
    /// vanished, so the engine can recreate it.
    pub async fn update(
        &self,
        raw_id: &str,
        prior: &Attributes,
        desired: &Attributes,
        ctx: &OperationContext,
    ) -> Result<Outcome<ResourceState>, ProviderError> {
        let name = self.kind.name();
        let schema = self.kind.schema();
        schema
            .validate(desired)
            .map_err(|err| self.validation(err).with_id(raw_id))?;
        let id = self.parse_id(raw_id)?;
        let lock = self.locks.lock(&id.to_string()).await;
        debug!(kind = name, id = lock.id(), "acquired identifier lock");
        let budget = self.budget(Phase::Update, ctx);

        let scope = Scope {
            locality: id.locality().clone(),
            parent: id.parent(),
        };
        let dependencies = self
            .kind
            .dependencies(desired, &scope)
            .map_err(|err| self.validation(err).with_id(&id))?;
        self.await_dependencies(dependencies, &budget)
            .await
            .map_err(|err| err.with_id(&id))?;

        let mut builder = UpdateBuilder::new(&schema, prior, desired);
        let reasons = builder.replacement_reasons();
        if !reasons.is_empty() {
            return Err(self
                .validation(format!("changing {} requires replacement", reasons.join(", ")))
                .with_id(&id));
        }
        let request = self
            .kind
            .build_update(&mut builder, &id)
            .map_err(|err| self.validation(err).with_id(&id))?;

        match builder.finish(request) {
            UpdatePlan::NoOp => debug!(kind = name, %id, "no updatable attribute changed"),
            UpdatePlan::Apply {
                request,
                needs_reboot,
                fields,
            } => {
                info!(kind = name, %id, ?fields, needs_reboot, "updating resource");
                if needs_reboot {
                    self.stop_and_wait(&id, &budget).await?;
                }
                retry(&budget, || self.kind.update(&id, &request))
                    .await
                    .map_err(|err| self.wait_failed(Phase::Update, err).with_id(&id))?;
                if needs_reboot {
                    retry(&budget, || self.kind.start(&id))
                        .await
                        .map_err(|err| self.wait_failed(Phase::Update, err).with_id(&id))?;
                }
                self.wait_for(&id, self.kind.ready_states(), &budget).await?;
            }
        }

        let observed = self.observe(&id, desired, &budget).await?;
        Ok(Outcome::clean(observed))
    }

    async fn stop_and_wait(
        &self,
        id: &CompositeId,
        budget: &RetryBudget,
    ) -> Result<(), ProviderError> {
        retry(budget, || self.kind.stop(id))
            .await
            .map_err(|err| self.wait_failed(budget.phase, err).with_id(id))?;
        self.wait_for(id, self.kind.stopped_states(), budget).await?;
        Ok(())
    }

    /// Deletes the resource and waits until it is gone. An already absent
    /// resource is success. Owned children flagged for deletion are removed
    /// afterwards; failures there become warnings.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on vendor failure, timeout or cancellation.
    pub async fn delete(
        &self,
        raw_id: &str,
        prior: &Attributes,
        ctx: &OperationContext,
    ) -> Result<Outcome<()>, ProviderError> {
        let name = self.kind.name();
        let id = self.parse_id(raw_id)?;
        let _lock = self.locks.lock(&id.to_string()).await;
        let budget = self.budget(Phase::Delete, ctx);
        let mut diagnostics = Diagnostics::new();

        let resource = match self.fetch(&id, &budget).await {
            Ok(resource) => resource,
            Err(WaitError::NotFound { .. }) => {
                debug!(kind = name, %id, "already deleted");
                return Ok(Outcome::clean(()));
            }
            Err(err) => return Err(self.wait_failed(Phase::Delete, err).with_id(&id)),
        };
        let children = self.kind.owned_children(&resource, &id, prior);

        let stopped = self.kind.stopped_states();
        if self.kind.stop_before_delete() && !stopped.contains(&self.kind.state_of(&resource)) {
            self.stop_and_wait(&id, &budget).await?;
        }

        match retry(&budget, || self.kind.delete(&id)).await {
            Ok(()) | Err(WaitError::NotFound { .. }) => {}
            Err(err) => return Err(self.wait_failed(Phase::Delete, err).with_id(&id)),
        }
        let spec: WaitSpec<K::State> = WaitSpec::absent(budget.clone());
        let id_ref = &id;
        let gone = wait_until(&spec, || async move {
            self.kind
                .get(id_ref)
                .await
                .map(|resource| self.kind.state_of(&resource))
        })
        .await
        .map_err(|err| self.wait_failed(Phase::Delete, err).with_id(&id))?;
        debug!(kind = name, %id, ?gone, "deletion observed");
        info!(kind = name, %id, "deleted resource");

        for child in children {
            match child.delete.await {
                Ok(()) => info!(kind = child.kind, id = %child.id, "deleted owned resource"),
                Err(err) if classify_in(&err, Phase::Delete).is_absent() => {}
                Err(err) => diagnostics.warn(format!(
                    "{name} {id}: could not delete {} {}: {err}; proceeding anyway",
                    child.kind, child.id
                )),
            }
        }
        Ok(Outcome::with((), diagnostics))
    }

    /// Routes desired state to create, in-place update, or replacement
    /// (delete then create) when a force-new attribute or the locality
    /// changed.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProviderError`] of the chosen route.
    pub async fn apply(
        &self,
        prior: Option<&ResourceState>,
        desired: &Attributes,
        ctx: &OperationContext,
    ) -> Result<Outcome<ResourceState>, ProviderError> {
        let Some(prior_state) = prior else {
            return self.create(desired, ctx).await;
        };
        let raw_id = prior_state.id.to_string();
        let locality = extract_locality(desired, self.kind.locality_kind(), &self.defaults)
            .map_err(|err| self.validation(err).with_id(&raw_id))?;
        let schema = self.kind.schema();
        let builder = UpdateBuilder::new(&schema, &prior_state.attributes, desired);
        let mut reasons = builder.replacement_reasons();
        if locality != *prior_state.id.locality() {
            let attribute = self.kind.locality_kind().attribute().to_owned();
            if !reasons.contains(&attribute) {
                reasons.push(attribute);
            }
        }
        if reasons.is_empty() {
            return self
                .update(&raw_id, &prior_state.attributes, desired, ctx)
                .await;
        }

        info!(kind = self.kind.name(), id = %raw_id, ?reasons, "replacing resource");
        let removed = self.delete(&raw_id, &prior_state.attributes, ctx).await?;
        let mut created = self.create(desired, ctx).await?;
        let mut diagnostics = removed.diagnostics;
        diagnostics.extend(created.diagnostics);
        created.diagnostics = diagnostics;
        Ok(created)
    }
}
