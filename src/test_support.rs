//! Test support utilities shared across unit and integration tests.
//!
//! [`ScriptedKind`] is an in-memory resource kind driven by a script of
//! statuses and failures. Clones share the same backing store, so a test can
//! keep one handle for assertions while the reconciler owns another.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::config::{ProfileValues, ProviderConfig, ProviderSettings, ResolvedConfig};
use crate::driver::{Dependency, KindFuture, OwnedChild, ResourceKind, Scope};
use crate::expand::{
    ExpandError, expand_optional, expand_required_string, expand_string, flatten_string,
};
use crate::locality::{CompositeId, Locality, LocalityKind};
use crate::schema::{Attribute, Schema};
use crate::update::{UpdateBuilder, UpdateError};
use crate::value::{Attributes, Value};
use crate::vendor::VendorError;

/// Status reported while a scripted resource is being provisioned.
pub const PROVISIONING: &str = "provisioning";
/// Status reported once a scripted resource is usable.
pub const READY: &str = "ready";
/// Status reported once a scripted resource is stopped.
pub const STOPPED: &str = "stopped";
/// Status reported while a scripted resource is being removed.
pub const DELETING: &str = "deleting";

/// Builds the 404 the scripted vendor answers for an absent resource.
#[must_use]
pub fn not_found(id: Uuid) -> VendorError {
    VendorError::new(404, "not_found", format!("resource {id} not found"))
}

/// Builds a 503 the classifier treats as transient.
#[must_use]
pub fn unavailable() -> VendorError {
    VendorError::new(503, "service_unavailable", "try again later")
}

/// Vendor-side record held by [`ScriptedKind`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FakeResource {
    /// Vendor UUID.
    pub id: Uuid,
    /// Where the resource lives.
    pub locality: Locality,
    /// Human-readable name.
    pub name: String,
    /// Current status.
    pub status: String,
    /// Optional free text.
    pub description: Option<String>,
    /// Size that can only change while stopped.
    pub size: Option<String>,
    /// Tags.
    pub tags: Vec<String>,
    /// Owned children removed when the delete flag is set.
    pub children: Vec<Uuid>,
}

impl FakeResource {
    /// A ready resource with no optional fields.
    #[must_use]
    pub fn new(id: Uuid, locality: Locality, name: &str) -> Self {
        Self {
            id,
            locality,
            name: name.to_owned(),
            status: String::from(READY),
            description: None,
            size: None,
            tags: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: &str) -> Self {
        self.status = status.to_owned();
        self
    }

    /// Attaches owned children.
    #[must_use]
    pub fn with_children(mut self, children: Vec<Uuid>) -> Self {
        self.children = children;
        self
    }
}

/// Create request of [`ScriptedKind`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptedCreate {
    /// Name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Size.
    pub size: Option<String>,
    /// Tags.
    pub tags: Vec<String>,
}

/// Partial update request of [`ScriptedKind`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScriptedPatch {
    /// New name.
    pub name: Option<String>,
    /// New description; `Some("")` clears it.
    pub description: Option<String>,
    /// New size.
    pub size: Option<String>,
    /// New tags.
    pub tags: Option<Vec<String>>,
}

/// A vendor call observed by [`ScriptedKind`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    /// Create with the requested name.
    Create(String),
    /// Fetch by UUID.
    Get(Uuid),
    /// Listing of a locality.
    List(String),
    /// Partial update.
    Update(Uuid, ScriptedPatch),
    /// Deletion.
    Delete(Uuid),
    /// Stop request.
    Stop(Uuid),
    /// Start request.
    Start(Uuid),
    /// Deletion of an owned child.
    DeleteChild(Uuid),
    /// Status poll of the dependency.
    Dependency,
}

#[derive(Debug, Default)]
struct ScriptState {
    resources: BTreeMap<Uuid, FakeResource>,
    statuses: HashMap<Uuid, VecDeque<String>>,
    deleting: HashMap<Uuid, u32>,
    next_ids: VecDeque<Uuid>,
    provisioning_polls: u32,
    delete_lag: u32,
    update_latency: Duration,
    unique_names: bool,
    get_failures: VecDeque<VendorError>,
    create_failures: VecDeque<VendorError>,
    update_failures: VecDeque<VendorError>,
    delete_failures: VecDeque<VendorError>,
    list_failures: HashMap<String, VendorError>,
    child_failures: HashMap<Uuid, VendorError>,
    dependency: Option<VecDeque<String>>,
    in_flight_updates: usize,
    peak_updates: usize,
    calls: Vec<Call>,
}

impl ScriptState {
    fn get(&mut self, id: Uuid) -> Result<FakeResource, VendorError> {
        self.calls.push(Call::Get(id));
        if let Some(err) = self.get_failures.pop_front() {
            return Err(err);
        }
        if let Some(remaining) = self.deleting.get_mut(&id) {
            if *remaining == 0 {
                self.deleting.remove(&id);
                self.resources.remove(&id);
                return Err(not_found(id));
            }
            *remaining -= 1;
            return self
                .resources
                .get(&id)
                .map(|resource| resource.clone().with_status(DELETING))
                .ok_or_else(|| not_found(id));
        }
        let next = self.statuses.get_mut(&id).and_then(VecDeque::pop_front);
        let resource = self.resources.get_mut(&id).ok_or_else(|| not_found(id))?;
        if let Some(status) = next {
            resource.status = status;
        }
        Ok(resource.clone())
    }

    fn create(
        &mut self,
        scope: &Scope,
        request: &ScriptedCreate,
    ) -> Result<FakeResource, VendorError> {
        self.calls.push(Call::Create(request.name.clone()));
        if let Some(err) = self.create_failures.pop_front() {
            return Err(err);
        }
        if self.unique_names
            && self.resources.values().any(|existing| {
                existing.locality == scope.locality && existing.name == request.name
            })
        {
            return Err(VendorError::new(
                409,
                "resource_already_exists",
                format!("a resource named {} already exists", request.name),
            ));
        }
        let id = self.next_ids.pop_front().unwrap_or_else(Uuid::new_v4);
        let mut resource = FakeResource::new(id, scope.locality.clone(), &request.name)
            .with_status(PROVISIONING);
        resource.description.clone_from(&request.description);
        resource.size.clone_from(&request.size);
        resource.tags.clone_from(&request.tags);
        let mut script: VecDeque<String> = (0..self.provisioning_polls)
            .map(|_| String::from(PROVISIONING))
            .collect();
        script.push_back(String::from(READY));
        self.statuses.insert(id, script);
        self.resources.insert(id, resource.clone());
        Ok(resource)
    }

    fn apply_patch(
        &mut self,
        id: Uuid,
        patch: &ScriptedPatch,
    ) -> Result<FakeResource, VendorError> {
        let resource = self.resources.get_mut(&id).ok_or_else(|| not_found(id))?;
        if let Some(name) = &patch.name {
            resource.name.clone_from(name);
        }
        if let Some(description) = &patch.description {
            resource.description = Some(description.clone()).filter(|text| !text.is_empty());
        }
        if let Some(size) = &patch.size {
            resource.size = Some(size.clone());
        }
        if let Some(tags) = &patch.tags {
            resource.tags.clone_from(tags);
        }
        Ok(resource.clone())
    }

    fn delete(&mut self, id: Uuid) -> Result<(), VendorError> {
        self.calls.push(Call::Delete(id));
        if let Some(err) = self.delete_failures.pop_front() {
            if err.status == 404 {
                self.resources.remove(&id);
            }
            return Err(err);
        }
        if !self.resources.contains_key(&id) {
            return Err(not_found(id));
        }
        if self.deleting.contains_key(&id) {
            return Ok(());
        }
        if self.delete_lag == 0 {
            self.resources.remove(&id);
        } else {
            self.deleting.insert(id, self.delete_lag);
        }
        Ok(())
    }

    fn set_status(&mut self, call: Call, id: Uuid, status: &str) -> Result<(), VendorError> {
        self.calls.push(call);
        let resource = self.resources.get_mut(&id).ok_or_else(|| not_found(id))?;
        resource.status = status.to_owned();
        self.statuses.remove(&id);
        Ok(())
    }
}

/// In-memory resource kind driven by a script.
///
/// Attributes: `name` (required), `description`, `tags`, `size` (changing it
/// requires a stop), the locality attribute (force-new), `status` (computed)
/// and the local flag `delete_children`.
#[derive(Clone, Debug)]
pub struct ScriptedKind {
    name: &'static str,
    locality_kind: LocalityKind,
    stop_before_delete: bool,
    state: Arc<std::sync::Mutex<ScriptState>>,
}

impl ScriptedKind {
    /// A regional kind.
    #[must_use]
    pub fn regional(name: &'static str) -> Self {
        Self::with_locality(name, LocalityKind::Region)
    }

    /// A zonal kind.
    #[must_use]
    pub fn zonal(name: &'static str) -> Self {
        Self::with_locality(name, LocalityKind::Zone)
    }

    fn with_locality(name: &'static str, locality_kind: LocalityKind) -> Self {
        Self {
            name,
            locality_kind,
            stop_before_delete: false,
            state: Arc::default(),
        }
    }

    /// Requires the resource to be stopped before deletion.
    #[must_use]
    pub const fn stopping_before_delete(mut self) -> Self {
        self.stop_before_delete = true;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds a resource.
    pub fn insert(&self, resource: FakeResource) {
        self.state().resources.insert(resource.id, resource);
    }

    /// UUIDs handed out to created resources, in order.
    pub fn next_ids(&self, ids: impl IntoIterator<Item = Uuid>) {
        self.state().next_ids.extend(ids);
    }

    /// Number of polls reporting provisioning before a new resource is ready.
    pub fn provisioning_polls(&self, polls: u32) {
        self.state().provisioning_polls = polls;
    }

    /// Number of polls reporting deleting before a resource disappears.
    pub fn delete_lag(&self, polls: u32) {
        self.state().delete_lag = polls;
    }

    /// Time each update request takes.
    pub fn update_latency(&self, latency: Duration) {
        self.state().update_latency = latency;
    }

    /// Rejects creates whose name already exists in the locality.
    pub fn unique_names(&self) {
        self.state().unique_names = true;
    }

    /// Errors returned by the next get calls.
    pub fn fail_gets(&self, errors: impl IntoIterator<Item = VendorError>) {
        self.state().get_failures.extend(errors);
    }

    /// Errors returned by the next create calls.
    pub fn fail_creates(&self, errors: impl IntoIterator<Item = VendorError>) {
        self.state().create_failures.extend(errors);
    }

    /// Errors returned by the next update calls.
    pub fn fail_updates(&self, errors: impl IntoIterator<Item = VendorError>) {
        self.state().update_failures.extend(errors);
    }

    /// Errors returned by the next delete calls. A scripted 404 also removes
    /// the resource, as if another actor deleted it first.
    pub fn fail_deletes(&self, errors: impl IntoIterator<Item = VendorError>) {
        self.state().delete_failures.extend(errors);
    }

    /// Error returned by every listing of `locality`.
    pub fn fail_list(&self, locality: &str, error: VendorError) {
        self.state().list_failures.insert(locality.to_owned(), error);
    }

    /// Error returned when deleting the owned child `child`.
    pub fn fail_child_delete(&self, child: Uuid, error: VendorError) {
        self.state().child_failures.insert(child, error);
    }

    /// Declares a dependency reporting `statuses` in turn; the last one
    /// repeats.
    pub fn dependency_statuses(&self, statuses: &[&str]) {
        self.state().dependency =
            Some(statuses.iter().map(|status| (*status).to_owned()).collect());
    }

    /// Snapshot of a seeded or created resource.
    #[must_use]
    pub fn resource(&self, id: Uuid) -> Option<FakeResource> {
        self.state().resources.get(&id).cloned()
    }

    /// Number of resources currently held.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.state().resources.len()
    }

    /// Every call observed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|call| predicate(call)).count()
    }

    /// Number of create calls.
    #[must_use]
    pub fn creates(&self) -> usize {
        self.count(|call| matches!(call, Call::Create(_)))
    }

    /// Number of get calls.
    #[must_use]
    pub fn gets(&self) -> usize {
        self.count(|call| matches!(call, Call::Get(_)))
    }

    /// Number of update calls, failed attempts included.
    #[must_use]
    pub fn updates(&self) -> usize {
        self.count(|call| matches!(call, Call::Update(..)))
    }

    /// Number of delete calls, failed attempts included.
    #[must_use]
    pub fn deletes(&self) -> usize {
        self.count(|call| matches!(call, Call::Delete(_)))
    }

    /// Number of calls that write to the vendor.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.count(|call| {
            !matches!(call, Call::Get(_) | Call::List(_) | Call::Dependency)
        })
    }

    /// Highest number of updates observed in flight at once.
    #[must_use]
    pub fn peak_concurrent_updates(&self) -> usize {
        self.state().peak_updates
    }
}

impl ResourceKind for ScriptedKind {
    type State = String;
    type Resource = FakeResource;
    type CreateRequest = ScriptedCreate;
    type UpdateRequest = ScriptedPatch;

    fn name(&self) -> &'static str {
        self.name
    }

    fn locality_kind(&self) -> LocalityKind {
        self.locality_kind
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Attribute::string("name").required().updatable(),
            Attribute::string("description").updatable(),
            Attribute::string("size").needs_reboot(),
            Attribute::list("tags").updatable(),
            Attribute::string(self.locality_kind.attribute())
                .computed()
                .force_new(),
            Attribute::string("status").computed(),
            Attribute::bool("delete_children").local(),
        ])
    }

    fn ready_states(&self) -> Vec<String> {
        vec![String::from(READY)]
    }

    fn stopped_states(&self) -> Vec<String> {
        vec![String::from(STOPPED)]
    }

    fn stop_before_delete(&self) -> bool {
        self.stop_before_delete
    }

    fn state_of(&self, resource: &FakeResource) -> String {
        resource.status.clone()
    }

    fn id_of(&self, resource: &FakeResource) -> Uuid {
        resource.id
    }

    fn name_of<'r>(&self, resource: &'r FakeResource) -> &'r str {
        &resource.name
    }

    fn expand_create(
        &self,
        desired: &Attributes,
        _scope: &Scope,
    ) -> Result<ScriptedCreate, ExpandError> {
        Ok(ScriptedCreate {
            name: expand_required_string(desired, "name")?,
            description: expand_string(desired, "description")?,
            size: expand_string(desired, "size")?,
            tags: expand_optional::<Vec<String>>(desired, "tags")?.unwrap_or_default(),
        })
    }

    fn build_update(
        &self,
        builder: &mut UpdateBuilder<'_>,
        _id: &CompositeId,
    ) -> Result<ScriptedPatch, UpdateError> {
        Ok(ScriptedPatch {
            name: builder.changed("name")?,
            description: builder.optional_string("description")?,
            size: builder.changed("size")?,
            tags: builder.changed("tags")?,
        })
    }

    fn flatten(&self, resource: &FakeResource, _id: &CompositeId) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.set("name", resource.name.as_str());
        flatten_string(&mut attributes, "description", resource.description.as_deref());
        flatten_string(&mut attributes, "size", resource.size.as_deref());
        attributes.set("tags", resource.tags.clone());
        attributes.set(self.locality_kind.attribute(), resource.locality.as_str());
        attributes.set("status", resource.status.as_str());
        attributes
    }

    fn dependencies(
        &self,
        _desired: &Attributes,
        _scope: &Scope,
    ) -> Result<Vec<Dependency>, ExpandError> {
        if self.state().dependency.is_none() {
            return Ok(Vec::new());
        }
        let state = Arc::clone(&self.state);
        Ok(vec![Dependency {
            kind: "parent",
            id: String::from("scripted-parent"),
            ready_states: vec![String::from(READY)],
            poll: Box::new(move || {
                let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
                guard.calls.push(Call::Dependency);
                let status = guard.dependency.as_mut().and_then(|script| {
                    if script.len() > 1 {
                        script.pop_front()
                    } else {
                        script.front().cloned()
                    }
                });
                Box::pin(async move { Ok(status.unwrap_or_else(|| String::from(READY))) })
            }),
        }])
    }

    fn owned_children(
        &self,
        resource: &FakeResource,
        _id: &CompositeId,
        prior: &Attributes,
    ) -> Vec<OwnedChild> {
        if prior.get("delete_children") != Some(&Value::Bool(true)) {
            return Vec::new();
        }
        resource
            .children
            .iter()
            .map(|child| {
                let state = Arc::clone(&self.state);
                let child_id = *child;
                OwnedChild {
                    kind: "child",
                    id: child_id.to_string(),
                    delete: Box::pin(async move {
                        let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
                        guard.calls.push(Call::DeleteChild(child_id));
                        guard.child_failures.remove(&child_id).map_or(Ok(()), Err)
                    }),
                }
            })
            .collect()
    }

    fn create<'a>(
        &'a self,
        scope: &'a Scope,
        request: &'a ScriptedCreate,
    ) -> KindFuture<'a, FakeResource> {
        Box::pin(async move { self.state().create(scope, request) })
    }

    fn get<'a>(&'a self, id: &'a CompositeId) -> KindFuture<'a, FakeResource> {
        Box::pin(async move { self.state().get(id.id()) })
    }

    fn update<'a>(
        &'a self,
        id: &'a CompositeId,
        request: &'a ScriptedPatch,
    ) -> KindFuture<'a, FakeResource> {
        Box::pin(async move {
            let latency = {
                let mut state = self.state();
                state.calls.push(Call::Update(id.id(), request.clone()));
                if let Some(err) = state.update_failures.pop_front() {
                    return Err(err);
                }
                state.in_flight_updates += 1;
                state.peak_updates = state.peak_updates.max(state.in_flight_updates);
                state.update_latency
            };
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let mut state = self.state();
            state.in_flight_updates -= 1;
            state.apply_patch(id.id(), request)
        })
    }

    fn delete<'a>(&'a self, id: &'a CompositeId) -> KindFuture<'a, ()> {
        Box::pin(async move { self.state().delete(id.id()) })
    }

    fn stop<'a>(&'a self, id: &'a CompositeId) -> KindFuture<'a, ()> {
        Box::pin(async move { self.state().set_status(Call::Stop(id.id()), id.id(), STOPPED) })
    }

    fn start<'a>(&'a self, id: &'a CompositeId) -> KindFuture<'a, ()> {
        Box::pin(async move { self.state().set_status(Call::Start(id.id()), id.id(), READY) })
    }

    fn list<'a>(
        &'a self,
        locality: &'a Locality,
        name: Option<&'a str>,
    ) -> KindFuture<'a, Vec<FakeResource>> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(Call::List(locality.to_string()));
            if let Some(err) = state.list_failures.get(locality.as_str()) {
                return Err(err.clone());
            }
            Ok(state
                .resources
                .values()
                .filter(|resource| resource.locality == *locality)
                .filter(|resource| name.is_none_or(|wanted| resource.name == wanted))
                .cloned()
                .collect())
        })
    }
}

/// Configuration pointing at an unroutable API, for kinds that are built but
/// never called.
///
/// # Panics
///
/// Panics if the built-in default localities stop parsing.
#[must_use]
pub fn resolved_config() -> ResolvedConfig {
    let settings = ProviderSettings {
        secret_key: Some(String::from("test-secret")),
        project_id: Some(String::from("11111111-2222-3333-4444-555555555555")),
        api_url: Some(String::from("http://127.0.0.1:9")),
        ..ProviderSettings::default()
    };
    let environment = ProviderConfig {
        access_key: None,
        secret_key: None,
        default_organization_id: None,
        default_project_id: None,
        default_region: None,
        default_zone: None,
        api_url: None,
    };
    ResolvedConfig::resolve(&settings, &environment, &ProfileValues::default())
        .unwrap_or_else(|err| panic!("test configuration must resolve: {err}"))
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    /// A `None` value removes the variable for the guard's lifetime.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
