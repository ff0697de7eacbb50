//! Serverless container, a regional child of a namespace.
//!
//! The namespace is referenced by `namespace_id` and must be ready before a
//! container is created or updated; another plan may be modifying it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::container_namespace::{self, Namespace};
use super::types::{ContainerStatus, container_ready};
use super::{non_empty, validate_resource_name};
use crate::driver::{Dependency, KindFuture, ResourceKind, Scope};
use crate::expand::{
    ExpandError, expand_duration, expand_map, expand_optional, expand_required_string,
    expand_string, expand_u32, flatten_duration, flatten_id, flatten_map, flatten_string,
    format_duration, normalize_duration, normalize_reference, parse_duration, strip_locality,
    validate_duration,
};
use crate::locality::{CompositeId, Locality, LocalityKind};
use crate::schema::{Attribute, Schema, empty_matches_unset};
use crate::update::{UpdateBuilder, UpdateError};
use crate::value::{Attributes, Value};
use crate::vendor::ScalewayClient;

/// Kind name shown to users.
pub const KIND: &str = "container";

const PRIVACY: &[&str] = &["public", "private"];

/// Container as returned by the containers API.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Container {
    /// UUID.
    pub id: Uuid,
    /// Name.
    pub name: String,
    /// Owning namespace.
    pub namespace_id: Uuid,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Environment variables.
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    /// Minimum number of instances.
    pub min_scale: u32,
    /// Maximum number of instances.
    pub max_scale: u32,
    /// Memory per instance, in MB.
    pub memory_limit: u32,
    /// CPU per instance, in mvCPU.
    pub cpu_limit: u32,
    /// Request timeout, such as `300s`.
    #[serde(default)]
    pub timeout: Option<String>,
    /// `public` or `private`.
    pub privacy: String,
    /// Image to run.
    pub registry_image: String,
    /// Port the image listens on.
    pub port: u32,
    /// Lifecycle status.
    pub status: ContainerStatus,
    /// Public endpoint.
    #[serde(default)]
    pub domain_name: Option<String>,
    /// Reason for an `error` status.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Body of `POST /containers`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CreateContainerRequest {
    /// Owning namespace.
    pub namespace_id: Uuid,
    /// Name.
    pub name: String,
    /// Description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Environment variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_variables: Option<BTreeMap<String, String>>,
    /// Minimum number of instances.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_scale: Option<u32>,
    /// Maximum number of instances.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_scale: Option<u32>,
    /// Memory per instance, in MB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<u32>,
    /// CPU per instance, in mvCPU.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<u32>,
    /// Request timeout in canonical form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// `public` or `private`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy: Option<String>,
    /// Image to run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_image: Option<String>,
    /// Port the image listens on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
}

/// Body of `PATCH /containers/{id}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UpdateContainerRequest {
    /// New description; empty clears it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Replacement environment variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_variables: Option<BTreeMap<String, String>>,
    /// Minimum number of instances.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_scale: Option<u32>,
    /// Maximum number of instances.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_scale: Option<u32>,
    /// Memory per instance, in MB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<u32>,
    /// CPU per instance, in mvCPU.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<u32>,
    /// Request timeout in canonical form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// `public` or `private`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy: Option<String>,
    /// Image to run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_image: Option<String>,
    /// Port the image listens on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
    /// Redeploy after the update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeploy: Option<bool>,
}

/// Container kind backed by the containers API.
#[derive(Clone, Debug)]
pub struct ContainerKind {
    client: ScalewayClient,
}

impl ContainerKind {
    /// Wraps the shared client.
    #[must_use]
    pub const fn new(client: ScalewayClient) -> Self {
        Self { client }
    }
}

fn collection(locality: &Locality) -> String {
    format!(
        "/containers/v1beta1/regions/{}/containers",
        locality.region()
    )
}

fn item(locality: &Locality, id: Uuid) -> String {
    format!("{}/{id}", collection(locality))
}

fn validate_privacy(value: &Value) -> Result<(), String> {
    match value {
        Value::String(raw) if PRIVACY.contains(&raw.as_str()) => Ok(()),
        _ => Err(format!("must be one of {}", PRIVACY.join(", "))),
    }
}

fn validate_non_negative(value: &Value) -> Result<(), String> {
    match value {
        Value::Int(number) if u32::try_from(*number).is_ok() => Ok(()),
        _ => Err(String::from("must be a non-negative integer")),
    }
}

/// Attribute schema.
#[must_use]
pub fn schema() -> Schema {
    Schema::new(vec![
        Attribute::string("name")
            .required()
            .force_new()
            .validate_with(validate_resource_name),
        Attribute::string("namespace_id")
            .required()
            .force_new()
            .normalize_with(normalize_reference),
        Attribute::string("description")
            .updatable()
            .suppress_diff_with(empty_matches_unset),
        Attribute::map("environment_variables")
            .computed()
            .updatable(),
        Attribute::int("min_scale")
            .computed()
            .updatable()
            .validate_with(validate_non_negative),
        Attribute::int("max_scale")
            .computed()
            .updatable()
            .validate_with(validate_non_negative),
        Attribute::int("memory_limit")
            .computed()
            .updatable()
            .validate_with(validate_non_negative),
        Attribute::int("cpu_limit")
            .computed()
            .updatable()
            .validate_with(validate_non_negative),
        Attribute::string("timeout")
            .computed()
            .updatable()
            .validate_with(validate_duration)
            .normalize_with(normalize_duration),
        Attribute::string("privacy")
            .computed()
            .updatable()
            .validate_with(validate_privacy),
        Attribute::string("registry_image").computed().updatable(),
        Attribute::int("port")
            .computed()
            .updatable()
            .validate_with(validate_non_negative),
        Attribute::string("region").computed().force_new(),
        Attribute::string("domain_name").computed(),
        Attribute::string("status").computed(),
    ])
}

impl ResourceKind for ContainerKind {
    type State = ContainerStatus;
    type Resource = Container;
    type CreateRequest = CreateContainerRequest;
    type UpdateRequest = UpdateContainerRequest;

    fn name(&self) -> &'static str {
        KIND
    }

    fn locality_kind(&self) -> LocalityKind {
        LocalityKind::Region
    }

    fn schema(&self) -> Schema {
        schema()
    }

    fn ready_states(&self) -> Vec<ContainerStatus> {
        container_ready()
    }

    fn state_of(&self, resource: &Container) -> ContainerStatus {
        resource.status.clone()
    }

    fn id_of(&self, resource: &Container) -> Uuid {
        resource.id
    }

    fn name_of<'r>(&self, resource: &'r Container) -> &'r str {
        &resource.name
    }

    fn expand_create(
        &self,
        desired: &Attributes,
        scope: &Scope,
    ) -> Result<CreateContainerRequest, ExpandError> {
        let namespace_id = strip_locality(
            "namespace_id",
            &expand_required_string(desired, "namespace_id")?,
            &scope.locality,
        )?;
        Ok(CreateContainerRequest {
            namespace_id,
            name: expand_required_string(desired, "name")?,
            description: expand_string(desired, "description")?,
            environment_variables: expand_map(desired, "environment_variables")?,
            min_scale: expand_u32(desired, "min_scale")?,
            max_scale: expand_u32(desired, "max_scale")?,
            memory_limit: expand_u32(desired, "memory_limit")?,
            cpu_limit: expand_u32(desired, "cpu_limit")?,
            timeout: expand_duration(desired, "timeout")?.map(format_duration),
            privacy: expand_string(desired, "privacy")?,
            registry_image: expand_string(desired, "registry_image")?,
            port: expand_u32(desired, "port")?,
        })
    }

    fn build_update(
        &self,
        builder: &mut UpdateBuilder<'_>,
        _id: &CompositeId,
    ) -> Result<UpdateContainerRequest, UpdateError> {
        let timeout = builder
            .changed::<String>("timeout")?
            .map(|raw| parse_duration(&raw).map_or(raw, format_duration));
        let mut request = UpdateContainerRequest {
            description: builder.optional_string("description")?,
            environment_variables: builder.changed("environment_variables")?,
            min_scale: builder.changed_u32("min_scale")?,
            max_scale: builder.changed_u32("max_scale")?,
            memory_limit: builder.changed_u32("memory_limit")?,
            cpu_limit: builder.changed_u32("cpu_limit")?,
            timeout,
            privacy: builder.changed("privacy")?,
            registry_image: builder.changed("registry_image")?,
            port: builder.changed_u32("port")?,
            redeploy: None,
        };
        if request != UpdateContainerRequest::default() {
            request.redeploy = Some(true);
        }
        Ok(request)
    }

    fn flatten(&self, resource: &Container, id: &CompositeId) -> Attributes {
        flatten_container(resource, id)
    }

    fn dependencies(
        &self,
        desired: &Attributes,
        scope: &Scope,
    ) -> Result<Vec<Dependency>, ExpandError> {
        let Some(raw) = expand_optional::<String>(desired, "namespace_id")? else {
            return Ok(Vec::new());
        };
        let namespace = strip_locality("namespace_id", &raw, &scope.locality)?;
        let client = Arc::new(self.client.clone());
        let path = Arc::new(container_namespace::item(&scope.locality, namespace));
        Ok(vec![Dependency {
            kind: container_namespace::KIND,
            id: raw,
            ready_states: vec![String::from("ready")],
            poll: Box::new(move || {
                let poll_client = Arc::clone(&client);
                let poll_path = Arc::clone(&path);
                Box::pin(async move {
                    let namespace: Namespace = poll_client.get(&poll_path).await?;
                    Ok(namespace.status.as_str().to_owned())
                })
            }),
        }])
    }

    fn create<'a>(
        &'a self,
        scope: &'a Scope,
        request: &'a CreateContainerRequest,
    ) -> KindFuture<'a, Container> {
        Box::pin(async move { self.client.post(&collection(&scope.locality), request).await })
    }

    /// New containers are deployed straight away.
    fn after_create<'a>(
        &'a self,
        id: &'a CompositeId,
        _resource: &'a Container,
    ) -> KindFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("{}/deploy", item(id.locality(), id.id()));
            let _: Container = self.client.post(&path, &serde_json::json!({})).await?;
            Ok(())
        })
    }

    fn get<'a>(&'a self, id: &'a CompositeId) -> KindFuture<'a, Container> {
        Box::pin(async move { self.client.get(&item(id.locality(), id.id())).await })
    }

    fn update<'a>(
        &'a self,
        id: &'a CompositeId,
        request: &'a UpdateContainerRequest,
    ) -> KindFuture<'a, Container> {
        Box::pin(async move {
            self.client
                .patch(&item(id.locality(), id.id()), request)
                .await
        })
    }

    fn delete<'a>(&'a self, id: &'a CompositeId) -> KindFuture<'a, ()> {
        Box::pin(async move { self.client.delete(&item(id.locality(), id.id())).await })
    }

    fn list<'a>(
        &'a self,
        locality: &'a Locality,
        name: Option<&'a str>,
    ) -> KindFuture<'a, Vec<Container>> {
        Box::pin(async move {
            let mut filters = vec![("project_id", self.client.project_id())];
            filters.extend(name.map(|wanted| ("name", wanted)));
            self.client
                .list_all(&collection(locality), "containers", &filters)
                .await
        })
    }
}

fn flatten_container(resource: &Container, id: &CompositeId) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.set("name", resource.name.as_str());
    flatten_id(
        &mut attributes,
        "namespace_id",
        id.locality(),
        Some(resource.namespace_id),
    );
    flatten_string(
        &mut attributes,
        "description",
        non_empty(resource.description.as_deref()),
    );
    flatten_map(
        &mut attributes,
        "environment_variables",
        Some(resource.environment_variables.clone()),
    );
    attributes.set("min_scale", i64::from(resource.min_scale));
    attributes.set("max_scale", i64::from(resource.max_scale));
    attributes.set("memory_limit", i64::from(resource.memory_limit));
    attributes.set("cpu_limit", i64::from(resource.cpu_limit));
    flatten_duration(
        &mut attributes,
        "timeout",
        resource
            .timeout
            .as_deref()
            .and_then(|raw| parse_duration(raw).ok()),
    );
    attributes.set("privacy", resource.privacy.as_str());
    attributes.set("registry_image", resource.registry_image.as_str());
    attributes.set("port", i64::from(resource.port));
    attributes.set("region", id.locality().as_str());
    flatten_string(&mut attributes, "domain_name", resource.domain_name.as_deref());
    attributes.set("status", resource.status.as_str());
    attributes
}
