//! Serverless containers namespace, addressed by region.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{ContainerStatus, container_ready};
use super::{non_empty, validate_resource_name};
use crate::driver::{KindFuture, ResourceKind, Scope};
use crate::expand::{
    ExpandError, expand_map, expand_required_string, expand_string, flatten_map, flatten_string,
};
use crate::locality::{CompositeId, Locality, LocalityKind};
use crate::schema::{Attribute, Schema, empty_matches_unset};
use crate::update::{UpdateBuilder, UpdateError};
use crate::value::Attributes;
use crate::vendor::ScalewayClient;

/// Kind name shown to users.
pub const KIND: &str = "container_namespace";

/// Namespace as returned by the containers API.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Namespace {
    /// UUID.
    pub id: Uuid,
    /// Name.
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Environment variables inherited by every container.
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    /// Lifecycle status.
    pub status: ContainerStatus,
    /// Owning project.
    pub project_id: String,
    /// Owning organization.
    #[serde(default)]
    pub organization_id: Option<String>,
    /// Registry endpoint images are pushed to.
    #[serde(default)]
    pub registry_endpoint: Option<String>,
    /// Backing registry namespace.
    #[serde(default)]
    pub registry_namespace_id: Option<String>,
    /// Reason for an `error` status.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Body of `POST /namespaces`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CreateNamespaceRequest {
    /// Name.
    pub name: String,
    /// Description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Environment variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_variables: Option<BTreeMap<String, String>>,
    /// Project to create the namespace in.
    pub project_id: String,
}

/// Body of `PATCH /namespaces/{id}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UpdateNamespaceRequest {
    /// New description; empty clears it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Replacement environment variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_variables: Option<BTreeMap<String, String>>,
}

/// Namespace kind backed by the containers API.
#[derive(Clone, Debug)]
pub struct ContainerNamespaceKind {
    client: ScalewayClient,
}

impl ContainerNamespaceKind {
    /// Wraps the shared client.
    #[must_use]
    pub const fn new(client: ScalewayClient) -> Self {
        Self { client }
    }
}

pub(super) fn collection(locality: &Locality) -> String {
    format!(
        "/containers/v1beta1/regions/{}/namespaces",
        locality.region()
    )
}

pub(super) fn item(locality: &Locality, id: Uuid) -> String {
    format!("{}/{id}", collection(locality))
}

/// Attribute schema.
#[must_use]
pub fn schema() -> Schema {
    Schema::new(vec![
        Attribute::string("name")
            .required()
            .force_new()
            .validate_with(validate_resource_name),
        Attribute::string("description")
            .updatable()
            .suppress_diff_with(empty_matches_unset),
        Attribute::map("environment_variables")
            .computed()
            .updatable(),
        Attribute::string("region").computed().force_new(),
        Attribute::string("project_id").computed().force_new(),
        Attribute::string("organization_id").computed(),
        Attribute::string("registry_endpoint").computed(),
        Attribute::string("registry_namespace_id").computed(),
        Attribute::string("status").computed(),
    ])
}

impl ResourceKind for ContainerNamespaceKind {
    type State = ContainerStatus;
    type Resource = Namespace;
    type CreateRequest = CreateNamespaceRequest;
    type UpdateRequest = UpdateNamespaceRequest;

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

    fn state_of(&self, resource: &Namespace) -> ContainerStatus {
        resource.status.clone()
    }

    fn id_of(&self, resource: &Namespace) -> Uuid {
        resource.id
    }

    fn name_of<'r>(&self, resource: &'r Namespace) -> &'r str {
        &resource.name
    }

    fn expand_create(
        &self,
        desired: &Attributes,
        _scope: &Scope,
    ) -> Result<CreateNamespaceRequest, ExpandError> {
        Ok(CreateNamespaceRequest {
            name: expand_required_string(desired, "name")?,
            description: expand_string(desired, "description")?,
            environment_variables: expand_map(desired, "environment_variables")?,
            project_id: expand_string(desired, "project_id")?
                .unwrap_or_else(|| self.client.project_id().to_owned()),
        })
    }

    fn build_update(
        &self,
        builder: &mut UpdateBuilder<'_>,
        _id: &CompositeId,
    ) -> Result<UpdateNamespaceRequest, UpdateError> {
        Ok(UpdateNamespaceRequest {
            description: builder.optional_string("description")?,
            environment_variables: builder.changed("environment_variables")?,
        })
    }

    fn flatten(&self, resource: &Namespace, id: &CompositeId) -> Attributes {
        flatten_namespace(resource, id)
    }

    fn create<'a>(
        &'a self,
        scope: &'a Scope,
        request: &'a CreateNamespaceRequest,
    ) -> KindFuture<'a, Namespace> {
        Box::pin(async move { self.client.post(&collection(&scope.locality), request).await })
    }

    fn get<'a>(&'a self, id: &'a CompositeId) -> KindFuture<'a, Namespace> {
        Box::pin(async move { self.client.get(&item(id.locality(), id.id())).await })
    }

    fn update<'a>(
        &'a self,
        id: &'a CompositeId,
        request: &'a UpdateNamespaceRequest,
    ) -> KindFuture<'a, Namespace> {
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
    ) -> KindFuture<'a, Vec<Namespace>> {
        Box::pin(async move {
            let mut filters = vec![("project_id", self.client.project_id())];
            filters.extend(name.map(|wanted| ("name", wanted)));
            self.client
                .list_all(&collection(locality), "namespaces", &filters)
                .await
        })
    }
}

fn flatten_namespace(resource: &Namespace, id: &CompositeId) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.set("name", resource.name.as_str());
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
    attributes.set("region", id.locality().as_str());
    attributes.set("project_id", resource.project_id.as_str());
    flatten_string(
        &mut attributes,
        "organization_id",
        resource.organization_id.as_deref(),
    );
    flatten_string(
        &mut attributes,
        "registry_endpoint",
        resource.registry_endpoint.as_deref(),
    );
    flatten_string(
        &mut attributes,
        "registry_namespace_id",
        resource.registry_namespace_id.as_deref(),
    );
    attributes.set("status", resource.status.as_str());
    attributes
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::test_support::resolved_config;
    use crate::value::Value;

    const ID: &str = "11111111-1111-1111-1111-111111111111";

    fn namespace() -> Namespace {
        serde_json::from_value(serde_json::json!({
            "id": ID,
            "name": "ns-a",
            "description": "",
            "environment_variables": {"MODE": "test"},
            "status": "ready",
            "project_id": "proj",
            "organization_id": "org",
            "registry_endpoint": "rg.fr-par.scw.cloud/funcscwnsa",
            "registry_namespace_id": null,
            "region": "fr-par"
        }))
        .expect("namespace JSON")
    }

    fn composite() -> CompositeId {
        CompositeId::new(
            Locality::parse("fr-par").expect("region"),
            Uuid::parse_str(ID).expect("uuid"),
        )
    }

    #[rstest]
    fn flatten_keeps_unset_fields_unset() {
        let attributes = flatten_namespace(&namespace(), &composite());
        assert_eq!(attributes.get("description"), None);
        assert_eq!(attributes.get("registry_namespace_id"), None);
        assert_eq!(attributes.get("region"), Some(&Value::from("fr-par")));
        assert_eq!(attributes.get("status"), Some(&Value::from("ready")));
    }

    #[rstest]
    fn flattened_state_validates_against_the_schema() {
        let attributes = flatten_namespace(&namespace(), &composite());
        assert_eq!(schema().validate(&attributes), Ok(()));
    }

    #[rstest]
    fn read_back_state_produces_no_update() {
        let prior = flatten_namespace(&namespace(), &composite());
        let schema = schema();
        let mut builder = UpdateBuilder::new(&schema, &prior, &prior);
        let request = UpdateNamespaceRequest {
            description: builder.optional_string("description").expect("description"),
            environment_variables: builder
                .changed("environment_variables")
                .expect("environment"),
        };
        assert!(builder.finish(request).is_noop());
    }

    #[rstest]
    #[case::description_left_out(None)]
    #[case::description_set_empty(Some(""))]
    fn reapplying_the_configuration_changes_nothing(#[case] description: Option<&str>) {
        let prior = flatten_namespace(&namespace(), &composite());
        let mut desired: Attributes = [("name", "ns-a"), ("region", "fr-par")]
            .into_iter()
            .collect();
        desired.set_optional("description", description);
        desired.set(
            "environment_variables",
            BTreeMap::from([(String::from("MODE"), String::from("test"))]),
        );
        let schema = schema();
        let mut builder = UpdateBuilder::new(&schema, &prior, &desired);
        assert!(builder.replacement_reasons().is_empty());
        let request = ContainerNamespaceKind::new(ScalewayClient::new(&resolved_config()))
            .build_update(&mut builder, &composite())
            .expect("update");
        assert!(builder.finish(request).is_noop());
    }

    #[rstest]
    fn environment_can_be_cleared_with_an_empty_map() {
        let prior = flatten_namespace(&namespace(), &composite());
        let mut desired = prior.clone();
        desired.set("environment_variables", BTreeMap::<String, String>::new());
        let schema = schema();
        let mut builder = UpdateBuilder::new(&schema, &prior, &desired);
        assert_eq!(
            builder.changed::<BTreeMap<String, String>>("environment_variables"),
            Ok(Some(BTreeMap::new()))
        );
    }

    #[rstest]
    fn create_request_omits_unset_fields() {
        let request = CreateNamespaceRequest {
            name: String::from("ns-a"),
            description: None,
            environment_variables: None,
            project_id: String::from("proj"),
        };
        let json = serde_json::to_value(&request).expect("serialise");
        assert_eq!(json, serde_json::json!({"name": "ns-a", "project_id": "proj"}));
    }

    #[rstest]
    #[case("ns-a", true)]
    #[case("Ns-A", false)]
    #[case("-leading", false)]
    #[case("", false)]
    fn names_follow_dns_label_rules(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(validate_resource_name(&Value::from(name)).is_ok(), valid);
    }
}
