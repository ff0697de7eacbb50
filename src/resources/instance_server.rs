//! Instance server, addressed by zone.
//!
//! Changing the commercial type needs the server powered off, and a server
//! must be stopped before it can be deleted. Additional volumes survive the
//! server unless `delete_additional_volumes` is set.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{ServerAction, ServerState, server_running, server_stopped};
use super::{validate_resource_name, zone_of};
use crate::driver::{KindFuture, OwnedChild, ResourceKind, Scope};
use crate::expand::{
    ExpandError, expand_optional, expand_required_string, expand_string, flatten_string,
};
use crate::locality::{CompositeId, Locality, LocalityKind, encode};
use crate::schema::{Attribute, Schema, Timeouts, empty_matches_unset};
use crate::update::{UpdateBuilder, UpdateError};
use crate::value::{Attributes, Value};
use crate::vendor::{ScalewayClient, VendorError};

/// Kind name shown to users.
pub const KIND: &str = "instance_server";

/// Kind name of the volumes a server owns.
pub const VOLUME_KIND: &str = "instance_volume";

const TIMEOUT: Duration = Duration::from_secs(600);
const ROOT_VOLUME: &str = "0";

/// Image reference inside a server.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ServerImage {
    /// Image UUID.
    pub id: Uuid,
}

/// Volume attached to a server, keyed by its slot.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ServerVolume {
    /// Volume UUID.
    pub id: Uuid,
    /// Whether the server boots from it.
    #[serde(default)]
    pub boot: bool,
}

/// Public address of a server.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PublicIp {
    /// IPv4 or IPv6 address.
    pub address: String,
}

/// Server as returned by the instance API.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Server {
    /// UUID.
    pub id: Uuid,
    /// Name.
    pub name: String,
    /// Offer, such as `DEV1-S`.
    pub commercial_type: String,
    /// Power state.
    pub state: ServerState,
    /// Actions accepted in the current state.
    #[serde(default)]
    pub allowed_actions: Vec<ServerAction>,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Boot image.
    #[serde(default)]
    pub image: Option<ServerImage>,
    /// Attached volumes by slot; slot `0` is the root volume.
    #[serde(default)]
    pub volumes: BTreeMap<String, ServerVolume>,
    /// Public address.
    #[serde(default)]
    pub public_ip: Option<PublicIp>,
    /// Whether a dynamic public address is attached.
    #[serde(default)]
    pub dynamic_ip_required: bool,
    /// Owning project.
    pub project: String,
}

impl Server {
    fn additional_volumes(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.volumes
            .iter()
            .filter(|(slot, volume)| slot.as_str() != ROOT_VOLUME && !volume.boot)
            .map(|(_, volume)| volume.id)
    }
}

#[derive(Deserialize)]
pub(super) struct ServerEnvelope {
    pub(super) server: Server,
}

/// Body of `POST /servers`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CreateServerRequest {
    /// Name.
    pub name: String,
    /// Offer.
    pub commercial_type: String,
    /// Image UUID or label.
    pub image: String,
    /// Project to create the server in.
    pub project: String,
    /// Tags.
    pub tags: Vec<String>,
    /// Whether a dynamic public address is attached.
    pub dynamic_ip_required: bool,
}

/// Body of `PATCH /servers/{id}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UpdateServerRequest {
    /// New name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New tags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// New offer; only accepted while stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commercial_type: Option<String>,
}

/// Server kind backed by the instance API.
#[derive(Clone, Debug)]
pub struct InstanceServerKind {
    client: ScalewayClient,
}

impl InstanceServerKind {
    /// Wraps the shared client.
    #[must_use]
    pub const fn new(client: ScalewayClient) -> Self {
        Self { client }
    }

    async fn power_on_if_needed(
        &self,
        id: &CompositeId,
        server: &Server,
    ) -> Result<(), VendorError> {
        if server_running().contains(&server.state) {
            return Ok(());
        }
        if server
            .allowed_actions
            .iter()
            .any(|action| action.as_str() == "poweron")
        {
            let zone = zone_of(id.locality())?;
            return self
                .client
                .server_action(&zone, &id.id().to_string(), "poweron")
                .await;
        }
        Err(VendorError::new(
            412,
            "precondition_failed",
            format!("server {id} in state {} cannot be powered on", server.state),
        ))
    }

    async fn action(&self, id: &CompositeId, action: &str) -> Result<(), VendorError> {
        let zone = zone_of(id.locality())?;
        self.client
            .server_action(&zone, &id.id().to_string(), action)
            .await
    }
}

pub(super) fn collection(locality: &Locality) -> String {
    format!("/instance/v1/zones/{locality}/servers")
}

pub(super) fn item(locality: &Locality, id: Uuid) -> String {
    format!("{}/{id}", collection(locality))
}

fn volume_path(locality: &Locality, id: Uuid) -> String {
    format!("/instance/v1/zones/{locality}/volumes/{id}")
}

/// The vendor answers with the UUID a configured label resolved to; labels
/// cannot be resolved back, so a UUID in state matches any label.
fn image_label_matches_uuid(prior: Option<&Value>, desired: Option<&Value>) -> bool {
    let is_uuid = |raw: &str| Uuid::parse_str(raw).is_ok();
    match (prior, desired) {
        (Some(Value::String(resolved)), Some(Value::String(label))) => {
            is_uuid(resolved) && !is_uuid(label)
        }
        _ => false,
    }
}

/// Attribute schema.
#[must_use]
pub fn schema() -> Schema {
    Schema::new(vec![
        Attribute::string("name")
            .required()
            .updatable()
            .validate_with(validate_resource_name),
        Attribute::string("type").required().needs_reboot(),
        Attribute::string("image")
            .required()
            .force_new()
            .suppress_diff_with(image_label_matches_uuid),
        Attribute::list("tags")
            .updatable()
            .suppress_diff_with(empty_matches_unset),
        Attribute::bool("enable_dynamic_ip").force_new(),
        Attribute::bool("delete_additional_volumes").local(),
        Attribute::list("additional_volume_ids").computed(),
        Attribute::string("public_ip").computed(),
        Attribute::string("state").computed(),
        Attribute::string("project_id").computed().force_new(),
        Attribute::string("zone").computed().force_new(),
    ])
}

impl ResourceKind for InstanceServerKind {
    type State = ServerState;
    type Resource = Server;
    type CreateRequest = CreateServerRequest;
    type UpdateRequest = UpdateServerRequest;

    fn name(&self) -> &'static str {
        KIND
    }

    fn locality_kind(&self) -> LocalityKind {
        LocalityKind::Zone
    }

    fn schema(&self) -> Schema {
        schema()
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::uniform(TIMEOUT)
    }

    fn ready_states(&self) -> Vec<ServerState> {
        server_running()
    }

    fn stopped_states(&self) -> Vec<ServerState> {
        server_stopped()
    }

    fn stop_before_delete(&self) -> bool {
        true
    }

    fn state_of(&self, resource: &Server) -> ServerState {
        resource.state.clone()
    }

    fn id_of(&self, resource: &Server) -> Uuid {
        resource.id
    }

    fn name_of<'r>(&self, resource: &'r Server) -> &'r str {
        &resource.name
    }

    fn expand_create(
        &self,
        desired: &Attributes,
        _scope: &Scope,
    ) -> Result<CreateServerRequest, ExpandError> {
        Ok(CreateServerRequest {
            name: expand_required_string(desired, "name")?,
            commercial_type: expand_required_string(desired, "type")?,
            image: expand_required_string(desired, "image")?,
            project: expand_string(desired, "project_id")?
                .unwrap_or_else(|| self.client.project_id().to_owned()),
            tags: expand_optional::<Vec<String>>(desired, "tags")?.unwrap_or_default(),
            dynamic_ip_required: expand_optional::<bool>(desired, "enable_dynamic_ip")?
                .unwrap_or(false),
        })
    }

    fn build_update(
        &self,
        builder: &mut UpdateBuilder<'_>,
        _id: &CompositeId,
    ) -> Result<UpdateServerRequest, UpdateError> {
        Ok(UpdateServerRequest {
            name: builder.changed("name")?,
            tags: builder.changed("tags")?,
            commercial_type: builder.changed("type")?,
        })
    }

    fn flatten(&self, resource: &Server, id: &CompositeId) -> Attributes {
        flatten_server(resource, id)
    }

    fn owned_children(
        &self,
        resource: &Server,
        id: &CompositeId,
        prior: &Attributes,
    ) -> Vec<OwnedChild> {
        if prior.get("delete_additional_volumes") != Some(&Value::Bool(true)) {
            return Vec::new();
        }
        resource
            .additional_volumes()
            .map(|volume| {
                let client = self.client.clone();
                let path = volume_path(id.locality(), volume);
                OwnedChild {
                    kind: VOLUME_KIND,
                    id: encode(id.locality(), volume),
                    delete: Box::pin(async move { client.delete(&path).await }),
                }
            })
            .collect()
    }

    fn create<'a>(
        &'a self,
        scope: &'a Scope,
        request: &'a CreateServerRequest,
    ) -> KindFuture<'a, Server> {
        Box::pin(async move {
            let envelope: ServerEnvelope = self
                .client
                .post(&collection(&scope.locality), request)
                .await?;
            Ok(envelope.server)
        })
    }

    /// Servers are created powered off.
    fn after_create<'a>(
        &'a self,
        id: &'a CompositeId,
        resource: &'a Server,
    ) -> KindFuture<'a, ()> {
        Box::pin(async move { self.power_on_if_needed(id, resource).await })
    }

    fn get<'a>(&'a self, id: &'a CompositeId) -> KindFuture<'a, Server> {
        Box::pin(async move {
            let envelope: ServerEnvelope =
                self.client.get(&item(id.locality(), id.id())).await?;
            Ok(envelope.server)
        })
    }

    fn update<'a>(
        &'a self,
        id: &'a CompositeId,
        request: &'a UpdateServerRequest,
    ) -> KindFuture<'a, Server> {
        Box::pin(async move {
            let envelope: ServerEnvelope = self
                .client
                .patch(&item(id.locality(), id.id()), request)
                .await?;
            Ok(envelope.server)
        })
    }

    fn delete<'a>(&'a self, id: &'a CompositeId) -> KindFuture<'a, ()> {
        Box::pin(async move {
            let zone = zone_of(id.locality())?;
            self.client.delete_server(&zone, &id.id().to_string()).await
        })
    }

    fn stop<'a>(&'a self, id: &'a CompositeId) -> KindFuture<'a, ()> {
        Box::pin(async move { self.action(id, "poweroff").await })
    }

    fn start<'a>(&'a self, id: &'a CompositeId) -> KindFuture<'a, ()> {
        Box::pin(async move { self.action(id, "poweron").await })
    }

    fn list<'a>(
        &'a self,
        locality: &'a Locality,
        name: Option<&'a str>,
    ) -> KindFuture<'a, Vec<Server>> {
        Box::pin(async move {
            let mut filters = vec![("project", self.client.project_id())];
            filters.extend(name.map(|wanted| ("name", wanted)));
            self.client
                .list_all(&collection(locality), "servers", &filters)
                .await
        })
    }
}

fn flatten_server(resource: &Server, id: &CompositeId) -> Attributes {
    let locality = id.locality();
    let mut attributes = Attributes::new();
    attributes.set("name", resource.name.as_str());
    attributes.set("type", resource.commercial_type.as_str());
    flatten_string(
        &mut attributes,
        "image",
        resource
            .image
            .as_ref()
            .map(|image| image.id.to_string())
            .as_deref(),
    );
    attributes.set("tags", resource.tags.clone());
    attributes.set("enable_dynamic_ip", resource.dynamic_ip_required);
    attributes.set(
        "additional_volume_ids",
        resource
            .additional_volumes()
            .map(|volume| encode(locality, volume))
            .collect::<Vec<_>>(),
    );
    flatten_string(
        &mut attributes,
        "public_ip",
        resource.public_ip.as_ref().map(|ip| ip.address.as_str()),
    );
    attributes.set("state", resource.state.as_str());
    attributes.set("project_id", resource.project.as_str());
    attributes.set("zone", locality.as_str());
    attributes
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::test_support::resolved_config;

    const SERVER: &str = "11111111-1111-1111-1111-111111111111";
    const ROOT: &str = "22222222-2222-2222-2222-222222222222";
    const DATA: &str = "33333333-3333-3333-3333-333333333333";

    #[fixture]
    fn server() -> Server {
        let envelope: ServerEnvelope = serde_json::from_value(serde_json::json!({
            "server": {
                "id": SERVER,
                "name": "web",
                "commercial_type": "DEV1-S",
                "state": "running",
                "allowed_actions": ["poweroff", "reboot"],
                "tags": [],
                "image": {"id": "44444444-4444-4444-4444-444444444444", "name": "ubuntu"},
                "volumes": {
                    "0": {"id": ROOT, "boot": true, "volume_type": "l_ssd"},
                    "1": {"id": DATA, "volume_type": "b_ssd"}
                },
                "public_ip": {"address": "51.15.0.1"},
                "dynamic_ip_required": true,
                "project": "proj",
                "zone": "fr-par-1"
            }
        }))
        .expect("server JSON");
        envelope.server
    }

    fn composite() -> CompositeId {
        CompositeId::new(
            Locality::parse("fr-par-1").expect("zone"),
            Uuid::parse_str(SERVER).expect("uuid"),
        )
    }

    fn kind() -> InstanceServerKind {
        InstanceServerKind::new(ScalewayClient::new(&resolved_config()))
    }

    #[rstest]
    fn flatten_lists_only_additional_volumes(server: Server) {
        let attributes = flatten_server(&server, &composite());
        assert_eq!(
            attributes.get("additional_volume_ids"),
            Some(&Value::from(vec![format!("fr-par-1/{DATA}")]))
        );
        assert_eq!(attributes.get("tags"), Some(&Value::List(Vec::new())));
        assert_eq!(attributes.get("enable_dynamic_ip"), Some(&Value::Bool(true)));
        assert_eq!(attributes.get("public_ip"), Some(&Value::from("51.15.0.1")));
    }

    #[rstest]
    #[case::tags_left_out(None)]
    #[case::tags_set_empty(Some(Vec::new()))]
    fn reapplying_the_configuration_changes_nothing(
        server: Server,
        #[case] tags: Option<Vec<String>>,
    ) {
        let prior = flatten_server(&server, &composite());
        let mut desired: Attributes = [
            ("name", "web"),
            ("type", "DEV1-S"),
            ("image", "ubuntu_jammy"),
        ]
        .into_iter()
        .collect();
        desired.set("enable_dynamic_ip", true);
        desired.set_optional("tags", tags.map(Value::from));
        let schema = schema();
        let mut builder = UpdateBuilder::new(&schema, &prior, &desired);
        assert!(builder.replacement_reasons().is_empty());
        let request = kind()
            .build_update(&mut builder, &composite())
            .expect("update");
        assert!(builder.finish(request).is_noop());
    }

    #[rstest]
    fn a_different_image_uuid_replaces_the_server(server: Server) {
        let prior = flatten_server(&server, &composite());
        let mut desired = prior.clone();
        desired.set("image", "55555555-5555-5555-5555-555555555555");
        let schema = schema();
        let builder = UpdateBuilder::new(&schema, &prior, &desired);
        assert_eq!(builder.replacement_reasons(), ["image"]);
    }

    #[rstest]
    fn changing_the_type_needs_a_reboot(server: Server) {
        let prior = flatten_server(&server, &composite());
        let mut desired = prior.clone();
        desired.set("type", "DEV1-M");
        let schema = schema();
        let mut builder = UpdateBuilder::new(&schema, &prior, &desired);
        let request = kind()
            .build_update(&mut builder, &composite())
            .expect("update");
        assert_eq!(
            request,
            UpdateServerRequest {
                commercial_type: Some(String::from("DEV1-M")),
                ..UpdateServerRequest::default()
            }
        );
        assert!(builder.needs_reboot());
    }

    #[rstest]
    fn removed_tags_are_cleared(server: Server) {
        let mut tagged = server;
        tagged.tags = vec![String::from("blue")];
        let prior = flatten_server(&tagged, &composite());
        let mut desired = prior.clone();
        desired.unset("tags");
        let schema = schema();
        let mut builder = UpdateBuilder::new(&schema, &prior, &desired);
        assert_eq!(builder.changed::<Vec<String>>("tags"), Ok(Some(Vec::new())));
    }

    #[rstest]
    fn volumes_are_owned_only_when_requested(server: Server) {
        let kind = kind();
        assert!(
            kind.owned_children(&server, &composite(), &Attributes::new())
                .is_empty()
        );

        let mut prior = Attributes::new();
        prior.set("delete_additional_volumes", true);
        let children = kind.owned_children(&server, &composite(), &prior);
        let ids: Vec<&str> = children.iter().map(|child| child.id.as_str()).collect();
        assert_eq!(ids, [format!("fr-par-1/{DATA}")]);
    }

    #[rstest]
    fn create_request_defaults_to_the_client_project() {
        let desired: Attributes = [("name", "web"), ("type", "DEV1-S"), ("image", "ubuntu_jammy")]
            .into_iter()
            .collect();
        let scope = Scope {
            locality: Locality::parse("fr-par-1").expect("zone"),
            parent: None,
        };
        let request = kind().expand_create(&desired, &scope).expect("expand");
        assert_eq!(request.project, resolved_config().project_id);
        assert!(!request.dynamic_ip_required);
    }

    #[rstest]
    #[tokio::test]
    async fn running_servers_are_not_powered_on_again(server: Server) {
        assert_eq!(kind().power_on_if_needed(&composite(), &server).await, Ok(()));
    }

    #[rstest]
    #[tokio::test]
    async fn servers_that_refuse_poweron_fail(server: Server) {
        let mut stuck = server;
        stuck.state = ServerState::from("locked");
        stuck.allowed_actions.clear();
        let err = kind()
            .power_on_if_needed(&composite(), &stuck)
            .await
            .expect_err("refused");
        assert_eq!(err.code, "precondition_failed");
    }
}
