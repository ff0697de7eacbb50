//! Private NIC attaching an instance server to a private network.
//!
//! Identifiers are nested: `<zone>/<server-uuid>/<nic-uuid>`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::instance_server::{self, Server, ServerEnvelope};
use super::types::{NicState, server_running, server_stopped};
use crate::driver::{Dependency, KindFuture, ResourceKind, Scope};
use crate::expand::{
    ExpandError, expand_optional, expand_required_string, flatten_id, normalize_reference,
    reference_locality, strip_locality,
};
use crate::locality::{CompositeId, IdForm, Locality, LocalityKind, encode};
use crate::schema::{Attribute, Schema, empty_matches_unset};
use crate::update::{UpdateBuilder, UpdateError};
use crate::value::Attributes;
use crate::vendor::{ScalewayClient, VendorError};

/// Kind name shown to users.
pub const KIND: &str = "instance_private_nic";

/// Private NIC as returned by the instance API.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PrivateNic {
    /// UUID.
    pub id: Uuid,
    /// Server the NIC is plugged into.
    pub server_id: Uuid,
    /// Private network the NIC joins.
    pub private_network_id: Uuid,
    /// Hardware address.
    pub mac_address: String,
    /// Lifecycle state.
    pub state: NicState,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Deserialize)]
struct NicEnvelope {
    private_nic: PrivateNic,
}

/// Body of `POST /private_nics`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CreateNicRequest {
    /// Private network to join.
    pub private_network_id: Uuid,
    /// Tags.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Body of `PATCH /private_nics/{id}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UpdateNicRequest {
    /// Replacement tags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Private NIC kind backed by the instance API.
#[derive(Clone, Debug)]
pub struct PrivateNicKind {
    client: ScalewayClient,
}

impl PrivateNicKind {
    /// Wraps the shared client.
    #[must_use]
    pub const fn new(client: ScalewayClient) -> Self {
        Self { client }
    }
}

fn collection(locality: &Locality, server: Uuid) -> String {
    format!(
        "{}/private_nics",
        instance_server::item(locality, server)
    )
}

fn item(id: &CompositeId) -> Result<String, VendorError> {
    let server = id.parent().ok_or_else(|| {
        VendorError::new(400, "invalid_arguments", format!("{id} has no server component"))
    })?;
    Ok(format!("{}/{}", collection(id.locality(), server), id.id()))
}

/// Attribute schema.
#[must_use]
pub fn schema() -> Schema {
    Schema::new(vec![
        Attribute::string("server_id")
            .required()
            .force_new()
            .normalize_with(normalize_reference),
        Attribute::string("private_network_id")
            .required()
            .force_new()
            .normalize_with(normalize_reference),
        Attribute::list("tags")
            .updatable()
            .suppress_diff_with(empty_matches_unset),
        Attribute::string("mac_address").computed(),
        Attribute::string("zone").computed().force_new(),
    ])
}

impl ResourceKind for PrivateNicKind {
    type State = NicState;
    type Resource = PrivateNic;
    type CreateRequest = CreateNicRequest;
    type UpdateRequest = UpdateNicRequest;

    fn name(&self) -> &'static str {
        KIND
    }

    fn locality_kind(&self) -> LocalityKind {
        LocalityKind::Zone
    }

    fn id_form(&self) -> IdForm {
        IdForm::Nested
    }

    fn schema(&self) -> Schema {
        schema()
    }

    fn ready_states(&self) -> Vec<NicState> {
        vec![NicState::from("available")]
    }

    fn state_of(&self, resource: &PrivateNic) -> NicState {
        resource.state.clone()
    }

    fn id_of(&self, resource: &PrivateNic) -> Uuid {
        resource.id
    }

    fn name_of<'r>(&self, resource: &'r PrivateNic) -> &'r str {
        &resource.mac_address
    }

    fn parent_of(&self, resource: &PrivateNic) -> Option<Uuid> {
        Some(resource.server_id)
    }

    fn parent(
        &self,
        desired: &Attributes,
        locality: &Locality,
    ) -> Result<Option<Uuid>, ExpandError> {
        let raw = expand_required_string(desired, "server_id")?;
        strip_locality("server_id", &raw, locality).map(Some)
    }

    fn expand_create(
        &self,
        desired: &Attributes,
        scope: &Scope,
    ) -> Result<CreateNicRequest, ExpandError> {
        Ok(CreateNicRequest {
            private_network_id: strip_locality(
                "private_network_id",
                &expand_required_string(desired, "private_network_id")?,
                &scope.locality,
            )?,
            tags: expand_optional::<Vec<String>>(desired, "tags")?.unwrap_or_default(),
        })
    }

    fn build_update(
        &self,
        builder: &mut UpdateBuilder<'_>,
        _id: &CompositeId,
    ) -> Result<UpdateNicRequest, UpdateError> {
        Ok(UpdateNicRequest {
            tags: builder.changed("tags")?,
        })
    }

    fn flatten(&self, resource: &PrivateNic, id: &CompositeId) -> Attributes {
        flatten_nic(resource, id)
    }

    /// The server must not be mid-transition while its NICs change.
    fn dependencies(
        &self,
        _desired: &Attributes,
        scope: &Scope,
    ) -> Result<Vec<Dependency>, ExpandError> {
        let Some(server) = scope.parent else {
            return Ok(Vec::new());
        };
        let client = Arc::new(self.client.clone());
        let path = Arc::new(instance_server::item(&scope.locality, server));
        let ready_states = server_running()
            .into_iter()
            .chain(server_stopped())
            .map(|state| state.as_str().to_owned())
            .collect();
        Ok(vec![Dependency {
            kind: instance_server::KIND,
            id: encode(&scope.locality, server),
            ready_states,
            poll: Box::new(move || {
                let poll_client = Arc::clone(&client);
                let poll_path = Arc::clone(&path);
                Box::pin(async move {
                    let envelope: ServerEnvelope = poll_client.get(&poll_path).await?;
                    Ok(envelope.server.state.as_str().to_owned())
                })
            }),
        }])
    }

    fn create<'a>(
        &'a self,
        scope: &'a Scope,
        request: &'a CreateNicRequest,
    ) -> KindFuture<'a, PrivateNic> {
        Box::pin(async move {
            let server = scope.parent.ok_or_else(|| {
                VendorError::new(400, "invalid_arguments", "private NIC needs a server")
            })?;
            let envelope: NicEnvelope = self
                .client
                .post(&collection(&scope.locality, server), request)
                .await?;
            Ok(envelope.private_nic)
        })
    }

    fn get<'a>(&'a self, id: &'a CompositeId) -> KindFuture<'a, PrivateNic> {
        Box::pin(async move {
            let envelope: NicEnvelope = self.client.get(&item(id)?).await?;
            Ok(envelope.private_nic)
        })
    }

    fn update<'a>(
        &'a self,
        id: &'a CompositeId,
        request: &'a UpdateNicRequest,
    ) -> KindFuture<'a, PrivateNic> {
        Box::pin(async move {
            let envelope: NicEnvelope = self.client.patch(&item(id)?, request).await?;
            Ok(envelope.private_nic)
        })
    }

    fn delete<'a>(&'a self, id: &'a CompositeId) -> KindFuture<'a, ()> {
        Box::pin(async move { self.client.delete(&item(id)?).await })
    }

    /// NICs are listed per server, so every server of the zone is walked.
    fn list<'a>(
        &'a self,
        locality: &'a Locality,
        name: Option<&'a str>,
    ) -> KindFuture<'a, Vec<PrivateNic>> {
        Box::pin(async move {
            let project = [("project", self.client.project_id())];
            let servers: Vec<Server> = self
                .client
                .list_all(&instance_server::collection(locality), "servers", &project)
                .await?;
            let mut nics = Vec::new();
            for server in servers {
                let found: Vec<PrivateNic> = self
                    .client
                    .list_all(&collection(locality, server.id), "private_nics", &[])
                    .await?;
                nics.extend(
                    found
                        .into_iter()
                        .filter(|nic| name.is_none_or(|wanted| nic.mac_address == wanted)),
                );
            }
            Ok(nics)
        })
    }
}

fn flatten_nic(resource: &PrivateNic, id: &CompositeId) -> Attributes {
    let locality = id.locality();
    let mut attributes = Attributes::new();
    flatten_id(&mut attributes, "server_id", locality, Some(resource.server_id));
    let network_locality = reference_locality(locality, LocalityKind::Region);
    if let Some(network) = &network_locality {
        flatten_id(
            &mut attributes,
            "private_network_id",
            network,
            Some(resource.private_network_id),
        );
    }
    attributes.set("tags", resource.tags.clone());
    attributes.set("mac_address", resource.mac_address.as_str());
    attributes.set("zone", locality.as_str());
    attributes
}
