//! Concrete resource kinds on the Scaleway API.
//!
//! [`Provider`] holds the process-wide client, lock registry and default
//! localities, and hands out one [`Reconciler`] per kind.

mod types;

pub mod container;
pub mod container_namespace;
pub mod instance_private_nic;
pub mod instance_server;

pub use types::{ContainerStatus, NicState, ServerAction, ServerState};

use crate::config::ResolvedConfig;
use crate::driver::{Reconciler, ResourceKind};
use crate::locality::{Locality, LocalityDefaults, Zone};
use crate::lock::LockRegistry;
use crate::sweep::{ReconcilerSweeper, SweepError, SweepRegistry, Sweeper};
use crate::value::{Attributes, Value};
use crate::vendor::{ScalewayClient, VendorError};

use container::ContainerKind;
use container_namespace::ContainerNamespaceKind;
use instance_private_nic::PrivateNicKind;
use instance_server::InstanceServerKind;

const NAME_MAX_LEN: usize = 63;

/// Treats an empty vendor string as unset.
pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.is_empty())
}

/// Names must be DNS labels: lowercase letters, digits and inner dashes.
pub(crate) fn validate_resource_name(value: &Value) -> Result<(), String> {
    let Value::String(name) = value else {
        return Err(format!("expected a string, got {}", value.type_name()));
    };
    if name.is_empty() || name.len() > NAME_MAX_LEN {
        return Err(format!("must be 1 to {NAME_MAX_LEN} characters long"));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(String::from("must not start or end with a dash"));
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
    {
        return Err(String::from(
            "may only contain lowercase letters, digits and dashes",
        ));
    }
    Ok(())
}

/// Zone of a zonal identifier.
pub(crate) fn zone_of(locality: &Locality) -> Result<Zone, VendorError> {
    match locality {
        Locality::Zone(zone) => Ok(zone.clone()),
        Locality::Region(region) => Err(VendorError::new(
            400,
            "invalid_arguments",
            format!("{region} is a region; a zone is required"),
        )),
    }
}

/// Entry point wiring every kind to shared state.
#[derive(Clone, Debug)]
pub struct Provider {
    client: ScalewayClient,
    locks: LockRegistry,
    defaults: LocalityDefaults,
}

impl Provider {
    /// Builds the provider from resolved configuration.
    #[must_use]
    pub fn new(config: &ResolvedConfig) -> Self {
        Self {
            client: ScalewayClient::new(config),
            locks: LockRegistry::new(),
            defaults: config.defaults(),
        }
    }

    fn reconciler<K: ResourceKind>(&self, kind: K) -> Reconciler<K> {
        Reconciler::new(kind, self.locks.clone(), self.defaults.clone())
    }

    /// Serverless container namespaces.
    #[must_use]
    pub fn container_namespaces(&self) -> Reconciler<ContainerNamespaceKind> {
        self.reconciler(ContainerNamespaceKind::new(self.client.clone()))
    }

    /// Serverless containers.
    #[must_use]
    pub fn containers(&self) -> Reconciler<ContainerKind> {
        self.reconciler(ContainerKind::new(self.client.clone()))
    }

    /// Instance servers.
    #[must_use]
    pub fn instance_servers(&self) -> Reconciler<InstanceServerKind> {
        self.reconciler(InstanceServerKind::new(self.client.clone()))
    }

    /// Private NICs of instance servers.
    #[must_use]
    pub fn private_nics(&self) -> Reconciler<PrivateNicKind> {
        self.reconciler(PrivateNicKind::new(self.client.clone()))
    }

    /// Sweepers for every kind. Containers go before their namespace, and
    /// servers take their additional volumes with them. Private NICs are
    /// removed with their server.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError`] if two sweepers claim the same kind.
    pub fn sweepers(&self) -> Result<SweepRegistry, SweepError> {
        let mut registry = SweepRegistry::new();
        registry.register(Sweeper::new(ReconcilerSweeper::new(self.containers())))?;
        registry.register(
            Sweeper::new(ReconcilerSweeper::new(self.container_namespaces()))
                .after(&[container::KIND]),
        )?;
        let cascade: Attributes = [("delete_additional_volumes", true)].into_iter().collect();
        registry.register(Sweeper::new(
            ReconcilerSweeper::new(self.instance_servers()).with_prior(cascade),
        ))?;
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::test_support::resolved_config;

    #[rstest]
    #[case("web-01", true)]
    #[case("a", true)]
    #[case("web-", false)]
    #[case("web_01", false)]
    #[case("Web", false)]
    fn resource_names(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(validate_resource_name(&Value::from(name)).is_ok(), valid);
    }

    #[rstest]
    fn long_names_are_rejected() {
        let name = "a".repeat(NAME_MAX_LEN + 1);
        assert!(validate_resource_name(&Value::from(name)).is_err());
    }

    #[rstest]
    fn names_must_be_strings() {
        assert!(validate_resource_name(&Value::Bool(true)).is_err());
    }

    #[rstest]
    fn regions_have_no_zone() {
        let region = Locality::parse("fr-par").expect("region");
        assert_eq!(zone_of(&region).expect_err("region").code, "invalid_arguments");
        let zone = Locality::parse("fr-par-2").expect("zone");
        assert_eq!(zone_of(&zone).map(|found| found.to_string()), Ok(String::from("fr-par-2")));
    }

    #[rstest]
    fn sweepers_cover_every_top_level_kind() {
        let registry = Provider::new(&resolved_config()).sweepers().expect("sweepers");
        assert_eq!(
            registry.order(&[]).expect("order"),
            [container::KIND, container_namespace::KIND, instance_server::KIND]
        );
    }

    #[rstest]
    fn reconcilers_use_the_configured_defaults() {
        let provider = Provider::new(&resolved_config());
        assert_eq!(provider.defaults, resolved_config().defaults());
        assert_eq!(provider.private_nics().kind().name(), instance_private_nic::KIND);
    }
}
