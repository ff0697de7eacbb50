//! Unit tests for configuration layering.

use rstest::{fixture, rstest};

use super::*;
use crate::test_support::EnvGuard;

const PROFILE_YAML: &str = "\
access_key: SCWTOPLEVEL
secret_key: top-secret
default_project_id: top-project
default_region: fr-par
active_profile: ams
profiles:
  ams:
    default_region: nl-ams
    default_zone: nl-ams-2
  waw:
    default_project_id: waw-project
    default_zone: pl-waw-3
";

fn empty_environment() -> ProviderConfig {
    ProviderConfig {
        access_key: None,
        secret_key: None,
        default_organization_id: None,
        default_project_id: None,
        default_region: None,
        default_zone: None,
        api_url: None,
    }
}

#[fixture]
fn credentials() -> ProfileValues {
    ProfileValues {
        secret_key: Some(String::from("profile-secret")),
        default_project_id: Some(String::from("profile-project")),
        ..ProfileValues::default()
    }
}

fn path() -> Utf8PathBuf {
    Utf8PathBuf::from("/home/user/.config/scw/config.yaml")
}

#[rstest]
fn defaults_apply_when_no_layer_names_a_locality(credentials: ProfileValues) {
    let resolved = ResolvedConfig::resolve(
        &ProviderSettings::default(),
        &empty_environment(),
        &credentials,
    )
    .expect("resolve");
    assert_eq!(resolved.region.as_str(), DEFAULT_REGION);
    assert_eq!(resolved.zone.as_str(), DEFAULT_ZONE);
    assert_eq!(resolved.api_url, DEFAULT_API_URL);
    assert_eq!(resolved.secret_key, "profile-secret");
}

#[rstest]
fn explicit_beats_environment_beats_profile(credentials: ProfileValues) {
    let explicit = ProviderSettings {
        project_id: Some(String::from("explicit-project")),
        ..ProviderSettings::default()
    };
    let environment = ProviderConfig {
        secret_key: Some(String::from("env-secret")),
        default_project_id: Some(String::from("env-project")),
        ..empty_environment()
    };
    let resolved =
        ResolvedConfig::resolve(&explicit, &environment, &credentials).expect("resolve");
    assert_eq!(resolved.project_id, "explicit-project");
    assert_eq!(resolved.secret_key, "env-secret");
}

#[rstest]
fn blank_values_fall_through_to_the_next_layer(credentials: ProfileValues) {
    let explicit = ProviderSettings {
        secret_key: Some(String::from("   ")),
        ..ProviderSettings::default()
    };
    let resolved = ResolvedConfig::resolve(&explicit, &empty_environment(), &credentials)
        .expect("resolve");
    assert_eq!(resolved.secret_key, "profile-secret");
}

#[rstest]
#[case(Some("nl-ams"), None, "nl-ams", "nl-ams-1")]
#[case(None, Some("pl-waw-2"), "pl-waw", "pl-waw-2")]
#[case(Some("fr-par"), Some("fr-par-3"), "fr-par", "fr-par-3")]
fn localities_default_from_each_other(
    credentials: ProfileValues,
    #[case] region: Option<&str>,
    #[case] zone: Option<&str>,
    #[case] expected_region: &str,
    #[case] expected_zone: &str,
) {
    let explicit = ProviderSettings {
        region: region.map(str::to_owned),
        zone: zone.map(str::to_owned),
        ..ProviderSettings::default()
    };
    let resolved = ResolvedConfig::resolve(&explicit, &empty_environment(), &credentials)
        .expect("resolve");
    assert_eq!(resolved.region.as_str(), expected_region);
    assert_eq!(resolved.zone.as_str(), expected_zone);
    let defaults = resolved.defaults();
    assert_eq!(defaults.zone, Some(resolved.zone.clone()));
}

#[rstest]
fn zone_outside_region_is_rejected(credentials: ProfileValues) {
    let environment = ProviderConfig {
        default_region: Some(String::from("fr-par")),
        default_zone: Some(String::from("nl-ams-1")),
        ..empty_environment()
    };
    let err = ResolvedConfig::resolve(&ProviderSettings::default(), &environment, &credentials)
        .expect_err("mismatch");
    assert_eq!(
        err,
        ConfigError::ZoneOutsideRegion {
            zone: String::from("nl-ams-1"),
            region: String::from("fr-par"),
        }
    );
}

#[rstest]
fn malformed_zones_are_rejected(credentials: ProfileValues) {
    let explicit = ProviderSettings {
        zone: Some(String::from("paris")),
        ..ProviderSettings::default()
    };
    let err = ResolvedConfig::resolve(&explicit, &empty_environment(), &credentials)
        .expect_err("invalid");
    assert!(matches!(err, ConfigError::InvalidLocality { field: "zone", .. }));
}

#[rstest]
fn missing_secret_key_names_its_sources() {
    let err = ResolvedConfig::resolve(
        &ProviderSettings::default(),
        &empty_environment(),
        &ProfileValues::default(),
    )
    .expect_err("missing");
    assert_eq!(
        err.to_string(),
        "missing Scaleway API secret key: set SCW_SECRET_KEY or add secret_key to the Scaleway profile file"
    );
}

#[rstest]
fn missing_project_names_its_sources() {
    let profile = ProfileValues {
        secret_key: Some(String::from("secret")),
        ..ProfileValues::default()
    };
    let err =
        ResolvedConfig::resolve(&ProviderSettings::default(), &empty_environment(), &profile)
            .expect_err("missing");
    assert!(err.to_string().contains("SCW_DEFAULT_PROJECT_ID"));
}

#[rstest]
fn debug_output_redacts_the_secret(credentials: ProfileValues) {
    let resolved = ResolvedConfig::resolve(
        &ProviderSettings::default(),
        &empty_environment(),
        &credentials,
    )
    .expect("resolve");
    let rendered = format!("{resolved:?}");
    assert!(!rendered.contains("profile-secret"));
    assert!(rendered.contains("<redacted>"));
}

#[rstest]
fn active_profile_overrides_top_level_values() {
    let values = parse_profile(&path(), PROFILE_YAML, None).expect("parse");
    assert_eq!(values.default_region.as_deref(), Some("nl-ams"));
    assert_eq!(values.default_zone.as_deref(), Some("nl-ams-2"));
    assert_eq!(values.secret_key.as_deref(), Some("top-secret"));
}

#[rstest]
fn requested_profile_beats_the_active_one() {
    let values = parse_profile(&path(), PROFILE_YAML, Some("waw")).expect("parse");
    assert_eq!(values.default_project_id.as_deref(), Some("waw-project"));
    assert_eq!(values.default_region.as_deref(), Some("fr-par"));
}

#[rstest]
fn files_without_profiles_use_top_level_values() {
    let values = parse_profile(&path(), "secret_key: only\n", None).expect("parse");
    assert_eq!(values.secret_key.as_deref(), Some("only"));
}

#[rstest]
fn unknown_profiles_are_rejected() {
    let err = parse_profile(&path(), PROFILE_YAML, Some("nope")).expect_err("unknown");
    assert_eq!(
        err,
        ConfigError::UnknownProfile {
            name: String::from("nope"),
            path: path(),
        }
    );
}

#[rstest]
fn invalid_yaml_is_a_parse_error() {
    let err = parse_profile(&path(), "profiles: [unclosed", None).expect_err("invalid");
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[tokio::test]
async fn profile_file_is_read_from_the_configured_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    let file = dir.path().join("config.yaml");
    std::fs::write(&file, PROFILE_YAML).expect("write profile");
    let file_path = file.to_str().expect("utf-8 path");
    let _guard =
        EnvGuard::set_vars(&[(CONFIG_PATH_ENV, Some(file_path)), (PROFILE_ENV, Some("waw"))])
            .await;

    let values = load_profile().expect("load");
    assert_eq!(values.default_zone.as_deref(), Some("pl-waw-3"));
}

#[tokio::test]
async fn missing_profile_file_is_empty() {
    let dir = tempfile::tempdir().expect("temp dir");
    let file = dir.path().join("absent.yaml");
    let file_path = file.to_str().expect("utf-8 path");
    let _guard =
        EnvGuard::set_vars(&[(CONFIG_PATH_ENV, Some(file_path)), (PROFILE_ENV, None)]).await;

    assert_eq!(load_profile(), Ok(ProfileValues::default()));
}

#[tokio::test]
async fn environment_layer_reads_scw_variables() {
    let _guard = EnvGuard::set_vars(&[
        ("SCW_SECRET_KEY", Some("env-secret")),
        ("SCW_DEFAULT_PROJECT_ID", Some("env-project")),
        ("SCW_DEFAULT_ZONE", Some("nl-ams-3")),
    ])
    .await;

    let environment = ProviderConfig::load_without_cli_args().expect("load");
    assert_eq!(environment.secret_key.as_deref(), Some("env-secret"));
    assert_eq!(environment.default_project_id.as_deref(), Some("env-project"));
    assert_eq!(environment.default_zone.as_deref(), Some("nl-ams-3"));
}

#[tokio::test]
async fn unreadable_config_file_is_a_load_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let file = dir.path().join("scw-provider.toml");
    std::fs::write(&file, "secret_key = [unterminated").expect("write config");
    let file_path = file.to_str().expect("utf-8 path");
    let _guard = EnvGuard::set_vars(&[("SCW_PROVIDER_CONFIG_PATH", Some(file_path))]).await;

    let result = ProviderConfig::load_without_cli_args();
    assert!(
        matches!(result, Err(ConfigError::Load(_))),
        "unexpected result: {result:?}"
    );
}
