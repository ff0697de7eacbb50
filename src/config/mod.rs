//! Provider configuration.
//!
//! Values come from three layers merged field by field: settings given
//! explicitly to the provider, the `SCW_*` environment loaded through
//! `ortho-config`, and the Scaleway CLI profile file. Earlier layers win.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::locality::{LocalityDefaults, LocalityError, Region, Zone};
use crate::vendor::DEFAULT_API_URL;

/// Region used when no layer names one.
pub const DEFAULT_REGION: &str = "fr-par";

/// Zone used when no layer names one and no region is configured.
pub const DEFAULT_ZONE: &str = "fr-par-1";

/// Environment variable overriding the profile file location.
pub const CONFIG_PATH_ENV: &str = "SCW_CONFIG_PATH";

/// Environment variable selecting a named profile.
pub const PROFILE_ENV: &str = "SCW_PROFILE";

const PROFILE_FILE: &str = ".config/scw/config.yaml";

/// Errors raised while loading or resolving configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Raised when a required value is absent from every layer.
    #[error("missing {description}: set {env_var} or add {profile_key} to the Scaleway profile file")]
    Missing {
        /// What is missing.
        description: &'static str,
        /// Environment variable providing it.
        env_var: &'static str,
        /// Profile file key providing it.
        profile_key: &'static str,
    },
    /// Raised when a region or zone does not parse.
    #[error("invalid {field}: {source}")]
    InvalidLocality {
        /// Offending setting.
        field: &'static str,
        /// Parse failure.
        source: LocalityError,
    },
    /// Raised when the zone is not a member of the region.
    #[error("zone {zone} is not in region {region}")]
    ZoneOutsideRegion {
        /// Configured zone.
        zone: String,
        /// Configured region.
        region: String,
    },
    /// Raised when the selected profile is not in the profile file.
    #[error("profile {name} not found in {path}")]
    UnknownProfile {
        /// Requested profile.
        name: String,
        /// Profile file searched.
        path: Utf8PathBuf,
    },
    /// Raised when the profile file cannot be read.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the profile file is not valid YAML.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration loading failed: {0}")]
    Load(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Load(value.to_string())
    }
}

/// Settings given explicitly to the provider; they override every other
/// layer.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProviderSettings {
    /// Access key.
    pub access_key: Option<String>,
    /// Secret key.
    pub secret_key: Option<String>,
    /// Organization identifier.
    pub organization_id: Option<String>,
    /// Project identifier.
    pub project_id: Option<String>,
    /// Default region.
    pub region: Option<String>,
    /// Default zone.
    pub zone: Option<String>,
    /// API base URL.
    pub api_url: Option<String>,
}

/// The `SCW_*` environment layer.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SCW",
    discovery(
        app_name = "scw-provider",
        env_var = "SCW_PROVIDER_CONFIG_PATH",
        config_file_name = "scw-provider.toml",
        dotfile_name = ".scw-provider.toml",
        project_file_name = "scw-provider.toml"
    )
)]
pub struct ProviderConfig {
    /// `SCW_ACCESS_KEY`.
    pub access_key: Option<String>,
    /// `SCW_SECRET_KEY`.
    pub secret_key: Option<String>,
    /// `SCW_DEFAULT_ORGANIZATION_ID`.
    pub default_organization_id: Option<String>,
    /// `SCW_DEFAULT_PROJECT_ID`.
    pub default_project_id: Option<String>,
    /// `SCW_DEFAULT_REGION`.
    pub default_region: Option<String>,
    /// `SCW_DEFAULT_ZONE`.
    pub default_zone: Option<String>,
    /// `SCW_API_URL`.
    pub api_url: Option<String>,
}

impl ProviderConfig {
    /// Loads the environment layer without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("scw-provider")])
            .map_err(|err| ConfigError::Load(err.to_string()))
    }
}

/// Values of one profile in the Scaleway CLI file.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct ProfileValues {
    /// Access key.
    #[serde(default)]
    pub access_key: Option<String>,
    /// Secret key.
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Organization identifier.
    #[serde(default)]
    pub default_organization_id: Option<String>,
    /// Project identifier.
    #[serde(default)]
    pub default_project_id: Option<String>,
    /// Default region.
    #[serde(default)]
    pub default_region: Option<String>,
    /// Default zone.
    #[serde(default)]
    pub default_zone: Option<String>,
    /// API base URL.
    #[serde(default)]
    pub api_url: Option<String>,
}

impl ProfileValues {
    fn overlay(self, over: Self) -> Self {
        Self {
            access_key: over.access_key.or(self.access_key),
            secret_key: over.secret_key.or(self.secret_key),
            default_organization_id: over
                .default_organization_id
                .or(self.default_organization_id),
            default_project_id: over.default_project_id.or(self.default_project_id),
            default_region: over.default_region.or(self.default_region),
            default_zone: over.default_zone.or(self.default_zone),
            api_url: over.api_url.or(self.api_url),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProfileFile {
    #[serde(flatten)]
    top_level: ProfileValues,
    #[serde(default)]
    active_profile: Option<String>,
    #[serde(default)]
    profiles: BTreeMap<String, ProfileValues>,
}

/// Parses a Scaleway CLI profile file and selects a profile: `requested`,
/// else the file's `active_profile`, else the top-level values alone. A
/// named profile overrides the top-level values.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for invalid YAML and
/// [`ConfigError::UnknownProfile`] when the named profile is absent.
pub fn parse_profile(
    path: &Utf8Path,
    contents: &str,
    requested: Option<&str>,
) -> Result<ProfileValues, ConfigError> {
    if contents.trim().is_empty() {
        return Ok(ProfileValues::default());
    }
    let mut file: ProfileFile =
        serde_yaml::from_str(contents).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    let Some(name) = requested.map(str::to_owned).or(file.active_profile) else {
        return Ok(file.top_level);
    };
    let profile = file
        .profiles
        .remove(&name)
        .ok_or_else(|| ConfigError::UnknownProfile {
            name,
            path: path.to_path_buf(),
        })?;
    Ok(file.top_level.overlay(profile))
}

/// Location of the profile file: `$SCW_CONFIG_PATH`, else
/// `$HOME/.config/scw/config.yaml`.
#[must_use]
pub fn profile_path() -> Option<Utf8PathBuf> {
    if let Some(explicit) = non_blank(env::var(CONFIG_PATH_ENV).ok()) {
        return Some(Utf8PathBuf::from(explicit));
    }
    non_blank(env::var("HOME").ok()).map(|home| Utf8PathBuf::from(home).join(PROFILE_FILE))
}

/// Loads the profile layer. A missing file yields empty values.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read or parsed, or the
/// selected profile does not exist.
pub fn load_profile() -> Result<ProfileValues, ConfigError> {
    let Some(path) = profile_path() else {
        return Ok(ProfileValues::default());
    };
    let requested = non_blank(env::var(PROFILE_ENV).ok());
    match read_file(&path)? {
        Some(contents) => parse_profile(&path, &contents, requested.as_deref()),
        None => Ok(ProfileValues::default()),
    }
}

fn read_file(path: &Utf8Path) -> Result<Option<String>, ConfigError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let Some(file_name) = path.file_name() else {
        return Ok(None);
    };
    let io_error = |at: &Utf8Path, err: io::Error| ConfigError::Io {
        path: at.to_path_buf(),
        message: err.to_string(),
    };
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_error(parent, err)),
    };
    match dir.read_to_string(file_name) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(path, err)),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_owned())
        .filter(|trimmed| !trimmed.is_empty())
}

fn pick(layers: [Option<&String>; 3]) -> Option<String> {
    layers
        .into_iter()
        .find_map(|layer| non_blank(layer.cloned()))
}

/// Fully resolved provider configuration.
#[derive(Clone, Eq, PartialEq)]
pub struct ResolvedConfig {
    /// Access key, when configured.
    pub access_key: Option<String>,
    /// Secret key sent with every request.
    pub secret_key: String,
    /// Project new resources are created in.
    pub project_id: String,
    /// Organization of the credentials.
    pub organization_id: Option<String>,
    /// Default region.
    pub region: Region,
    /// Default zone; always inside `region`.
    pub zone: Zone,
    /// API base URL.
    pub api_url: String,
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("organization_id", &self.organization_id)
            .field("region", &self.region)
            .field("zone", &self.zone)
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl ResolvedConfig {
    /// Merges the layers: explicit settings, then environment, then profile.
    ///
    /// Region defaults to the zone's region, else `fr-par`; zone defaults to
    /// the first zone of the region.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] naming the environment variable and
    /// profile key for an absent secret key or project, and locality errors
    /// for invalid or mismatched region and zone.
    pub fn resolve(
        explicit: &ProviderSettings,
        environment: &ProviderConfig,
        profile: &ProfileValues,
    ) -> Result<Self, ConfigError> {
        let secret_key = pick([
            explicit.secret_key.as_ref(),
            environment.secret_key.as_ref(),
            profile.secret_key.as_ref(),
        ])
        .ok_or(ConfigError::Missing {
            description: "Scaleway API secret key",
            env_var: "SCW_SECRET_KEY",
            profile_key: "secret_key",
        })?;
        let project_id = pick([
            explicit.project_id.as_ref(),
            environment.default_project_id.as_ref(),
            profile.default_project_id.as_ref(),
        ])
        .ok_or(ConfigError::Missing {
            description: "Scaleway project ID",
            env_var: "SCW_DEFAULT_PROJECT_ID",
            profile_key: "default_project_id",
        })?;
        let zone_setting = pick([
            explicit.zone.as_ref(),
            environment.default_zone.as_ref(),
            profile.default_zone.as_ref(),
        ])
        .map(|raw| {
            Zone::parse(&raw).map_err(|source| ConfigError::InvalidLocality {
                field: "zone",
                source,
            })
        })
        .transpose()?;
        let region_setting = pick([
            explicit.region.as_ref(),
            environment.default_region.as_ref(),
            profile.default_region.as_ref(),
        ])
        .map(|raw| {
            Region::parse(&raw).map_err(|source| ConfigError::InvalidLocality {
                field: "region",
                source,
            })
        })
        .transpose()?;
        let (region, zone) = default_locality(region_setting, zone_setting)?;

        Ok(Self {
            access_key: pick([
                explicit.access_key.as_ref(),
                environment.access_key.as_ref(),
                profile.access_key.as_ref(),
            ]),
            secret_key,
            project_id,
            organization_id: pick([
                explicit.organization_id.as_ref(),
                environment.default_organization_id.as_ref(),
                profile.default_organization_id.as_ref(),
            ]),
            region,
            zone,
            api_url: pick([
                explicit.api_url.as_ref(),
                environment.api_url.as_ref(),
                profile.api_url.as_ref(),
            ])
            .unwrap_or_else(|| DEFAULT_API_URL.to_owned()),
        })
    }

    /// Loads the environment and profile layers and resolves them under
    /// `explicit`.
    ///
    /// # Errors
    ///
    /// See [`ResolvedConfig::resolve`], [`ProviderConfig::load_without_cli_args`]
    /// and [`load_profile`].
    pub fn load(explicit: &ProviderSettings) -> Result<Self, ConfigError> {
        let environment = ProviderConfig::load_without_cli_args()?;
        let profile = load_profile()?;
        Self::resolve(explicit, &environment, &profile)
    }

    /// Provider-level default localities.
    #[must_use]
    pub fn defaults(&self) -> LocalityDefaults {
        LocalityDefaults::new(self.region.clone(), self.zone.clone())
    }
}

fn default_locality(
    configured_region: Option<Region>,
    configured_zone: Option<Zone>,
) -> Result<(Region, Zone), ConfigError> {
    let fallback_region = || {
        Region::parse(DEFAULT_REGION).map_err(|source| ConfigError::InvalidLocality {
            field: "region",
            source,
        })
    };
    let fallback_zone = || {
        Zone::parse(DEFAULT_ZONE).map_err(|source| ConfigError::InvalidLocality {
            field: "zone",
            source,
        })
    };
    match (configured_region, configured_zone) {
        (Some(region), Some(zone)) if !region.contains(&zone) => {
            Err(ConfigError::ZoneOutsideRegion {
                zone: zone.to_string(),
                region: region.to_string(),
            })
        }
        (Some(region), Some(zone)) => Ok((region, zone)),
        (None, Some(zone)) => Ok((zone.region(), zone)),
        (Some(region), None) => {
            let first = region.zones().into_iter().next();
            match first {
                Some(zone) => Ok((region, zone)),
                None => Err(ConfigError::ZoneOutsideRegion {
                    zone: DEFAULT_ZONE.to_owned(),
                    region: region.to_string(),
                }),
            }
        }
        (None, None) => Ok((fallback_region()?, fallback_zone()?)),
    }
}

#[cfg(test)]
mod tests;
