//! Locality codec: zones, regions, and the composite identifiers stored in
//! engine state.
//!
//! A resource identity is a flat string pairing a locality with a UUID
//! (`fr-par-1/<uuid>`), optionally with a parent UUID for nested resources
//! (`fr-par-1/<server>/<nic>`). The separator is always `/` and is never
//! escaped. Bare UUIDs are accepted on input and re-emitted in canonical form
//! using the provider default locality.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

use crate::value::{Attributes, Value};

/// Regions known to the provider with their member zones, in order.
pub const REGION_CATALOGUE: &[(&str, &[&str])] = &[
    ("fr-par", &["fr-par-1", "fr-par-2", "fr-par-3"]),
    ("nl-ams", &["nl-ams-1", "nl-ams-2", "nl-ams-3"]),
    ("pl-waw", &["pl-waw-1", "pl-waw-2", "pl-waw-3"]),
];

const SEPARATOR: char = '/';
const UUID_TEXT_LEN: usize = 36;

/// Errors raised while parsing localities or composite identifiers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LocalityError {
    /// Raised when an identifier or locality string is empty.
    #[error("{what} must not be empty")]
    Empty {
        /// What was expected (for example `resource ID`).
        what: &'static str,
    },
    /// Raised when a locality does not follow the `cc-city[-n]` layout.
    #[error("'{value}' is not a valid locality")]
    InvalidLocality {
        /// Offending input.
        value: String,
    },
    /// Raised when a zone is supplied where a region is expected, or the
    /// reverse.
    #[error("'{value}' is not a {expected}")]
    WrongKind {
        /// Offending input.
        value: String,
        /// Locality kind the resource is addressed by.
        expected: LocalityKind,
    },
    /// Raised when a segment is not a canonical 8-4-4-4-12 UUID.
    #[error("'{value}' is not a canonical UUID")]
    InvalidUuid {
        /// Offending segment.
        value: String,
    },
    /// Raised when an identifier has the wrong number of segments.
    #[error("'{value}' is not a {expected} ID ({})", .expected.layout())]
    WrongForm {
        /// Offending input.
        value: String,
        /// Form the caller asked for.
        expected: IdForm,
    },
    /// Raised when neither the resource nor the provider names a locality.
    #[error("no {kind} configured: set it on the resource or as a provider default")]
    NoDefault {
        /// Locality kind that could not be resolved.
        kind: LocalityKind,
    },
    /// Raised when an attribute holding a locality is not a string.
    #[error("attribute '{attribute}' must be a string")]
    NotAString {
        /// Attribute name.
        attribute: String,
    },
}

/// Availability zone such as `fr-par-1`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Zone(String);

/// Region such as `fr-par`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Region(String);

impl Zone {
    /// Parses a zone, requiring the trailing numeric suffix.
    ///
    /// # Errors
    ///
    /// Returns [`LocalityError`] when the value is empty, malformed, or names
    /// a region.
    pub fn parse(value: &str) -> Result<Self, LocalityError> {
        match Locality::parse(value)? {
            Locality::Zone(zone) => Ok(zone),
            Locality::Region(_) => Err(LocalityError::WrongKind {
                value: value.to_owned(),
                expected: LocalityKind::Zone,
            }),
        }
    }

    /// Returns the zone as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the region this zone belongs to.
    #[must_use]
    pub fn region(&self) -> Region {
        let region = self
            .0
            .rsplit_once('-')
            .map_or(self.0.as_str(), |(head, _)| head);
        Region(region.to_owned())
    }
}

impl Region {
    /// Parses a region, rejecting zone-shaped values.
    ///
    /// # Errors
    ///
    /// Returns [`LocalityError`] when the value is empty, malformed, or names
    /// a zone.
    pub fn parse(value: &str) -> Result<Self, LocalityError> {
        match Locality::parse(value)? {
            Locality::Region(region) => Ok(region),
            Locality::Zone(_) => Err(LocalityError::WrongKind {
                value: value.to_owned(),
                expected: LocalityKind::Region,
            }),
        }
    }

    /// Returns the region as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the member zones of the region in catalogue order. Regions
    /// missing from [`REGION_CATALOGUE`] have no known zones.
    #[must_use]
    pub fn zones(&self) -> Vec<Zone> {
        REGION_CATALOGUE
            .iter()
            .find(|(region, _)| *region == self.0)
            .map(|(_, zones)| zones.iter().map(|zone| Zone((*zone).to_owned())).collect())
            .unwrap_or_default()
    }

    /// Returns every region of the catalogue.
    #[must_use]
    pub fn all() -> Vec<Self> {
        REGION_CATALOGUE
            .iter()
            .map(|(region, _)| Self((*region).to_owned()))
            .collect()
    }

    /// Returns `true` when `zone` is a member of this region.
    #[must_use]
    pub fn contains(&self, zone: &Zone) -> bool {
        zone.region() == *self
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a resource kind is addressed by zone or by region.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LocalityKind {
    /// Addressed by availability zone.
    Zone,
    /// Addressed by region.
    Region,
}

impl LocalityKind {
    /// Name of the attribute carrying the locality on a resource.
    #[must_use]
    pub const fn attribute(self) -> &'static str {
        match self {
            Self::Zone => "zone",
            Self::Region => "region",
        }
    }
}

impl fmt::Display for LocalityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.attribute())
    }
}

/// Deployment scope of a resource.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Locality {
    /// Zonal resource.
    Zone(Zone),
    /// Regional resource.
    Region(Region),
}

impl Locality {
    /// Parses either a zone or a region, normalising case.
    ///
    /// # Errors
    ///
    /// Returns [`LocalityError::Empty`] or [`LocalityError::InvalidLocality`].
    pub fn parse(value: &str) -> Result<Self, LocalityError> {
        if value.is_empty() {
            return Err(LocalityError::Empty { what: "locality" });
        }
        let lowered = value.to_ascii_lowercase();
        let parts: Vec<&str> = lowered.split('-').collect();
        let invalid = || LocalityError::InvalidLocality {
            value: value.to_owned(),
        };
        match parts.as_slice() {
            [country, city] if is_country(country) && is_city(city) => {
                Ok(Self::Region(Region(lowered.clone())))
            }
            [country, city, number]
                if is_country(country) && is_city(city) && is_number(number) =>
            {
                Ok(Self::Zone(Zone(lowered.clone())))
            }
            _ => Err(invalid()),
        }
    }

    /// Parses a locality of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`LocalityError::WrongKind`] when the value parses as the other
    /// kind.
    pub fn parse_as(value: &str, kind: LocalityKind) -> Result<Self, LocalityError> {
        let locality = Self::parse(value)?;
        if locality.kind() == kind {
            Ok(locality)
        } else {
            Err(LocalityError::WrongKind {
                value: value.to_owned(),
                expected: kind,
            })
        }
    }

    /// Returns whether this is a zone or a region.
    #[must_use]
    pub const fn kind(&self) -> LocalityKind {
        match self {
            Self::Zone(_) => LocalityKind::Zone,
            Self::Region(_) => LocalityKind::Region,
        }
    }

    /// Returns the locality as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Zone(zone) => zone.as_str(),
            Self::Region(region) => region.as_str(),
        }
    }

    /// Returns the region of the locality (itself for regional resources).
    #[must_use]
    pub fn region(&self) -> Region {
        match self {
            Self::Zone(zone) => zone.region(),
            Self::Region(region) => region.clone(),
        }
    }

    /// Enumerates every catalogue locality of the given kind, region by
    /// region.
    #[must_use]
    pub fn enumerate(kind: LocalityKind) -> Vec<Self> {
        let regions = Region::all();
        match kind {
            LocalityKind::Region => regions.into_iter().map(Self::Region).collect(),
            LocalityKind::Zone => regions
                .iter()
                .flat_map(Region::zones)
                .map(Self::Zone)
                .collect(),
        }
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Zone> for Locality {
    fn from(value: Zone) -> Self {
        Self::Zone(value)
    }
}

impl From<Region> for Locality {
    fn from(value: Region) -> Self {
        Self::Region(value)
    }
}

fn is_country(part: &str) -> bool {
    (2..=3).contains(&part.len()) && part.bytes().all(|byte| byte.is_ascii_lowercase())
}

fn is_city(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|byte| byte.is_ascii_lowercase())
}

fn is_number(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|byte| byte.is_ascii_digit())
}

/// Provider-level default localities used when a resource names none.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LocalityDefaults {
    /// Default region, if configured.
    pub region: Option<Region>,
    /// Default zone, if configured.
    pub zone: Option<Zone>,
}

impl LocalityDefaults {
    /// Builds defaults from a region and a zone.
    #[must_use]
    pub const fn new(region: Region, zone: Zone) -> Self {
        Self {
            region: Some(region),
            zone: Some(zone),
        }
    }

    /// Returns the default locality of the requested kind.
    ///
    /// # Errors
    ///
    /// Returns [`LocalityError::NoDefault`] when that default is not set.
    pub fn for_kind(&self, kind: LocalityKind) -> Result<Locality, LocalityError> {
        let locality = match kind {
            LocalityKind::Zone => self.zone.clone().map(Locality::Zone),
            LocalityKind::Region => self.region.clone().map(Locality::Region),
        };
        locality.ok_or(LocalityError::NoDefault { kind })
    }
}

/// Layout of a composite identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IdForm {
    /// `<locality>/<uuid>`.
    Simple,
    /// `<locality>/<parent-uuid>/<child-uuid>`.
    Nested,
}

impl IdForm {
    const fn layout(self) -> &'static str {
        match self {
            Self::Simple => "<locality>/<uuid>",
            Self::Nested => "<locality>/<parent-uuid>/<child-uuid>",
        }
    }
}

impl fmt::Display for IdForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Simple => "simple",
            Self::Nested => "nested",
        })
    }
}

/// Parses a canonical 8-4-4-4-12 UUID, case-insensitively.
///
/// # Errors
///
/// Returns [`LocalityError::InvalidUuid`] for any other layout, including the
/// braced, URN, and hyphen-less forms the `uuid` crate would otherwise accept.
pub fn parse_uuid(value: &str) -> Result<Uuid, LocalityError> {
    let invalid = || LocalityError::InvalidUuid {
        value: value.to_owned(),
    };
    let hyphens_ok = value
        .char_indices()
        .all(|(index, ch)| matches!(index, 8 | 13 | 18 | 23) == (ch == '-'));
    if value.len() != UUID_TEXT_LEN || !hyphens_ok {
        return Err(invalid());
    }
    Uuid::from_str(value).map_err(|_| invalid())
}

/// Identity of a resource as persisted by the declarative engine.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CompositeId {
    locality: Locality,
    parent: Option<Uuid>,
    id: Uuid,
}

impl CompositeId {
    /// Builds a simple identifier.
    #[must_use]
    pub const fn new(locality: Locality, id: Uuid) -> Self {
        Self {
            locality,
            parent: None,
            id,
        }
    }

    /// Builds a nested identifier for a resource scoped under `parent`.
    #[must_use]
    pub const fn nested(locality: Locality, parent: Uuid, id: Uuid) -> Self {
        Self {
            locality,
            parent: Some(parent),
            id,
        }
    }

    /// Parses an identifier of the given form and locality kind. Inputs that
    /// omit the locality resolve against `defaults`.
    ///
    /// # Errors
    ///
    /// Returns [`LocalityError`] describing the first violated rule.
    pub fn parse(
        raw: &str,
        form: IdForm,
        kind: LocalityKind,
        defaults: &LocalityDefaults,
    ) -> Result<Self, LocalityError> {
        match form {
            IdForm::Simple => {
                decode(raw, kind, defaults).map(|(locality, id)| Self::new(locality, id))
            }
            IdForm::Nested => decode_nested(raw, kind, defaults)
                .map(|(locality, parent, id)| Self::nested(locality, parent, id)),
        }
    }

    /// Locality prefix of the identifier.
    #[must_use]
    pub const fn locality(&self) -> &Locality {
        &self.locality
    }

    /// Parent UUID for nested identifiers.
    #[must_use]
    pub const fn parent(&self) -> Option<Uuid> {
        self.parent
    }

    /// UUID of the resource itself.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Layout of this identifier.
    #[must_use]
    pub const fn form(&self) -> IdForm {
        if self.parent.is_some() {
            IdForm::Nested
        } else {
            IdForm::Simple
        }
    }
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parent {
            Some(parent) => f.write_str(&encode_nested(&self.locality, parent, self.id)),
            None => f.write_str(&encode(&self.locality, self.id)),
        }
    }
}

/// Encodes `<locality>/<uuid>`.
#[must_use]
pub fn encode(locality: &Locality, id: Uuid) -> String {
    format!("{locality}{SEPARATOR}{}", id.hyphenated())
}

/// Encodes `<locality>/<parent-uuid>/<child-uuid>`.
#[must_use]
pub fn encode_nested(locality: &Locality, parent: Uuid, child: Uuid) -> String {
    format!(
        "{locality}{SEPARATOR}{}{SEPARATOR}{}",
        parent.hyphenated(),
        child.hyphenated()
    )
}

/// Decodes a simple identifier. A bare UUID resolves to the default locality
/// of `kind`.
///
/// # Errors
///
/// Returns [`LocalityError`] when the input is empty, nested, crosses the
/// locality kind, or carries a malformed UUID.
pub fn decode(
    raw: &str,
    kind: LocalityKind,
    defaults: &LocalityDefaults,
) -> Result<(Locality, Uuid), LocalityError> {
    if raw.is_empty() {
        return Err(LocalityError::Empty { what: "resource ID" });
    }
    let segments: Vec<&str> = raw.split(SEPARATOR).collect();
    match segments.as_slice() {
        [id] => Ok((defaults.for_kind(kind)?, parse_uuid(id)?)),
        [locality, id] => Ok((Locality::parse_as(locality, kind)?, parse_uuid(id)?)),
        _ => Err(LocalityError::WrongForm {
            value: raw.to_owned(),
            expected: IdForm::Simple,
        }),
    }
}

/// Decodes a nested identifier. `<parent>/<child>` without a locality
/// resolves to the default locality of `kind`.
///
/// # Errors
///
/// Returns [`LocalityError`] when the input is empty, simple, crosses the
/// locality kind, or carries a malformed UUID.
pub fn decode_nested(
    raw: &str,
    kind: LocalityKind,
    defaults: &LocalityDefaults,
) -> Result<(Locality, Uuid, Uuid), LocalityError> {
    if raw.is_empty() {
        return Err(LocalityError::Empty { what: "resource ID" });
    }
    let segments: Vec<&str> = raw.split(SEPARATOR).collect();
    let wrong_form = || LocalityError::WrongForm {
        value: raw.to_owned(),
        expected: IdForm::Nested,
    };
    match segments.as_slice() {
        [first, child] => {
            // `<locality>/<uuid>` is a simple ID, not a locality-less nested one.
            let parent = parse_uuid(first).map_err(|_| wrong_form())?;
            Ok((defaults.for_kind(kind)?, parent, parse_uuid(child)?))
        }
        [locality, parent, child] => Ok((
            Locality::parse_as(locality, kind)?,
            parse_uuid(parent)?,
            parse_uuid(child)?,
        )),
        _ => Err(wrong_form()),
    }
}

/// Resolves the locality of a desired resource: the explicit attribute wins,
/// then the provider default.
///
/// # Errors
///
/// Returns [`LocalityError::NoDefault`] when neither is available, or a parse
/// error when the attribute is malformed or of the wrong kind.
pub fn extract_locality(
    desired: &Attributes,
    kind: LocalityKind,
    defaults: &LocalityDefaults,
) -> Result<Locality, LocalityError> {
    let attribute = kind.attribute();
    match desired.get(attribute) {
        Some(Value::String(raw)) if !raw.is_empty() => Locality::parse_as(raw, kind),
        Some(Value::String(_) | Value::Unknown) | None => defaults.for_kind(kind),
        Some(_) => Err(LocalityError::NotAString {
            attribute: attribute.to_owned(),
        }),
    }
}
