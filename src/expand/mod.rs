//! Conversions between declarative attributes and vendor request/response
//! structs.
//!
//! Expand helpers return `Option` for optional fields, `None` meaning "leave
//! the vendor value alone". Flatten helpers write `None` back as an unset
//! attribute, never as a zero value, so expand after flatten is stable.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::locality::{
    Locality, LocalityDefaults, LocalityError, LocalityKind, decode, parse_uuid,
};
use crate::value::{Attributes, FromValue, TypeMismatch, Value};

/// Failures converting declarative input into vendor requests.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExpandError {
    /// Raised when an attribute holds a value of the wrong type.
    #[error("attribute '{attribute}': {source}")]
    Type {
        /// Attribute name.
        attribute: String,
        /// Type mismatch details.
        source: TypeMismatch,
    },
    /// Raised when a required attribute is absent.
    #[error("attribute '{attribute}' is required")]
    Missing {
        /// Attribute name.
        attribute: String,
    },
    /// Raised when a duration is not a sequence of `<n>s`, `<n>m`, `<n>h`.
    #[error("'{value}' is not a valid duration (expected forms like 30s, 5m, 1h30m)")]
    InvalidDuration {
        /// Offending input.
        value: String,
    },
    /// Raised when a duration is negative.
    #[error("duration '{value}' must not be negative")]
    NegativeDuration {
        /// Offending input.
        value: String,
    },
    /// Raised when an ID-bearing attribute cannot be decoded.
    #[error("attribute '{attribute}': {source}")]
    InvalidId {
        /// Attribute name.
        attribute: String,
        /// Decoding failure.
        source: LocalityError,
    },
    /// Raised when a referenced ID lives in another locality.
    #[error("attribute '{attribute}' references {found}, which is outside {expected}")]
    CrossLocality {
        /// Attribute name.
        attribute: String,
        /// Locality of the resource being reconciled.
        expected: String,
        /// Locality carried by the reference.
        found: String,
    },
    /// Raised when an integer does not fit the vendor field.
    #[error("attribute '{attribute}': {value} is out of range")]
    OutOfRange {
        /// Attribute name.
        attribute: String,
        /// Offending value.
        value: i64,
    },
    /// Raised when a block list is longer than allowed.
    #[error("attribute '{attribute}' accepts at most {max} block(s), got {found}")]
    TooManyItems {
        /// Attribute name.
        attribute: String,
        /// Allowed maximum.
        max: usize,
        /// Supplied count.
        found: usize,
    },
}

fn typed<T: FromValue + Default>(
    attrs: &Attributes,
    name: &str,
) -> Result<Option<T>, ExpandError> {
    attrs
        .presence::<T>(name)
        .map(crate::value::Presence::into_option)
        .map_err(|source| ExpandError::Type {
            attribute: name.to_owned(),
            source,
        })
}

/// Expands an optional field of any scalar or collection type.
///
/// # Errors
///
/// Returns [`ExpandError::Type`] on a type mismatch.
pub fn expand_optional<T: FromValue + Default>(
    attrs: &Attributes,
    name: &str,
) -> Result<Option<T>, ExpandError> {
    typed(attrs, name)
}

/// Expands an optional string.
///
/// # Errors
///
/// Returns [`ExpandError::Type`] on a type mismatch.
pub fn expand_string(attrs: &Attributes, name: &str) -> Result<Option<String>, ExpandError> {
    typed(attrs, name)
}

/// Expands an optional integer into an unsigned 32-bit vendor field.
///
/// # Errors
///
/// Returns [`ExpandError::Type`] or [`ExpandError::OutOfRange`].
pub fn expand_u32(attrs: &Attributes, name: &str) -> Result<Option<u32>, ExpandError> {
    typed::<i64>(attrs, name)?
        .map(|value| {
            u32::try_from(value).map_err(|_| ExpandError::OutOfRange {
                attribute: name.to_owned(),
                value,
            })
        })
        .transpose()
}

/// Expands a string that must be present.
///
/// # Errors
///
/// Returns [`ExpandError::Missing`] when absent.
pub fn expand_required_string(attrs: &Attributes, name: &str) -> Result<String, ExpandError> {
    expand_string(attrs, name)?.ok_or_else(|| ExpandError::Missing {
        attribute: name.to_owned(),
    })
}

/// Expands a string map. An explicitly empty map expands to `Some(empty)`
/// and an absent map to `None`.
///
/// # Errors
///
/// Returns [`ExpandError::Type`] on a type mismatch.
pub fn expand_map(
    attrs: &Attributes,
    name: &str,
) -> Result<Option<BTreeMap<String, String>>, ExpandError> {
    typed(attrs, name)
}

/// Parses a duration written as one or more `<n>s`, `<n>m` or `<n>h` terms.
///
/// # Errors
///
/// Returns [`ExpandError::NegativeDuration`] for a leading minus sign and
/// [`ExpandError::InvalidDuration`] for anything else malformed.
pub fn parse_duration(raw: &str) -> Result<Duration, ExpandError> {
    let invalid = || ExpandError::InvalidDuration {
        value: raw.to_owned(),
    };
    let text = raw.trim();
    if text.starts_with('-') {
        return Err(ExpandError::NegativeDuration {
            value: raw.to_owned(),
        });
    }
    if text.is_empty() {
        return Err(invalid());
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let unit: u64 = match ch {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            _ => return Err(invalid()),
        };
        let amount: u64 = digits.parse().map_err(|_| invalid())?;
        total = amount
            .checked_mul(unit)
            .and_then(|seconds| total.checked_add(seconds))
            .ok_or_else(invalid)?;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(invalid());
    }
    Ok(Duration::from_secs(total))
}

/// Canonical textual form of a duration, in whole seconds (`300s`).
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}

/// Schema validator accepting any duration [`parse_duration`] accepts.
///
/// # Errors
///
/// Returns the parse failure as text.
pub fn validate_duration(value: &Value) -> Result<(), String> {
    match value {
        Value::String(raw) => parse_duration(raw).map(|_| ()).map_err(|err| err.to_string()),
        other => Err(format!("expected a duration string, found {}", other.type_name())),
    }
}

/// Schema normalizer rewriting a duration into its canonical form; values
/// that do not parse are left as they are.
#[must_use]
pub fn normalize_duration(value: &Value) -> Value {
    match value {
        Value::String(raw) => parse_duration(raw)
            .map_or_else(|_| value.clone(), |duration| Value::from(format_duration(duration))),
        other => other.clone(),
    }
}

/// Expands an optional duration attribute.
///
/// # Errors
///
/// Returns [`ExpandError`] when the value is not a string or not a valid,
/// non-negative duration.
pub fn expand_duration(attrs: &Attributes, name: &str) -> Result<Option<Duration>, ExpandError> {
    expand_string(attrs, name)?
        .map(|raw| parse_duration(&raw))
        .transpose()
}

/// Strips the locality prefix of a reference, checking that it addresses the
/// same locality as the resource (a regional reference is accepted from any
/// zone of that region, and a zonal one from its region).
///
/// # Errors
///
/// Returns [`ExpandError::InvalidId`] or [`ExpandError::CrossLocality`].
pub fn strip_locality(
    attribute: &str,
    raw: &str,
    expected: &Locality,
) -> Result<Uuid, ExpandError> {
    let invalid = |source| ExpandError::InvalidId {
        attribute: attribute.to_owned(),
        source,
    };
    let Some((prefix, _)) = raw.split_once('/') else {
        return parse_uuid(raw).map_err(invalid);
    };
    let found = Locality::parse(prefix).map_err(invalid)?;
    let defaults = LocalityDefaults::default();
    let (_, id) = decode(raw, found.kind(), &defaults).map_err(invalid)?;

    let compatible = match (&found, expected) {
        (Locality::Zone(_), Locality::Zone(_)) | (Locality::Region(_), Locality::Region(_)) => {
            found == *expected
        }
        (Locality::Region(region), Locality::Zone(zone)) => region.contains(zone),
        (Locality::Zone(zone), Locality::Region(region)) => region.contains(zone),
    };
    if !compatible {
        return Err(ExpandError::CrossLocality {
            attribute: attribute.to_owned(),
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    Ok(id)
}

/// Schema normalizer reducing a reference to its lowercase UUID, so a zonal
/// and a regional spelling of the same reference compare equal.
#[must_use]
pub fn normalize_reference(value: &Value) -> Value {
    match value {
        Value::String(raw) => {
            let id = raw.rsplit('/').next().unwrap_or(raw.as_str());
            Value::from(id.to_ascii_lowercase())
        }
        other => other.clone(),
    }
}

/// Expands an optional ID-bearing attribute into the bare UUID the vendor
/// expects.
///
/// # Errors
///
/// Returns [`ExpandError`] when the ID is malformed or crosses localities.
pub fn expand_id(
    attrs: &Attributes,
    name: &str,
    expected: &Locality,
) -> Result<Option<Uuid>, ExpandError> {
    expand_string(attrs, name)?
        .map(|raw| strip_locality(name, &raw, expected))
        .transpose()
}

/// Expands a nested block list limited to `max_items`, returning the only
/// block present.
///
/// # Errors
///
/// Returns [`ExpandError::TooManyItems`] or [`ExpandError::Type`].
pub fn expand_single_block(
    attrs: &Attributes,
    name: &str,
    max_items: usize,
) -> Result<Option<Attributes>, ExpandError> {
    let items = match attrs.get(name) {
        None | Some(Value::Unknown) => return Ok(None),
        Some(Value::List(items)) => items,
        Some(other) => {
            return Err(ExpandError::Type {
                attribute: name.to_owned(),
                source: TypeMismatch {
                    expected: "list",
                    found: other.type_name(),
                },
            });
        }
    };
    if items.len() > max_items {
        return Err(ExpandError::TooManyItems {
            attribute: name.to_owned(),
            max: max_items,
            found: items.len(),
        });
    }
    items
        .first()
        .map(Attributes::from_value)
        .transpose()
        .map_err(|source| ExpandError::Type {
            attribute: name.to_owned(),
            source,
        })
}

/// Writes a vendor string back; `None` becomes unset.
pub fn flatten_string(attrs: &mut Attributes, name: &str, value: Option<&str>) {
    attrs.set_optional(name, value);
}

/// Writes a vendor duration back in canonical form; `None` becomes unset.
pub fn flatten_duration(attrs: &mut Attributes, name: &str, value: Option<Duration>) {
    attrs.set_optional(name, value.map(format_duration));
}

/// Writes a vendor map back; an empty map stays an explicit empty map.
pub fn flatten_map(attrs: &mut Attributes, name: &str, value: Option<BTreeMap<String, String>>) {
    attrs.set_optional(name, value);
}

/// Writes an optional nested block back as a one-element block list.
pub fn flatten_single_block(attrs: &mut Attributes, name: &str, value: Option<Attributes>) {
    attrs.set_optional(name, value.map(|block| Value::List(vec![Value::Block(block)])));
}

/// Writes a reference back in `<locality>/<uuid>` form.
pub fn flatten_id(attrs: &mut Attributes, name: &str, locality: &Locality, value: Option<Uuid>) {
    attrs.set_optional(
        name,
        value.map(|id| crate::locality::encode(locality, id)),
    );
}

/// Resolves the locality of a reference kind from a regional or zonal
/// resource: regional references inherit the zone's region.
#[must_use]
pub fn reference_locality(resource: &Locality, kind: LocalityKind) -> Option<Locality> {
    match (resource, kind) {
        (Locality::Zone(zone), LocalityKind::Region) => Some(Locality::Region(zone.region())),
        (_, kind) if resource.kind() == kind => Some(resource.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests;
