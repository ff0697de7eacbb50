//! Attribute schema and per-phase timeouts exported to the declarative
//! engine for each resource kind.

use std::time::Duration;

use thiserror::Error;

use crate::value::{Attributes, Value};

/// Default timeout applied to every lifecycle phase.
pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(300);

/// Type of an attribute.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttributeType {
    /// String scalar.
    String,
    /// Integer scalar.
    Int,
    /// Boolean scalar.
    Bool,
    /// String map.
    Map,
    /// List of strings.
    List,
    /// List of nested blocks.
    Blocks,
}

/// Validator run against a present attribute value.
pub type Validator = fn(&Value) -> Result<(), String>;

/// Maps equivalent spellings of a value to one form before diffing.
pub type Normalizer = fn(&Value) -> Value;

/// Decides whether a prior/desired pair that differs is still equivalent,
/// such as a vendor UUID standing for a configured label.
pub type DiffSuppressor = fn(Option<&Value>, Option<&Value>) -> bool;

/// Declaration of one attribute and its lifecycle flags.
#[derive(Clone, Debug)]
pub struct Attribute {
    /// Attribute name.
    pub name: &'static str,
    /// Attribute type.
    pub kind: AttributeType,
    /// Must be present in desired state.
    pub required: bool,
    /// Filled in by the vendor when not set.
    pub computed: bool,
    /// A change requires destroy and recreate.
    pub force_new: bool,
    /// May be changed in place through the update endpoint.
    pub updatable: bool,
    /// An in-place change needs the resource stopped.
    pub needs_reboot: bool,
    /// Only meaningful to the provider; never sent to the vendor.
    pub local: bool,
    /// Upper bound on the number of nested blocks.
    pub max_items: Option<usize>,
    /// Optional value validator.
    pub validator: Option<Validator>,
    /// Optional normalizer applied to both sides of a diff.
    pub normalizer: Option<Normalizer>,
    /// Optional rule accepting a differing prior/desired pair as unchanged.
    pub suppressor: Option<DiffSuppressor>,
}

impl Attribute {
    const fn new(name: &'static str, kind: AttributeType) -> Self {
        Self {
            name,
            kind,
            required: false,
            computed: false,
            force_new: false,
            updatable: false,
            needs_reboot: false,
            local: false,
            max_items: None,
            validator: None,
            normalizer: None,
            suppressor: None,
        }
    }

    /// Declares a string attribute.
    #[must_use]
    pub const fn string(name: &'static str) -> Self {
        Self::new(name, AttributeType::String)
    }

    /// Declares an integer attribute.
    #[must_use]
    pub const fn int(name: &'static str) -> Self {
        Self::new(name, AttributeType::Int)
    }

    /// Declares a boolean attribute.
    #[must_use]
    pub const fn bool(name: &'static str) -> Self {
        Self::new(name, AttributeType::Bool)
    }

    /// Declares a string map attribute.
    #[must_use]
    pub const fn map(name: &'static str) -> Self {
        Self::new(name, AttributeType::Map)
    }

    /// Declares a list-of-strings attribute.
    #[must_use]
    pub const fn list(name: &'static str) -> Self {
        Self::new(name, AttributeType::List)
    }

    /// Declares a nested block list.
    #[must_use]
    pub const fn blocks(name: &'static str, max_items: usize) -> Self {
        let mut attribute = Self::new(name, AttributeType::Blocks);
        attribute.max_items = Some(max_items);
        attribute
    }

    /// Marks the attribute as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the attribute as vendor-computed.
    #[must_use]
    pub const fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    /// Marks the attribute as force-new.
    #[must_use]
    pub const fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Marks the attribute as updatable in place.
    #[must_use]
    pub const fn updatable(mut self) -> Self {
        self.updatable = true;
        self
    }

    /// Marks the attribute as updatable only while the resource is stopped.
    #[must_use]
    pub const fn needs_reboot(mut self) -> Self {
        self.updatable = true;
        self.needs_reboot = true;
        self
    }

    /// Marks the attribute as provider-local.
    #[must_use]
    pub const fn local(mut self) -> Self {
        self.local = true;
        self
    }

    /// Attaches a validator.
    #[must_use]
    pub const fn validate_with(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Attaches a normalizer, so `5m` and `300s` compare equal.
    #[must_use]
    pub const fn normalize_with(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Attaches a diff suppressor, consulted only when the two sides differ.
    #[must_use]
    pub const fn suppress_diff_with(mut self, suppressor: DiffSuppressor) -> Self {
        self.suppressor = Some(suppressor);
        self
    }
}

/// Treats an empty string or collection the same as an unset value.
#[must_use]
pub fn empty_matches_unset(prior: Option<&Value>, desired: Option<&Value>) -> bool {
    let is_empty = |value: Option<&Value>| match value {
        None => true,
        Some(Value::String(raw)) => raw.is_empty(),
        Some(Value::List(items)) => items.is_empty(),
        Some(Value::Map(entries)) => entries.is_empty(),
        Some(_) => false,
    };
    is_empty(prior) && is_empty(desired)
}

/// Validation failures detectable before any network call.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SchemaError {
    /// Raised when a required attribute is absent.
    #[error("attribute '{attribute}' is required")]
    Missing {
        /// Attribute name.
        attribute: String,
    },
    /// Raised when an attribute is not declared by the schema.
    #[error("attribute '{attribute}' is not supported")]
    Unknown {
        /// Attribute name.
        attribute: String,
    },
    /// Raised when a value does not match the declared type.
    #[error("attribute '{attribute}' must be a {expected}")]
    Type {
        /// Attribute name.
        attribute: String,
        /// Declared type.
        expected: &'static str,
    },
    /// Raised when a block list exceeds `max_items`.
    #[error("attribute '{attribute}' accepts at most {max} block(s), got {found}")]
    TooManyItems {
        /// Attribute name.
        attribute: String,
        /// Declared maximum.
        max: usize,
        /// Number supplied.
        found: usize,
    },
    /// Raised when mutually exclusive attributes are both set.
    #[error("attributes {} are mutually exclusive", .attributes.join(", "))]
    Conflicting {
        /// Attributes set together.
        attributes: Vec<String>,
    },
    /// Raised when a validator rejects a value.
    #[error("attribute '{attribute}': {message}")]
    Invalid {
        /// Attribute name.
        attribute: String,
        /// Validator message.
        message: String,
    },
}

/// Typed attribute tree for one resource kind.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    attributes: Vec<Attribute>,
    exclusive: Vec<&'static [&'static str]>,
}

impl Schema {
    /// Builds a schema from attribute declarations.
    #[must_use]
    pub const fn new(attributes: Vec<Attribute>) -> Self {
        Self {
            attributes,
            exclusive: Vec::new(),
        }
    }

    /// Declares a group of attributes of which at most one may be set.
    #[must_use]
    pub fn exclusive(mut self, group: &'static [&'static str]) -> Self {
        self.exclusive.push(group);
        self
    }

    /// Looks up an attribute declaration.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    /// Iterates over attribute declarations in declaration order.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    /// Validates desired state against the schema.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] encountered.
    pub fn validate(&self, desired: &Attributes) -> Result<(), SchemaError> {
        for (name, _) in desired.iter() {
            if self.attribute(name).is_none() {
                return Err(SchemaError::Unknown {
                    attribute: name.to_owned(),
                });
            }
        }

        for attribute in &self.attributes {
            match desired.get(attribute.name) {
                None if attribute.required => {
                    return Err(SchemaError::Missing {
                        attribute: attribute.name.to_owned(),
                    });
                }
                None | Some(Value::Unknown) => {}
                Some(value) => check_value(attribute, value)?,
            }
        }

        for group in &self.exclusive {
            let set: Vec<String> = group
                .iter()
                .filter(|name| desired.is_known(name))
                .map(|name| (*name).to_owned())
                .collect();
            if set.len() > 1 {
                return Err(SchemaError::Conflicting { attributes: set });
            }
        }
        Ok(())
    }
}

fn check_value(attribute: &Attribute, value: &Value) -> Result<(), SchemaError> {
    let type_ok = matches!(
        (attribute.kind, value),
        (AttributeType::String, Value::String(_))
            | (AttributeType::Int, Value::Int(_))
            | (AttributeType::Bool, Value::Bool(_))
            | (AttributeType::Map, Value::Map(_))
            | (AttributeType::List | AttributeType::Blocks, Value::List(_))
    );
    if !type_ok {
        return Err(SchemaError::Type {
            attribute: attribute.name.to_owned(),
            expected: type_label(attribute.kind),
        });
    }

    if let (Some(max), Value::List(items)) = (attribute.max_items, value)
        && items.len() > max
    {
        return Err(SchemaError::TooManyItems {
            attribute: attribute.name.to_owned(),
            max,
            found: items.len(),
        });
    }

    if let Some(validator) = attribute.validator {
        validator(value).map_err(|message| SchemaError::Invalid {
            attribute: attribute.name.to_owned(),
            message,
        })?;
    }
    Ok(())
}

const fn type_label(kind: AttributeType) -> &'static str {
    match kind {
        AttributeType::String => "string",
        AttributeType::Int => "int",
        AttributeType::Bool => "bool",
        AttributeType::Map => "map",
        AttributeType::List => "list",
        AttributeType::Blocks => "list of blocks",
    }
}

/// Lifecycle phase of an operation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Phase {
    /// Create.
    Create,
    /// Read (also used by import and lookups).
    Read,
    /// Update.
    Update,
    /// Delete.
    Delete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// Wall-clock bound for each lifecycle phase, including every retry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timeouts {
    /// Create timeout.
    pub create: Duration,
    /// Read timeout.
    pub read: Duration,
    /// Update timeout.
    pub update: Duration,
    /// Delete timeout.
    pub delete: Duration,
}

impl Timeouts {
    /// Uses the same timeout for every phase.
    #[must_use]
    pub const fn uniform(timeout: Duration) -> Self {
        Self {
            create: timeout,
            read: timeout,
            update: timeout,
            delete: timeout,
        }
    }

    /// Returns the timeout for `phase`.
    #[must_use]
    pub const fn for_phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Create => self.create,
            Phase::Read => self.read,
            Phase::Update => self.update,
            Phase::Delete => self.delete,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(DEFAULT_PHASE_TIMEOUT)
    }
}
