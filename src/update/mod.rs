//! Builds the minimal vendor update from a prior/desired diff.

use thiserror::Error;

use crate::schema::Schema;
use crate::value::{Attributes, FromValue, TypeMismatch, Value};

/// Misuse of the builder by a resource kind, or a diff it cannot express.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum UpdateError {
    /// Raised when a force-new attribute changed; the resource must be
    /// replaced instead.
    #[error("attribute '{attribute}' cannot change in place; the resource must be replaced")]
    ForceNew {
        /// Attribute name.
        attribute: String,
    },
    /// Raised when a changed attribute has no update path.
    #[error("attribute '{attribute}' is not updatable")]
    NotUpdatable {
        /// Attribute name.
        attribute: String,
    },
    /// Raised when the attribute is not declared by the schema.
    #[error("attribute '{attribute}' is not declared")]
    Undeclared {
        /// Attribute name.
        attribute: String,
    },
    /// Raised when an integer does not fit the vendor field.
    #[error("attribute '{attribute}': {value} is out of range")]
    OutOfRange {
        /// Attribute name.
        attribute: String,
        /// Offending value.
        value: i64,
    },
    /// Raised when the desired value has the wrong type.
    #[error("attribute '{attribute}': {source}")]
    Type {
        /// Attribute name.
        attribute: String,
        /// Mismatch details.
        source: TypeMismatch,
    },
}

/// Result of building an update.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UpdatePlan<R> {
    /// Nothing updatable changed; no request must be sent.
    NoOp,
    /// A partial request carrying only the changed fields.
    Apply {
        /// Vendor request.
        request: R,
        /// Whether the resource must be stopped around the update.
        needs_reboot: bool,
        /// Attributes included in the request.
        fields: Vec<String>,
    },
}

impl<R> UpdatePlan<R> {
    /// Returns `true` for the no-op sentinel.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }
}

/// Walks a diff attribute by attribute, recording what was included.
#[derive(Debug)]
pub struct UpdateBuilder<'a> {
    schema: &'a Schema,
    prior: &'a Attributes,
    desired: &'a Attributes,
    fields: Vec<String>,
    needs_reboot: bool,
}

impl<'a> UpdateBuilder<'a> {
    /// Starts a builder over one diff.
    #[must_use]
    pub const fn new(schema: &'a Schema, prior: &'a Attributes, desired: &'a Attributes) -> Self {
        Self {
            schema,
            prior,
            desired,
            fields: Vec::new(),
            needs_reboot: false,
        }
    }

    /// Returns `true` when `name` differs between prior and desired state.
    /// A desired value still unknown to the engine is not a change, nor is a
    /// computed attribute the configuration leaves out.
    #[must_use]
    pub fn has_change(&self, name: &str) -> bool {
        let attribute = self.schema.attribute(name);
        let computed = attribute.is_some_and(|declared| declared.computed);
        let normalize = |value: Option<&Value>| -> Option<Value> {
            let normalizer = attribute.and_then(|declared| declared.normalizer);
            value.map(|present| {
                normalizer.map_or_else(|| present.clone(), |apply| apply(present))
            })
        };
        let suppressed = |prior: Option<&Value>, desired: Option<&Value>| {
            attribute
                .and_then(|declared| declared.suppressor)
                .is_some_and(|suppress| suppress(prior, desired))
        };
        let prior = self.prior.get(name);
        match self.desired.get(name) {
            Some(Value::Unknown) => false,
            None if computed => false,
            desired => normalize(desired) != normalize(prior) && !suppressed(prior, desired),
        }
    }

    /// Force-new attributes whose change requires destroy and recreate.
    #[must_use]
    pub fn replacement_reasons(&self) -> Vec<String> {
        self.schema
            .attributes()
            .filter(|attribute| attribute.force_new && self.has_change(attribute.name))
            .map(|attribute| attribute.name.to_owned())
            .collect()
    }

    /// Returns the value to send for `name` if it changed, recording it.
    ///
    /// A value cleared in desired state comes back as the type's zero value,
    /// so an optional string that was removed is sent as `Some("")`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError`] when a force-new or non-updatable attribute
    /// changed, or the desired value has the wrong type.
    pub fn changed<T: FromValue + Default>(
        &mut self,
        name: &str,
    ) -> Result<Option<T>, UpdateError> {
        let Some(attribute) = self.schema.attribute(name) else {
            return Err(UpdateError::Undeclared {
                attribute: name.to_owned(),
            });
        };
        if !self.has_change(name) {
            return Ok(None);
        }
        if attribute.force_new {
            return Err(UpdateError::ForceNew {
                attribute: name.to_owned(),
            });
        }
        if !attribute.updatable {
            return Err(UpdateError::NotUpdatable {
                attribute: name.to_owned(),
            });
        }

        let value = self
            .desired
            .presence::<T>(name)
            .map_err(|source| UpdateError::Type {
                attribute: name.to_owned(),
                source,
            })?
            .into_option()
            .unwrap_or_default();
        self.fields.push(name.to_owned());
        self.needs_reboot |= attribute.needs_reboot;
        Ok(Some(value))
    }

    /// Integer field sent as an unsigned 32-bit vendor value.
    ///
    /// # Errors
    ///
    /// See [`UpdateBuilder::changed`]; also [`UpdateError::OutOfRange`].
    pub fn changed_u32(&mut self, name: &str) -> Result<Option<u32>, UpdateError> {
        self.changed::<i64>(name)?
            .map(|value| {
                u32::try_from(value).map_err(|_| UpdateError::OutOfRange {
                    attribute: name.to_owned(),
                    value,
                })
            })
            .transpose()
    }

    /// Optional string field; cleared values come back as `Some("")`.
    ///
    /// # Errors
    ///
    /// See [`UpdateBuilder::changed`].
    pub fn optional_string(&mut self, name: &str) -> Result<Option<String>, UpdateError> {
        self.changed::<String>(name)
    }

    /// Whether any included field needs the resource stopped.
    #[must_use]
    pub const fn needs_reboot(&self) -> bool {
        self.needs_reboot
    }

    /// Wraps the request, or returns [`UpdatePlan::NoOp`] when nothing was
    /// included.
    #[must_use]
    pub fn finish<R>(self, request: R) -> UpdatePlan<R> {
        if self.fields.is_empty() {
            return UpdatePlan::NoOp;
        }
        UpdatePlan::Apply {
            request,
            needs_reboot: self.needs_reboot,
            fields: self.fields,
        }
    }
}
