//! Declarative value model shared by desired and prior state.
//!
//! An attribute missing from [`Attributes`] is *unset*. An attribute present
//! with its type's zero value is *set-to-zero*, which is distinct: an update
//! sends it so the vendor value is overwritten. [`Presence`] carries that
//! three-valued distinction into typed code.

use std::collections::BTreeMap;

use thiserror::Error;

/// A single declarative attribute value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    /// Computed value the engine does not know yet.
    Unknown,
    /// String scalar.
    String(String),
    /// Integer scalar.
    Int(i64),
    /// Boolean scalar.
    Bool(bool),
    /// Ordered list.
    List(Vec<Value>),
    /// String map; key order is irrelevant.
    Map(BTreeMap<String, String>),
    /// Nested block.
    Block(Attributes),
}

impl Value {
    /// Name of the value's type, used in mismatch errors.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Block(_) => "block",
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<BTreeMap<String, String>> for Value {
    fn from(value: BTreeMap<String, String>) -> Self {
        Self::Map(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Self::List(value.into_iter().map(Self::String).collect())
    }
}

impl From<Attributes> for Value {
    fn from(value: Attributes) -> Self {
        Self::Block(value)
    }
}

/// Raised when a value does not have the type the caller converts it to.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("expected {expected}, found {found}")]
pub struct TypeMismatch {
    /// Type the caller asked for.
    pub expected: &'static str,
    /// Type actually stored.
    pub found: &'static str,
}

/// Typed view over a [`Value`].
pub trait FromValue: Sized {
    /// Converts the value, failing on a type mismatch.
    ///
    /// # Errors
    ///
    /// Returns [`TypeMismatch`] when the stored type differs.
    fn from_value(value: &Value) -> Result<Self, TypeMismatch>;

    /// Returns `true` for the type's zero value.
    fn is_zero(&self) -> bool;
}

fn mismatch(expected: &'static str, value: &Value) -> TypeMismatch {
    TypeMismatch {
        expected,
        found: value.type_name(),
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, TypeMismatch> {
        match value {
            Value::String(inner) => Ok(inner.clone()),
            other => Err(mismatch("string", other)),
        }
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, TypeMismatch> {
        match value {
            Value::Int(inner) => Ok(*inner),
            other => Err(mismatch("int", other)),
        }
    }

    fn is_zero(&self) -> bool {
        *self == 0
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, TypeMismatch> {
        match value {
            Value::Bool(inner) => Ok(*inner),
            other => Err(mismatch("bool", other)),
        }
    }

    fn is_zero(&self) -> bool {
        !*self
    }
}

impl FromValue for BTreeMap<String, String> {
    fn from_value(value: &Value) -> Result<Self, TypeMismatch> {
        match value {
            Value::Map(inner) => Ok(inner.clone()),
            other => Err(mismatch("map", other)),
        }
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl FromValue for Vec<String> {
    fn from_value(value: &Value) -> Result<Self, TypeMismatch> {
        match value {
            Value::List(items) => items.iter().map(String::from_value).collect(),
            other => Err(mismatch("list", other)),
        }
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl FromValue for Attributes {
    fn from_value(value: &Value) -> Result<Self, TypeMismatch> {
        match value {
            Value::Block(inner) => Ok(inner.clone()),
            other => Err(mismatch("block", other)),
        }
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

/// Three-valued presence of a declarative field.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Presence<T> {
    /// The field is absent; the vendor value is left alone.
    #[default]
    Unset,
    /// The field is explicitly set to its zero value.
    Zero,
    /// The field carries a non-zero value.
    Value(T),
}

impl<T: FromValue + Default> Presence<T> {
    /// Classifies an explicitly set value as zero or non-zero.
    #[must_use]
    pub fn from_set(value: T) -> Self {
        if value.is_zero() {
            Self::Zero
        } else {
            Self::Value(value)
        }
    }

    /// Collapses to the SDK's optional-pointer model: `None` only when unset.
    #[must_use]
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Unset => None,
            Self::Zero => Some(T::default()),
            Self::Value(value) => Some(value),
        }
    }

    /// Returns `true` unless the field is unset.
    #[must_use]
    pub const fn is_set(&self) -> bool {
        !matches!(self, Self::Unset)
    }
}

/// Attribute map for one resource, keyed by attribute name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Attributes(BTreeMap<String, Value>);

impl Attributes {
    /// Creates an empty attribute map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the raw value of an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Sets an attribute, replacing any previous value.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(name.to_owned(), value.into());
    }

    /// Sets an attribute when `value` is `Some`, unsets it otherwise.
    pub fn set_optional<V: Into<Value>>(&mut self, name: &str, value: Option<V>) {
        match value {
            Some(inner) => self.set(name, inner),
            None => self.unset(name),
        }
    }

    /// Removes an attribute.
    pub fn unset(&mut self, name: &str) {
        self.0.remove(name);
    }

    /// Returns `true` when the attribute is present and known.
    #[must_use]
    pub fn is_known(&self, name: &str) -> bool {
        self.0
            .get(name)
            .is_some_and(|value| !matches!(value, Value::Unknown))
    }

    /// Reads an attribute with its three-valued presence. Unknown values read
    /// as unset.
    ///
    /// # Errors
    ///
    /// Returns [`TypeMismatch`] when the stored type differs from `T`.
    pub fn presence<T: FromValue + Default>(
        &self,
        name: &str,
    ) -> Result<Presence<T>, TypeMismatch> {
        match self.0.get(name) {
            None | Some(Value::Unknown) => Ok(Presence::Unset),
            Some(value) => T::from_value(value).map(Presence::from_set),
        }
    }

    /// Returns `true` when no attribute is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over attributes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<S: Into<String>, V: Into<Value>> FromIterator<(S, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}
