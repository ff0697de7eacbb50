//! Terminal errors and warnings surfaced to the declarative engine.

use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::classify::{ErrorClass, classify_in};
use crate::driver::ResourceState;
use crate::schema::Phase;
use crate::vendor::VendorError;
use crate::wait::WaitError;

/// Kind of a terminal error.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// The resource is absent.
    NotFound,
    /// A name lookup matched several resources.
    Ambiguous,
    /// Declarative input violated a constraint before any network call.
    ValidationFailed,
    /// The vendor rejected the request on a state precondition.
    Conflict,
    /// Transient failures outlasted the retry budget.
    Transient,
    /// Anything else.
    Fatal,
    /// The phase timeout elapsed before a target state was observed.
    Timeout,
    /// The engine cancelled the operation.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "not found",
            Self::Ambiguous => "ambiguous",
            Self::ValidationFailed => "validation failed",
            Self::Conflict => "conflict",
            Self::Transient => "transient failure",
            Self::Fatal => "error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        })
    }
}

/// The single error a lifecycle operation returns.
///
/// Renders as `<kind> <resource kind> <composite id>: <detail>`, where the
/// detail of a vendor failure is `<vendor code>: <vendor message>`.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error(
    "{kind} {resource_kind}{}: {detail}",
    .id.as_ref().map(|id| format!(" {id}")).unwrap_or_default()
)]
pub struct ProviderError {
    /// Error kind.
    pub kind: ErrorKind,
    /// Resource kind the operation ran on.
    pub resource_kind: String,
    /// Composite identifier, when known.
    pub id: Option<String>,
    /// Human-readable detail.
    pub detail: String,
    /// Vendor error behind the failure, if any.
    pub vendor: Option<VendorError>,
    /// State of a resource that exists at the vendor although the operation
    /// failed; the engine keeps it as tainted.
    pub partial: Option<Box<ResourceState>>,
}

impl ProviderError {
    /// Builds an error without a vendor cause.
    #[must_use]
    pub fn new(kind: ErrorKind, resource_kind: &str, detail: impl fmt::Display) -> Self {
        Self {
            kind,
            resource_kind: resource_kind.to_owned(),
            id: None,
            detail: detail.to_string(),
            vendor: None,
            partial: None,
        }
    }

    /// Builds a validation error.
    #[must_use]
    pub fn validation(resource_kind: &str, detail: impl fmt::Display) -> Self {
        Self::new(ErrorKind::ValidationFailed, resource_kind, detail)
    }

    /// Attaches the composite identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl fmt::Display) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Attaches the state of a resource left behind by a failed create,
    /// along with its identifier.
    #[must_use]
    pub fn with_partial(mut self, state: ResourceState) -> Self {
        self.id = Some(state.id.to_string());
        self.partial = Some(Box::new(state));
        self
    }

    /// Maps a vendor error observed during `phase`.
    #[must_use]
    pub fn from_vendor(resource_kind: &str, phase: Phase, err: VendorError) -> Self {
        let kind = match classify_in(&err, phase) {
            ErrorClass::NotFound | ErrorClass::Gone => ErrorKind::NotFound,
            ErrorClass::Transient => ErrorKind::Transient,
            ErrorClass::PreconditionPending => ErrorKind::Conflict,
            ErrorClass::Forbidden => ErrorKind::Fatal,
            ErrorClass::Fatal if err.status == 409 => ErrorKind::Conflict,
            ErrorClass::Fatal => ErrorKind::Fatal,
        };
        Self {
            kind,
            resource_kind: resource_kind.to_owned(),
            id: None,
            detail: err.to_string(),
            vendor: Some(err),
            partial: None,
        }
    }

    /// Maps the end of a wait or retry loop.
    #[must_use]
    pub fn from_wait(resource_kind: &str, phase: Phase, err: WaitError<VendorError>) -> Self {
        match err {
            WaitError::NotFound { error } | WaitError::Failed { error, .. } => {
                Self::from_vendor(resource_kind, phase, error)
            }
            WaitError::Exhausted { error } => {
                let mut mapped = Self::from_vendor(resource_kind, phase, error);
                mapped.kind = ErrorKind::Transient;
                mapped
            }
            timeout @ WaitError::Timeout { .. } => {
                Self::new(ErrorKind::Timeout, resource_kind, format!("{phase}: {timeout}"))
            }
            WaitError::Cancelled => Self::new(
                ErrorKind::Cancelled,
                resource_kind,
                format!("{phase} was cancelled"),
            ),
        }
    }

    /// Vendor error code, when the failure came from the vendor.
    #[must_use]
    pub fn vendor_code(&self) -> Option<&str> {
        self.vendor.as_ref().map(|err| err.code.as_str())
    }
}

/// Non-fatal messages surfaced alongside a successful result.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Diagnostics {
    warnings: Vec<String>,
}

impl Diagnostics {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records and logs a warning.
    pub fn warn(&mut self, message: impl Into<String>) {
        let text = message.into();
        warn!(warning = %text, "operation warning");
        self.warnings.push(text);
    }

    /// Appends warnings collected elsewhere.
    pub fn extend(&mut self, other: Self) {
        self.warnings.extend(other.warnings);
    }

    /// Warnings in the order they were raised.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Returns `true` when nothing was raised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// A successful result with its warnings.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome<T> {
    /// Operation result.
    pub value: T,
    /// Warnings raised while producing it.
    pub diagnostics: Diagnostics,
}

impl<T> Outcome<T> {
    /// Wraps a result with no warnings.
    #[must_use]
    pub fn clean(value: T) -> Self {
        Self {
            value,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Wraps a result with the given warnings.
    #[must_use]
    pub const fn with(value: T, diagnostics: Diagnostics) -> Self {
        Self { value, diagnostics }
    }
}
