//! Normalises vendor errors into the classes lifecycle decisions are made on.

use std::fmt;

use thiserror::Error;

use crate::schema::Phase;
use crate::vendor::VendorError;

/// Vendor codes meaning the resource is busy with a previous transition.
pub const PENDING_CODES: &[&str] = &["transient_state", "precondition_pending"];

/// Class of a vendor error.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorClass {
    /// The resource does not exist.
    NotFound,
    /// Access was denied.
    Forbidden,
    /// The resource existed and has been removed.
    Gone,
    /// Temporary failure worth retrying.
    Transient,
    /// The resource is still completing an earlier transition.
    PreconditionPending,
    /// Anything else.
    Fatal,
}

impl ErrorClass {
    /// Returns `true` for the classes treated as "resource absent".
    #[must_use]
    pub const fn is_absent(self) -> bool {
        matches!(self, Self::NotFound | Self::Gone)
    }

    /// Returns `true` for the classes the retry loop absorbs.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::PreconditionPending)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "not found",
            Self::Forbidden => "forbidden",
            Self::Gone => "gone",
            Self::Transient => "transient",
            Self::PreconditionPending => "precondition pending",
            Self::Fatal => "fatal",
        })
    }
}

/// Classifies a vendor error outside of any lifecycle phase.
#[must_use]
pub fn classify(err: &VendorError) -> ErrorClass {
    if err.is_timeout() {
        return ErrorClass::Transient;
    }
    match err.status {
        404 => ErrorClass::NotFound,
        403 => ErrorClass::Forbidden,
        410 => ErrorClass::Gone,
        429 | 502..=504 => ErrorClass::Transient,
        409 if PENDING_CODES.contains(&err.code.as_str()) => ErrorClass::PreconditionPending,
        _ => ErrorClass::Fatal,
    }
}

/// Classifies a vendor error during `phase`. While deleting, a 403 means the
/// resource and its access token were already collected and counts as absent.
#[must_use]
pub fn classify_in(err: &VendorError, phase: Phase) -> ErrorClass {
    match (classify(err), phase) {
        (ErrorClass::Forbidden, Phase::Delete) => ErrorClass::NotFound,
        (class, _) => class,
    }
}

/// Errors that can be classified.
pub trait Classify {
    /// Returns the class of the error during `phase`.
    fn class_in(&self, phase: Phase) -> ErrorClass;
}

impl Classify for VendorError {
    fn class_in(&self, phase: Phase) -> ErrorClass {
        classify_in(self, phase)
    }
}

/// A vendor error annotated with its class.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{class} during {phase}: {source}")]
pub struct ClassifiedError {
    /// Class at the time of wrapping.
    pub class: ErrorClass,
    /// Phase the error was observed in.
    pub phase: Phase,
    /// Underlying vendor error.
    pub source: VendorError,
}

impl ClassifiedError {
    /// Wraps a vendor error with its class during `phase`.
    #[must_use]
    pub fn new(source: VendorError, phase: Phase) -> Self {
        Self {
            class: classify_in(&source, phase),
            phase,
            source,
        }
    }
}

impl Classify for ClassifiedError {
    fn class_in(&self, phase: Phase) -> ErrorClass {
        classify_in(&self.source, phase)
    }
}
