//! Selects a resource by its human-readable name from an assembled listing.

use thiserror::Error;

/// Failure to resolve a name to exactly one resource.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LookupError {
    /// Raised when no candidate carries the name.
    #[error("no {kind} named {name}")]
    NotFound {
        /// Resource kind being looked up.
        kind: String,
        /// Requested name.
        name: String,
    },
    /// Raised when more than one candidate carries the name.
    #[error("multiple {kind} named {name}")]
    Ambiguous {
        /// Resource kind being looked up.
        kind: String,
        /// Requested name.
        name: String,
        /// Number of matching candidates.
        count: usize,
    },
}

/// Returns the only candidate whose name equals `name` exactly.
///
/// Comparison is case-sensitive and does not trim. Pagination is the
/// caller's job: `candidates` is the full listing.
///
/// # Errors
///
/// Returns [`LookupError::NotFound`] for zero matches and
/// [`LookupError::Ambiguous`] for more than one.
pub fn find_by_name<T, F>(
    kind: &str,
    name: &str,
    candidates: Vec<T>,
    name_of: F,
) -> Result<T, LookupError>
where
    F: Fn(&T) -> &str,
{
    let mut matches: Vec<T> = candidates
        .into_iter()
        .filter(|candidate| name_of(candidate) == name)
        .collect();
    match matches.len() {
        0 => Err(LookupError::NotFound {
            kind: kind.to_owned(),
            name: name.to_owned(),
        }),
        1 => matches.pop().ok_or_else(|| LookupError::NotFound {
            kind: kind.to_owned(),
            name: name.to_owned(),
        }),
        count => Err(LookupError::Ambiguous {
            kind: kind.to_owned(),
            name: name.to_owned(),
            count,
        }),
    }
}
