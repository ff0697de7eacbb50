//! Cleanup of residual test resources.
//!
//! Each resource kind registers a [`Sweeper`]: a [`SweepTarget`] that can
//! enumerate its localities, list what lives there and delete one item, plus
//! the kinds that must be swept before it. Only resources whose name starts
//! with the configured test prefix are touched. Per-item failures do not stop
//! the run; they are collected into the [`SweepSummary`].

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::driver::{OperationContext, Reconciler, ResourceKind};
use crate::error::{ErrorKind, ProviderError};
use crate::locality::Locality;
use crate::value::Attributes;

/// Boxed future returned by sweep targets.
pub type SweepFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Configuration for a sweep run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SweepConfig {
    prefix: String,
}

impl SweepConfig {
    /// Constructs a config, trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::InvalidConfig`] when the prefix is blank, which
    /// would match every resource.
    pub fn new(prefix: impl Into<String>) -> Result<Self, SweepError> {
        let trimmed = prefix.into().trim().to_owned();
        if trimmed.is_empty() {
            return Err(SweepError::InvalidConfig {
                field: String::from("prefix"),
            });
        }
        Ok(Self { prefix: trimmed })
    }

    /// Name prefix identifying test resources.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether a resource name belongs to a test run.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        name.starts_with(&self.prefix)
    }
}

/// A resource found by a sweep target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SweptResource {
    /// Resource kind.
    pub kind: &'static str,
    /// Composite identifier.
    pub id: String,
    /// Resource name.
    pub name: String,
}

/// A failure recorded without aborting the run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SweepFailure {
    /// Resource kind.
    pub kind: &'static str,
    /// Identifier of the item, or the locality when listing failed.
    pub target: String,
    /// Error message.
    pub message: String,
}

/// Summary of sweep work.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SweepSummary {
    /// Resources deleted, in deletion order.
    pub deleted: Vec<SweptResource>,
    /// Resources left alone because their name lacks the prefix.
    pub skipped: usize,
    /// Warnings raised by successful deletions.
    pub warnings: Vec<String>,
    /// Failures collected along the way.
    pub failures: Vec<SweepFailure>,
}

impl SweepSummary {
    /// Turns collected failures into an error.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Incomplete`] when anything failed.
    pub fn into_result(self) -> Result<Self, SweepError> {
        match self.failures.first() {
            None => Ok(self),
            Some(first) => Err(SweepError::Incomplete {
                count: self.failures.len(),
                first: format!("{} {}: {}", first.kind, first.target, first.message),
            }),
        }
    }
}

/// Errors returned by the sweeper harness.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SweepError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}")]
    InvalidConfig {
        /// Name of the missing or invalid field.
        field: String,
    },
    /// Raised when two sweepers claim the same kind.
    #[error("a sweeper for {kind} is already registered")]
    Duplicate {
        /// Resource kind.
        kind: String,
    },
    /// Raised when a requested kind has no sweeper.
    #[error("no sweeper for {kind}")]
    UnknownKind {
        /// Requested kind.
        kind: String,
    },
    /// Raised when a sweeper depends on a kind nobody sweeps.
    #[error("sweeper for {kind} depends on unknown kind {dependency}")]
    UnknownDependency {
        /// Dependent kind.
        kind: String,
        /// Missing dependency.
        dependency: String,
    },
    /// Raised when sweeper dependencies form a cycle.
    #[error("sweeper dependencies form a cycle through {kind}")]
    Cycle {
        /// A kind on the cycle.
        kind: String,
    },
    /// Raised when some items could not be listed or deleted.
    #[error("{count} sweep failure(s); first: {first}")]
    Incomplete {
        /// Number of failures.
        count: usize,
        /// Rendering of the first failure.
        first: String,
    },
}

/// Listing and deletion of one kind, as seen by the harness.
pub trait SweepTarget: Send + Sync {
    /// Resource kind.
    fn kind(&self) -> &'static str;

    /// Every locality the kind can live in.
    fn localities(&self) -> Vec<Locality>;

    /// Lists the resources of a locality.
    fn list<'a>(
        &'a self,
        locality: &'a Locality,
        ctx: &'a OperationContext,
    ) -> SweepFuture<'a, Vec<SweptResource>>;

    /// Deletes one resource, returning warnings. An absent resource is
    /// success.
    fn delete<'a>(
        &'a self,
        resource: &'a SweptResource,
        ctx: &'a OperationContext,
    ) -> SweepFuture<'a, Vec<String>>;
}

/// Sweep target backed by a [`Reconciler`], so deletion follows the same
/// stop, wait and cascade rules as a regular destroy.
#[derive(Debug)]
pub struct ReconcilerSweeper<K> {
    reconciler: Reconciler<K>,
    prior: Attributes,
}

impl<K: ResourceKind> ReconcilerSweeper<K> {
    /// Wraps a reconciler.
    #[must_use]
    pub fn new(reconciler: Reconciler<K>) -> Self {
        Self {
            reconciler,
            prior: Attributes::new(),
        }
    }

    /// Local attributes assumed for every swept resource, such as cascade
    /// flags.
    #[must_use]
    pub fn with_prior(mut self, prior: Attributes) -> Self {
        self.prior = prior;
        self
    }
}

impl<K: ResourceKind> SweepTarget for ReconcilerSweeper<K> {
    fn kind(&self) -> &'static str {
        self.reconciler.kind().name()
    }

    fn localities(&self) -> Vec<Locality> {
        Locality::enumerate(self.reconciler.kind().locality_kind())
    }

    fn list<'a>(
        &'a self,
        locality: &'a Locality,
        ctx: &'a OperationContext,
    ) -> SweepFuture<'a, Vec<SweptResource>> {
        Box::pin(async move {
            let kind = self.kind();
            let listed = self.reconciler.list(locality, ctx).await?;
            Ok(listed
                .into_iter()
                .map(|resource| SweptResource {
                    kind,
                    id: resource.id.to_string(),
                    name: resource.name,
                })
                .collect())
        })
    }

    fn delete<'a>(
        &'a self,
        resource: &'a SweptResource,
        ctx: &'a OperationContext,
    ) -> SweepFuture<'a, Vec<String>> {
        Box::pin(async move {
            let outcome = self.reconciler.delete(&resource.id, &self.prior, ctx).await?;
            Ok(outcome.diagnostics.warnings().to_vec())
        })
    }
}

/// A registered target and the kinds swept before it.
pub struct Sweeper {
    target: Box<dyn SweepTarget>,
    after: Vec<&'static str>,
}

impl Sweeper {
    /// Wraps a target with no dependencies.
    #[must_use]
    pub fn new(target: impl SweepTarget + 'static) -> Self {
        Self {
            target: Box::new(target),
            after: Vec::new(),
        }
    }

    /// Sweeps `kinds` first; children must go before their parent.
    #[must_use]
    pub fn after(mut self, kinds: &[&'static str]) -> Self {
        self.after.extend_from_slice(kinds);
        self
    }

    /// Kind swept by this sweeper.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.target.kind()
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("kind", &self.kind())
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}

/// Every sweeper known to the process.
#[derive(Debug, Default)]
pub struct SweepRegistry {
    sweepers: BTreeMap<&'static str, Sweeper>,
}

impl SweepRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sweeper.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Duplicate`] when the kind is already registered.
    pub fn register(&mut self, sweeper: Sweeper) -> Result<(), SweepError> {
        let kind = sweeper.kind();
        if self.sweepers.contains_key(kind) {
            return Err(SweepError::Duplicate {
                kind: kind.to_owned(),
            });
        }
        self.sweepers.insert(kind, sweeper);
        Ok(())
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.sweepers.keys().copied().collect()
    }

    /// Kinds in run order. With a non-empty `only`, the selection is
    /// restricted to those kinds and whatever they depend on.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError`] for unknown kinds, unknown dependencies and
    /// cycles.
    pub fn order(&self, only: &[String]) -> Result<Vec<&'static str>, SweepError> {
        let roots: Vec<&'static str> = if only.is_empty() {
            self.kinds()
        } else {
            only.iter()
                .map(|wanted| {
                    self.sweepers
                        .get_key_value(wanted.as_str())
                        .map(|(kind, _)| *kind)
                        .ok_or_else(|| SweepError::UnknownKind {
                            kind: wanted.clone(),
                        })
                })
                .collect::<Result<_, _>>()?
        };
        let mut ordered = Vec::new();
        let mut done = BTreeSet::new();
        let mut visiting = BTreeSet::new();
        for root in roots {
            self.visit(root, &mut visiting, &mut done, &mut ordered)?;
        }
        Ok(ordered)
    }

    fn visit(
        &self,
        kind: &'static str,
        visiting: &mut BTreeSet<&'static str>,
        done: &mut BTreeSet<&'static str>,
        ordered: &mut Vec<&'static str>,
    ) -> Result<(), SweepError> {
        if done.contains(kind) {
            return Ok(());
        }
        if !visiting.insert(kind) {
            return Err(SweepError::Cycle {
                kind: kind.to_owned(),
            });
        }
        let sweeper = self.sweepers.get(kind).ok_or_else(|| SweepError::UnknownKind {
            kind: kind.to_owned(),
        })?;
        for dependency in &sweeper.after {
            if !self.sweepers.contains_key(dependency) {
                return Err(SweepError::UnknownDependency {
                    kind: kind.to_owned(),
                    dependency: (*dependency).to_owned(),
                });
            }
            self.visit(*dependency, visiting, done, ordered)?;
        }
        visiting.remove(kind);
        done.insert(kind);
        ordered.push(kind);
        Ok(())
    }

    /// Sweeps every selected kind across all of its localities.
    ///
    /// A listing answered with "not found" counts as empty. Listing and
    /// deletion failures are recorded in the summary and the run carries
    /// on; call [`SweepSummary::into_result`] to fail on them.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError`] when the selection cannot be ordered.
    pub async fn run(
        &self,
        config: &SweepConfig,
        only: &[String],
        ctx: &OperationContext,
    ) -> Result<SweepSummary, SweepError> {
        let mut summary = SweepSummary::default();
        for kind in self.order(only)? {
            let Some(sweeper) = self.sweepers.get(kind) else {
                continue;
            };
            info!(kind, prefix = config.prefix(), "sweeping");
            for locality in sweeper.target.localities() {
                sweep_locality(sweeper.target.as_ref(), &locality, config, ctx, &mut summary)
                    .await;
            }
        }
        info!(
            deleted = summary.deleted.len(),
            skipped = summary.skipped,
            failures = summary.failures.len(),
            "sweep finished"
        );
        Ok(summary)
    }
}

async fn sweep_locality(
    target: &dyn SweepTarget,
    locality: &Locality,
    config: &SweepConfig,
    ctx: &OperationContext,
    summary: &mut SweepSummary,
) {
    let kind = target.kind();
    let listed = match target.list(locality, ctx).await {
        Ok(listed) => listed,
        Err(err) if err.kind == ErrorKind::NotFound => {
            debug!(kind, %locality, "listing endpoint is gone; nothing to sweep");
            return;
        }
        Err(err) => {
            warn!(kind, %locality, error = %err, "listing failed");
            summary.failures.push(SweepFailure {
                kind,
                target: locality.to_string(),
                message: err.to_string(),
            });
            return;
        }
    };
    for resource in listed {
        if !config.matches(&resource.name) {
            summary.skipped = summary.skipped.saturating_add(1);
            continue;
        }
        match target.delete(&resource, ctx).await {
            Ok(warnings) => {
                info!(kind, id = %resource.id, name = %resource.name, "swept");
                summary.warnings.extend(warnings);
                summary.deleted.push(resource);
            }
            Err(err) => {
                warn!(kind, id = %resource.id, error = %err, "delete failed");
                summary.failures.push(SweepFailure {
                    kind,
                    target: resource.id,
                    message: err.to_string(),
                });
            }
        }
    }
}
