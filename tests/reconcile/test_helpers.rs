//! Shared fixtures and helpers for reconciliation BDD scenarios.

use std::time::Duration;

use rstest::fixture;
use scw_provider::driver::ResourceState;
use scw_provider::locality::LocalityDefaults;
use scw_provider::test_support::ScriptedKind;
use scw_provider::{ErrorKind, LockRegistry, Reconciler, Region, Zone};
use tokio::runtime::{Builder, Runtime};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error("invalid fixture: {0}")]
    Fixture(String),
}

#[derive(Clone, Debug)]
pub enum ReconcileResult {
    Success(ResourceState),
    Deleted(usize),
    Failure { kind: ErrorKind, message: String },
}

#[derive(Clone, Debug)]
pub struct ReconcileContext {
    pub namespaces: ScriptedKind,
    pub servers: ScriptedKind,
    pub imported: Option<ResourceState>,
    pub outcome: Option<ReconcileResult>,
    pub elapsed: Duration,
}

impl ReconcileContext {
    pub fn kind(&self, name: &str) -> Result<&ScriptedKind, StepError> {
        match name {
            "namespace" => Ok(&self.namespaces),
            "server" => Ok(&self.servers),
            other => Err(StepError::Fixture(format!("unknown kind {other}"))),
        }
    }

    pub fn state(&self) -> Result<&ResourceState, StepError> {
        match &self.outcome {
            Some(ReconcileResult::Success(state)) => Ok(state),
            other => Err(StepError::Assertion(format!(
                "expected a resource state, got {other:?}"
            ))),
        }
    }

    pub fn with_outcome(mut self, outcome: ReconcileResult, elapsed: Duration) -> Self {
        self.outcome = Some(outcome);
        self.elapsed = elapsed;
        self
    }
}

#[fixture]
pub fn reconcile_context() -> ReconcileContext {
    ReconcileContext {
        namespaces: ScriptedKind::regional("namespace"),
        servers: ScriptedKind::zonal("server"),
        imported: None,
        outcome: None,
        elapsed: Duration::ZERO,
    }
}

pub fn reconciler(kind: &ScriptedKind) -> Reconciler<ScriptedKind> {
    let region =
        Region::parse("fr-par").unwrap_or_else(|err| panic!("default region should parse: {err}"));
    let zone =
        Zone::parse("fr-par-1").unwrap_or_else(|err| panic!("default zone should parse: {err}"));
    Reconciler::new(
        kind.clone(),
        LockRegistry::new(),
        LocalityDefaults::new(region, zone),
    )
}

/// Single-threaded runtime on a paused clock, so waits complete instantly
/// while elapsed time stays observable.
pub fn paused_runtime() -> Runtime {
    Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap_or_else(|err| panic!("tokio runtime should start for scenarios: {err}"))
}
