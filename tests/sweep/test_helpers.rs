//! Shared fixtures and helpers for sweeper BDD scenarios.

use std::collections::BTreeMap;

use rstest::fixture;
use scw_provider::locality::LocalityDefaults;
use scw_provider::sweep::{ReconcilerSweeper, Sweeper};
use scw_provider::test_support::ScriptedKind;
use scw_provider::{LockRegistry, Reconciler, SweepError, SweepRegistry, SweepSummary};
use tokio::runtime::{Builder, Runtime};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error("invalid fixture: {0}")]
    Fixture(String),
}

#[derive(Clone, Debug)]
pub enum SweepOutcome {
    Finished(SweepSummary),
    Refused(SweepError),
}

#[derive(Clone, Debug)]
pub struct SweepContext {
    pub namespaces: ScriptedKind,
    pub containers: ScriptedKind,
    pub seeded: BTreeMap<String, Uuid>,
    pub outcome: Option<SweepOutcome>,
}

impl SweepContext {
    pub fn kind(&self, name: &str) -> Result<&ScriptedKind, StepError> {
        match name {
            "namespace" => Ok(&self.namespaces),
            "container" => Ok(&self.containers),
            other => Err(StepError::Fixture(format!("unknown kind {other}"))),
        }
    }

    pub fn summary(&self) -> Result<&SweepSummary, StepError> {
        match &self.outcome {
            Some(SweepOutcome::Finished(summary)) => Ok(summary),
            other => Err(StepError::Assertion(format!(
                "expected a finished sweep, got {other:?}"
            ))),
        }
    }

    /// Namespaces are swept after the containers they hold.
    pub fn registry(&self) -> SweepRegistry {
        let mut registry = SweepRegistry::new();
        registry
            .register(Sweeper::new(sweeper(&self.containers)))
            .unwrap_or_else(|err| panic!("container sweeper should register: {err}"));
        registry
            .register(Sweeper::new(sweeper(&self.namespaces)).after(&["container"]))
            .unwrap_or_else(|err| panic!("namespace sweeper should register: {err}"));
        registry
    }
}

fn sweeper(kind: &ScriptedKind) -> ReconcilerSweeper<ScriptedKind> {
    ReconcilerSweeper::new(Reconciler::new(
        kind.clone(),
        LockRegistry::new(),
        LocalityDefaults::default(),
    ))
}

#[fixture]
pub fn sweep_context() -> SweepContext {
    SweepContext {
        namespaces: ScriptedKind::regional("namespace"),
        containers: ScriptedKind::regional("container"),
        seeded: BTreeMap::new(),
        outcome: None,
    }
}

pub fn paused_runtime() -> Runtime {
    Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap_or_else(|err| panic!("tokio runtime should start for scenarios: {err}"))
}
