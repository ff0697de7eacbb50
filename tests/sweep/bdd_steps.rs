//! BDD step definitions for sweeper behaviour.

use rstest_bdd_macros::{given, then, when};
use scw_provider::test_support::{FakeResource, not_found};
use scw_provider::{Locality, OperationContext, SweepConfig, VendorError};
use uuid::Uuid;

use super::test_helpers::{SweepContext, SweepOutcome, StepError, paused_runtime};

#[given("a {kind} \"{name}\" in \"{place}\"")]
fn seeded(
    mut sweep_context: SweepContext,
    kind: String,
    name: String,
    place: String,
) -> SweepContext {
    let id = Uuid::new_v4();
    let locality = Locality::parse(place.trim())
        .unwrap_or_else(|err| panic!("fixture locality should parse: {err}"));
    sweep_context
        .kind(&kind)
        .unwrap_or_else(|err| panic!("test setup requires a known kind: {err}"))
        .insert(FakeResource::new(id, locality, name.trim()));
    sweep_context.seeded.insert(name.trim().to_owned(), id);
    sweep_context
}

#[given("listing containers in \"{place}\" answers not found")]
fn listing_not_found(sweep_context: SweepContext, place: String) -> SweepContext {
    sweep_context
        .containers
        .fail_list(place.trim(), not_found(Uuid::new_v4()));
    sweep_context
}

#[given("listing containers in \"{place}\" fails")]
fn listing_fails(sweep_context: SweepContext, place: String) -> SweepContext {
    sweep_context.containers.fail_list(
        place.trim(),
        VendorError::new(500, "internal_error", "listing broke"),
    );
    sweep_context
}

#[when("I sweep with prefix \"{prefix}\"")]
fn sweep(mut sweep_context: SweepContext, prefix: String) -> SweepContext {
    let config = match SweepConfig::new(prefix) {
        Ok(config) => config,
        Err(err) => {
            sweep_context.outcome = Some(SweepOutcome::Refused(err));
            return sweep_context;
        }
    };
    let registry = sweep_context.registry();
    let runtime = paused_runtime();
    let outcome = match runtime.block_on(registry.run(&config, &[], &OperationContext::new())) {
        Ok(summary) => SweepOutcome::Finished(summary),
        Err(err) => SweepOutcome::Refused(err),
    };
    sweep_context.outcome = Some(outcome);
    sweep_context
}

#[then("the deleted kinds are \"{kinds}\"")]
fn deleted_kinds(sweep_context: &SweepContext, kinds: String) -> Result<(), StepError> {
    let found: Vec<&str> = sweep_context
        .summary()?
        .deleted
        .iter()
        .map(|item| item.kind)
        .collect();
    let expected: Vec<&str> = kinds.split(',').map(str::trim).collect();
    if found == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected deletions {expected:?}, got {found:?}"
        )))
    }
}

#[then("the {kind} \"{name}\" survives")]
fn survives(sweep_context: &SweepContext, kind: String, name: String) -> Result<(), StepError> {
    let Some(id) = sweep_context.seeded.get(name.trim()) else {
        return Err(StepError::Fixture(format!("{name} was never seeded")));
    };
    if sweep_context.kind(&kind)?.resource(*id).is_some() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{name} was deleted")))
    }
}

#[then("the sweep succeeds")]
fn sweep_succeeds(sweep_context: &SweepContext) -> Result<(), StepError> {
    sweep_context
        .summary()?
        .clone()
        .into_result()
        .map(drop)
        .map_err(|err| StepError::Assertion(err.to_string()))
}

#[then("the sweep reports failures for \"{targets}\"")]
fn sweep_fails(sweep_context: &SweepContext, targets: String) -> Result<(), StepError> {
    let summary = sweep_context.summary()?;
    let found: Vec<&str> = summary
        .failures
        .iter()
        .map(|failure| failure.target.as_str())
        .collect();
    let expected: Vec<&str> = targets.split(',').map(str::trim).collect();
    if found != expected {
        return Err(StepError::Assertion(format!(
            "expected failures for {expected:?}, got {found:?}"
        )));
    }
    match summary.clone().into_result() {
        Err(_) => Ok(()),
        Ok(_) => Err(StepError::Assertion(String::from(
            "failures did not fail the sweep",
        ))),
    }
}

#[then("the sweep is refused")]
fn sweep_refused(sweep_context: &SweepContext) -> Result<(), StepError> {
    match &sweep_context.outcome {
        Some(SweepOutcome::Refused(_)) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected the sweep to be refused, got {other:?}"
        ))),
    }
}
