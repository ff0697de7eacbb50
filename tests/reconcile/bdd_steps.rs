//! BDD step definitions for reconciliation behaviour.

use rstest_bdd_macros::{given, then, when};
use scw_provider::test_support::{Call, FakeResource, ScriptedKind, unavailable};
use scw_provider::wait::DEFAULT_RETRY_INTERVAL;
use scw_provider::{Attributes, Locality, OperationContext, ProviderError, Value};
use tokio::time::Instant;
use uuid::Uuid;

use super::test_helpers::{
    ReconcileContext, ReconcileResult, StepError, paused_runtime, reconciler,
};

fn uuid(raw: &str) -> Uuid {
    Uuid::parse_str(raw.trim()).unwrap_or_else(|err| panic!("fixture id should parse: {err}"))
}

fn locality(raw: &str) -> Locality {
    Locality::parse(raw.trim())
        .unwrap_or_else(|err| panic!("fixture locality should parse: {err}"))
}

fn scripted<'a>(reconcile_context: &'a ReconcileContext, kind: &str) -> &'a ScriptedKind {
    reconcile_context
        .kind(kind)
        .unwrap_or_else(|err| panic!("test setup requires a known kind: {err}"))
}

fn failure(err: &ProviderError) -> ReconcileResult {
    ReconcileResult::Failure {
        kind: err.kind,
        message: err.to_string(),
    }
}

#[given("the vendor assigns {kind} id \"{id}\"")]
fn vendor_assigns_id(
    reconcile_context: ReconcileContext,
    kind: String,
    id: String,
) -> ReconcileContext {
    scripted(&reconcile_context, &kind).next_ids([uuid(&id)]);
    reconcile_context
}

#[given("new namespaces stay provisioning for \"{polls}\" polls")]
fn namespaces_provision_slowly(
    reconcile_context: ReconcileContext,
    polls: u32,
) -> ReconcileContext {
    reconcile_context.namespaces.provisioning_polls(polls);
    reconcile_context
}

#[given("a {kind} \"{name}\" exists as \"{id}\" in \"{place}\"")]
fn resource_exists(
    reconcile_context: ReconcileContext,
    kind: String,
    name: String,
    id: String,
    place: String,
) -> ReconcileContext {
    scripted(&reconcile_context, &kind).insert(FakeResource::new(
        uuid(&id),
        locality(&place),
        &name,
    ));
    reconcile_context
}

#[given("deleted servers linger for \"{polls}\" polls")]
fn deletes_lag(reconcile_context: ReconcileContext, polls: u32) -> ReconcileContext {
    reconcile_context.servers.delete_lag(polls);
    reconcile_context
}

#[given("the next \"{count}\" server updates fail with service unavailable")]
fn updates_fail(reconcile_context: ReconcileContext, count: usize) -> ReconcileContext {
    reconcile_context
        .servers
        .fail_updates(std::iter::repeat_with(unavailable).take(count));
    reconcile_context
}

#[when("I create namespace \"{name}\" in \"{region}\"")]
fn create_namespace(
    reconcile_context: ReconcileContext,
    name: String,
    region: String,
) -> ReconcileContext {
    let runtime = paused_runtime();
    let reconciler = reconciler(&reconcile_context.namespaces);
    let desired: Attributes = [("name", name.as_str()), ("region", region.as_str())]
        .into_iter()
        .collect();
    let (result, elapsed) = runtime.block_on(async {
        let started = Instant::now();
        let result = reconciler.create(&desired, &OperationContext::new()).await;
        (result, started.elapsed())
    });
    let outcome = match result {
        Ok(created) => ReconcileResult::Success(created.value),
        Err(err) => failure(&err),
    };
    reconcile_context.with_outcome(outcome, elapsed)
}

#[when("I import server \"{id}\"")]
fn import_server(mut reconcile_context: ReconcileContext, id: String) -> ReconcileContext {
    let runtime = paused_runtime();
    let reconciler = reconciler(&reconcile_context.servers);
    let result = runtime.block_on(reconciler.import(id.trim(), &OperationContext::new()));
    let outcome = match result {
        Ok(state) => {
            reconcile_context.imported = Some(state.clone());
            ReconcileResult::Success(state)
        }
        Err(err) => failure(&err),
    };
    reconcile_context.with_outcome(outcome, std::time::Duration::ZERO)
}

#[when("I apply the imported server state unchanged")]
fn apply_unchanged(reconcile_context: ReconcileContext) -> ReconcileContext {
    let Some(prior) = reconcile_context.imported.clone() else {
        panic!("test setup requires an imported server");
    };
    let runtime = paused_runtime();
    let reconciler = reconciler(&reconcile_context.servers);
    let result = runtime.block_on(reconciler.apply(
        Some(&prior),
        &prior.attributes,
        &OperationContext::new(),
    ));
    let outcome = match result {
        Ok(applied) => ReconcileResult::Success(applied.value),
        Err(err) => failure(&err),
    };
    reconcile_context.with_outcome(outcome, std::time::Duration::ZERO)
}

#[when("I look up namespace \"{name}\" in \"{region}\"")]
fn lookup_namespace(
    reconcile_context: ReconcileContext,
    name: String,
    region: String,
) -> ReconcileContext {
    let runtime = paused_runtime();
    let reconciler = reconciler(&reconcile_context.namespaces);
    let place = locality(&region);
    let result =
        runtime.block_on(reconciler.lookup(&place, name.trim(), &OperationContext::new()));
    let outcome = match result {
        Ok(state) => ReconcileResult::Success(state),
        Err(err) => failure(&err),
    };
    reconcile_context.with_outcome(outcome, std::time::Duration::ZERO)
}

#[when("I delete server \"{id}\" twice at once")]
fn delete_twice(reconcile_context: ReconcileContext, id: String) -> ReconcileContext {
    let runtime = paused_runtime();
    let reconciler = reconciler(&reconcile_context.servers);
    let prior = Attributes::new();
    let ctx = OperationContext::new();
    let (left, right) = runtime.block_on(async {
        tokio::join!(
            reconciler.delete(id.trim(), &prior, &ctx),
            reconciler.delete(id.trim(), &prior, &ctx),
        )
    });
    let outcome = match (left, right) {
        (Ok(_), Ok(_)) => ReconcileResult::Deleted(2),
        (Err(err), _) | (_, Err(err)) => failure(&err),
    };
    reconcile_context.with_outcome(outcome, std::time::Duration::ZERO)
}

fn update_server(
    reconcile_context: ReconcileContext,
    id: &str,
    attribute: &str,
    value: &str,
) -> ReconcileContext {
    let runtime = paused_runtime();
    let reconciler = reconciler(&reconcile_context.servers);
    let ctx = OperationContext::new();
    let (result, elapsed) = runtime
        .block_on(async {
            let prior = reconciler.import(id.trim(), &ctx).await?;
            let mut desired = prior.attributes.clone();
            desired.set(attribute, value.trim());
            desired.unset("status");
            let started = Instant::now();
            let applied = reconciler.apply(Some(&prior), &desired, &ctx).await;
            Ok::<_, ProviderError>((applied, started.elapsed()))
        })
        .unwrap_or_else(|err| panic!("test setup requires an importable server: {err}"));
    let outcome = match result {
        Ok(applied) => ReconcileResult::Success(applied.value),
        Err(err) => failure(&err),
    };
    reconcile_context.with_outcome(outcome, elapsed)
}

#[when("I rename server \"{id}\" to \"{name}\"")]
fn rename_server(
    reconcile_context: ReconcileContext,
    id: String,
    name: String,
) -> ReconcileContext {
    update_server(reconcile_context, &id, "name", &name)
}

#[when("I move server \"{id}\" to zone \"{zone}\"")]
fn move_server(reconcile_context: ReconcileContext, id: String, zone: String) -> ReconcileContext {
    update_server(reconcile_context, &id, "zone", &zone)
}

#[then("the state id is \"{id}\"")]
fn state_id(reconcile_context: &ReconcileContext, id: String) -> Result<(), StepError> {
    let state = reconcile_context.state()?;
    if state.id.to_string() == id.trim() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("expected id {id}, got {}", state.id)))
    }
}

#[then("the state attribute \"{name}\" is \"{value}\"")]
fn state_attribute(
    reconcile_context: &ReconcileContext,
    name: String,
    value: String,
) -> Result<(), StepError> {
    let found = reconcile_context.state()?.attributes.get(name.trim());
    if found == Some(&Value::from(value.trim())) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {name} = {value}, got {found:?}"
        )))
    }
}

#[then(
    "the namespace vendor saw \"{creates}\" creates, at least \"{gets}\" gets and \"{updates}\" updates"
)]
fn namespace_calls(
    reconcile_context: &ReconcileContext,
    creates: usize,
    gets: usize,
    updates: usize,
) -> Result<(), StepError> {
    let kind = &reconcile_context.namespaces;
    if kind.creates() == creates && kind.gets() >= gets && kind.updates() == updates {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "unexpected calls: {:?}",
            kind.calls()
        )))
    }
}

#[then("the {kind} vendor saw no writes")]
fn no_writes(reconcile_context: &ReconcileContext, kind: String) -> Result<(), StepError> {
    let vendor = reconcile_context.kind(&kind)?;
    if vendor.writes() == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no writes, got {:?}",
            vendor.calls()
        )))
    }
}

#[then("the operation fails with \"{kind}\"")]
fn operation_fails(reconcile_context: &ReconcileContext, kind: String) -> Result<(), StepError> {
    match &reconcile_context.outcome {
        Some(ReconcileResult::Failure {
            kind: found,
            message,
        }) if found.to_string() == kind.trim() => {
            if message.starts_with(kind.trim()) {
                Ok(())
            } else {
                Err(StepError::Assertion(format!("unexpected message {message}")))
            }
        }
        other => Err(StepError::Assertion(format!(
            "expected a {kind} failure, got {other:?}"
        ))),
    }
}

#[then("both deletes succeed")]
fn both_deletes_succeed(reconcile_context: &ReconcileContext) -> Result<(), StepError> {
    match &reconcile_context.outcome {
        Some(ReconcileResult::Deleted(2)) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected two successful deletes, got {other:?}"
        ))),
    }
}

#[then("the server vendor saw \"{count}\" deletes")]
fn server_deletes(reconcile_context: &ReconcileContext, count: usize) -> Result<(), StepError> {
    let found = reconcile_context.servers.deletes();
    if found == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("expected {count} deletes, got {found}")))
    }
}

#[then("the server vendor saw \"{count}\" updates")]
fn server_updates(reconcile_context: &ReconcileContext, count: usize) -> Result<(), StepError> {
    let found = reconcile_context.servers.updates();
    if found == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("expected {count} updates, got {found}")))
    }
}

#[then("the operation waited \"{intervals}\" retry intervals")]
fn waited_intervals(reconcile_context: &ReconcileContext, intervals: u32) -> Result<(), StepError> {
    let expected = DEFAULT_RETRY_INTERVAL * intervals;
    if reconcile_context.elapsed == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected:?}, waited {:?}",
            reconcile_context.elapsed
        )))
    }
}

#[then("the server vendor deleted before creating and never updated")]
fn replaced(reconcile_context: &ReconcileContext) -> Result<(), StepError> {
    let writes: Vec<Call> = reconcile_context
        .servers
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::Delete(_) | Call::Create(_) | Call::Update(..)))
        .collect();
    if matches!(writes.as_slice(), [Call::Delete(_), Call::Create(_)]) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected writes {writes:?}")))
    }
}
