//! BDD scenarios for the reconciliation driver.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ReconcileContext, reconcile_context};

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Create waits until the resource is ready"
)]
fn scenario_create_ready(reconcile_context: ReconcileContext) {
    drop(reconcile_context);
}

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Import by identifier then plan nothing"
)]
fn scenario_import_by_id(reconcile_context: ReconcileContext) {
    drop(reconcile_context);
}

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Ambiguous name lookup fails without touching state"
)]
fn scenario_ambiguous_lookup(reconcile_context: ReconcileContext) {
    drop(reconcile_context);
}

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Concurrent deletes are idempotent"
)]
fn scenario_concurrent_deletes(reconcile_context: ReconcileContext) {
    drop(reconcile_context);
}

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Transient update failures are retried"
)]
fn scenario_transient_retry(reconcile_context: ReconcileContext) {
    drop(reconcile_context);
}

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Locality change replaces the resource"
)]
fn scenario_force_new(reconcile_context: ReconcileContext) {
    drop(reconcile_context);
}
