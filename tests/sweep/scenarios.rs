//! BDD scenarios for the sweeper harness.

use rstest_bdd_macros::scenario;

use super::test_helpers::{SweepContext, sweep_context};

#[scenario(
    path = "tests/features/sweep.feature",
    name = "Delete prefixed resources children first"
)]
fn scenario_children_first(sweep_context: SweepContext) {
    drop(sweep_context);
}

#[scenario(
    path = "tests/features/sweep.feature",
    name = "A listing that answers not found is empty"
)]
fn scenario_listing_not_found(sweep_context: SweepContext) {
    drop(sweep_context);
}

#[scenario(
    path = "tests/features/sweep.feature",
    name = "Failures are collected and the sweep continues"
)]
fn scenario_failures_collected(sweep_context: SweepContext) {
    drop(sweep_context);
}

#[scenario(
    path = "tests/features/sweep.feature",
    name = "Blank prefixes are refused"
)]
fn scenario_blank_prefix(sweep_context: SweepContext) {
    drop(sweep_context);
}
