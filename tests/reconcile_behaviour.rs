//! Behavioural scenarios for the reconciliation driver.

mod reconcile;
