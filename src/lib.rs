//! Reconciliation adapter between a declarative infrastructure engine and
//! the Scaleway APIs.
//!
//! Each managed resource kind implements [`driver::ResourceKind`]; a
//! [`driver::Reconciler`] drives it through create, read, update, delete and
//! import with locality-qualified identifiers, classified vendor errors,
//! bounded waits and per-identifier locks. The [`sweep`] harness removes
//! residual test resources across every region and zone.

pub mod classify;
pub mod config;
pub mod driver;
pub mod error;
pub mod expand;
pub mod locality;
pub mod lock;
pub mod lookup;
pub mod resources;
pub mod schema;
pub mod sweep;
pub mod test_support;
pub mod update;
pub mod value;
pub mod vendor;
pub mod wait;

pub use classify::{ErrorClass, classify, classify_in};
pub use config::{ConfigError, ProviderConfig, ProviderSettings, ResolvedConfig};
pub use driver::{ListedResource, OperationContext, Reconciler, ResourceKind};
pub use error::{Diagnostics, ErrorKind, Outcome, ProviderError};
pub use locality::{CompositeId, Locality, LocalityKind, Region, Zone};
pub use lock::{IdLock, LockRegistry};
pub use resources::Provider;
pub use schema::{Phase, Schema, Timeouts};
pub use sweep::{SweepConfig, SweepError, SweepRegistry, SweepSummary};
pub use value::{Attributes, Presence, Value};
pub use vendor::{ScalewayClient, VendorError};
