//! Command-line interface definitions for the `scw-sweeper` binary.
//!
//! This module centralises the clap parser structures so both the binary and
//! the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `scw-sweeper` binary.
#[derive(Debug, Parser)]
#[command(
    name = "scw-sweeper",
    about = "Delete residual Scaleway test resources in every region and zone"
)]
pub(crate) struct Cli {
    /// Only resources whose name starts with this prefix are deleted.
    ///
    /// Production resources are left alone, so keep the prefix specific to
    /// test runs.
    #[arg(long, env = "SCW_SWEEP_PREFIX", value_name = "PREFIX")]
    pub(crate) prefix: String,
    /// Restrict the sweep to these resource kinds (repeatable).
    ///
    /// Kinds that must be swept first are included automatically.
    #[arg(long = "kind", value_name = "KIND")]
    pub(crate) kinds: Vec<String>,
}
