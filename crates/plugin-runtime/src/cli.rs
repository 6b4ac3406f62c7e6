#![allow(clippy::doc_markdown)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// pluginrt: demo host for the in-process plugin runtime.
///
/// Discovers bundle artifacts, resolves their dependency graph, and drives
/// them through the load/enable/disable/unload lifecycle.
#[derive(Debug, Parser)]
#[command(
    name = "pluginrt",
    version,
    about,
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Config file override.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Bootstrap a config file and bundle/data directories.
    Init(InitArgs),

    /// Discover and initialize all compatible bundles, then enable them.
    Run(RunArgs),

    /// Bundle lifecycle operations.
    #[command(subcommand)]
    Bundle(BundleCommand),

    /// Revocation list management.
    #[command(subcommand)]
    Trust(TrustCommand),

    /// Diagnose environment and configuration.
    Doctor(DoctorArgs),
}

// -- init --

#[derive(Debug, Parser)]
pub struct InitArgs {
    /// Runtime profile: strict, balanced, or legacy-risky.
    #[arg(long, default_value = "balanced")]
    pub profile: String,

    /// Output directory for generated config and bundle directories.
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

// -- run --

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Enable every successfully loaded bundle immediately.
    #[arg(long)]
    pub enable_all: bool,

    /// Start the hot reloader if `plugin.hotreload = "true"` is set.
    #[arg(long)]
    pub watch: bool,
}

// -- bundle --

#[derive(Debug, Subcommand)]
pub enum BundleCommand {
    /// List discovered bundles and their lifecycle state.
    List(BundleListArgs),

    /// Enable a bundle by id.
    Enable(BundleIdArgs),

    /// Disable a bundle by id.
    Disable(BundleIdArgs),

    /// Unload a bundle by id.
    Unload(BundleIdArgs),
}

#[derive(Debug, Parser)]
pub struct BundleListArgs {
    /// Only show bundles in this lifecycle state (e.g. Enabled, Failed).
    #[arg(long)]
    pub state: Option<String>,
}

#[derive(Debug, Parser)]
pub struct BundleIdArgs {
    /// Bundle identifier.
    pub bundle_id: String,
}

// -- trust --

#[derive(Debug, Subcommand)]
pub enum TrustCommand {
    /// Revoke a signer certificate by fingerprint.
    Revoke(TrustRevokeArgs),

    /// List revoked fingerprints.
    List(TrustListArgs),
}

#[derive(Debug, Parser)]
pub struct TrustRevokeArgs {
    /// Signer fingerprint, `sha256:<64 hex>`.
    pub fingerprint: String,

    /// Reason recorded alongside the revocation.
    #[arg(long)]
    pub reason: Option<String>,
}

#[derive(Debug, Parser)]
pub struct TrustListArgs {}

// -- doctor --

#[derive(Debug, Parser)]
pub struct DoctorArgs {
    /// Show verbose diagnostic output.
    #[arg(long)]
    pub verbose: bool,
}
