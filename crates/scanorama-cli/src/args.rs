//! Command-line surface for the operator CLI. This stands in for the
//! HTTP/auth layer of a full deployment: every subcommand here maps
//! directly onto one of the daemon's boundary operations —
//! `Pool.SubmitJob`, `Scheduler.{Add,Remove,Refresh}Target`,
//! `Pool.GetStats`/`Scheduler.GetStats` — with no routing, RBAC, or
//! wire protocol of its own.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "scanorama",
    version,
    about = "Scanorama scan execution daemon and operator CLI"
)]
pub struct Cli {
    /// Path to the SQLite database (created if missing).
    #[arg(long, global = true, default_value = "scanorama.db")]
    pub db: PathBuf,

    /// Path to a TOML config file. Defaults are used if omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Suppress the startup banner.
    #[arg(long, global = true)]
    pub no_banner: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scheduler and worker pool until interrupted (Ctrl-C).
    Run,

    /// Submit a one-off ad-hoc scan and wait for it to finish.
    Submit(SubmitArgs),

    /// Manage persisted scan targets.
    Target {
        #[command(subcommand)]
        action: TargetAction,
    },

    /// Print a point-in-time snapshot of pool/scheduler stats.
    ///
    /// This process starts its own daemon for the duration of the
    /// command, so the snapshot reflects only what happened during this
    /// invocation. A long-running `run` process would need an RPC
    /// surface of its own to expose its live stats.
    Stats,

    /// Write a default configuration file to disk.
    InitConfig {
        #[arg(long, default_value = "scanorama.toml")]
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Display name for the job (not persisted as a ScanTarget).
    #[arg(long, default_value = "ad-hoc")]
    pub name: String,

    /// A single address or CIDR, e.g. `10.0.0.1` or `10.0.0.0/24`.
    #[arg(long)]
    pub network: String,

    /// Port spec, e.g. `22,80,443,8080-8090`.
    #[arg(long)]
    pub ports: String,

    /// One of connect|syn|version|aggressive|stealth|comprehensive.
    #[arg(long, default_value = "connect")]
    pub scan_type: String,

    /// Seconds to wait for the job to reach a terminal state.
    #[arg(long, default_value_t = 60)]
    pub wait_secs: u64,
}

#[derive(Subcommand, Debug)]
pub enum TargetAction {
    /// Persist a new scheduled target.
    Add(AddTargetArgs),
    /// List every persisted target.
    List,
}

#[derive(Args, Debug)]
pub struct AddTargetArgs {
    #[arg(long)]
    pub name: String,

    /// A single address or CIDR, e.g. `10.0.0.1` or `10.0.0.0/24`.
    #[arg(long)]
    pub network: String,

    /// Port spec, e.g. `22,80,443,8080-8090`.
    #[arg(long)]
    pub ports: String,

    /// One of connect|syn|version|aggressive|stealth|comprehensive.
    #[arg(long, default_value = "connect")]
    pub scan_type: String,

    /// Scan interval in seconds. 0 means ad-hoc (not scheduled).
    #[arg(long, default_value_t = 3600)]
    pub interval_seconds: i64,

    /// Create the target disabled.
    #[arg(long)]
    pub disabled: bool,
}
