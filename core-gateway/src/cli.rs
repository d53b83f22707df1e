//! # Command Line Interface
//!
//! `opsi-core-svc`'s subcommand surface (spec §4.D): process control
//! (`start`/`stop`/`force-stop`/`restart`/`reload`/`status`), one-shot
//! maintenance (`setup`/`backup`/`restore`), and two standalone utilities
//! (`log-viewer`, `health-check`) that run without starting the full
//! server. Unix exit-code convention: `0` success, `1` usage/operational
//! failure. Grounded on the `clap::Parser`/`Subcommand` derive style seen
//! in the example pack's CLI binaries (e.g. `tome-term`'s `cli.rs`).

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "opsi-core-svc")]
#[command(about = "Desktop-management service core: session fabric, JSON-RPC dispatcher, message bus")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the arbiter and its workers in the foreground.
    Start,
    /// Request a graceful stop of a running instance (SIGTERM).
    Stop,
    /// Force an immediate stop of a running instance (SIGTERM twice).
    ForceStop,
    /// Stop, then start again.
    Restart,
    /// Ask a running instance to reload configuration and logging (SIGHUP).
    Reload,
    /// Print a one-line health summary (pings Redis, exits non-zero if unreachable).
    Status,
    /// One-time setup: purge expired logs, seed default accounts.
    Setup,
    /// Tail the central Redis log stream to stdout.
    LogViewer,
    /// Run the same checks `status`'s HTTP endpoint runs, but as a CLI exit code.
    HealthCheck,
    /// Snapshot session/config state to a file.
    Backup {
        /// Destination file path.
        #[arg(long)]
        path: String,
    },
    /// Restore session/config state from a previously taken backup.
    Restore {
        /// Source file path.
        #[arg(long)]
        path: String,
    },
}
