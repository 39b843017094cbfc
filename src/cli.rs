//! CLI surface (§4.G, §6): `proxy start|stop|restart|status|servers|logs`.
//!
//! Grounded on the teacher's `clap`-derive `Cli`/`Command` shape, expanded
//! from 3 to 6 subcommands per `SPEC_FULL.md` §14.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "proxy", version, about = "MCP aggregation proxy")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the proxy.
    Start {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long = "config")]
        config_path: Option<PathBuf>,
        #[arg(long = "log-level")]
        log_level: Option<String>,
        /// Daemonize: spawn a detached background process and return once it
        /// answers `/health`.
        #[arg(long)]
        background: bool,
    },
    /// Stop a running background daemon.
    Stop,
    /// Stop then start a background daemon.
    Restart {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long = "config")]
        config_path: Option<PathBuf>,
        #[arg(long = "log-level")]
        log_level: Option<String>,
    },
    /// Report daemon liveness and backend health (exit 0/1/2).
    Status {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the current backend registry snapshot.
    Servers {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print (optionally follow) the background daemon's log file.
    Logs {
        #[arg(long)]
        follow: bool,
        #[arg(long, default_value_t = 100)]
        lines: usize,
    },
}
