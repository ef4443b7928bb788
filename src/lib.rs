pub mod config;
pub mod email;
pub mod error;
pub mod fetch;
pub mod handlers;
pub mod job;
pub mod scheduler;
pub mod server;
pub mod templates;

use std::sync::Arc;

use config::ConfigStore;
use job::JobSlot;

/// Shared by the HTTP handlers and the startup wiring.
///
/// Both halves start out empty: the config is cached once it has been read
/// and the job is installed once it has been built. The refresh endpoint
/// reports which of the two is still missing.
#[derive(Clone, Default)]
pub struct AppState {
    pub config: ConfigStore,
    pub job: JobSlot,
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}


use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version, about = "Mails utility balances on a cron schedule")]
pub struct Args {
    #[arg(short, long, default_value = "config.toml")]
    pub config: std::path::PathBuf,
    /// Overrides `server.port`
    #[arg(short, long)]
    pub port: Option<u16>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the mail job once and exit
    Send {
        /// Print the rendered email instead of sending it
        #[arg(long)]
        dry_run: bool,
    },
}

impl Args {
    pub fn build() -> Self {
        Args::parse()
    }
}
