use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "ttork",
    version,
    about = "Terminal dashboard for Tilt projects and the Kubernetes workloads they deploy."
)]
pub struct CliArgs {
    /// Config file (defaults to $TTORK_CONFIG, ./ttork.yaml, ~/.config/ttork/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_filter: String,

    /// Write logs to this file; logs are discarded otherwise
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Open the dashboard
    Start(StartArgs),
    /// Print the version and exit
    Version,
}

#[derive(Debug, Clone, Args)]
pub struct StartArgs {
    /// Start every configured Tilt project on launch
    #[arg(long)]
    pub autostart: bool,

    /// Tilt status refresh interval in milliseconds
    #[arg(long, default_value_t = 1_000)]
    pub tree_refresh_ms: u64,

    /// Cluster resource refresh interval in milliseconds
    #[arg(long, default_value_t = 2_000)]
    pub table_refresh_ms: u64,
}

impl Default for StartArgs {
    fn default() -> Self {
        Self {
            autostart: false,
            tree_refresh_ms: 1_000,
            table_refresh_ms: 2_000,
        }
    }
}

impl StartArgs {
    pub fn tree_period(&self) -> Duration {
        Duration::from_millis(self.tree_refresh_ms.max(1))
    }

    pub fn table_period(&self) -> Duration {
        Duration::from_millis(self.table_refresh_ms.max(1))
    }
}

/// Help and version output succeed; every other parse failure exits 1.
pub fn exit_code(error: &clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp
        | ErrorKind::DisplayVersion
        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => 0,
        _ => 1,
    }
}

pub fn version_line() -> String {
    format!("ttork {}", env!("CARGO_PKG_VERSION"))
}
