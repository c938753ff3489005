use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tracker")]
#[command(about = "Inspect and manage locally persisted issue tracker state", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Directory holding persisted state (or set TRACKER_STORE env var)
    #[arg(long, value_name = "DIR", env = "TRACKER_STORE", global = true)]
    pub store: Option<PathBuf>,

    /// Config file to use instead of the platform default (or set TRACKER_CONFIG env var)
    #[arg(long, value_name = "FILE", env = "TRACKER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Timer operations
    Timers(TimersCommand),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct TimersCommand {
    #[command(subcommand)]
    pub action: TimersAction,
}

#[derive(Subcommand)]
pub enum TimersAction {
    /// List every persisted timer
    List {
        /// Only show running timers
        #[arg(long)]
        running: bool,
    },
    /// Show one timer
    Get { issue_id: i64 },
    /// Finalize a timer as if its issue was moved to done
    ///
    /// The persisted session is reset. This command cannot reach the tracker,
    /// so the resulting time-log entry is only printed; pass --out to keep a
    /// copy and submit it yourself.
    ForceStop {
        issue_id: i64,
        /// Also write the time-log entry as JSON to this file
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}
