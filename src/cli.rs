use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "billsync", version, about = "Upload once, replicate everywhere")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON); defaults to the platform
    /// configuration directory.
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// More logging; repeat for even more. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Commit a file and copy it to the local and removable targets.
    Upload {
        file: PathBuf,
        /// Name to store the file under; defaults to the file's own name.
        #[arg(long)]
        name: Option<String>,
    },
    /// Write a committed file to `--output`, or to stdout.
    Fetch {
        name: String,
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// List committed files and where they are replicated.
    List,
    /// Per-target replication counts.
    Status,
    /// Retry every pending replica once.
    Sync,
    /// Repair differences between authoritative storage and the status
    /// database.
    Reconcile,
    /// Reconcile, then retry pending replicas on the configured interval
    /// until interrupted.
    Run,
}

impl Cli {
    /// Default log filter for the verbosity level.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "billsync=info,billsync_replicate=info,billsync_status=warn,billsync_storage=warn",
            1 => "billsync=debug,billsync_replicate=debug,billsync_status=info,billsync_storage=info",
            _ => "billsync=trace,billsync_replicate=trace,billsync_status=debug,billsync_storage=debug,billsync_config=debug",
        }
    }
}
