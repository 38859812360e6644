//! Command-line definitions.

use clap::{Args, Parser, Subcommand};
use kbsync_engine::{Sort, SortKey};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "kbsync", version, about)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "KBSYNC_CONFIG")]
    pub config: Option<PathBuf>,
    /// Directory served as the remote store (overrides `remote.root`)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,
    /// Job (knowledge base) to work against (overrides `remote.job`)
    #[arg(short, long, global = true)]
    pub job: Option<String>,
    /// Read everything, change nothing on the remote
    #[arg(long, global = true)]
    pub dry_run: bool,
    /// More logging; repeat for more detail
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}
impl Cli {
    /// Log filter used when `RUST_LOG` is not set.
    pub fn default_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the children of one folder
    Ls {
        /// Folder id; the root when omitted
        folder: Option<String>,
        #[command(flatten)]
        sort: SortArgs,
    },
    /// Print the folder tree with indexing statuses
    Tree(TreeArgs),
    /// Add files to the job and wait for them to be indexed
    Index(TargetArgs),
    /// Remove indexed files from the job
    Deindex(TargetArgs),
    /// Show the indexing status of every known file
    Status {
        /// Only show these ids
        ids: Vec<String>,
    },
}

#[derive(Debug, Args)]
pub struct SortArgs {
    /// Sort key: name, modified or size
    #[arg(long, default_value_t = SortKey::Name)]
    pub sort: SortKey,
    /// Reverse the sort order
    #[arg(long)]
    pub desc: bool,
}
impl From<&SortArgs> for Sort {
    fn from(args: &SortArgs) -> Self {
        Sort::new(args.sort, args.desc)
    }
}

#[derive(Debug, Args)]
pub struct TreeArgs {
    /// Expand this folder (repeatable)
    #[arg(short, long = "expand", value_name = "FOLDER")]
    pub expand: Vec<String>,
    /// Expand every folder
    #[arg(short, long, conflicts_with = "expand")]
    pub all: bool,
    #[command(flatten)]
    pub sort: SortArgs,
}

#[derive(Debug, Args)]
pub struct TargetArgs {
    /// File or folder ids; folders stand for every file below them
    #[arg(required = true)]
    pub ids: Vec<String>,
}
