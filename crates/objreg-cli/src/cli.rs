use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "objreg",
    about = "Inspect and edit an objreg object store",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store directory; overrides `store.data_dir` from the config file
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the latest version of one object
    Get(ObjectArgs),
    /// List objects of a kind in a namespace
    List(ListArgs),
    /// Create (or with --update, overwrite) an object from JSON
    Put(PutArgs),
    /// Delete one object
    Delete(ObjectArgs),
    /// Rewrite the log keeping only live objects
    Compact,
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct ObjectArgs {
    pub namespace: String,
    pub kind: String,
    pub name: String,
}

#[derive(Args)]
pub struct ListArgs {
    pub namespace: String,
    pub kind: String,
    /// Return at most this many objects
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
    /// Start after this object name
    #[arg(long)]
    pub after: Option<String>,
}

#[derive(Args)]
pub struct PutArgs {
    /// JSON file to read; stdin when omitted
    pub file: Option<PathBuf>,
    /// Overwrite an existing object instead of failing
    #[arg(long)]
    pub update: bool,
}
