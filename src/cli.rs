//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

/// Harvest OAI-PMH repositories into a local or object-store archive.
///
/// Every `ListRecords` page is stored verbatim under
/// `{repo}/{prefix}/{date}/{set}/{n}.xml`; interrupted runs resume from a
/// checkpoint.
#[derive(Parser, Debug)]
#[command(name = "oai-harvester")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Harvest every (filtered) set of a repository
    Harvest(Box<HarvestArgs>),
    /// Print the repository's Identify response
    Identify(RepositoryArgs),
    /// List the repository's sets
    Sets(RepositoryArgs),
    /// List the repository's metadata formats
    Formats(RepositoryArgs),
}

/// Flags of the `harvest` command.
///
/// Options without a value fall back to the config file, then to the
/// library defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct HarvestArgs {
    /// OAI-PMH endpoint, e.g. https://repo.example.org/oai
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Namespace for output paths
    #[arg(long, value_name = "PREFIX")]
    pub repo_prefix: Option<String>,

    /// Metadata format to harvest [default: oai_dc]
    #[arg(long, value_name = "PREFIX")]
    pub metadata_prefix: Option<String>,

    /// Connect timeout in seconds (1-3600) [default: 30]
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout: Option<u64>,

    /// Read timeout in seconds (1-3600) [default: 300]
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub read_timeout: Option<u64>,

    /// Attempts per page including the first (1-20) [default: 3]
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: Option<u32>,

    /// Delay between attempts in seconds (0-3600) [default: 10]
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(0..=3600))]
    pub attempt_delay: Option<u64>,

    /// Stop scheduling sets after the first failed set and exit non-zero
    #[arg(long)]
    pub fail_on_error: bool,

    /// File of set identifiers to harvest (one per line)
    #[arg(long, value_name = "FILE")]
    pub allow_list: Option<PathBuf>,

    /// File of set identifiers to skip (one per line)
    #[arg(long, value_name = "FILE")]
    pub deny_list: Option<PathBuf>,

    /// Set identifier to harvest (repeatable)
    #[arg(long = "allow-set", value_name = "ID")]
    pub allow_sets: Vec<String>,

    /// Set identifier to skip (repeatable)
    #[arg(long = "deny-set", value_name = "ID")]
    pub deny_sets: Vec<String>,

    /// Archive pages under this directory [default: .]
    #[arg(long, value_name = "DIR", conflicts_with = "object_store_url")]
    pub output_dir: Option<PathBuf>,

    /// Upload pages with HTTP PUT under this URL prefix
    /// (bearer token from OAI_HARVESTER_SINK_TOKEN)
    #[arg(long, value_name = "URL")]
    pub object_store_url: Option<String>,

    /// Directory holding checkpoint files [default: .oai-harvester]
    #[arg(long, value_name = "DIR", conflicts_with = "no_checkpoint")]
    pub checkpoint_dir: Option<PathBuf>,

    /// Disable checkpointing (an interrupted run starts over)
    #[arg(long)]
    pub no_checkpoint: bool,

    /// Date partition for this run [default: today]
    #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_harvest_date)]
    pub harvest_date: Option<NaiveDate>,

    /// Config file with defaults for these flags
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Flags shared by the inspection commands.
#[derive(Args, Debug, Clone)]
pub struct RepositoryArgs {
    /// OAI-PMH endpoint, e.g. https://repo.example.org/oai
    #[arg(long, value_name = "URL")]
    pub base_url: String,

    /// Request timeout in seconds (1-3600)
    #[arg(long, value_name = "SECS", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: u64,
}

fn parse_harvest_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD, got '{value}': {e}"))
}
