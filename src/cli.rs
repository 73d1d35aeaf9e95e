//! Command-line interface definitions for uniqpost.
//!
//! Global options (verbosity, config file, error format) apply to every
//! subcommand. Flags given here override the loaded configuration.
//!
//! # Example
//!
//! ```bash
//! # Print the perceptual hashes of an image
//! uniqpost hash photo.jpg
//!
//! # Produce a repost-ready variant with a fixed seed
//! uniqpost uniquify photo.jpg -o out.png --seed 42
//!
//! # Exit code 2 if the item was already offered or posted
//! uniqpost check item.json --store posted.json
//! ```

use crate::imaging::{AugmentProfile, GradeStrength, GradeStyle};
use crate::store::{RecordStatus, StoreBackend};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Content fingerprinting and perceptual image uniqueness for feed reposting.
///
/// Derives dedup keys for feed items, remembers what was offered or posted,
/// and mutates images until they are perceptually distinct from their source.
#[derive(Debug, Parser)]
#[command(name = "uniqpost")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH", env = "UNIQPOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print errors as JSON objects on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the aHash, dHash and pHash of an image
    Hash(HashArgs),
    /// Print the Hamming distances between two images
    Compare(CompareArgs),
    /// Make an image perceptually distinct from its source
    Uniquify(UniquifyArgs),
    /// Print the dedup keys of a content item
    Keys(ItemArgs),
    /// Check whether a content item was already offered or posted
    Check(CheckArgs),
    /// Record a content item as offered or posted
    Mark(MarkArgs),
    /// Pick the newest unseen item from a list and mark it offered
    Pick(PickArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

/// Output format for reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON for scripting
    Json,
}

/// Arguments for `hash`.
#[derive(Debug, Args)]
pub struct HashArgs {
    /// Image file
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for `compare`.
#[derive(Debug, Args)]
pub struct CompareArgs {
    /// First image
    #[arg(value_name = "A")]
    pub a: PathBuf,

    /// Second image
    #[arg(value_name = "B")]
    pub b: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for `uniquify`.
#[derive(Debug, Args)]
pub struct UniquifyArgs {
    /// Original image
    #[arg(value_name = "IN")]
    pub input: PathBuf,

    /// Where to write the resulting PNG
    #[arg(short, long, value_name = "OUT")]
    pub output: PathBuf,

    /// Externally edited version of the original, used as the source
    #[arg(long, value_name = "PATH")]
    pub edited: Option<PathBuf>,

    /// Output width (defaults to the original's width)
    #[arg(long, value_name = "PX", value_parser = clap::value_parser!(u32).range(1..))]
    pub width: Option<u32>,

    /// Output height (defaults to the original's height)
    #[arg(long, value_name = "PX", value_parser = clap::value_parser!(u32).range(1..))]
    pub height: Option<u32>,

    /// Maximum augmentation tries
    #[arg(long, value_name = "N")]
    pub tries: Option<u32>,

    /// Seed for reproducible output
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Augmentation profile (gentle, balanced, aggressive)
    #[arg(long, value_name = "PROFILE", value_parser = parse_profile)]
    pub profile: Option<AugmentProfile>,

    /// Grade style (cinematic, vivid, matte, noir, bw)
    #[arg(long, value_name = "STYLE", value_parser = parse_style)]
    pub style: Option<GradeStyle>,

    /// Grade strength (low, medium, high)
    #[arg(long, value_name = "STRENGTH", value_parser = parse_strength)]
    pub strength: Option<GradeStrength>,

    /// Never apply a color grade
    #[arg(long, conflicts_with = "always_grade")]
    pub no_grade: bool,

    /// Grade even when the source already differs from the original
    #[arg(long)]
    pub always_grade: bool,

    /// Skip the uniqueness search
    #[arg(long)]
    pub no_search: bool,
}

/// Where the dedup store lives.
#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Store file (defaults to the configured path)
    #[arg(long, value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// Store backend
    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,
}

/// Store backend choice on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    /// Single JSON document
    Json,
    /// Embedded SQLite database
    Sqlite,
}

impl From<BackendArg> for StoreBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Json => StoreBackend::Json,
            BackendArg::Sqlite => StoreBackend::Sqlite,
        }
    }
}

/// Arguments naming one content item.
#[derive(Debug, Args)]
pub struct ItemArgs {
    /// JSON file with one content item ("-" for stdin)
    #[arg(value_name = "ITEM_JSON")]
    pub item: PathBuf,
}

/// Arguments for `check`.
#[derive(Debug, Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub item: ItemArgs,

    #[command(flatten)]
    pub store: StoreArgs,
}

/// Arguments for `mark`.
#[derive(Debug, Args)]
pub struct MarkArgs {
    #[command(flatten)]
    pub item: ItemArgs,

    /// Status to record (offered, posted)
    #[arg(long, value_parser = parse_status)]
    pub status: RecordStatus,

    #[command(flatten)]
    pub store: StoreArgs,
}

/// Arguments for `pick`.
#[derive(Debug, Args)]
pub struct PickArgs {
    /// JSON file with an array of items, or an object with an "items" array ("-" for stdin)
    #[arg(value_name = "ITEMS_JSON")]
    pub items: PathBuf,

    #[command(flatten)]
    pub store: StoreArgs,
}

/// Arguments for `config`.
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Print the default config file path instead of the configuration
    #[arg(long)]
    pub path: bool,
}

/// Parse a grade style name, suggesting the closest one on a typo.
pub fn parse_style(s: &str) -> Result<GradeStyle, String> {
    s.parse().map_err(|e: crate::imaging::grade::UnknownNameError| e.to_string())
}

/// Parse a grade strength name.
pub fn parse_strength(s: &str) -> Result<GradeStrength, String> {
    s.parse().map_err(|e: crate::imaging::grade::UnknownNameError| e.to_string())
}

/// Parse an augmentation profile name.
pub fn parse_profile(s: &str) -> Result<AugmentProfile, String> {
    match s.trim().to_lowercase().as_str() {
        "gentle" => Ok(AugmentProfile::Gentle),
        "balanced" => Ok(AugmentProfile::Balanced),
        "aggressive" => Ok(AugmentProfile::Aggressive),
        other => Err(format!(
            "unknown profile '{other}' (expected gentle, balanced or aggressive)"
        )),
    }
}

/// Parse a record status.
pub fn parse_status(s: &str) -> Result<RecordStatus, String> {
    s.parse()
}
