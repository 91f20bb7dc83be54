//! Command-line surface.
//!
//! Exit codes: 0 success, 1 validation error, 2 backend unavailable.

pub mod commands;

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::api::ValidationError;
use crate::config::{self, Config, ConfigError};
use crate::core::CoreError;
use crate::error::Error;
use crate::paths;

#[derive(Parser, Debug)]
#[command(name = "deckpool", version, about = "Question-set pool and allocation engine")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit machine-readable JSON on stdout.
    #[arg(long, global = true)]
    pub json: bool,

    /// Explicit config file (defaults to the XDG config, then ./deckpool.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Snapshot path (defaults to <state_dir>/deckpool.json).
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build sets from new content and feed the pools.
    GenerateSets(commands::GenerateSetsArgs),
    /// Store raw items from a JSON file.
    Ingest(commands::IngestArgs),
    /// Draw the next unseen set per category for a user.
    Allocate(commands::AllocateArgs),
    /// Allocate and materialize set content for a user.
    Merge(commands::MergeArgs),
    /// Apply eviction across all of a user's categories.
    Evict(commands::EvictArgs),
    /// Clear a user's entire allocation record.
    ResetUser(commands::ResetUserArgs),
    /// Pool inspection and administrative drains.
    #[command(subcommand)]
    Pool(PoolCommand),
    /// List configured categories.
    Categories,
}

#[derive(Subcommand, Debug)]
pub enum PoolCommand {
    /// Show per-category pool depth and metadata.
    Status(commands::PoolStatusArgs),
    /// Destructively pop sets from a category's pool head.
    Drain(commands::PoolDrainArgs),
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Engine(#[from] Error),
    #[error("{0}")]
    Io(String),
}

impl CommandError {
    /// 1 for validation-class failures, 2 for backend unavailability.
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandError::Engine(err) => match err {
                Error::Validation(_) | Error::Core(_) => 1,
                Error::Config(ConfigError::Parse { .. }) | Error::Config(ConfigError::Invalid(_)) => 1,
                _ => 2,
            },
            CommandError::Io(_) => 2,
        }
    }
}

impl From<ValidationError> for CommandError {
    fn from(err: ValidationError) -> Self {
        CommandError::Engine(Error::Validation(err))
    }
}

impl From<CoreError> for CommandError {
    fn from(err: CoreError) -> Self {
        CommandError::Engine(Error::Core(err))
    }
}

impl From<ConfigError> for CommandError {
    fn from(err: ConfigError) -> Self {
        CommandError::Engine(Error::Config(err))
    }
}

pub type CommandResult<T> = std::result::Result<T, CommandError>;

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

/// Resolve config for this invocation (used by the binary for telemetry
/// before `run`).
pub fn load_config(cli: &Cli) -> Result<Config, ConfigError> {
    match cli.config.as_deref() {
        Some(path) => config::load_from(path),
        None => config::load(),
    }
}

pub fn snapshot_path(cli: &Cli, config: &Config) -> PathBuf {
    cli.state
        .clone()
        .or_else(|| config.state_dir.as_ref().map(|dir| dir.join("deckpool.json")))
        .unwrap_or_else(paths::snapshot_path)
}

pub fn run(cli: Cli) -> CommandResult<()> {
    let config = load_config(&cli)?;
    let path = snapshot_path(&cli, &config);
    commands::dispatch(&cli, &config, &path)
}
