//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use archive_core::identifier::NormalizationLevel;
use archive_core::{AccessConfig, Intensity};

/// Polite, cache-first access to a public archive.
///
/// Resolves loose input to archive identifiers, searches, and downloads
/// while keeping request concurrency, bandwidth and retries in check.
#[derive(Parser, Debug)]
#[command(name = "archive-access")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/archive-access/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Network intensity level
    #[arg(long, global = true, value_enum)]
    pub intensity: Option<Intensity>,

    /// Maximum concurrent requests (1-16)
    #[arg(short = 'c', long, global = true, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub concurrency: Option<u8>,

    /// Aggregate bandwidth cap in bytes per second (0 for unlimited)
    #[arg(long, global = true, value_name = "BYTES_PER_SEC")]
    pub bandwidth: Option<u64>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Normalize input into an archive identifier
    Normalize {
        /// Raw input
        input: String,

        /// Normalization level
        #[arg(long, value_enum, default_value_t = LevelArg::Standard)]
        level: LevelArg,
    },

    /// List lookup candidates for input, in order
    Variants {
        /// Raw input
        input: String,
    },

    /// Resolve input to item metadata
    Resolve {
        /// Raw input
        input: String,
    },

    /// Search the archive
    Search {
        /// Search query
        query: String,

        /// Also prefetch thumbnails for the results
        #[arg(long)]
        thumbnails: bool,
    },

    /// Fetch a URL through the cache
    Fetch {
        /// Absolute URL
        url: String,

        /// Bypass the cache entirely
        #[arg(long)]
        no_cache: bool,

        /// Ignore a cached copy and refetch
        #[arg(long)]
        refresh: bool,

        /// Write the body here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Download a file attached to an item
    Download {
        /// Item identifier
        identifier: String,

        /// File path within the item
        file: String,

        /// Destination (default: file name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Per-download bandwidth cap in bytes per second
        #[arg(long, value_name = "BYTES_PER_SEC")]
        max_rate: Option<u64>,
    },

    /// Inspect or maintain the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show component statistics
    Stats,
}

/// Cache maintenance actions.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Show cache occupancy
    Stats,
    /// Drop every entry
    Clear,
    /// Drop expired entries
    Purge,
}

/// Normalization level argument.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelArg {
    /// Case preserved
    Standard,
    /// Lowercased
    Strict,
}

impl From<LevelArg> for NormalizationLevel {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Standard => Self::Standard,
            LevelArg::Strict => Self::Strict,
        }
    }
}

impl Args {
    /// Applies command-line overrides on top of file configuration.
    pub fn apply_overrides(&self, config: &mut AccessConfig) {
        if let Some(intensity) = self.intensity {
            config.intensity = intensity;
        }
        if let Some(concurrency) = self.concurrency {
            config.max_concurrent_requests = usize::from(concurrency);
        }
        if let Some(bandwidth) = self.bandwidth {
            config.bandwidth.max_bytes_per_second = Some(bandwidth);
        }
    }

    /// Default log level from the verbosity flags.
    ///
    /// Priority: quiet flag > verbose flag > default (info).
    pub fn default_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }
}
