//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Watch command arguments.
#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Override the latest-sample poll period in milliseconds
    #[arg(long, value_name = "MS")]
    pub sample_interval_ms: Option<u64>,

    /// Override the position poll period in milliseconds
    #[arg(long, value_name = "MS")]
    pub position_interval_ms: Option<u64>,

    /// Don't poll positions or build a path
    #[arg(long)]
    pub no_path: bool,

    /// Don't probe backend health
    #[arg(long)]
    pub no_health: bool,
}

/// Evidence log commands.
#[derive(Debug, Subcommand)]
pub enum EvidenceCommand {
    /// List captured evidence
    List {
        /// Show only the last N entries
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Print the number of captured entries
    Count,
}

/// History command arguments.
#[derive(Debug, Args)]
pub struct HistoryCommand {
    /// Show only the last N samples
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Accidents command arguments.
#[derive(Debug, Args)]
pub struct AccidentsCommand {
    /// Read the map feed instead of the accident log
    #[arg(short, long)]
    pub map: bool,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Risk command arguments.
#[derive(Debug, Args)]
pub struct RiskCommand {
    /// Latitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    /// Longitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub lng: f64,

    /// Point in time (defaults to now)
    #[arg(long)]
    pub timestamp: Option<String>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Stats command arguments.
#[derive(Debug, Args)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
