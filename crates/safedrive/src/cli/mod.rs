//! Command-line interface for safedrive.
//!
//! This module provides the CLI structure for the `safedrive` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AccidentsCommand, ConfigCommand, EvidenceCommand, HistoryCommand, RiskCommand, StatsCommand,
    StatusCommand, WatchCommand,
};

/// safedrive - Live telemetry and evidence capture for SafeDrive units
///
/// Polls the unit's backend, captures an evidence snapshot whenever the
/// engine stops, and classifies readings by severity.
#[derive(Debug, Parser)]
#[command(name = "safedrive")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll live telemetry and capture evidence until interrupted
    Watch(WatchCommand),

    /// Inspect the local evidence log
    #[command(subcommand)]
    Evidence(EvidenceCommand),

    /// Show recent sensor history with classifications
    History(HistoryCommand),

    /// Show recorded accidents with severity
    Accidents(AccidentsCommand),

    /// Look up the predictive risk for a location
    Risk(RiskCommand),

    /// Show aggregate statistics
    Stats(StatsCommand),

    /// Show backend and local store status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
