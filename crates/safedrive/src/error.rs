//! Error types for safedrive.
//!
//! This module defines all error types used throughout the safedrive crate.
//! Nothing in the telemetry subsystem is fatal: network and API failures are
//! retried at the next poll tick, aborted fetches are dropped silently, and
//! persistence failures leave the in-memory state authoritative.

use std::path::PathBuf;
use thiserror::Error;

use crate::telemetry::SampleId;

/// The main error type for safedrive operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Remote API Errors ===
    /// The request never produced a response (connection refused, DNS,
    /// transport timeout).
    #[error("request to {endpoint} failed: {source}")]
    Network {
        /// The endpoint that was requested.
        endpoint: String,
        /// The underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The remote API answered with a non-success status.
    #[error("API error: {status} {reason} from {endpoint}")]
    Api {
        /// The endpoint that was requested.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Canonical reason phrase for the status.
        reason: String,
    },

    /// The request was cancelled by its caller.
    #[error("request aborted")]
    Aborted,

    /// A body or a persisted document could not be decoded.
    #[error("failed to parse {what}: {source}")]
    Parse {
        /// What was being parsed.
        what: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    // === Evidence Errors ===
    /// The evidence log could not be written to durable storage.
    #[error("failed to persist evidence {capture_id} under key '{key}': {message}")]
    Persistence {
        /// Key of the evidence log in the local store.
        key: String,
        /// Capture that was appended in memory but not persisted.
        capture_id: SampleId,
        /// Description of what went wrong.
        message: String,
    },

    /// An evidence entry with the same capture identifier already exists.
    #[error("evidence {capture_id} already captured")]
    DuplicateCapture {
        /// The rejected capture identifier.
        capture_id: SampleId,
    },

    // === Risk Query Errors ===
    /// The predictive risk lookup failed.
    #[error("predictive risk lookup failed: {message}")]
    RiskQuery {
        /// Description of what went wrong.
        message: String,
    },

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for safedrive operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a parse error for the named document.
    #[must_use]
    pub fn parse(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Parse {
            what: what.into(),
            source,
        }
    }

    /// Create a risk query error.
    #[must_use]
    pub fn risk_query(message: impl Into<String>) -> Self {
        Self::RiskQuery {
            message: message.into(),
        }
    }

    /// Check if this error is a caller-initiated cancellation.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Check if this error is transient and will be retried at the next tick.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Api { .. })
    }

    /// Check if this error is a failed durable write.
    #[must_use]
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }

    /// Check if this error is a rejected duplicate capture.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateCapture { .. })
    }
}
