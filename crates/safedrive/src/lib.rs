//! `safedrive` - Real-time telemetry sync and evidence capture
//!
//! This library polls the SafeDrive accident-detection unit's backend for
//! live sensor samples and vehicle positions, detects engine stops from the
//! unit's status text, captures a deduplicated evidence snapshot at each
//! stop, accumulates the vehicle path, and classifies readings by severity.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod api;
pub mod cli;
pub mod config;
pub mod detector;
pub mod error;
pub mod evidence;
pub mod logging;
pub mod path;
pub mod pipeline;
pub mod poller;
pub mod risk;
pub mod severity;
pub mod storage;
pub mod telemetry;

pub use api::{HttpApi, TelemetryApi};
pub use config::Config;
pub use detector::{EngineState, EngineStateDetector};
pub use error::{Error, Result};
pub use evidence::{EvidenceEntry, EvidenceStore};
pub use logging::init_logging;
pub use path::PathTracker;
pub use pipeline::{LiveState, Pipeline, PipelineEvent, PipelineOptions};
pub use poller::{PollKind, PollSource, Poller, PollerHandle, SampleFetcher};
pub use risk::{RiskKey, RiskQueryCache, RiskResult};
pub use severity::{SampleAssessment, SeverityLevel};
pub use storage::{KeyValueStore, KvStore, MemoryStore};
pub use telemetry::{AccidentEvent, CarPosition, PathPoint, SampleId, SensorSample};
