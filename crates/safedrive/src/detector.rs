//! Engine state detection from the unit's free-text status.
//!
//! The monitoring unit has no structured engine flag; it only writes
//! `"Engine: RUNNING"` or `"Engine: STOPPED"` into the LCD text. The detector
//! classifies that text and reports the RUNNING → STOPPED edge that triggers
//! evidence capture.

use serde::{Deserialize, Serialize};

use crate::telemetry::{SensorSample, ENGINE_RUNNING_MARKER};

/// Engine state derived from a status text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// The status text carries the running marker.
    Running,
    /// Anything else, including an empty or missing status.
    Stopped,
    /// No sample has been observed yet.
    #[default]
    Unknown,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => f.pad("running"),
            Self::Stopped => f.pad("stopped"),
            Self::Unknown => f.pad("unknown"),
        }
    }
}

/// Classify a status text.
///
/// Missing or empty text is `Stopped`, never `Running`: a unit that stops
/// reporting must not suppress a capture.
#[must_use]
pub fn classify(status: Option<&str>) -> EngineState {
    match status {
        Some(text) if text.contains(ENGINE_RUNNING_MARKER) => EngineState::Running,
        _ => EngineState::Stopped,
    }
}

impl SensorSample {
    /// Classify this sample's status text.
    #[must_use]
    pub fn engine_state(&self) -> EngineState {
        classify(self.status.as_deref())
    }
}

/// Tracks the last observed engine state of one sample stream.
#[derive(Debug, Default)]
pub struct EngineStateDetector {
    last: EngineState,
}

impl EngineStateDetector {
    /// Create a detector that has not observed anything yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The state classified from the most recent sample.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.last
    }

    /// Observe a sample.
    ///
    /// Returns `true` exactly when the previous state was `Running` and the
    /// sample classifies as `Stopped`. The stored state is updated on every
    /// call.
    pub fn observe(&mut self, sample: &SensorSample) -> bool {
        let current = sample.engine_state();
        let previous = std::mem::replace(&mut self.last, current);
        previous == EngineState::Running && current == EngineState::Stopped
    }
}
