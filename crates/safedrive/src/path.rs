//! Vehicle path accumulation.

use std::sync::RwLock;

use tracing::trace;

use crate::telemetry::PathPoint;

/// Chronological path of observed vehicle positions.
///
/// Consecutive identical points (exact equality of both coordinates) are
/// collapsed; no other simplification is applied. All methods take `&self`,
/// so one tracker can be shared between the position poller and readers.
#[derive(Debug, Default)]
pub struct PathTracker {
    points: RwLock<Vec<PathPoint>>,
}

impl PathTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `point` unless it equals the last appended point.
    ///
    /// Returns `true` if the path grew.
    pub fn observe(&self, point: PathPoint) -> bool {
        let mut points = self
            .points
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if points.last() == Some(&point) {
            trace!(lat = point.lat, lng = point.lng, "Position unchanged");
            return false;
        }

        points.push(point);
        true
    }

    /// Snapshot of the path in poll order.
    #[must_use]
    pub fn current_path(&self) -> Vec<PathPoint> {
        self.points
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// The most recently appended point.
    #[must_use]
    pub fn last(&self) -> Option<PathPoint> {
        self.points
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .last()
            .copied()
    }

    /// Number of points in the path.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Check if the path is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear the path.
    pub fn reset(&self) {
        self.points
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}
