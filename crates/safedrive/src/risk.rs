//! Predictive risk lookups with per-key request coalescing.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::TelemetryApi;
use crate::error::{Error, Result};
use crate::severity::{risk_level, SeverityLevel};

/// Location and time a risk score is requested for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskKey {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Point in time, passed through to the backend as given.
    pub timestamp: String,
}

impl RiskKey {
    /// Create a key.
    #[must_use]
    pub fn new(lat: f64, lng: f64, timestamp: impl Into<String>) -> Self {
        Self {
            lat,
            lng,
            timestamp: timestamp.into(),
        }
    }
}

/// Response of `GET /api/predictive-risk`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskResult {
    /// Risk score in percent.
    pub risk_score: f64,
    /// Accidents near the location in the last seven days.
    pub accidents_count: u64,
    /// Sensor events near the location in the last seven days.
    pub sensor_events_count: u64,
    /// Current weather at the location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_condition: Option<String>,
}

impl RiskResult {
    /// Band of the risk score.
    #[must_use]
    pub fn level(&self) -> SeverityLevel {
        risk_level(self.risk_score)
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Ready(RiskResult),
    Aborted,
    Failed(String),
}

#[derive(Debug)]
struct Slot {
    key: RiskKey,
    cell: Arc<OnceCell<Outcome>>,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct CacheState {
    slot: Option<Slot>,
    last_good: Option<RiskResult>,
}

/// Caches the risk result of the most recently requested key.
///
/// A fetch is issued only when the key differs from the previous one.
/// Concurrent calls for the same key share one request. Changing the key
/// cancels the request for the old key. Failures are not cached: the next
/// call for the same key tries again.
#[derive(Debug)]
pub struct RiskQueryCache<A> {
    api: Arc<A>,
    state: Mutex<CacheState>,
}

impl<A: TelemetryApi> RiskQueryCache<A> {
    /// Create an empty cache.
    #[must_use]
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Get the risk result for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Aborted`] if a newer key superseded this request, or
    /// [`Error::RiskQuery`] if the lookup failed. A failure clears the last
    /// good result.
    pub async fn get(&self, key: RiskKey) -> Result<RiskResult> {
        let (cell, cancel) = {
            let mut state = self.lock();
            match &state.slot {
                Some(slot) if slot.key == key => (Arc::clone(&slot.cell), slot.cancel.clone()),
                _ => {
                    if let Some(old) = state.slot.take() {
                        debug!(lat = key.lat, lng = key.lng, "Risk key changed");
                        old.cancel.cancel();
                    }
                    let slot = Slot {
                        key: key.clone(),
                        cell: Arc::new(OnceCell::new()),
                        cancel: CancellationToken::new(),
                    };
                    let pair = (Arc::clone(&slot.cell), slot.cancel.clone());
                    state.slot = Some(slot);
                    pair
                }
            }
        };

        let outcome = cell
            .get_or_init(|| async {
                match self.api.predictive_risk(&key, &cancel).await {
                    Ok(result) => Outcome::Ready(result),
                    Err(err) if err.is_aborted() => Outcome::Aborted,
                    Err(err) => Outcome::Failed(err.to_string()),
                }
            })
            .await
            .clone();

        let mut state = self.lock();
        match outcome {
            Outcome::Ready(result) => {
                state.last_good = Some(result.clone());
                Ok(result)
            }
            Outcome::Aborted => Err(Error::Aborted),
            Outcome::Failed(message) => {
                warn!(lat = key.lat, lng = key.lng, error = %message, "Risk lookup failed");
                state.last_good = None;
                if state
                    .slot
                    .as_ref()
                    .is_some_and(|slot| Arc::ptr_eq(&slot.cell, &cell))
                {
                    state.slot = None;
                }
                Err(Error::risk_query(message))
            }
        }
    }

    /// The most recent successful result, until a failure discards it.
    #[must_use]
    pub fn latest(&self) -> Option<RiskResult> {
        self.lock().last_good.clone()
    }
}
