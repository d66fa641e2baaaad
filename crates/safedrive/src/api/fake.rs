//! Scripted in-memory [`TelemetryApi`] for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{cancellable, TelemetryApi};
use crate::error::{Error, Result};
use crate::risk::{RiskKey, RiskResult};
use crate::telemetry::{AccidentEvent, CarPosition, FleetStats, SensorSample};

/// A scripted reply: a value, or an HTTP status to fail with.
pub(crate) type Reply<T> = std::result::Result<T, u16>;

/// Replies are served in order; the last one repeats once the script runs out.
#[derive(Debug)]
struct Script<T> {
    replies: Mutex<VecDeque<Reply<T>>>,
}

impl<T: Clone> Script<T> {
    fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
        }
    }

    fn push(&self, reply: Reply<T>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    fn next(&self, endpoint: &str) -> Result<T> {
        let mut replies = self.replies.lock().unwrap();
        let reply = if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        };
        match reply {
            Some(Ok(value)) => Ok(value),
            Some(Err(status)) => Err(api_error(endpoint, status)),
            None => Err(api_error(endpoint, 404)),
        }
    }
}

fn api_error(endpoint: &str, status: u16) -> Error {
    Error::Api {
        endpoint: endpoint.to_string(),
        status,
        reason: "Scripted".to_string(),
    }
}

/// Decrements the in-flight counter when a call finishes or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Call counters shared with the test body.
#[derive(Debug, Default)]
pub(crate) struct Calls {
    pub(crate) samples: AtomicUsize,
    pub(crate) positions: AtomicUsize,
    pub(crate) risk: AtomicUsize,
    pub(crate) health: AtomicUsize,
    in_flight: AtomicUsize,
    pub(crate) max_in_flight: AtomicUsize,
}

/// In-memory backend whose answers are scripted per endpoint.
#[derive(Debug)]
pub(crate) struct ScriptedApi {
    samples: Script<SensorSample>,
    positions: Script<CarPosition>,
    risk: Script<RiskResult>,
    health: Script<()>,
    latency: Mutex<Duration>,
    pub(crate) calls: Arc<Calls>,
}

impl ScriptedApi {
    pub(crate) fn new() -> Self {
        Self {
            samples: Script::new(),
            positions: Script::new(),
            risk: Script::new(),
            health: Script::new(),
            latency: Mutex::new(Duration::ZERO),
            calls: Arc::new(Calls::default()),
        }
    }

    pub(crate) fn with_samples(self, replies: impl IntoIterator<Item = Reply<SensorSample>>) -> Self {
        for reply in replies {
            self.samples.push(reply);
        }
        self
    }

    pub(crate) fn with_positions(
        self,
        replies: impl IntoIterator<Item = Reply<CarPosition>>,
    ) -> Self {
        for reply in replies {
            self.positions.push(reply);
        }
        self
    }

    pub(crate) fn with_risk(self, replies: impl IntoIterator<Item = Reply<RiskResult>>) -> Self {
        for reply in replies {
            self.risk.push(reply);
        }
        self
    }

    pub(crate) fn with_health(self, replies: impl IntoIterator<Item = Reply<()>>) -> Self {
        for reply in replies {
            self.health.push(reply);
        }
        self
    }

    /// Delay every answer by `latency`.
    pub(crate) fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap() = latency;
        self
    }

    async fn serve<T: Clone>(
        &self,
        script: &Script<T>,
        counter: &AtomicUsize,
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        counter.fetch_add(1, Ordering::SeqCst);
        let now = self.calls.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.calls.in_flight);

        let latency = *self.latency.lock().unwrap();
        cancellable(cancel, async {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            script.next(endpoint)
        })
        .await
    }
}

#[async_trait]
impl TelemetryApi for ScriptedApi {
    async fn latest_sample(&self, cancel: &CancellationToken) -> Result<SensorSample> {
        self.serve(&self.samples, &self.calls.samples, super::SENSOR_ENDPOINT, cancel)
            .await
    }

    async fn sensor_history(&self, _cancel: &CancellationToken) -> Result<Vec<SensorSample>> {
        Ok(Vec::new())
    }

    async fn car_position(&self, cancel: &CancellationToken) -> Result<CarPosition> {
        self.serve(
            &self.positions,
            &self.calls.positions,
            super::POSITION_ENDPOINT,
            cancel,
        )
        .await
    }

    async fn accidents(&self, _cancel: &CancellationToken) -> Result<Vec<AccidentEvent>> {
        Ok(Vec::new())
    }

    async fn accident_map(&self, _cancel: &CancellationToken) -> Result<Vec<AccidentEvent>> {
        Ok(Vec::new())
    }

    async fn stats(&self, _cancel: &CancellationToken) -> Result<FleetStats> {
        Ok(FleetStats::default())
    }

    async fn predictive_risk(
        &self,
        _key: &RiskKey,
        cancel: &CancellationToken,
    ) -> Result<RiskResult> {
        self.serve(&self.risk, &self.calls.risk, super::RISK_ENDPOINT, cancel)
            .await
    }

    async fn health(&self, cancel: &CancellationToken) -> Result<()> {
        self.serve(&self.health, &self.calls.health, super::HEALTH_ENDPOINT, cancel)
            .await
    }
}
