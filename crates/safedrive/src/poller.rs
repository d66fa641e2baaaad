//! Fixed-interval polling of remote sources.
//!
//! A [`Poller`] drives one [`PollSource`] on a fixed period. It fetches
//! immediately on start and then once per period. If a fetch is still
//! outstanding when the next tick fires, that fetch is cancelled before the
//! next one begins, so at most one request per poller is ever in flight.
//! Cancelled fetches are dropped silently; every other failure is reported
//! to the error callback and retried at the next tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::api::TelemetryApi;
use crate::error::{Error, Result};
use crate::telemetry::{CarPosition, SensorSample};

/// What a poller fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollKind {
    /// Latest sensor sample.
    Sample,
    /// Vehicle position.
    Position,
    /// Backend liveness.
    Health,
}

impl std::fmt::Display for PollKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sample => f.pad("sample"),
            Self::Position => f.pad("position"),
            Self::Health => f.pad("health"),
        }
    }
}

/// Something a [`Poller`] can fetch from.
#[async_trait]
pub trait PollSource: Send + Sync + 'static {
    /// What one successful fetch yields.
    type Item: Send + 'static;

    /// What this source fetches.
    fn kind(&self) -> PollKind;

    /// Perform one fetch.
    ///
    /// Must resolve promptly once `cancel` is cancelled.
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Self::Item>;
}

/// Fetches the latest sensor sample.
#[derive(Debug)]
pub struct SampleFetcher<A> {
    api: Arc<A>,
}

impl<A> SampleFetcher<A> {
    /// Create a fetcher over `api`.
    #[must_use]
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl<A: TelemetryApi + 'static> PollSource for SampleFetcher<A> {
    type Item = SensorSample;

    fn kind(&self) -> PollKind {
        PollKind::Sample
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<SensorSample> {
        self.api.latest_sample(cancel).await
    }
}

/// Fetches the current vehicle position.
#[derive(Debug)]
pub struct PositionFetcher<A> {
    api: Arc<A>,
}

impl<A> PositionFetcher<A> {
    /// Create a fetcher over `api`.
    #[must_use]
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl<A: TelemetryApi + 'static> PollSource for PositionFetcher<A> {
    type Item = CarPosition;

    fn kind(&self) -> PollKind {
        PollKind::Position
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<CarPosition> {
        self.api.car_position(cancel).await
    }
}

/// Probes backend liveness.
#[derive(Debug)]
pub struct HealthProbe<A> {
    api: Arc<A>,
}

impl<A> HealthProbe<A> {
    /// Create a probe over `api`.
    #[must_use]
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl<A: TelemetryApi + 'static> PollSource for HealthProbe<A> {
    type Item = ();

    fn kind(&self) -> PollKind {
        PollKind::Health
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<()> {
        self.api.health(cancel).await
    }
}

/// Counters describing a poller's activity.
#[derive(Debug, Default)]
pub struct PollStats {
    started: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl PollStats {
    /// Fetches started.
    #[must_use]
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Fetches whose result reached the sample callback.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Fetches reported to the error callback.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Fetches cancelled by a newer tick or by stop.
    #[must_use]
    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Drives a [`PollSource`] on a fixed period.
#[derive(Debug)]
pub struct Poller<S> {
    source: S,
    period: Duration,
}

impl<S: PollSource> Poller<S> {
    /// Create a poller for `source` with the given period.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if `period` is zero.
    pub fn new(source: S, period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(Error::ConfigValidation {
                message: format!("{} poll period must be greater than 0", source.kind()),
            });
        }
        Ok(Self { source, period })
    }

    /// What this poller fetches.
    #[must_use]
    pub fn kind(&self) -> PollKind {
        self.source.kind()
    }

    /// The poll period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start polling on the current tokio runtime.
    ///
    /// The first fetch is issued immediately. `on_item` receives each
    /// successful result by value; `on_error` receives every failure except
    /// cancellation.
    pub fn start<F, E>(self, on_item: F, on_error: E) -> PollerHandle
    where
        F: FnMut(S::Item) + Send + 'static,
        E: FnMut(Error) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let stats = Arc::new(PollStats::default());
        let kind = self.source.kind();

        debug!(source = %kind, period_ms = self.period.as_millis(), "Starting poller");
        let task = tokio::spawn(run(
            self.source,
            self.period,
            cancel.clone(),
            Arc::clone(&stats),
            on_item,
            on_error,
        ));

        PollerHandle {
            kind,
            cancel,
            stats,
            task: Some(task),
        }
    }
}

enum Outcome<T> {
    Done(Result<T>),
    Superseded,
    Stopped,
}

async fn run<S, F, E>(
    source: S,
    period: Duration,
    cancel: CancellationToken,
    stats: Arc<PollStats>,
    mut on_item: F,
    mut on_error: E,
) where
    S: PollSource,
    F: FnMut(S::Item) + Send + 'static,
    E: FnMut(Error) + Send + 'static,
{
    let kind = source.kind();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick_pending = false;

    loop {
        if !tick_pending {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
        }
        tick_pending = false;

        let fetch_cancel = cancel.child_token();
        stats.started.fetch_add(1, Ordering::Relaxed);

        let outcome = {
            let fetch = source.fetch(&fetch_cancel);
            tokio::pin!(fetch);

            tokio::select! {
                biased;
                () = cancel.cancelled() => Outcome::Stopped,
                result = &mut fetch => Outcome::Done(result),
                _ = ticker.tick() => Outcome::Superseded,
            }
        };

        match outcome {
            Outcome::Done(Ok(item)) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
                on_item(item);
            }
            Outcome::Done(Err(err)) if err.is_aborted() => {
                stats.cancelled.fetch_add(1, Ordering::Relaxed);
                trace!(source = %kind, "Fetch aborted");
            }
            Outcome::Done(Err(err)) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(source = %kind, error = %err, "Fetch failed");
                on_error(err);
            }
            Outcome::Superseded => {
                fetch_cancel.cancel();
                stats.cancelled.fetch_add(1, Ordering::Relaxed);
                trace!(source = %kind, "Fetch outlived its period; restarting");
                tick_pending = true;
            }
            Outcome::Stopped => {
                stats.cancelled.fetch_add(1, Ordering::Relaxed);
                trace!(source = %kind, "Fetch cancelled by stop");
                break;
            }
        }
    }

    debug!(source = %kind, "Poller stopped");
}

/// Handle to a running [`Poller`].
///
/// Dropping the handle stops the poller.
#[derive(Debug)]
pub struct PollerHandle {
    kind: PollKind,
    cancel: CancellationToken,
    stats: Arc<PollStats>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// What the poller fetches.
    #[must_use]
    pub fn kind(&self) -> PollKind {
        self.kind
    }

    /// Cancel any in-flight fetch and halt further ticks. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Check if [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> &PollStats {
        &self.stats
    }

    /// Stop the poller and wait for its task to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the polling task panicked.
    pub async fn shutdown(mut self) -> Result<()> {
        self.stop();
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| Error::internal(format!("{} poller task failed: {e}", self.kind))),
            None => Ok(()),
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
