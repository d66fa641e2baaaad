//! The live telemetry pipeline.
//!
//! Pollers push what they fetch into one queue. A single consumer task owns
//! the [`EngineStateDetector`] and the [`EvidenceStore`], so samples are
//! handled strictly in arrival order and the store is never touched
//! concurrently. The consumer publishes a [`LiveState`] snapshot over a
//! `watch` channel and discrete [`PipelineEvent`]s over a `broadcast`
//! channel; displays only ever read.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::TelemetryApi;
use crate::config::Config;
use crate::detector::{EngineState, EngineStateDetector};
use crate::error::{Error, Result};
use crate::evidence::{EvidenceEntry, EvidenceStore};
use crate::path::PathTracker;
use crate::poller::{
    HealthProbe, PollKind, PollSource, Poller, PollerHandle, PositionFetcher, SampleFetcher,
};
use crate::severity::SampleAssessment;
use crate::storage::KeyValueStore;
use crate::telemetry::{CarPosition, PathPoint, SampleId, SensorSample};

/// Default capacity of the event channel.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Pipeline scheduling options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Period of the latest-sample poll.
    pub sample_interval: Duration,
    /// Period of the position poll.
    pub position_interval: Duration,
    /// Period of the health probe.
    pub health_interval: Duration,
    /// Whether to poll positions and build a path.
    pub track_path: bool,
    /// Whether to probe backend health.
    pub probe_health: bool,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        Self {
            sample_interval: config.sample_interval(),
            position_interval: config.position_interval(),
            health_interval: config.health_interval(),
            track_path: true,
            probe_health: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Snapshot of everything a display needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveState {
    /// Most recent sample.
    pub latest: Option<SensorSample>,
    /// Classification of the most recent sample.
    pub assessment: Option<SampleAssessment>,
    /// Engine state of the most recent sample.
    pub engine: EngineState,
    /// Entries in the evidence log.
    pub evidence_count: usize,
    /// Last sample fetch failure, cleared by the next sample.
    pub last_error: Option<String>,
    /// True while the latest sample is older than the last failed fetch.
    pub stale: bool,
    /// Backend reachability, once probed.
    pub connected: Option<bool>,
}

/// Something that happened in the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A sample was received and classified.
    Sample {
        /// The sample.
        sample: SensorSample,
        /// Its classification.
        assessment: SampleAssessment,
        /// Its engine state.
        engine: EngineState,
    },
    /// An engine stop was captured.
    EvidenceCaptured(EvidenceEntry),
    /// A capture is held in memory only.
    PersistenceFailed {
        /// The capture that was not persisted.
        capture_id: SampleId,
        /// What went wrong.
        message: String,
    },
    /// A fetch failed and will be retried at the next tick.
    FetchFailed {
        /// The poll source.
        source: PollKind,
        /// What went wrong.
        message: String,
    },
    /// The vehicle path grew.
    PathExtended(PathPoint),
    /// Backend reachability changed.
    Connectivity(bool),
}

/// Messages from pollers to the consumer.
#[derive(Debug)]
pub enum Inbound {
    /// A fetched sample.
    Sample(SensorSample),
    /// A fetched position.
    Position(CarPosition),
    /// A health probe result.
    Health(bool),
    /// A failed fetch.
    Failed {
        /// The poll source.
        source: PollKind,
        /// What went wrong.
        message: String,
    },
}

/// The stateful core of the pipeline: detector, evidence log and path.
///
/// Handles one message at a time and returns the events it produced.
#[derive(Debug)]
pub struct CaptureEngine<S> {
    detector: EngineStateDetector,
    evidence: EvidenceStore<S>,
    path: Arc<PathTracker>,
    state: LiveState,
}

impl<S: KeyValueStore> CaptureEngine<S> {
    /// Create an engine over an already loaded evidence log.
    #[must_use]
    pub fn new(evidence: EvidenceStore<S>, path: Arc<PathTracker>) -> Self {
        let state = LiveState {
            evidence_count: evidence.len(),
            ..LiveState::default()
        };
        Self {
            detector: EngineStateDetector::new(),
            evidence,
            path,
            state,
        }
    }

    /// Current live state.
    #[must_use]
    pub fn state(&self) -> &LiveState {
        &self.state
    }

    /// The evidence log.
    #[must_use]
    pub fn evidence(&self) -> &EvidenceStore<S> {
        &self.evidence
    }

    /// Consume the engine and return the evidence log.
    #[must_use]
    pub fn into_evidence(self) -> EvidenceStore<S> {
        self.evidence
    }

    /// Handle one message.
    pub fn handle(&mut self, message: Inbound) -> Vec<PipelineEvent> {
        match message {
            Inbound::Sample(sample) => self.on_sample(sample),
            Inbound::Position(position) => self.on_position(position),
            Inbound::Health(connected) => self.on_health(connected),
            Inbound::Failed { source, message } => {
                if source == PollKind::Sample {
                    self.state.last_error = Some(message.clone());
                    self.state.stale = self.state.latest.is_some();
                }
                vec![PipelineEvent::FetchFailed { source, message }]
            }
        }
    }

    fn on_sample(&mut self, sample: SensorSample) -> Vec<PipelineEvent> {
        let assessment = SampleAssessment::of(&sample);
        let stopped = self.detector.observe(&sample);
        let engine = self.detector.state();

        let mut events = vec![PipelineEvent::Sample {
            sample: sample.clone(),
            assessment,
            engine,
        }];

        if stopped {
            info!(id = ?sample.id, "Engine stopped; capturing evidence");
            match self.evidence.append(sample.clone()) {
                Ok(entry) => events.push(PipelineEvent::EvidenceCaptured(entry)),
                Err(Error::Persistence {
                    capture_id,
                    message,
                    ..
                }) => {
                    if let Some(entry) = self.evidence.entries().last() {
                        events.push(PipelineEvent::EvidenceCaptured(entry.clone()));
                    }
                    events.push(PipelineEvent::PersistenceFailed {
                        capture_id,
                        message,
                    });
                }
                Err(err) if err.is_duplicate() => {
                    debug!(error = %err, "Evidence already captured");
                }
                Err(err) => {
                    warn!(error = %err, "Evidence capture failed");
                }
            }
        }

        self.state.latest = Some(sample);
        self.state.assessment = Some(assessment);
        self.state.engine = engine;
        self.state.evidence_count = self.evidence.len();
        self.state.last_error = None;
        self.state.stale = false;

        events
    }

    fn on_position(&mut self, position: CarPosition) -> Vec<PipelineEvent> {
        let point = PathPoint::from(position);
        if self.path.observe(point) {
            vec![PipelineEvent::PathExtended(point)]
        } else {
            Vec::new()
        }
    }

    fn on_health(&mut self, connected: bool) -> Vec<PipelineEvent> {
        if self.state.connected == Some(connected) {
            return Vec::new();
        }
        if connected {
            info!("Backend reachable");
        } else {
            warn!("Backend unreachable");
        }
        self.state.connected = Some(connected);
        vec![PipelineEvent::Connectivity(connected)]
    }
}

/// A running pipeline.
#[derive(Debug)]
pub struct Pipeline<S> {
    pollers: Vec<PollerHandle>,
    consumer: JoinHandle<EvidenceStore<S>>,
    state: watch::Receiver<LiveState>,
    events: broadcast::Sender<PipelineEvent>,
    path: Arc<PathTracker>,
}

impl<S: KeyValueStore + 'static> Pipeline<S> {
    /// Start polling `api` and capturing evidence into `evidence`.
    ///
    /// `evidence` should already be loaded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if an enabled poller has a zero
    /// period. Nothing is spawned in that case.
    pub fn start<A: TelemetryApi + 'static>(
        api: Arc<A>,
        evidence: EvidenceStore<S>,
        options: &PipelineOptions,
    ) -> Result<Self> {
        let samples = Poller::new(SampleFetcher::new(Arc::clone(&api)), options.sample_interval)?;
        let positions = options
            .track_path
            .then(|| Poller::new(PositionFetcher::new(Arc::clone(&api)), options.position_interval))
            .transpose()?;
        let health = options
            .probe_health
            .then(|| Poller::new(HealthProbe::new(Arc::clone(&api)), options.health_interval))
            .transpose()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let path = Arc::new(PathTracker::new());

        let engine = CaptureEngine::new(evidence, Arc::clone(&path));
        let (state_tx, state) = watch::channel(engine.state().clone());
        let consumer = tokio::spawn(consume(engine, rx, state_tx, events.clone()));

        let mut pollers = vec![spawn_poller(samples, &tx, Inbound::Sample)];
        if let Some(positions) = positions {
            pollers.push(spawn_poller(positions, &tx, Inbound::Position));
        }
        if let Some(health) = health {
            pollers.push(spawn_health(health, &tx));
        }

        info!(pollers = pollers.len(), "Pipeline started");
        Ok(Self {
            pollers,
            consumer,
            state,
            events,
            path,
        })
    }

    /// Watch the live state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<LiveState> {
        self.state.clone()
    }

    /// Subscribe to pipeline events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// The shared vehicle path.
    #[must_use]
    pub fn path(&self) -> Arc<PathTracker> {
        Arc::clone(&self.path)
    }

    /// Stop all pollers, drain the queue and return the evidence log.
    ///
    /// # Errors
    ///
    /// Returns an error if a pipeline task panicked.
    pub async fn shutdown(self) -> Result<EvidenceStore<S>> {
        for poller in &self.pollers {
            poller.stop();
        }
        for poller in self.pollers {
            poller.shutdown().await?;
        }

        let evidence = self
            .consumer
            .await
            .map_err(|e| Error::internal(format!("pipeline consumer failed: {e}")))?;
        info!(evidence = evidence.len(), "Pipeline stopped");
        Ok(evidence)
    }
}

fn spawn_poller<P, M>(
    poller: Poller<P>,
    tx: &mpsc::UnboundedSender<Inbound>,
    wrap: M,
) -> PollerHandle
where
    P: PollSource,
    M: Fn(P::Item) -> Inbound + Send + 'static,
{
    let kind = poller.kind();
    let items = tx.clone();
    let errors = tx.clone();
    poller.start(
        move |item| {
            let _ = items.send(wrap(item));
        },
        move |err| {
            let _ = errors.send(Inbound::Failed {
                source: kind,
                message: err.to_string(),
            });
        },
    )
}

fn spawn_health<A: TelemetryApi + 'static>(
    probe: Poller<HealthProbe<A>>,
    tx: &mpsc::UnboundedSender<Inbound>,
) -> PollerHandle {
    let up = tx.clone();
    let down = tx.clone();
    probe.start(
        move |()| {
            let _ = up.send(Inbound::Health(true));
        },
        move |_| {
            let _ = down.send(Inbound::Health(false));
        },
    )
}

async fn consume<S: KeyValueStore>(
    mut engine: CaptureEngine<S>,
    mut rx: mpsc::UnboundedReceiver<Inbound>,
    state: watch::Sender<LiveState>,
    events: broadcast::Sender<PipelineEvent>,
) -> EvidenceStore<S> {
    while let Some(message) = rx.recv().await {
        let produced = engine.handle(message);
        state.send_replace(engine.state().clone());
        for event in produced {
            let _ = events.send(event);
        }
    }
    engine.into_evidence()
}
