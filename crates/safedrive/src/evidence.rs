//! Evidence capture log.
//!
//! Each detected engine stop captures a snapshot of the triggering sample.
//! The log is append-only and keyed by capture identifier: a second append
//! with an identifier already in the log is rejected. The whole log is
//! serialized as one JSON array under a single key of a [`KeyValueStore`].

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::storage::KeyValueStore;
use crate::telemetry::{SampleId, SensorSample};

/// A snapshot captured at an engine stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredEntry")]
pub struct EvidenceEntry {
    /// Identifier of this capture, unique within the log.
    #[serde(rename = "captureId")]
    pub capture_id: SampleId,

    /// When the capture was taken.
    #[serde(rename = "savedAt")]
    pub saved_at: DateTime<Utc>,

    /// The sample that triggered the capture.
    #[serde(flatten)]
    pub sample: SensorSample,
}

/// On-disk shape of an entry.
///
/// Logs written before capture identifiers existed carry only the sample's
/// own `id`; that identifier is used as the capture id when reading them.
#[derive(Deserialize)]
struct StoredEntry {
    #[serde(rename = "captureId", default)]
    capture_id: Option<SampleId>,
    #[serde(rename = "savedAt")]
    saved_at: DateTime<Utc>,
    #[serde(flatten)]
    sample: SensorSample,
}

impl TryFrom<StoredEntry> for EvidenceEntry {
    type Error = String;

    fn try_from(stored: StoredEntry) -> std::result::Result<Self, Self::Error> {
        let capture_id = stored
            .capture_id
            .or_else(|| stored.sample.id.clone())
            .ok_or_else(|| "evidence entry has neither captureId nor id".to_string())?;

        Ok(Self {
            capture_id,
            saved_at: stored.saved_at,
            sample: stored.sample,
        })
    }
}

/// Result of reading the persisted log.
#[derive(Debug)]
pub struct LoadOutcome {
    /// Entries in stored order.
    pub entries: Vec<EvidenceEntry>,
    /// Why the stored log was discarded, if it was.
    pub error: Option<Error>,
}

/// Append-only, deduplicated evidence log backed by a key-value store.
///
/// The in-memory log is authoritative for the session. A failed durable
/// write keeps the entry in memory and reports [`Error::Persistence`].
#[derive(Debug)]
pub struct EvidenceStore<S> {
    store: S,
    key: String,
    entries: Vec<EvidenceEntry>,
    ids: HashSet<SampleId>,
    last_generated: i64,
}

impl<S: KeyValueStore> EvidenceStore<S> {
    /// Create an empty log persisted under `key`.
    ///
    /// Call [`load`](Self::load) to pick up entries from earlier runs.
    #[must_use]
    pub fn new(store: S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            entries: Vec::new(),
            ids: HashSet::new(),
            last_generated: 0,
        }
    }

    /// Reconstruct the log from durable storage.
    ///
    /// A missing key yields an empty log. A malformed document, or one the
    /// store cannot read, also yields an empty log, with the error returned in
    /// the outcome rather than raised. Entries repeating an earlier capture id
    /// are dropped.
    pub fn load(&mut self) -> LoadOutcome {
        self.entries.clear();
        self.ids.clear();

        let error = match self.read_stored() {
            Ok(stored) => {
                let total = stored.len();
                for entry in stored {
                    if self.ids.insert(entry.capture_id.clone()) {
                        self.entries.push(entry);
                    }
                }
                if self.entries.len() < total {
                    warn!(
                        key = %self.key,
                        dropped = total - self.entries.len(),
                        "Dropped duplicate evidence entries from stored log"
                    );
                }
                debug!(key = %self.key, entries = self.entries.len(), "Loaded evidence log");
                None
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "Discarding unreadable evidence log");
                Some(err)
            }
        };

        LoadOutcome {
            entries: self.entries.clone(),
            error,
        }
    }

    fn read_stored(&self) -> Result<Vec<EvidenceEntry>> {
        match self.store.get(&self.key)? {
            None => Ok(Vec::new()),
            Some(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|source| Error::parse(format!("evidence log '{}'", self.key), source)),
        }
    }

    /// Capture `sample` as a new evidence entry and persist the log.
    ///
    /// The capture id is the sample's id when present, otherwise a generated
    /// id based on the current time in milliseconds, strictly increasing
    /// within this store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateCapture`] without touching the log if the
    /// capture id is already present. Returns [`Error::Persistence`] if the
    /// durable write fails; the entry is still in the in-memory log.
    pub fn append(&mut self, sample: SensorSample) -> Result<EvidenceEntry> {
        let capture_id = match &sample.id {
            Some(id) => id.clone(),
            None => self.generate_id(),
        };

        if self.ids.contains(&capture_id) {
            debug!(%capture_id, "Rejected duplicate evidence capture");
            return Err(Error::DuplicateCapture { capture_id });
        }

        let entry = EvidenceEntry {
            capture_id: capture_id.clone(),
            saved_at: Utc::now(),
            sample,
        };
        self.ids.insert(capture_id.clone());
        self.entries.push(entry.clone());
        info!(%capture_id, total = self.entries.len(), "Captured evidence");

        self.persist().map_err(|err| {
            warn!(%capture_id, key = %self.key, error = %err, "Evidence kept in memory only");
            Error::Persistence {
                key: self.key.clone(),
                capture_id,
                message: err.to_string(),
            }
        })?;

        Ok(entry)
    }

    /// Write the full in-memory log to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the durable write fails.
    pub fn persist(&mut self) -> Result<()> {
        let json = serde_json::to_string(&self.entries)
            .map_err(|source| Error::parse("evidence log", source))?;
        self.store.set(&self.key, &json)
    }

    fn generate_id(&mut self) -> SampleId {
        let mut next = Utc::now().timestamp_millis().max(self.last_generated + 1);
        while self.ids.contains(&SampleId::Number(next)) {
            next += 1;
        }
        self.last_generated = next;
        SampleId::Number(next)
    }

    /// Entries in capture order.
    #[must_use]
    pub fn entries(&self) -> &[EvidenceEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if a capture id is already in the log.
    #[must_use]
    pub fn contains(&self, capture_id: &SampleId) -> bool {
        self.ids.contains(capture_id)
    }

    /// The key the log is persisted under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the backing store.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Consume the log and return the backing store.
    #[must_use]
    pub fn into_store(self) -> S {
        self.store
    }
}
