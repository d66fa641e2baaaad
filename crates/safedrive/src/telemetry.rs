//! Core telemetry types for safedrive.
//!
//! This module defines the data structures received from the monitoring
//! unit's backend: live sensor samples, vehicle positions, historical
//! accident events and fleet statistics.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Marker the unit writes into its status text while the engine runs.
pub const ENGINE_RUNNING_MARKER: &str = "Engine: RUNNING";

/// Full-scale count of the alcohol sensor's 10-bit ADC.
const ALCOHOL_ADC_FULL_SCALE: f64 = 1023.0;

/// Opaque identifier of a sample or an evidence capture.
///
/// The backend emits either numeric or string identifiers; both compare for
/// equality and ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleId {
    /// Numeric identifier (also used for generated capture ids).
    Number(i64),
    /// String identifier.
    Text(String),
}

impl std::fmt::Display for SampleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => f.pad(&n.to_string()),
            Self::Text(s) => f.pad(s),
        }
    }
}

/// Unit in which the backend reports the alcohol signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlcoholUnit {
    /// Ratio in `0.0..=1.0` (the canonical unit).
    #[default]
    Ratio,
    /// Raw 10-bit ADC count in `0..=1023`.
    RawAdc,
}

impl AlcoholUnit {
    /// Convert a reading in this unit to the canonical ratio.
    #[must_use]
    pub fn to_ratio(self, value: f64) -> f64 {
        match self {
            Self::Ratio => value,
            Self::RawAdc => value / ALCOHOL_ADC_FULL_SCALE,
        }
    }
}

impl std::fmt::Display for AlcoholUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ratio => f.pad("ratio"),
            Self::RawAdc => f.pad("raw_adc"),
        }
    }
}

/// The raw sensor readings shared by live samples and accident records.
///
/// Values are in canonical units once they have passed the ingestion
/// boundary: alcohol as a ratio, distance in metres, impact in g. A signal
/// the unit did not report is `None`, never zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorReadings {
    /// Alcohol level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alcohol: Option<f64>,
    /// Vibration level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibration: Option<f64>,
    /// Distance to the nearest obstacle in metres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Impact force in g.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<f64>,
    /// Whether the seatbelt is fastened.
    #[serde(
        default,
        deserialize_with = "optional_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub seatbelt: Option<bool>,
}

impl SensorReadings {
    /// Create readings with every signal reported.
    #[must_use]
    pub fn new(alcohol: f64, vibration: f64, distance: f64, impact: f64, seatbelt: bool) -> Self {
        Self {
            alcohol: Some(alcohol),
            vibration: Some(vibration),
            distance: Some(distance),
            impact: Some(impact),
            seatbelt: Some(seatbelt),
        }
    }

    /// Convert the alcohol reading from `unit` to the canonical ratio.
    #[must_use]
    pub fn normalized(mut self, unit: AlcoholUnit) -> Self {
        self.alcohol = self.alcohol.map(|value| unit.to_ratio(value));
        self
    }
}

/// One telemetry reading from the monitoring unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Backend identifier, when the backend assigned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SampleId>,

    /// When the unit took the reading.
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,

    /// The sensor readings.
    #[serde(flatten)]
    pub readings: SensorReadings,

    /// Heart rate in beats per minute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u32>,

    /// Free-form text shown on the unit's LCD.
    #[serde(
        default,
        rename = "lcd_display",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<String>,
}

impl SensorSample {
    /// Create a sample with the given readings and status text.
    #[must_use]
    pub fn new(id: Option<SampleId>, readings: SensorReadings, status: Option<String>) -> Self {
        Self {
            id,
            timestamp: Some(Utc::now()),
            readings,
            heart_rate: None,
            status,
        }
    }

    /// Check whether the status text carries the running-engine marker.
    #[must_use]
    pub fn reports_engine_running(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|text| text.contains(ENGINE_RUNNING_MARKER))
    }

    /// Convert the alcohol reading from `unit` to the canonical ratio.
    #[must_use]
    pub fn normalized(mut self, unit: AlcoholUnit) -> Self {
        self.readings = self.readings.normalized(unit);
        self
    }
}

/// A vehicle position as reported by `GET /api/car/position`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarPosition {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Speed in km/h.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

/// One point of the vehicle path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

impl PathPoint {
    /// Create a new path point.
    #[must_use]
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl From<CarPosition> for PathPoint {
    fn from(position: CarPosition) -> Self {
        Self::new(position.lat, position.lng)
    }
}

/// A historical accident record from `GET /api/accidents` or `GET /api/map`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccidentEvent {
    /// Backend identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SampleId>,

    /// When the accident was recorded.
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,

    /// The sensor readings at the time of the accident.
    #[serde(flatten)]
    pub readings: SensorReadings,

    /// Latitude of the accident, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,

    /// Longitude of the accident, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,

    /// Whether the unit placed an emergency call.
    #[serde(default, deserialize_with = "bool_or_int")]
    pub emergency_call: bool,
}

impl AccidentEvent {
    /// The accident location, when both coordinates are present.
    #[must_use]
    pub fn location(&self) -> Option<PathPoint> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(PathPoint::new(lat, lng)),
            _ => None,
        }
    }
}

/// Aggregate statistics from `GET /api/stats`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetStats {
    /// Total number of detected accidents.
    pub total_accidents: u64,
    /// Highest impact force recorded.
    pub max_impact: f64,
    /// Highest alcohol level recorded.
    pub max_alcohol: f64,
    /// Number of accidents without a fastened seatbelt.
    pub seatbelt_violations: u64,
    /// Total number of sensor readings collected.
    pub total_sensor_points: u64,
}

/// Accept `true`/`false`, `0`/`1`, or `null` (as `false`).
fn bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(optional_flag(deserializer)?.unwrap_or_default())
}

/// Accept `true`/`false`, `0`/`1`, or `null` (as `None`).
fn optional_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Float(f64),
    }

    Ok(Option::<Flag>::deserialize(deserializer)?.map(|flag| match flag {
        Flag::Bool(b) => b,
        Flag::Int(n) => n != 0,
        Flag::Float(x) => x != 0.0,
    }))
}

/// Accept RFC 3339 strings or epoch milliseconds; anything else becomes `None`.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stamp {
        Millis(i64),
        Text(String),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Option::<Stamp>::deserialize(deserializer)? {
        Some(Stamp::Millis(ms)) => Utc.timestamp_millis_opt(ms).single(),
        Some(Stamp::Text(text)) => DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Some(Stamp::Other(_)) | None => None,
    })
}
