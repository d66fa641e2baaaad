//! Threshold-based severity classification.
//!
//! Every function here is pure. Inputs are in canonical units: alcohol as a
//! ratio, distance in metres, impact in g. A signal the unit did not report
//! never raises a level or a danger flag; only a missing seatbelt reading
//! counts against the driver.
//!
//! Three independent threshold sets exist and are kept apart:
//! per-signal levels for live samples, the coarser [`is_dangerous`]
//! composite, and [`classify_accident_severity`] for historical accidents.

use serde::{Deserialize, Serialize};

use crate::telemetry::{AccidentEvent, SensorReadings, SensorSample};

/// Alcohol ratio above which a reading is high.
pub const ALCOHOL_HIGH: f64 = 0.05;
/// Impact in g above which a reading is high.
pub const IMPACT_HIGH: f64 = 2.0;
/// Impact in g above which a reading is medium.
pub const IMPACT_MEDIUM: f64 = 1.0;
/// Distance in metres below which a reading is high.
pub const DISTANCE_HIGH: f64 = 10.0;
/// Distance in metres below which a reading is medium.
pub const DISTANCE_MEDIUM: f64 = 30.0;
/// Vibration above which a reading is high.
pub const VIBRATION_HIGH: f64 = 1000.0;
/// Vibration above which a reading is medium.
pub const VIBRATION_MEDIUM: f64 = 500.0;
/// Distance in metres below which a sample is dangerous.
pub const DANGER_DISTANCE: f64 = 20.0;

/// Ordinal severity of a reading.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    /// Within normal range.
    #[default]
    Low,
    /// Warning range.
    Medium,
    /// Error range.
    High,
}

impl std::fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => f.pad("LOW"),
            Self::Medium => f.pad("MEDIUM"),
            Self::High => f.pad("HIGH"),
        }
    }
}

/// Alcohol level. There is no medium band.
#[must_use]
pub fn alcohol_level(ratio: f64) -> SeverityLevel {
    if ratio > ALCOHOL_HIGH {
        SeverityLevel::High
    } else {
        SeverityLevel::Low
    }
}

/// Impact level.
#[must_use]
pub fn impact_level(g: f64) -> SeverityLevel {
    if g > IMPACT_HIGH {
        SeverityLevel::High
    } else if g > IMPACT_MEDIUM {
        SeverityLevel::Medium
    } else {
        SeverityLevel::Low
    }
}

/// Distance level. Lower is worse.
#[must_use]
pub fn distance_level(metres: f64) -> SeverityLevel {
    if metres < DISTANCE_HIGH {
        SeverityLevel::High
    } else if metres < DISTANCE_MEDIUM {
        SeverityLevel::Medium
    } else {
        SeverityLevel::Low
    }
}

/// Vibration level.
#[must_use]
pub fn vibration_level(vibration: f64) -> SeverityLevel {
    if vibration > VIBRATION_HIGH {
        SeverityLevel::High
    } else if vibration > VIBRATION_MEDIUM {
        SeverityLevel::Medium
    } else {
        SeverityLevel::Low
    }
}

/// Composite danger flag for a live reading.
///
/// True if alcohol > 0.05, impact > 2.0 g, distance < 20 m, or the seatbelt
/// is not reported as fastened.
#[must_use]
pub fn is_dangerous(readings: &SensorReadings) -> bool {
    readings.alcohol.is_some_and(|a| a > ALCOHOL_HIGH)
        || readings.impact.is_some_and(|g| g > IMPACT_HIGH)
        || readings.distance.is_some_and(|d| d < DANGER_DISTANCE)
        || readings.seatbelt != Some(true)
}

/// Severity of a historical accident from its impact force in g.
#[must_use]
pub fn classify_accident_severity(impact: f64) -> SeverityLevel {
    if impact > 8.0 {
        SeverityLevel::High
    } else if impact > 4.0 {
        SeverityLevel::Medium
    } else {
        SeverityLevel::Low
    }
}

/// Heart-rate band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartRateBand {
    /// Below 60 bpm.
    Low,
    /// 60 to 100 bpm.
    Normal,
    /// Above 100 bpm.
    High,
}

impl std::fmt::Display for HeartRateBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => f.pad("Low"),
            Self::Normal => f.pad("Normal"),
            Self::High => f.pad("High"),
        }
    }
}

/// Band a heart rate in bpm.
#[must_use]
pub fn heart_rate_band(bpm: u32) -> HeartRateBand {
    if bpm < 60 {
        HeartRateBand::Low
    } else if bpm > 100 {
        HeartRateBand::High
    } else {
        HeartRateBand::Normal
    }
}

/// Band a predictive risk score in percent.
#[must_use]
pub fn risk_level(score: f64) -> SeverityLevel {
    if score > 70.0 {
        SeverityLevel::High
    } else if score > 40.0 {
        SeverityLevel::Medium
    } else {
        SeverityLevel::Low
    }
}

/// Notes attached to a historical accident record.
#[must_use]
pub fn accident_annotations(event: &AccidentEvent) -> Vec<&'static str> {
    let r = &event.readings;
    let mut notes = Vec::new();
    if r.vibration.is_some_and(|v| v > 5.0) {
        notes.push("High vibration");
    }
    if r.distance.is_some_and(|d| d < 10.0) {
        notes.push("Proximity warning");
    }
    if r.alcohol.is_some_and(|a| a > ALCOHOL_HIGH) {
        notes.push("Alcohol detected");
    }
    if r.impact.is_some_and(|g| g > 8.0) {
        notes.push("Severe impact detected");
    }
    if r.seatbelt == Some(false) {
        notes.push("Seatbelt not worn");
    }
    notes
}

/// Classification of one live sample.
///
/// A per-signal level is `None` when the sample did not report that signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleAssessment {
    /// Alcohol level.
    pub alcohol: Option<SeverityLevel>,
    /// Impact level.
    pub impact: Option<SeverityLevel>,
    /// Distance level.
    pub distance: Option<SeverityLevel>,
    /// Vibration level.
    pub vibration: Option<SeverityLevel>,
    /// Whether the seatbelt is fastened, when reported.
    pub seatbelt: Option<bool>,
    /// Heart-rate band, when the sample carries a heart rate.
    pub heart_rate: Option<HeartRateBand>,
    /// Composite danger flag.
    pub dangerous: bool,
}

impl SampleAssessment {
    /// Classify a sample.
    #[must_use]
    pub fn of(sample: &SensorSample) -> Self {
        let r = &sample.readings;
        Self {
            alcohol: r.alcohol.map(alcohol_level),
            impact: r.impact.map(impact_level),
            distance: r.distance.map(distance_level),
            vibration: r.vibration.map(vibration_level),
            seatbelt: r.seatbelt,
            heart_rate: sample.heart_rate.map(heart_rate_band),
            dangerous: is_dangerous(r),
        }
    }

    /// The worst reported per-signal level, `Low` if none was reported.
    #[must_use]
    pub fn worst(&self) -> SeverityLevel {
        [self.alcohol, self.impact, self.distance, self.vibration]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(alcohol: f64, impact: f64, distance: f64, seatbelt: bool) -> SensorReadings {
        SensorReadings::new(alcohol, 0.0, distance, impact, seatbelt)
    }

    #[test]
    fn test_level_ordering() {
        assert!(SeverityLevel::Low < SeverityLevel::Medium);
        assert!(SeverityLevel::Medium < SeverityLevel::High);
        assert_eq!(SeverityLevel::High.to_string(), "HIGH");
    }

    #[test]
    fn test_alcohol_level() {
        assert_eq!(alcohol_level(0.0), SeverityLevel::Low);
        assert_eq!(alcohol_level(0.05), SeverityLevel::Low);
        assert_eq!(alcohol_level(0.051), SeverityLevel::High);
    }

    #[test]
    fn test_impact_level_boundaries() {
        assert_eq!(impact_level(1.0), SeverityLevel::Low);
        assert_eq!(impact_level(1.5), SeverityLevel::Medium);
        assert_eq!(impact_level(2.0), SeverityLevel::Medium);
        assert_eq!(impact_level(2.1), SeverityLevel::High);
    }

    #[test]
    fn test_distance_level_is_inverted() {
        assert_eq!(distance_level(5.0), SeverityLevel::High);
        assert_eq!(distance_level(10.0), SeverityLevel::Medium);
        assert_eq!(distance_level(29.9), SeverityLevel::Medium);
        assert_eq!(distance_level(30.0), SeverityLevel::Low);
        assert_eq!(distance_level(250.0), SeverityLevel::Low);
    }

    #[test]
    fn test_vibration_level() {
        assert_eq!(vibration_level(500.0), SeverityLevel::Low);
        assert_eq!(vibration_level(750.0), SeverityLevel::Medium);
        assert_eq!(vibration_level(1000.0), SeverityLevel::Medium);
        assert_eq!(vibration_level(1200.0), SeverityLevel::High);
    }

    #[test]
    fn test_is_dangerous() {
        assert!(is_dangerous(&readings(0.1, 0.0, 100.0, true)));
        assert!(!is_dangerous(&readings(0.0, 0.0, 100.0, true)));
    }

    #[test]
    fn test_is_dangerous_each_trigger() {
        assert!(is_dangerous(&readings(0.0, 2.5, 100.0, true)));
        assert!(is_dangerous(&readings(0.0, 0.0, 19.9, true)));
        assert!(is_dangerous(&readings(0.0, 0.0, 100.0, false)));
        assert!(!is_dangerous(&readings(0.05, 2.0, 20.0, true)));
    }

    #[test]
    fn test_missing_signal_is_not_dangerous() {
        let sample: SensorSample = serde_json::from_str(
            r#"{"id": 1, "alcohol": 0, "impact": 0, "seatbelt": true, "lcd_display": "Engine: RUNNING"}"#,
        )
        .unwrap();
        let assessment = SampleAssessment::of(&sample);

        assert!(!is_dangerous(&sample.readings));
        assert!(!assessment.dangerous);
        assert!(assessment.distance.is_none());
        assert!(assessment.vibration.is_none());
        assert_eq!(assessment.alcohol, Some(SeverityLevel::Low));
        assert_eq!(assessment.worst(), SeverityLevel::Low);
    }

    #[test]
    fn test_missing_seatbelt_counts_as_unfastened() {
        let mut r = readings(0.0, 0.0, 100.0, true);
        r.seatbelt = None;
        assert!(is_dangerous(&r));
    }

    #[test]
    fn test_classify_accident_severity() {
        assert_eq!(classify_accident_severity(9.0), SeverityLevel::High);
        assert_eq!(classify_accident_severity(5.0), SeverityLevel::Medium);
        assert_eq!(classify_accident_severity(1.0), SeverityLevel::Low);
        assert_eq!(classify_accident_severity(8.0), SeverityLevel::Medium);
        assert_eq!(classify_accident_severity(4.0), SeverityLevel::Low);
    }

    #[test]
    fn test_accident_severity_differs_from_live_impact() {
        assert_eq!(impact_level(3.0), SeverityLevel::High);
        assert_eq!(classify_accident_severity(3.0), SeverityLevel::Low);
    }

    #[test]
    fn test_heart_rate_band() {
        assert_eq!(heart_rate_band(45), HeartRateBand::Low);
        assert_eq!(heart_rate_band(60), HeartRateBand::Normal);
        assert_eq!(heart_rate_band(100), HeartRateBand::Normal);
        assert_eq!(heart_rate_band(130), HeartRateBand::High);
    }

    #[test]
    fn test_risk_level() {
        assert_eq!(risk_level(80.0), SeverityLevel::High);
        assert_eq!(risk_level(70.0), SeverityLevel::Medium);
        assert_eq!(risk_level(41.0), SeverityLevel::Medium);
        assert_eq!(risk_level(40.0), SeverityLevel::Low);
    }

    #[test]
    fn test_accident_annotations() {
        let event: AccidentEvent = serde_json::from_str(
            r#"{"alcohol": 0.08, "vibration": 7, "distance": 4, "impact": 9.5, "seatbelt": 0}"#,
        )
        .unwrap();
        assert_eq!(
            accident_annotations(&event),
            vec![
                "High vibration",
                "Proximity warning",
                "Alcohol detected",
                "Severe impact detected",
                "Seatbelt not worn"
            ]
        );

        let calm: AccidentEvent = serde_json::from_str(
            r#"{"alcohol": 0, "vibration": 1, "distance": 40, "impact": 3, "seatbelt": 1}"#,
        )
        .unwrap();
        assert!(accident_annotations(&calm).is_empty());

        let sparse: AccidentEvent = serde_json::from_str(r#"{"impact": 9.5}"#).unwrap();
        assert_eq!(accident_annotations(&sparse), vec!["Severe impact detected"]);
    }

    #[test]
    fn test_sample_assessment() {
        let mut sample = SensorSample::new(None, readings(0.0, 1.5, 25.0, true), None);
        sample.readings.vibration = Some(1500.0);
        sample.heart_rate = Some(110);

        let assessment = SampleAssessment::of(&sample);
        assert_eq!(assessment.alcohol, Some(SeverityLevel::Low));
        assert_eq!(assessment.impact, Some(SeverityLevel::Medium));
        assert_eq!(assessment.distance, Some(SeverityLevel::Medium));
        assert_eq!(assessment.vibration, Some(SeverityLevel::High));
        assert_eq!(assessment.heart_rate, Some(HeartRateBand::High));
        assert!(!assessment.dangerous);
        assert_eq!(assessment.worst(), SeverityLevel::High);
    }

    #[test]
    fn test_sample_assessment_without_heart_rate() {
        let sample = SensorSample::new(None, readings(0.0, 0.0, 100.0, false), None);
        let assessment = SampleAssessment::of(&sample);

        assert!(assessment.heart_rate.is_none());
        assert!(assessment.dangerous);
        assert_eq!(assessment.worst(), SeverityLevel::Low);
    }
}
