//! Remote telemetry API.
//!
//! [`TelemetryApi`] is the contract the rest of the crate consumes;
//! [`HttpApi`] implements it over HTTP. Every call takes a
//! [`CancellationToken`] and resolves as [`Error::Aborted`] as soon as the
//! token is cancelled.

#[cfg(test)]
pub(crate) mod fake;

use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::risk::{RiskKey, RiskResult};
use crate::telemetry::{AccidentEvent, AlcoholUnit, CarPosition, FleetStats, SensorSample};

/// Latest sensor sample.
pub const SENSOR_ENDPOINT: &str = "/api/sensor";
/// Sensor sample history.
pub const HISTORY_ENDPOINT: &str = "/api/sensor/history";
/// Current vehicle position.
pub const POSITION_ENDPOINT: &str = "/api/car/position";
/// Accident log.
pub const ACCIDENTS_ENDPOINT: &str = "/api/accidents";
/// Accidents with locations, for the map.
pub const MAP_ENDPOINT: &str = "/api/map";
/// Aggregate statistics.
pub const STATS_ENDPOINT: &str = "/api/stats";
/// Location and time keyed risk prediction.
pub const RISK_ENDPOINT: &str = "/api/predictive-risk";
/// Backend liveness.
pub const HEALTH_ENDPOINT: &str = "/api/health";

/// Operations offered by the telemetry backend.
///
/// Implementations deliver values in canonical units.
#[async_trait]
pub trait TelemetryApi: Send + Sync {
    /// Fetch the most recent sample.
    async fn latest_sample(&self, cancel: &CancellationToken) -> Result<SensorSample>;

    /// Fetch the sample history, oldest first.
    async fn sensor_history(&self, cancel: &CancellationToken) -> Result<Vec<SensorSample>>;

    /// Fetch the current vehicle position.
    async fn car_position(&self, cancel: &CancellationToken) -> Result<CarPosition>;

    /// Fetch the accident log.
    async fn accidents(&self, cancel: &CancellationToken) -> Result<Vec<AccidentEvent>>;

    /// Fetch the accidents shown on the map.
    async fn accident_map(&self, cancel: &CancellationToken) -> Result<Vec<AccidentEvent>>;

    /// Fetch aggregate statistics.
    async fn stats(&self, cancel: &CancellationToken) -> Result<FleetStats>;

    /// Look up the predictive risk score for a location and time.
    async fn predictive_risk(
        &self,
        key: &RiskKey,
        cancel: &CancellationToken,
    ) -> Result<RiskResult>;

    /// Probe backend liveness.
    async fn health(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Run `fut` until it completes or `cancel` fires.
///
/// Cancellation wins over a result that becomes ready at the same time.
///
/// # Errors
///
/// Returns [`Error::Aborted`] if the token is cancelled, otherwise whatever
/// `fut` returns.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Aborted),
        result = fut => result,
    }
}

/// HTTP implementation of [`TelemetryApi`].
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    alcohol_unit: AlcoholUnit,
}

impl HttpApi {
    /// Create a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        timeout: std::time::Duration,
        alcohol_unit: AlcoholUnit,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("safedrive/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            alcohol_unit,
        })
    }

    /// Create a client from the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.api.base_url.clone(),
            config.request_timeout(),
            config.ingest.alcohol_unit,
        )
    }

    /// The base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<T> {
        let body = cancellable(cancel, self.get_body(endpoint, query)).await?;
        serde_json::from_slice(&body)
            .map_err(|source| Error::parse(format!("response from {endpoint}"), source))
    }

    async fn get_body(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Vec<u8>> {
        let url = format!("{}{endpoint}", self.base_url);
        trace!(%url, "GET");

        let network = |source| Error::Network {
            endpoint: endpoint.to_string(),
            source,
        };

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body = response.bytes().await.map_err(network)?;
        Ok(body.to_vec())
    }

    fn normalize_event(&self, mut event: AccidentEvent) -> AccidentEvent {
        event.readings = event.readings.normalized(self.alcohol_unit);
        event
    }
}

#[async_trait]
impl TelemetryApi for HttpApi {
    async fn latest_sample(&self, cancel: &CancellationToken) -> Result<SensorSample> {
        let sample: SensorSample = self.get_json(SENSOR_ENDPOINT, &[], cancel).await?;
        Ok(sample.normalized(self.alcohol_unit))
    }

    async fn sensor_history(&self, cancel: &CancellationToken) -> Result<Vec<SensorSample>> {
        let samples: Vec<SensorSample> = self.get_json(HISTORY_ENDPOINT, &[], cancel).await?;
        Ok(samples
            .into_iter()
            .map(|s| s.normalized(self.alcohol_unit))
            .collect())
    }

    async fn car_position(&self, cancel: &CancellationToken) -> Result<CarPosition> {
        self.get_json(POSITION_ENDPOINT, &[], cancel).await
    }

    async fn accidents(&self, cancel: &CancellationToken) -> Result<Vec<AccidentEvent>> {
        let events: Vec<AccidentEvent> = self.get_json(ACCIDENTS_ENDPOINT, &[], cancel).await?;
        Ok(events.into_iter().map(|e| self.normalize_event(e)).collect())
    }

    async fn accident_map(&self, cancel: &CancellationToken) -> Result<Vec<AccidentEvent>> {
        let events: Vec<AccidentEvent> = self.get_json(MAP_ENDPOINT, &[], cancel).await?;
        Ok(events.into_iter().map(|e| self.normalize_event(e)).collect())
    }

    async fn stats(&self, cancel: &CancellationToken) -> Result<FleetStats> {
        self.get_json(STATS_ENDPOINT, &[], cancel).await
    }

    async fn predictive_risk(
        &self,
        key: &RiskKey,
        cancel: &CancellationToken,
    ) -> Result<RiskResult> {
        let query = [
            ("lat", key.lat.to_string()),
            ("lng", key.lng.to_string()),
            ("timestamp", key.timestamp.clone()),
        ];
        self.get_json(RISK_ENDPOINT, &query, cancel).await
    }

    async fn health(&self, cancel: &CancellationToken) -> Result<()> {
        cancellable(cancel, self.get_body(HEALTH_ENDPOINT, &[])).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::telemetry::SampleId;

    /// Serve one canned response on a local port and hand back the request head.
    async fn respond_once(status: u16, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let head = read_head(&mut socket).await;

            let response = format!(
                "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            head
        });

        (base_url, handle)
    }

    /// Accept one connection and never answer it.
    async fn never_respond() -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = read_head(&mut socket).await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        (base_url, handle)
    }

    async fn read_head(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn client(base_url: &str, unit: AlcoholUnit) -> HttpApi {
        HttpApi::new(base_url, Duration::from_secs(5), unit).unwrap()
    }

    #[tokio::test]
    async fn test_latest_sample() {
        let (url, server) = respond_once(
            200,
            r#"{"id": 4, "alcohol": 0.01, "vibration": 10, "distance": 42, "impact": 0.2, "seatbelt": 1, "lcd_display": "Engine: RUNNING"}"#,
        )
        .await;

        let sample = client(&url, AlcoholUnit::Ratio)
            .latest_sample(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sample.id, Some(SampleId::Number(4)));
        assert!(sample.reports_engine_running());
        let head = server.await.unwrap();
        assert!(head.starts_with("GET /api/sensor HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_raw_adc_alcohol_converted_at_ingestion() {
        let (url, _server) = respond_once(200, r#"{"alcohol": 1023, "seatbelt": true}"#).await;

        let sample = client(&url, AlcoholUnit::RawAdc)
            .latest_sample(&CancellationToken::new())
            .await
            .unwrap();

        assert!((sample.readings.alcohol.unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_non_success_status_is_api_error() {
        let (url, _server) = respond_once(503, r#"{"error": "down"}"#).await;

        let err = client(&url, AlcoholUnit::Ratio)
            .latest_sample(&CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::Api {
                status, endpoint, ..
            } => {
                assert_eq!(status, 503);
                assert_eq!(endpoint, SENSOR_ENDPOINT);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let (url, _server) = respond_once(200, "<html>oops</html>").await;

        let err = client(&url, AlcoholUnit::Ratio)
            .car_position(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Parse { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = client(&url, AlcoholUnit::Ratio)
            .health(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Network { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_cancelled_request_is_aborted() {
        let (url, _server) = never_respond().await;
        let api = client(&url, AlcoholUnit::Ratio);
        let cancel = CancellationToken::new();

        let request = {
            let cancel = cancel.clone();
            tokio::spawn(async move { api.latest_sample(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let err = request.await.unwrap().unwrap_err();
        assert!(err.is_aborted());
    }

    #[tokio::test]
    async fn test_already_cancelled_token() {
        let api = client("http://127.0.0.1:9", AlcoholUnit::Ratio);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = api.stats(&cancel).await.unwrap_err();
        assert!(err.is_aborted());
    }

    #[tokio::test]
    async fn test_predictive_risk_query() {
        let (url, server) = respond_once(
            200,
            r#"{"riskScore": 72, "accidentsCount": 3, "sensorEventsCount": 40, "weatherCondition": "Rain"}"#,
        )
        .await;

        let key = RiskKey::new(5.6, -0.2, "2024-05-01T10:00:00Z");
        let result = client(&url, AlcoholUnit::Ratio)
            .predictive_risk(&key, &CancellationToken::new())
            .await
            .unwrap();

        assert!((result.risk_score - 72.0).abs() < f64::EPSILON);
        assert_eq!(result.accidents_count, 3);
        assert_eq!(result.weather_condition.as_deref(), Some("Rain"));

        let head = server.await.unwrap();
        assert!(head.contains("/api/predictive-risk?lat=5.6&lng=-0.2&timestamp=2024-05-01T10%3A00%3A00Z"));
    }

    #[tokio::test]
    async fn test_accidents_normalized() {
        let (url, _server) = respond_once(
            200,
            r#"[{"id": 1, "alcohol": 511.5, "impact": 9, "seatbelt": 0, "lat": 5.6, "lng": -0.2}]"#,
        )
        .await;

        let events = client(&url, AlcoholUnit::RawAdc)
            .accidents(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert!((events[0].readings.alcohol.unwrap() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_base_url_trailing_slash() {
        let api = client("http://localhost:8080/", AlcoholUnit::Ratio);
        assert_eq!(api.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = cancellable(&cancel, async { Ok(1) }).await;
        assert!(result.unwrap_err().is_aborted());

        let fresh = CancellationToken::new();
        assert_eq!(cancellable(&fresh, async { Ok(2) }).await.unwrap(), 2);
    }
}
