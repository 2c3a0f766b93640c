//! HTTP client for the anchoring service.
//!
//! Wraps one dispatch in a short series of fast attempts with second-scale
//! backoff, so a momentary blip never costs a minute-scale queue retry.
//! Only when the whole series fails does the failure surface to the queue.

use std::{sync::Arc, time::Duration};

use anchorq_core::{AnchorPayload, AnchorReceipt, Clock};
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Maximum response body length carried into error messages.
const MAX_ERROR_BODY: usize = 200;

/// Configuration for the anchoring client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// URL of the anchoring service endpoint.
    pub endpoint_url: String,

    /// Timeout applied to each individual HTTP request.
    pub timeout: Duration,

    /// Attempts per dispatch, including the first.
    pub max_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

/// HTTP client delivering anchoring payloads.
///
/// Each call to [`send`](AnchorClient::send) is one dispatch: up to
/// `max_attempts` timeout-bounded POSTs with exponential spacing between
/// them. The clock is injected so tests control the inter-attempt sleeps.
#[derive(Clone)]
pub struct AnchorClient {
    client: reqwest::Client,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
}

impl AnchorClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the endpoint URL is empty
    /// or the HTTP client cannot be built.
    pub fn new(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.endpoint_url.is_empty() {
            return Err(DeliveryError::configuration("endpoint URL must not be empty"));
        }
        if config.max_attempts == 0 {
            return Err(DeliveryError::configuration("max_attempts must be at least 1"));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config, clock })
    }

    /// Dispatches a payload to the anchoring service.
    ///
    /// Serializes the payload once, then runs the attempt series. After a
    /// failed attempt `k` (except the last) the client sleeps `2^(k-1)`
    /// seconds before trying again.
    ///
    /// A 2xx response is success even when the body is unparseable; the
    /// receipt simply carries no identifiers in that case.
    ///
    /// # Errors
    ///
    /// - `Serialization` if the payload cannot be encoded (no attempts are
    ///   made)
    /// - `RetriesExhausted` once every attempt has failed, wrapping the
    ///   last attempt's error
    pub async fn send(&self, payload: &AnchorPayload) -> Result<AnchorReceipt> {
        let body = serde_json::to_string(payload)
            .map_err(|e| DeliveryError::serialization(e.to_string()))?;

        let span = info_span!(
            "anchor_dispatch",
            document_id = payload.document_id,
            endpoint = %self.config.endpoint_url,
        );

        async move {
            let mut last_error = DeliveryError::network("no attempts made");

            for attempt in 1..=self.config.max_attempts {
                match self.attempt(&body).await {
                    Ok(receipt) => {
                        tracing::info!(attempt, "payload anchored");
                        return Ok(receipt);
                    },
                    Err(e) => {
                        tracing::warn!(attempt, error = %e, "anchor attempt failed");
                        last_error = e;
                    },
                }

                if attempt < self.config.max_attempts {
                    let delay = Duration::from_secs(1 << (attempt - 1));
                    self.clock.sleep(delay).await;
                }
            }

            Err(DeliveryError::retries_exhausted(
                self.config.max_attempts,
                last_error.to_string(),
            ))
        }
        .instrument(span)
        .await
    }

    /// Runs one HTTP attempt.
    async fn attempt(&self, body: &str) -> Result<AnchorReceipt> {
        let response = self
            .client
            .post(&self.config.endpoint_url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("X-Source-System", anchorq_core::models::SOURCE_SYSTEM)
            .header("Content-Length", body.len())
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::timeout(self.config.timeout.as_secs())
                } else if e.is_connect() {
                    DeliveryError::network(format!("connection failed: {e}"))
                } else {
                    DeliveryError::network(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(DeliveryError::http_status(
                status.as_u16(),
                extract_error_message(&text),
            ));
        }

        let receipt = match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => AnchorReceipt::from_json(&value),
            Err(_) => {
                tracing::warn!("anchoring service returned unparseable success body");
                AnchorReceipt::default()
            },
        };

        Ok(receipt)
    }
}

impl std::fmt::Debug for AnchorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnchorClient").field("config", &self.config).finish_non_exhaustive()
    }
}

/// Pulls a human-readable error detail out of a failure response body.
///
/// Probes the common JSON error keys first, then falls back to the raw
/// body truncated to a storable length.
fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "message", "detail"] {
            if let Some(message) = value.get(key).and_then(serde_json::Value::as_str) {
                return message.to_string();
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "no response body".to_string();
    }

    let mut message: String = trimmed.chars().take(MAX_ERROR_BODY).collect();
    if message.len() < trimmed.len() {
        message.push_str("... (truncated)");
    }
    message
}

#[cfg(test)]
mod tests {
    use anchorq_core::{DocumentId, DocumentStatus, SourceDocument, TestClock};
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_payload() -> AnchorPayload {
        let doc = SourceDocument {
            id: DocumentId(42),
            patient_uuid: Some(uuid::Uuid::new_v4()),
            file_path: "/documents/42.pdf".to_string(),
            file_hash: "deadbeef".to_string(),
            mime_type: "application/pdf".to_string(),
            category: Some("Imaging".to_string()),
            status: DocumentStatus::Pending,
            anchor_tx: None,
            anchor_hash: None,
            created_at: chrono::Utc::now(),
        };
        AnchorPayload::for_document(&doc)
    }

    fn test_client(endpoint_url: String) -> (AnchorClient, Arc<TestClock>) {
        let clock = Arc::new(TestClock::new());
        let config = ClientConfig { endpoint_url, ..Default::default() };
        (AnchorClient::new(config, clock.clone()).unwrap(), clock)
    }

    #[tokio::test]
    async fn successful_dispatch_returns_receipt() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/anchor"))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::header("x-source-system", "OpenEMR"))
            .and(matchers::body_partial_json(serde_json::json!({
                "document_id": 42,
                "source_system": "OpenEMR",
                "event_type": "document.created",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "blockchain_tx": "0xabc123",
                "record_hash": "hash-1",
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (client, clock) = test_client(format!("{}/anchor", mock_server.uri()));
        let before = clock.now_utc();
        let receipt = client.send(&test_payload()).await.unwrap();

        assert_eq!(receipt.tx_id.as_deref(), Some("0xabc123"));
        assert_eq!(receipt.record_hash.as_deref(), Some("hash-1"));

        // The first attempt fires immediately, so no backoff elapsed.
        assert_eq!(clock.now_utc(), before);
    }

    #[tokio::test]
    async fn retries_within_dispatch_then_succeeds() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .up_to_n_times(2)
            .expect(2)
            .mount(&mock_server)
            .await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tx_hash": "0xdef",
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (client, clock) = test_client(mock_server.uri());
        let before = clock.now_utc();
        let receipt = client.send(&test_payload()).await.unwrap();

        assert_eq!(receipt.tx_id.as_deref(), Some("0xdef"));

        // Two failures cost 1s then 2s of backoff before the third lands.
        assert_eq!(clock.now_utc() - before, chrono::Duration::seconds(3));
    }

    #[tokio::test]
    async fn exhausted_attempts_surface_last_error() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({"error": "ledger offline"})),
            )
            .expect(3)
            .mount(&mock_server)
            .await;

        let (client, clock) = test_client(mock_server.uri());
        let before = clock.now_utc();
        let err = client.send(&test_payload()).await.unwrap_err();

        match err {
            DeliveryError::RetriesExhausted { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("ledger offline"));
            },
            other => unreachable!("expected exhaustion, got {other}"),
        }

        // Backoff spacing across the series: 1s after the first failure,
        // 2s after the second, none after the last.
        assert_eq!(clock.now_utc() - before, chrono::Duration::seconds(3));
    }

    #[tokio::test]
    async fn unparseable_success_body_is_still_success() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("anchored!"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (client, _clock) = test_client(mock_server.uri());
        let receipt = client.send(&test_payload()).await.unwrap();

        assert!(receipt.is_empty());
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        // Port from a started-then-dropped server is very likely unbound.
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server);

        let (client, clock) = test_client(uri);
        let before = clock.now_utc();
        let err = client.send(&test_payload()).await.unwrap_err();

        match err {
            DeliveryError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => unreachable!("expected exhaustion, got {other}"),
        }

        assert_eq!(clock.now_utc() - before, chrono::Duration::seconds(3));
    }

    #[test]
    fn empty_endpoint_rejected() {
        let result = AnchorClient::new(ClientConfig::default(), Arc::new(TestClock::new()));
        assert!(matches!(result, Err(DeliveryError::Configuration { .. })));
    }

    #[test]
    fn error_message_probes_json_keys() {
        assert_eq!(extract_error_message(r#"{"error": "boom"}"#), "boom");
        assert_eq!(extract_error_message(r#"{"message": "nope"}"#), "nope");
        assert_eq!(extract_error_message("plain text"), "plain text");
        assert_eq!(extract_error_message("  "), "no response body");

        let long = "x".repeat(500);
        let message = extract_error_message(&long);
        assert!(message.ends_with("... (truncated)"));
    }
}
