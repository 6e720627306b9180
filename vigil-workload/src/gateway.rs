//! Marketplace gateway trait and HTTP implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use serde::Deserialize;
use tokio::time::timeout;
use tracing::debug;
use webpki_roots::TLS_SERVER_ROOTS;

use vigil_primitives::{
    Clock, MarketplaceSnapshot, MarketplaceState, MonitorError, MonitorResult,
};

type MarketplaceClient = Client<HttpsConnector<HttpConnector>, Body>;

fn marketplace_client() -> MarketplaceClient {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    let tls = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let mut http = HttpConnector::new();
    http.enforce_http(false);

    Client::builder().build::<_, Body>(HttpsConnector::from((http, Arc::new(tls))))
}

/// Best-effort view of the container hosting an agent.
#[async_trait]
pub trait WorkloadGateway: Send + Sync {
    /// Queries the marketplace for the deployment's current state.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::MarketplaceUnknown`] when the marketplace
    /// cannot be reached or returns an unreadable response. Callers treat
    /// the error as `unknown` state.
    async fn deployment_status(
        &self,
        sequence_id: u64,
        owner: &str,
    ) -> MonitorResult<MarketplaceSnapshot>;

    /// Probes the container's host endpoint. Any failure is `false`.
    async fn health_probe(&self, host_endpoint: &str) -> bool;
}

/// Configuration for the HTTP marketplace gateway.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    endpoint: String,
    deadline: Duration,
}

impl WorkloadConfig {
    /// Creates a configuration targeting the given marketplace API base
    /// URL.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, deadline: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            deadline,
        }
    }

    /// Returns the marketplace API base URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the per-call deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentResponse {
    state: String,
    #[serde(default)]
    host_endpoint: Option<String>,
}

fn parse_state(raw: &str) -> MarketplaceState {
    match raw.to_ascii_lowercase().as_str() {
        "active" => MarketplaceState::Active,
        "inactive" => MarketplaceState::Inactive,
        "closed" => MarketplaceState::Closed,
        "error" => MarketplaceState::Error,
        _ => MarketplaceState::Unknown,
    }
}

/// Marketplace gateway speaking JSON over HTTPS.
pub struct HttpWorkloadGateway {
    client: MarketplaceClient,
    config: WorkloadConfig,
    clock: Arc<dyn Clock>,
}

impl HttpWorkloadGateway {
    /// Creates a gateway with a fresh HTTPS client.
    #[must_use]
    pub fn new(config: WorkloadConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            client: marketplace_client(),
            config,
            clock,
        }
    }

    async fn fetch_json(&self, uri: Uri) -> MonitorResult<DeploymentResponse> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("accept", "application/json")
            .body(Body::empty())
            .map_err(|err| MonitorError::marketplace_unknown(err.to_string()))?;

        let response = timeout(self.config.deadline, self.client.request(request))
            .await
            .map_err(|_| MonitorError::marketplace_unknown("marketplace request timed out"))?
            .map_err(|err| MonitorError::marketplace_unknown(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            // A vanished deployment reads as closed, not as a failure.
            return Ok(DeploymentResponse {
                state: "closed".to_owned(),
                host_endpoint: None,
            });
        }
        if !status.is_success() {
            return Err(MonitorError::marketplace_unknown(format!(
                "marketplace returned {status}"
            )));
        }

        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|err| MonitorError::marketplace_unknown(err.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|err| MonitorError::marketplace_unknown(format!("malformed response: {err}")))
    }
}

#[async_trait]
impl WorkloadGateway for HttpWorkloadGateway {
    async fn deployment_status(
        &self,
        sequence_id: u64,
        owner: &str,
    ) -> MonitorResult<MarketplaceSnapshot> {
        let uri: Uri = format!(
            "{}/deployments/{sequence_id}?owner={owner}",
            self.config.endpoint.trim_end_matches('/')
        )
        .parse()
        .map_err(|err| MonitorError::marketplace_unknown(format!("bad endpoint: {err}")))?;

        let response = self.fetch_json(uri).await?;
        let state = parse_state(&response.state);
        debug!(sequence_id, %state, "marketplace deployment status");
        Ok(MarketplaceSnapshot {
            state,
            host_endpoint: response.host_endpoint,
            last_checked: self.clock.epoch_secs(),
        })
    }

    async fn health_probe(&self, host_endpoint: &str) -> bool {
        let Ok(uri) = format!("{}/health", host_endpoint.trim_end_matches('/')).parse::<Uri>()
        else {
            return false;
        };
        let Ok(request) = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
        else {
            return false;
        };
        matches!(
            timeout(self.config.deadline, self.client.request(request)).await,
            Ok(Ok(response)) if response.status().is_success()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_states() {
        assert_eq!(parse_state("active"), MarketplaceState::Active);
        assert_eq!(parse_state("CLOSED"), MarketplaceState::Closed);
        assert_eq!(parse_state("error"), MarketplaceState::Error);
        assert_eq!(parse_state("draining"), MarketplaceState::Unknown);
    }

    #[test]
    fn decodes_deployment_response() {
        let raw = r#"{"state":"active","hostEndpoint":"https://host-7.example.net"}"#;
        let decoded: DeploymentResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(decoded.state, "active");
        assert_eq!(
            decoded.host_endpoint.as_deref(),
            Some("https://host-7.example.net")
        );
    }
}
