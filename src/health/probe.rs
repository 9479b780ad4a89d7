//! Health probe definitions and the transport that executes them

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};

/// Request method used by a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
    Post,
}

impl HttpMethod {
    fn as_method(&self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Post => Method::POST,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_method().as_str())
    }
}

/// How to check one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthProbe {
    pub server_id: String,
    pub endpoint: String,
    pub port: u16,
    /// Request path including the leading slash
    pub path: String,
    pub method: HttpMethod,
    /// The only status code counted as healthy
    pub expected_status: u16,
    pub timeout: Duration,
}

impl HealthProbe {
    /// A GET probe expecting 200
    pub fn new(
        server_id: impl Into<String>,
        endpoint: impl Into<String>,
        port: u16,
        path: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            endpoint: endpoint.into(),
            port,
            path: normalize_path(path.into()),
            method: HttpMethod::Get,
            expected_status: 200,
            timeout,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}{}", self.endpoint, self.port, self.path)
    }
}

pub(crate) fn normalize_path(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}

/// Outcome of a single probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub server_id: String,
    pub timestamp: DateTime<Utc>,
    pub is_healthy: bool,
    pub response_time: Duration,
    /// Status code, if a response arrived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Transport that executes a probe and reports the response status.
///
/// Transport failures are returned as `Err` with a description. Timeouts are
/// enforced by the caller.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, probe: &HealthProbe) -> Result<u16, String>;
}

/// Plain HTTP prober
#[derive(Debug, Clone, Default)]
pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, probe: &HealthProbe) -> Result<u16, String> {
        self.client
            .request(probe.method.as_method(), probe.url())
            .timeout(probe.timeout)
            .send()
            .await
            .map(|response| response.status().as_u16())
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_url() {
        let probe = HealthProbe::new("web-1", "10.0.0.1", 8080, "health", Duration::from_secs(5));
        assert_eq!(probe.url(), "http://10.0.0.1:8080/health");
        assert_eq!(probe.method, HttpMethod::Get);
        assert_eq!(probe.expected_status, 200);
    }

    #[test]
    fn test_method_serde() {
        let json = serde_json::to_string(&HttpMethod::Head).unwrap();
        assert_eq!(json, "\"HEAD\"");
        assert_eq!(HttpMethod::Post.to_string(), "POST");
    }

    #[tokio::test]
    async fn test_http_prober_connection_refused() {
        // Bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let probe = HealthProbe::new("web-1", "127.0.0.1", port, "/health", Duration::from_secs(1));

        let result = HttpProber::new().probe(&probe).await;
        assert!(result.is_err());
    }
}
