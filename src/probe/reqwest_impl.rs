//! Reqwest-based transport

use async_trait::async_trait;
use reqwest::Method;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::settings::ProbeConfig;
use crate::error::{Error, Result};
use crate::probe::{HttpTransport, ProbeRequest, ProbeResponse};

/// Shared reqwest client; per-request timeouts come from each [`ProbeRequest`]
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.timeout_ms))
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create reqwest client: {}", e)))?;

        info!("✅ Reqwest transport configured (user agent: {})", config.user_agent);
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: ProbeRequest) -> Result<ProbeResponse> {
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| Error::Validation(format!("invalid HTTP method '{}': {}", request.method, e)))?;

        let start = Instant::now();
        let response = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| Error::ProbeFailure(describe(&request.url, &e)))?;

        let status = response.status().as_u16();
        let latency = start.elapsed();

        let body = if request.read_body {
            response
                .text()
                .await
                .map_err(|e| Error::ProbeFailure(describe(&request.url, &e)))?
        } else {
            String::new()
        };

        debug!("{} {} -> {} in {}ms", request.method, request.url, status, latency.as_millis());
        Ok(ProbeResponse { status, latency, body })
    }
}

fn describe(url: &str, err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("{} timed out", url)
    } else if err.is_connect() {
        format!("{} connection failed: {}", url, err)
    } else {
        format!("{} request failed: {}", url, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_builds_from_default_config() {
        assert!(ReqwestTransport::new(&ProbeConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_method_rejected_before_sending() {
        let transport = ReqwestTransport::new(&ProbeConfig::default()).unwrap();
        let request = ProbeRequest::probe("NOT A METHOD", "http://127.0.0.1:9/", Duration::from_millis(100));
        assert!(matches!(transport.execute(request).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_probe_failure() {
        let transport = ReqwestTransport::new(&ProbeConfig::default()).unwrap();
        // port 9 (discard) on loopback is closed in test environments
        let request = ProbeRequest::probe("HEAD", "http://127.0.0.1:9/", Duration::from_millis(500));
        assert!(matches!(transport.execute(request).await, Err(Error::ProbeFailure(_))));
    }
}
