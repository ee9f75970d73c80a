//! Health prober: one node, one bounded request, one sample

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::settings::ProbeConfig;
use crate::models::{HealthSample, Node};
use crate::probe::{HttpTransport, ProbeRequest};
use crate::utils::duration_to_ms;

#[derive(Clone)]
pub struct HealthProber {
    transport: Arc<dyn HttpTransport>,
    method: String,
    default_probe_path: String,
    healthy_threshold_ms: u64,
}

impl HealthProber {
    pub fn new(transport: Arc<dyn HttpTransport>, config: &ProbeConfig) -> Self {
        Self {
            transport,
            method: config.method.clone(),
            default_probe_path: config.default_probe_path.clone(),
            healthy_threshold_ms: config.healthy_threshold_ms,
        }
    }

    /// Probe once; never retries and never takes longer than `timeout`.
    ///
    /// Only a 2xx answer counts as serving. Any other status, network errors and
    /// timeouts produce a failure sample.
    pub async fn probe(&self, node: &Node, timeout: Duration) -> HealthSample {
        let url = node.probe_url(&self.default_probe_path);
        let request = ProbeRequest::probe(self.method.clone(), url.clone(), timeout);

        let sample = match tokio::time::timeout(timeout, self.transport.execute(request)).await {
            Ok(Ok(response)) if response.is_success() => {
                HealthSample::success(duration_to_ms(response.latency), self.healthy_threshold_ms)
            }
            Ok(Ok(response)) => HealthSample::failure(format!("{} answered {}", url, response.status)),
            Ok(Err(e)) => HealthSample::failure(e.to_string()),
            Err(_) => HealthSample::failure(format!("{} timed out after {}ms", url, timeout.as_millis())),
        };

        match &sample.error {
            Some(reason) => debug!("❌ Probe of {} failed: {}", node.id, reason),
            None => debug!(
                "✅ Probe of {} {}: {}ms",
                node.id,
                sample.health,
                sample.latency_millis.unwrap_or_default()
            ),
        }
        sample
    }
}
