//! Network probe collaborator and the health prober built on it
//!
//! [`HttpTransport`] is the seam to the network: one bounded outbound request, used by
//! health probes and by remote node-list fetches. [`HealthProber`] turns one such
//! request into a [`HealthSample`](crate::models::HealthSample).

pub mod prober;
pub mod reqwest_impl;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

pub use prober::HealthProber;
pub use reqwest_impl::ReqwestTransport;

/// One outbound request in a library-agnostic form
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub method: String,
    pub url: String,
    pub timeout: Duration,
    /// Whether the response body is needed (list fetches) or can be discarded (probes)
    pub read_body: bool,
}

impl ProbeRequest {
    pub fn probe(method: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            timeout,
            read_body: false,
        }
    }

    pub fn fetch(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            timeout,
            read_body: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResponse {
    pub status: u16,
    pub latency: Duration,
    pub body: String,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs a single bounded-timeout HTTP(S) request
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Network errors and timeouts surface as `Error::ProbeFailure`
    async fn execute(&self, request: ProbeRequest) -> Result<ProbeResponse>;
}

/// In-process transport answering from a script, for tests
#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub enum Scripted {
        Respond { status: u16, latency_ms: u64, body: String },
        Fail(String),
        /// Never answers within any test timeout
        Hang,
    }

    impl Scripted {
        pub fn ok(latency_ms: u64) -> Self {
            Scripted::Respond { status: 200, latency_ms, body: String::new() }
        }

        pub fn status(status: u16) -> Self {
            Scripted::Respond { status, latency_ms: 10, body: String::new() }
        }

        pub fn body(body: impl Into<String>) -> Self {
            Scripted::Respond { status: 200, latency_ms: 10, body: body.into() }
        }
    }

    #[derive(Default)]
    pub struct ScriptedTransport {
        script: Mutex<HashMap<String, Vec<Scripted>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every request to `url` gets `reply`
        pub fn on(self, url: &str, reply: Scripted) -> Self {
            self.script.lock().unwrap().insert(url.to_string(), vec![reply]);
            self
        }

        /// Requests to `url` get `replies` in order; the last one repeats
        pub fn on_sequence(self, url: &str, replies: Vec<Scripted>) -> Self {
            self.script.lock().unwrap().insert(url.to_string(), replies);
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn execute(&self, request: ProbeRequest) -> Result<ProbeResponse> {
            self.calls.lock().unwrap().push(request.url.clone());
            let reply = {
                let mut script = self.script.lock().unwrap();
                match script.get_mut(&request.url) {
                    Some(replies) if replies.len() > 1 => Some(replies.remove(0)),
                    Some(replies) => replies.first().cloned(),
                    None => None,
                }
            };
            match reply {
                Some(Scripted::Respond { status, latency_ms, body }) => Ok(ProbeResponse {
                    status,
                    latency: Duration::from_millis(latency_ms),
                    body: if request.read_body { body } else { String::new() },
                }),
                Some(Scripted::Fail(reason)) => Err(Error::ProbeFailure(reason)),
                Some(Scripted::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(Error::ProbeFailure("hung".to_string()))
                }
                None => Err(Error::ProbeFailure(format!("connection refused: {}", request.url))),
            }
        }
    }
}
