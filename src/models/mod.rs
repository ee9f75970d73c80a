//! Core data model: services, acceleration nodes and health samples

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};
use crate::utils::{normalize_endpoint, validate_endpoint, validate_ws_endpoint};

/// Weight given to the newest probe outcome in the stability average
pub const STABILITY_ALPHA: f64 = 0.3;

/// Logical service identifier such as "code-hosting" or "registry"
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Service(String);

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Service {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// URL-rewriting rule associated with a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Replace host/authority, keep path and query
    #[default]
    Mirror,
    /// Wrap the whole original URL as `?target=` of the node's proxy path
    Proxy,
    /// Replace the leading `scheme://host` with the node endpoint (path-prefixed CDN)
    #[serde(alias = "cdn")]
    CdnRewrite,
    /// Anything a remote list declares that this engine does not understand
    #[serde(other)]
    Unsupported,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Mirror => "mirror",
            Strategy::Proxy => "proxy",
            Strategy::CdnRewrite => "cdn-rewrite",
            Strategy::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mirror" => Ok(Strategy::Mirror),
            "proxy" => Ok(Strategy::Proxy),
            "cdn" | "cdn-rewrite" | "cdn_rewrite" => Ok(Strategy::CdnRewrite),
            other => Err(Error::Validation(format!(
                "unknown strategy '{}'. Supported: mirror, proxy, cdn-rewrite",
                other
            ))),
        }
    }
}

/// Last known health of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Dead,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Unknown => "unknown",
            Health::Healthy => "healthy",
            Health::Degraded => "degraded",
            Health::Dead => "dead",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a node came from; governs whether a remote refresh may remove it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NodeSource {
    UserAdded,
    #[default]
    RemoteFetched,
}

impl NodeSource {
    /// Combine two copies of the same node: user-added is sticky
    pub fn combine(self, other: NodeSource) -> NodeSource {
        if self == NodeSource::UserAdded || other == NodeSource::UserAdded {
            NodeSource::UserAdded
        } else {
            NodeSource::RemoteFetched
        }
    }
}

impl fmt::Display for NodeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeSource::UserAdded => f.write_str("user-added"),
            NodeSource::RemoteFetched => f.write_str("remote-fetched"),
        }
    }
}

/// One acceleration endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub endpoint: String,
    pub services: BTreeSet<Service>,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub health: Health,
    #[serde(default)]
    pub latency_millis: Option<u64>,
    /// Exponentially weighted success ratio of past probes; absent until first probe
    #[serde(default)]
    pub stability: Option<f64>,
    #[serde(default)]
    pub source: NodeSource,
    /// Remote list URL that last listed this node
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub probe_path: Option<String>,
    #[serde(default)]
    pub ws_endpoint: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

impl Node {
    pub fn serves(&self, service: &Service) -> bool {
        self.services.contains(service)
    }

    pub fn is_dead(&self) -> bool {
        self.health == Health::Dead
    }

    /// Serves `service` and is not known to be dead
    pub fn is_eligible_for(&self, service: &Service) -> bool {
        self.serves(service) && !self.is_dead()
    }

    pub fn is_user_added(&self) -> bool {
        self.source == NodeSource::UserAdded
    }

    /// URL hit by health probes: endpoint joined with the node's probe path
    pub fn probe_url(&self, default_probe_path: &str) -> String {
        let path = self.probe_path.as_deref().unwrap_or(default_probe_path);
        let base = self.endpoint.trim_end_matches('/');
        if path.is_empty() || path == "/" {
            format!("{}/", base)
        } else if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    /// Record a probe outcome in place; identity and source are untouched
    pub fn apply_sample(&mut self, sample: &HealthSample) {
        self.health = sample.health;
        self.latency_millis = sample.latency_millis;
        self.last_checked = Some(sample.checked_at);

        let outcome = if sample.is_success() { 1.0 } else { 0.0 };
        self.stability = Some(match self.stability {
            Some(previous) => (1.0 - STABILITY_ALPHA) * previous + STABILITY_ALPHA * outcome,
            None => outcome,
        });
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.endpoint)
    }
}

/// Result of a single health probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub health: Health,
    pub latency_millis: Option<u64>,
    pub checked_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl HealthSample {
    /// Successful probe, classified against the healthy-latency threshold
    pub fn success(latency_millis: u64, healthy_threshold_ms: u64) -> Self {
        let health = if latency_millis < healthy_threshold_ms {
            Health::Healthy
        } else {
            Health::Degraded
        };
        Self {
            health,
            latency_millis: Some(latency_millis),
            checked_at: Utc::now(),
            error: None,
        }
    }

    /// Failed probe: the node is dead and its latency unknown
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            health: Health::Dead,
            latency_millis: None,
            checked_at: Utc::now(),
            error: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.health != Health::Dead
    }
}

/// Node definition as it appears in configuration, remote lists and user input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(alias = "url")]
    pub endpoint: String,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default, alias = "type")]
    pub strategy: Option<Strategy>,
    #[serde(default, alias = "health_check", alias = "test_url")]
    pub probe_path: Option<String>,
    #[serde(default)]
    pub ws_endpoint: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Remote lists use both `"id": "gh-1"` and `"id": 1`
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "node id must be a string or number, got {}",
            other
        ))),
    }
}

/// Defaults applied to specs that leave services or strategy out
#[derive(Debug, Clone, Default)]
pub struct SpecDefaults {
    pub services: Vec<String>,
    pub strategy: Strategy,
}

impl NodeSpec {
    pub fn from_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Validate and turn into a pool node with unknown health
    pub fn into_node(
        self,
        source: NodeSource,
        origin: Option<String>,
        defaults: &SpecDefaults,
    ) -> Result<Node> {
        let endpoint = validate_endpoint(&self.endpoint)?;
        let endpoint = normalize_endpoint(endpoint.as_str());

        if let Some(ref ws) = self.ws_endpoint {
            validate_ws_endpoint(ws)?;
        }

        let names = if self.services.is_empty() {
            defaults.services.clone()
        } else {
            self.services
        };
        let services: BTreeSet<Service> = names
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(Service::new)
            .collect();
        if services.is_empty() {
            return Err(Error::Validation(format!(
                "node '{}' does not declare any service",
                endpoint
            )));
        }

        let id = match self.id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => endpoint.clone(),
        };

        Ok(Node {
            id,
            endpoint,
            services,
            strategy: self.strategy.unwrap_or(defaults.strategy),
            health: Health::Unknown,
            latency_millis: None,
            stability: None,
            source,
            origin,
            probe_path: self.probe_path,
            ws_endpoint: self.ws_endpoint.map(|ws| normalize_endpoint(&ws)),
            name: self.name,
            last_checked: None,
        })
    }
}

/// One entry of a remote node list: a full object or a bare endpoint URL
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RemoteEntry {
    Spec(NodeSpec),
    Endpoint(String),
}

impl RemoteEntry {
    pub fn into_spec(self) -> NodeSpec {
        match self {
            RemoteEntry::Spec(spec) => spec,
            RemoteEntry::Endpoint(endpoint) => NodeSpec::from_endpoint(endpoint),
        }
    }
}

/// Accepted shapes of a remote node-list payload; entries stay raw so that one
/// malformed entry can be skipped without losing the rest
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RemotePayload {
    List(Vec<serde_json::Value>),
    Wrapped { nodes: Vec<serde_json::Value> },
}

impl RemotePayload {
    pub fn into_entries(self) -> Vec<serde_json::Value> {
        match self {
            RemotePayload::List(entries) => entries,
            RemotePayload::Wrapped { nodes } => nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> SpecDefaults {
        SpecDefaults {
            services: vec!["code-hosting".to_string()],
            strategy: Strategy::CdnRewrite,
        }
    }

    #[test]
    fn test_strategy_serde_names() {
        assert_eq!(serde_json::to_string(&Strategy::CdnRewrite).unwrap(), "\"cdn-rewrite\"");
        let cdn: Strategy = serde_json::from_str("\"cdn\"").unwrap();
        assert_eq!(cdn, Strategy::CdnRewrite);
        let odd: Strategy = serde_json::from_str("\"geolocation\"").unwrap();
        assert_eq!(odd, Strategy::Unsupported);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("Proxy".parse::<Strategy>().unwrap(), Strategy::Proxy);
        assert!("reverse-proxy".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_source_combine_is_sticky() {
        assert_eq!(NodeSource::RemoteFetched.combine(NodeSource::UserAdded), NodeSource::UserAdded);
        assert_eq!(NodeSource::UserAdded.combine(NodeSource::RemoteFetched), NodeSource::UserAdded);
        assert_eq!(
            NodeSource::RemoteFetched.combine(NodeSource::RemoteFetched),
            NodeSource::RemoteFetched
        );
    }

    #[test]
    fn test_spec_into_node_applies_defaults() {
        let node = NodeSpec::from_endpoint("https://cdn.jsdelivr.net/gh/")
            .into_node(NodeSource::RemoteFetched, Some("src".to_string()), &defaults())
            .unwrap();
        assert_eq!(node.id, "https://cdn.jsdelivr.net/gh");
        assert_eq!(node.strategy, Strategy::CdnRewrite);
        assert!(node.serves(&Service::from("code-hosting")));
        assert_eq!(node.health, Health::Unknown);
        assert_eq!(node.origin.as_deref(), Some("src"));
    }

    #[test]
    fn test_spec_into_node_rejects_bad_endpoint() {
        let result = NodeSpec::from_endpoint("not a url").into_node(
            NodeSource::UserAdded,
            None,
            &defaults(),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_spec_without_services_rejected() {
        let result = NodeSpec::from_endpoint("https://mirror.example.com").into_node(
            NodeSource::UserAdded,
            None,
            &SpecDefaults::default(),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_probe_url_joins_paths() {
        let mut node = NodeSpec::from_endpoint("https://ghproxy.com/")
            .into_node(NodeSource::RemoteFetched, None, &defaults())
            .unwrap();
        assert_eq!(node.probe_url("/"), "https://ghproxy.com/");
        assert_eq!(node.probe_url("robots.txt"), "https://ghproxy.com/robots.txt");
        node.probe_path = Some("/health".to_string());
        assert_eq!(node.probe_url("/"), "https://ghproxy.com/health");
    }

    #[test]
    fn test_apply_sample_tracks_stability() {
        let mut node = NodeSpec::from_endpoint("https://ghproxy.com")
            .into_node(NodeSource::UserAdded, None, &defaults())
            .unwrap();
        node.apply_sample(&HealthSample::success(120, 500));
        assert_eq!(node.health, Health::Healthy);
        assert_eq!(node.latency_millis, Some(120));
        assert_eq!(node.stability, Some(1.0));

        node.apply_sample(&HealthSample::failure("timeout"));
        assert_eq!(node.health, Health::Dead);
        assert_eq!(node.latency_millis, None);
        let stability = node.stability.unwrap();
        assert!((stability - 0.7).abs() < 1e-9);
        assert!(node.is_user_added());
    }

    #[test]
    fn test_sample_threshold_classification() {
        assert_eq!(HealthSample::success(499, 500).health, Health::Healthy);
        assert_eq!(HealthSample::success(500, 500).health, Health::Degraded);
        assert!(!HealthSample::failure("refused").is_success());
    }

    #[test]
    fn test_remote_payload_shapes() {
        let wrapped: RemotePayload = serde_json::from_str(
            r#"{"nodes":[{"id":"gh-1","endpoint":"https://ghproxy.com","services":["code-hosting"],"type":"proxy"}]}"#,
        )
        .unwrap();
        let entries = wrapped.into_entries();
        assert_eq!(entries.len(), 1);
        let entry: RemoteEntry = serde_json::from_value(entries[0].clone()).unwrap();
        let spec = entry.into_spec();
        assert_eq!(spec.strategy, Some(Strategy::Proxy));
        assert_eq!(spec.id.as_deref(), Some("gh-1"));

        let bare: RemotePayload =
            serde_json::from_str(r#"["https://ghproxy.com/","https://gitclone.com/"]"#).unwrap();
        assert_eq!(bare.into_entries().len(), 2);
    }

    #[test]
    fn test_numeric_ids_accepted() {
        let spec: NodeSpec = serde_json::from_str(
            r#"{"id":7,"endpoint":"https://mirror.example.com","services":["registry"]}"#,
        )
        .unwrap();
        assert_eq!(spec.id.as_deref(), Some("7"));

        let spec: NodeSpec = serde_json::from_str(r#"{"url":"https://mirror.example.com"}"#).unwrap();
        assert_eq!(spec.id, None);
    }
}
