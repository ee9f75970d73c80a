//! Node scoring and selection

use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::settings::{ProbeConfig, ScoringConfig};
use crate::models::{Health, Node, Service};
use crate::store::NodeStore;

/// Weighted score of speed and stability
#[derive(Debug, Clone, PartialEq)]
pub struct Scorer {
    pub speed_weight: f64,
    pub stability_weight: f64,
    /// Used for both terms while a node has never been probed
    pub neutral_score: f64,
    /// Latency at which normalized speed drops to one half
    pub reference_latency_ms: u64,
}

impl Default for Scorer {
    fn default() -> Self {
        Self::from_config(&ScoringConfig::default(), &ProbeConfig::default())
    }
}

impl Scorer {
    pub fn from_config(scoring: &ScoringConfig, probe: &ProbeConfig) -> Self {
        Self {
            speed_weight: scoring.speed_weight,
            stability_weight: scoring.stability_weight,
            neutral_score: scoring.neutral_score,
            reference_latency_ms: probe.healthy_threshold_ms.max(1),
        }
    }

    /// In (0, 1], strictly decreasing with latency
    pub fn normalized_speed(&self, latency_millis: u64) -> f64 {
        let reference = self.reference_latency_ms as f64;
        reference / (reference + latency_millis as f64)
    }

    pub fn score(&self, node: &Node) -> f64 {
        let speed = match (node.health, node.latency_millis) {
            (Health::Dead, _) => 0.0,
            (_, Some(latency)) => self.normalized_speed(latency),
            (_, None) => self.neutral_score,
        };
        let stability = node.stability.unwrap_or(self.neutral_score);
        self.speed_weight * speed + self.stability_weight * stability
    }

    /// Pool order: live nodes before dead ones, then score descending, then id ascending
    pub fn rank(&self, a: &Node, b: &Node) -> Ordering {
        a.is_dead()
            .cmp(&b.is_dead())
            .then_with(|| self.score(b).total_cmp(&self.score(a)))
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Best eligible node among `candidates`, or `None` when nothing serves `service` alive
pub fn select_from<'a>(candidates: &'a [Node], service: &Service, scorer: &Scorer) -> Option<&'a Node> {
    candidates
        .iter()
        .filter(|node| node.is_eligible_for(service))
        .min_by(|a, b| scorer.rank(a, b))
}

/// Picks the node to use for a service from the store's current snapshot
#[derive(Clone)]
pub struct Selector {
    store: Arc<NodeStore>,
    scorer: Scorer,
}

impl Selector {
    pub fn new(store: Arc<NodeStore>, scorer: Scorer) -> Self {
        Self { store, scorer }
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn select(&self, service: &Service) -> Option<Node> {
        let snapshot = self.store.snapshot(service);
        match select_from(&snapshot, service, &self.scorer) {
            Some(node) => {
                debug!(
                    "Selected node {} ({}) for {} with score {:.3}",
                    node.id,
                    node.endpoint,
                    service,
                    self.scorer.score(node)
                );
                Some(node.clone())
            }
            None => {
                trace!("No eligible node for {}", service);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeSource, Strategy};
    use std::collections::BTreeSet;

    fn node(id: &str, health: Health, latency: Option<u64>) -> Node {
        Node {
            id: id.to_string(),
            endpoint: format!("https://{}.example.com", id),
            services: BTreeSet::from([Service::from("code-hosting")]),
            strategy: Strategy::Mirror,
            health,
            latency_millis: latency,
            stability: if health == Health::Unknown { None } else { Some(1.0) },
            source: NodeSource::RemoteFetched,
            origin: None,
            probe_path: None,
            ws_endpoint: None,
            name: None,
            last_checked: None,
        }
    }

    fn code_hosting() -> Service {
        Service::from("code-hosting")
    }

    #[test]
    fn test_lower_latency_wins_with_default_weights() {
        let nodes = vec![
            node("1", Health::Healthy, Some(50)),
            node("2", Health::Healthy, Some(200)),
        ];
        let picked = select_from(&nodes, &code_hosting(), &Scorer::default()).unwrap();
        assert_eq!(picked.id, "1");
    }

    #[test]
    fn test_unknown_node_is_eligible() {
        let nodes = vec![node("1", Health::Healthy, Some(50)), node("3", Health::Unknown, None)];
        let picked = select_from(&nodes, &code_hosting(), &Scorer::default());
        assert!(picked.is_some());

        let only_unknown = vec![node("3", Health::Unknown, None)];
        assert_eq!(
            select_from(&only_unknown, &code_hosting(), &Scorer::default()).map(|n| n.id.as_str()),
            Some("3")
        );
    }

    #[test]
    fn test_dead_nodes_never_selected() {
        let scorer = Scorer::default();
        let nodes = vec![node("1", Health::Dead, None), node("2", Health::Degraded, Some(2500))];
        assert_eq!(select_from(&nodes, &code_hosting(), &scorer).unwrap().id, "2");

        let all_dead = vec![node("1", Health::Dead, None)];
        assert!(select_from(&all_dead, &code_hosting(), &scorer).is_none());
    }

    #[test]
    fn test_none_when_service_not_served() {
        let nodes = vec![node("1", Health::Healthy, Some(10))];
        assert!(select_from(&nodes, &Service::from("registry"), &Scorer::default()).is_none());
        assert!(select_from(&[], &code_hosting(), &Scorer::default()).is_none());
    }

    #[test]
    fn test_ties_broken_by_lowest_id() {
        let nodes = vec![
            node("b", Health::Healthy, Some(100)),
            node("a", Health::Healthy, Some(100)),
        ];
        assert_eq!(select_from(&nodes, &code_hosting(), &Scorer::default()).unwrap().id, "a");
    }

    #[test]
    fn test_normalized_speed_monotonic() {
        let scorer = Scorer::default();
        assert!(scorer.normalized_speed(0) > scorer.normalized_speed(50));
        assert!(scorer.normalized_speed(50) > scorer.normalized_speed(5000));
        assert!((scorer.normalized_speed(500) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_stability_influences_score() {
        let scorer = Scorer::default();
        let steady = node("1", Health::Healthy, Some(100));
        let mut flaky = node("2", Health::Healthy, Some(100));
        flaky.stability = Some(0.2);
        assert!(scorer.score(&steady) > scorer.score(&flaky));
    }
}
