//! `AccelRouter`: wires the engine together and exposes `resolve`

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classifier::ServiceClassifier;
use crate::config::settings::RouterConfig;
use crate::error::{Error, Result};
use crate::models::{Health, Node, NodeSource, NodeSpec, Service, SpecDefaults, Strategy};
use crate::probe::{HealthProber, HttpTransport, ReqwestTransport};
use crate::rewrite::rewrite;
use crate::scheduler::{RefreshReport, RefreshScheduler, SweepReport};
use crate::selector::{Scorer, Selector};
use crate::store::{open_store, NodePool, NodeStore, PersistenceStore, SERVICE_OVERRIDES_KEY};

type Overrides = BTreeMap<Service, String>;

/// How one URL was resolved
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub original: String,
    pub url: String,
    pub service: Option<Service>,
    pub node_id: Option<String>,
    /// The node came from a manual override rather than scoring
    pub overridden: bool,
}

impl Resolution {
    fn pass_through(original: &str, service: Option<Service>) -> Self {
        Self {
            original: original.to_string(),
            url: original.to_string(),
            service,
            node_id: None,
            overridden: false,
        }
    }

    pub fn is_rewritten(&self) -> bool {
        self.url != self.original
    }
}

/// One row of the status board
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStatus {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub strategy: Strategy,
    pub health: Health,
    pub latency_millis: Option<u64>,
    pub score: f64,
    pub source: NodeSource,
    pub last_checked: Option<DateTime<Utc>>,
    pub selected: bool,
}

/// Nodes of one service in score order
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStatus {
    pub service: Service,
    pub override_node: Option<String>,
    pub nodes: Vec<NodeStatus>,
}

pub struct AccelRouter {
    config: RouterConfig,
    classifier: ServiceClassifier,
    store: Arc<NodeStore>,
    selector: Selector,
    scheduler: Arc<RefreshScheduler>,
    persistence: Arc<dyn PersistenceStore>,
    overrides: ArcSwap<Overrides>,
}

impl AccelRouter {
    /// Build with the reqwest transport and the configured persistence backend
    pub fn from_config(config: RouterConfig) -> Result<Self> {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(&config.probe)?);
        let persistence = open_store(&config.persistence)?;
        Self::new(config, transport, persistence)
    }

    /// Build from explicit collaborators and restore persisted state
    pub fn new(
        config: RouterConfig,
        transport: Arc<dyn HttpTransport>,
        persistence: Arc<dyn PersistenceStore>,
    ) -> Result<Self> {
        config.validate()?;

        let classifier = ServiceClassifier::from_config(&config.services);
        let scorer = Scorer::from_config(&config.scoring, &config.probe);
        let store = Arc::new(NodeStore::new(scorer.clone()));

        let defaults = default_pool(&config)?;
        store.load_from(persistence.as_ref(), &defaults);
        let known_sources: Vec<String> = config.refresh.sources.iter().map(|s| s.url.clone()).collect();
        store.retain_configured(&known_sources, &defaults);

        let selector = Selector::new(Arc::clone(&store), scorer);
        let prober = HealthProber::new(Arc::clone(&transport), &config.probe);
        let scheduler = RefreshScheduler::new(
            Arc::clone(&store),
            prober,
            transport,
            config.sweep.clone(),
            config.refresh.clone(),
            config.probe.timeout(),
        )
        .with_persistence(Arc::clone(&persistence));

        let overrides: BTreeMap<String, String> = persistence.get_or_default(SERVICE_OVERRIDES_KEY);
        let overrides: Overrides = overrides
            .into_iter()
            .map(|(service, node)| (Service::new(service), node))
            .filter(|(service, _)| classifier.is_known(service))
            .collect();

        info!(
            "🧭 Router ready: {} services, {} nodes, {} overrides ({})",
            classifier.services().count(),
            store.len(),
            overrides.len(),
            persistence.store_info()
        );

        Ok(Self {
            config,
            classifier,
            store,
            selector,
            scheduler: Arc::new(scheduler),
            persistence,
            overrides: ArcSwap::from_pointee(overrides),
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn classifier(&self) -> &ServiceClassifier {
        &self.classifier
    }

    pub fn store(&self) -> &Arc<NodeStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<RefreshScheduler> {
        &self.scheduler
    }

    /// Final URL for `original`: rewritten through the chosen node, or unchanged.
    ///
    /// Never blocks on the network and never fails.
    pub fn resolve(&self, original: &str) -> String {
        self.resolve_detail(original).url
    }

    pub fn resolve_detail(&self, original: &str) -> Resolution {
        let Some(service) = self.classifier.classify_url(original) else {
            return Resolution::pass_through(original, None);
        };

        let (node, overridden) = match self.override_node(&service) {
            Some(node) => (Some(node), true),
            None => (self.selector.select(&service), false),
        };

        match node {
            Some(node) => {
                let url = rewrite(original, &node);
                debug!("{} [{}] -> {} via {}", original, service, url, node.id);
                Resolution {
                    original: original.to_string(),
                    url,
                    service: Some(service),
                    node_id: Some(node.id),
                    overridden,
                }
            }
            None => {
                debug!("No node for {}, passing {} through", service, original);
                Resolution::pass_through(original, Some(service))
            }
        }
    }

    /// The manually chosen node for `service`, if it is still usable
    fn override_node(&self, service: &Service) -> Option<Node> {
        let overrides = self.overrides.load();
        let id = overrides.get(service)?;
        match self.store.get(id) {
            Some(node) if node.is_eligible_for(service) => Some(node),
            _ => {
                debug!("Override {} for {} is not usable, falling back to scoring", id, service);
                None
            }
        }
    }

    fn require_service(&self, service: &Service) -> Result<()> {
        if self.classifier.is_known(service) {
            Ok(())
        } else {
            Err(Error::UnknownService(service.to_string()))
        }
    }

    /// Add a user node for a configured service and persist it
    pub fn add_node(
        &self,
        service: &Service,
        endpoint: &str,
        strategy: Strategy,
        ws_endpoint: Option<String>,
    ) -> Result<Node> {
        self.require_service(service)?;
        let node = self.store.add_user_spec(NodeSpec {
            endpoint: endpoint.to_string(),
            services: vec![service.to_string()],
            strategy: Some(strategy),
            ws_endpoint,
            ..Default::default()
        })?;
        self.save()?;
        Ok(node)
    }

    /// Remove a user node; overrides pointing at it are cleared
    pub fn remove_node(&self, id: &str) -> Result<Node> {
        let removed = self.store.remove_user_node(id)?;
        self.overrides.rcu(|current| {
            let mut overrides = Overrides::clone(current);
            overrides.retain(|_, node| node != id);
            overrides
        });
        self.save()?;
        Ok(removed)
    }

    /// Pin `service` to `node_id` until cleared
    pub fn set_override(&self, service: &Service, node_id: &str) -> Result<()> {
        self.require_service(service)?;
        let node = self
            .store
            .get(node_id)
            .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
        if !node.serves(service) {
            return Err(Error::Validation(format!(
                "node '{}' does not serve '{}'",
                node_id, service
            )));
        }
        if node.is_dead() {
            warn!("⚠️  Node {} is currently dead; {} will use scoring until it recovers", node_id, service);
        }

        self.overrides.rcu(|current| {
            let mut overrides = Overrides::clone(current);
            overrides.insert(service.clone(), node_id.to_string());
            overrides
        });
        info!("📌 {} pinned to node {}", service, node_id);
        self.save()
    }

    /// Return `service` to automatic selection; false if it had no override
    pub fn clear_override(&self, service: &Service) -> Result<bool> {
        self.require_service(service)?;
        let previous = self.overrides.rcu(|current| {
            let mut overrides = Overrides::clone(current);
            overrides.remove(service);
            overrides
        });
        let had = previous.contains_key(service);
        if had {
            info!("📌 {} back to automatic selection", service);
            self.save()?;
        }
        Ok(had)
    }

    pub fn override_for(&self, service: &Service) -> Option<String> {
        self.overrides.load().get(service).cloned()
    }

    /// Per-service board in score order; an unknown filter is an error
    pub fn status(&self, filter: Option<&Service>) -> Result<Vec<ServiceStatus>> {
        if let Some(service) = filter {
            self.require_service(service)?;
        }
        let scorer = self.selector.scorer();
        let board = self
            .classifier
            .services()
            .filter(|service| filter.map_or(true, |f| f == *service))
            .map(|service| {
                let chosen = self.resolve_node_id(service);
                let nodes = self
                    .store
                    .snapshot(service)
                    .iter()
                    .map(|node| NodeStatus {
                        id: node.id.clone(),
                        name: node.display_name().to_string(),
                        endpoint: node.endpoint.clone(),
                        strategy: node.strategy,
                        health: node.health,
                        latency_millis: node.latency_millis,
                        score: scorer.score(node),
                        source: node.source,
                        last_checked: node.last_checked,
                        selected: chosen.as_deref() == Some(node.id.as_str()),
                    })
                    .collect();
                ServiceStatus {
                    service: service.clone(),
                    override_node: self.override_for(service),
                    nodes,
                }
            })
            .collect();
        Ok(board)
    }

    fn resolve_node_id(&self, service: &Service) -> Option<String> {
        self.override_node(service)
            .or_else(|| self.selector.select(service))
            .map(|n| n.id)
    }

    /// Run one health sweep now; `None` if one is already running
    pub async fn sweep_now(&self) -> Option<SweepReport> {
        self.scheduler.run_sweep().await
    }

    /// Run one remote refresh now; `None` if one is already running
    pub async fn refresh_now(&self) -> Option<RefreshReport> {
        self.scheduler.run_refresh().await
    }

    /// Start the periodic loops
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.scheduler.spawn(shutdown)
    }

    /// Persist the pool, custom nodes and overrides
    pub fn save(&self) -> Result<()> {
        self.store.save_to(self.persistence.as_ref())?;
        let overrides: BTreeMap<String, String> = self
            .overrides
            .load()
            .iter()
            .map(|(service, node)| (service.to_string(), node.clone()))
            .collect();
        self.persistence.set_json(SERVICE_OVERRIDES_KEY, &overrides)
    }
}

fn default_pool(config: &RouterConfig) -> Result<NodePool> {
    let nodes = config
        .default_nodes
        .iter()
        .cloned()
        .map(|spec| spec.into_node(NodeSource::RemoteFetched, None, &SpecDefaults::default()))
        .collect::<Result<Vec<_>>>()?;
    Ok(NodePool::from_nodes(nodes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{PersistenceConfig, ServiceConfig, SourceConfig};
    use crate::probe::testing::{Scripted, ScriptedTransport};
    use crate::store::{FileStore, MemoryStore};
    use tempfile::tempdir;

    fn config() -> RouterConfig {
        RouterConfig {
            services: vec![
                ServiceConfig {
                    name: "code-hosting".to_string(),
                    patterns: vec!["github.com".to_string(), "raw.githubusercontent.com".to_string()],
                },
                ServiceConfig {
                    name: "registry".to_string(),
                    patterns: vec!["docker.io".to_string()],
                },
            ],
            default_nodes: vec![NodeSpec {
                id: Some("gh-mirror".to_string()),
                endpoint: "https://gh.mirror.example.com".to_string(),
                services: vec!["code-hosting".to_string()],
                strategy: Some(Strategy::Mirror),
                ..Default::default()
            }],
            persistence: PersistenceConfig {
                backend: "memory".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn router(transport: ScriptedTransport) -> AccelRouter {
        AccelRouter::new(config(), Arc::new(transport), Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn test_resolve_rewrites_classified_urls() {
        let r = router(ScriptedTransport::new());
        assert_eq!(
            r.resolve("https://github.com/rust-lang/rust?tab=readme"),
            "https://gh.mirror.example.com/rust-lang/rust?tab=readme"
        );
    }

    #[test]
    fn test_resolve_passes_through_unknown_and_unserved() {
        let r = router(ScriptedTransport::new());
        assert_eq!(r.resolve("https://example.org/a"), "https://example.org/a");
        assert_eq!(r.resolve("not a url"), "not a url");

        let detail = r.resolve_detail("https://docker.io/v2/");
        assert_eq!(detail.service, Some(Service::from("registry")));
        assert!(!detail.is_rewritten());
    }

    #[tokio::test]
    async fn test_dead_nodes_pass_through_after_sweep() {
        let r = router(ScriptedTransport::new().on("https://gh.mirror.example.com/", Scripted::Hang));
        r.sweep_now().await.unwrap();
        assert_eq!(r.resolve("https://github.com/a"), "https://github.com/a");
    }

    #[test]
    fn test_add_node_requires_known_service() {
        let r = router(ScriptedTransport::new());
        let err = r.add_node(&Service::from("video"), "https://v.example.com", Strategy::Mirror, None);
        assert!(matches!(err, Err(Error::UnknownService(_))));

        let err = r.add_node(&Service::from("registry"), "hub.example.com", Strategy::Mirror, None);
        assert!(matches!(err, Err(Error::Validation(_))));

        let node = r
            .add_node(&Service::from("registry"), "https://hub.example.com", Strategy::Mirror, None)
            .unwrap();
        assert_eq!(
            r.resolve("https://docker.io/v2/library/nginx/manifests/latest"),
            "https://hub.example.com/v2/library/nginx/manifests/latest"
        );
        r.remove_node(&node.id).unwrap();
        assert_eq!(r.resolve("https://docker.io/v2/"), "https://docker.io/v2/");
    }

    #[test]
    fn test_override_wins_until_cleared() {
        let r = router(ScriptedTransport::new());
        let code = Service::from("code-hosting");
        let proxy = r
            .add_node(&code, "https://proxy.example.com", Strategy::Proxy, None)
            .unwrap();
        // both nodes unknown, "gh-mirror" < "user-1" wins the tie
        assert!(r.resolve("https://github.com/x").starts_with("https://gh.mirror.example.com"));

        r.set_override(&code, &proxy.id).unwrap();
        let detail = r.resolve_detail("https://github.com/x");
        assert!(detail.overridden);
        assert!(detail.url.starts_with("https://proxy.example.com/proxy?target="));

        assert!(r.clear_override(&code).unwrap());
        assert!(!r.resolve_detail("https://github.com/x").overridden);
        assert!(!r.clear_override(&code).unwrap());
    }

    #[test]
    fn test_override_rejects_foreign_nodes() {
        let r = router(ScriptedTransport::new());
        assert!(matches!(
            r.set_override(&Service::from("registry"), "gh-mirror"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            r.set_override(&Service::from("registry"), "missing"),
            Err(Error::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_removing_overridden_node_clears_override() {
        let r = router(ScriptedTransport::new());
        let code = Service::from("code-hosting");
        let node = r.add_node(&code, "https://p.example.com", Strategy::Mirror, None).unwrap();
        r.set_override(&code, &node.id).unwrap();
        r.remove_node(&node.id).unwrap();
        assert_eq!(r.override_for(&code), None);
    }

    #[test]
    fn test_concurrent_overrides_are_not_lost() {
        let r = router(ScriptedTransport::new());
        let code = Service::from("code-hosting");
        let registry = Service::from("registry");
        let hub = r
            .add_node(&registry, "https://hub.example.com", Strategy::Mirror, None)
            .unwrap();

        for _ in 0..50 {
            std::thread::scope(|scope| {
                scope.spawn(|| r.set_override(&code, "gh-mirror").unwrap());
                scope.spawn(|| r.set_override(&registry, &hub.id).unwrap());
            });
            assert_eq!(r.override_for(&code).as_deref(), Some("gh-mirror"));
            assert_eq!(r.override_for(&registry), Some(hub.id.clone()));

            std::thread::scope(|scope| {
                scope.spawn(|| r.clear_override(&code).unwrap());
                scope.spawn(|| r.clear_override(&registry).unwrap());
            });
            assert_eq!(r.override_for(&code), None);
            assert_eq!(r.override_for(&registry), None);
        }
    }

    #[test]
    fn test_retired_default_is_dropped_on_restart() {
        let backend: Arc<dyn PersistenceStore> = Arc::new(MemoryStore::new());
        let first = AccelRouter::new(config(), Arc::new(ScriptedTransport::new()), Arc::clone(&backend)).unwrap();
        first.save().unwrap();
        assert!(first.store().get("gh-mirror").is_some());

        let mut retired = config();
        retired.default_nodes.clear();
        let second = AccelRouter::new(retired, Arc::new(ScriptedTransport::new()), backend).unwrap();
        assert!(second.store().get("gh-mirror").is_none());
        assert_eq!(second.resolve("https://github.com/a"), "https://github.com/a");
    }

    #[test]
    fn test_status_board_orders_and_marks_selection() {
        let r = router(ScriptedTransport::new());
        let board = r.status(None).unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].service, Service::from("code-hosting"));
        assert_eq!(board[0].nodes.len(), 1);
        assert!(board[0].nodes[0].selected);
        assert!(board[1].nodes.is_empty());

        assert_eq!(r.status(Some(&Service::from("registry"))).unwrap().len(), 1);
        assert!(r.status(Some(&Service::from("video"))).is_err());
    }

    #[tokio::test]
    async fn test_refresh_merges_remote_nodes() {
        let mut cfg = config();
        cfg.refresh.sources.push(SourceConfig {
            url: "https://lists.example.com/gh.json".to_string(),
            services: vec!["code-hosting".to_string()],
            strategy: Strategy::CdnRewrite,
        });
        let transport = ScriptedTransport::new().on(
            "https://lists.example.com/gh.json",
            Scripted::body(r#"[{"id": "cdn", "endpoint": "https://cdn.example.com/gh"}]"#),
        );
        let r = AccelRouter::new(cfg, Arc::new(transport), Arc::new(MemoryStore::new())).unwrap();

        let report = r.refresh_now().await.unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(r.store().get("cdn").unwrap().strategy, Strategy::CdnRewrite);
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let code = Service::from("code-hosting");

        let node_id = {
            let backend: Arc<dyn PersistenceStore> = Arc::new(FileStore::open(&path, "").unwrap());
            let r = AccelRouter::new(config(), Arc::new(ScriptedTransport::new()), backend).unwrap();
            let node = r.add_node(&code, "https://mine.example.com", Strategy::Mirror, None).unwrap();
            r.set_override(&code, &node.id).unwrap();
            node.id
        };

        let backend: Arc<dyn PersistenceStore> = Arc::new(FileStore::open(&path, "").unwrap());
        let r = AccelRouter::new(config(), Arc::new(ScriptedTransport::new()), backend).unwrap();
        assert!(r.store().get(&node_id).unwrap().is_user_added());
        assert_eq!(r.override_for(&code), Some(node_id));
        assert!(r.resolve("https://github.com/x").starts_with("https://mine.example.com"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = config();
        cfg.sweep.concurrency = 0;
        let result = AccelRouter::new(cfg, Arc::new(ScriptedTransport::new()), Arc::new(MemoryStore::new()));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
