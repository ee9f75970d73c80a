//! Node store: the only shared mutable state of the engine
//!
//! Readers load an immutable [`PoolState`] through `ArcSwap`; writers serialize on a
//! mutex, build a new state and swap it in, so a reader never sees a half-applied merge.

pub mod persistence;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{HealthSample, Node, NodeSource, NodeSpec, Service, SpecDefaults, Strategy};
use crate::selector::Scorer;

pub use persistence::{
    open_store, FileStore, MemoryStore, PersistenceStore, CUSTOM_NODES_KEY, NODE_POOL_KEY,
    SERVICE_OVERRIDES_KEY,
};

#[cfg(feature = "redis-support")]
pub use persistence::RedisStore;

const USER_ID_PREFIX: &str = "user-";

/// Every known node keyed by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePool {
    nodes: BTreeMap<String, Node>,
}

impl NodePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut pool = Self::new();
        for node in nodes {
            pool.insert(node);
        }
        pool
    }

    pub fn insert(&mut self, node: Node) -> Option<Node> {
        self.nodes.insert(node.id.clone(), node)
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn user_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.is_user_added())
    }
}

/// Union of two pools, de-duplicated by id.
///
/// For a shared id the incoming copy supplies identity attributes, health data comes from
/// whichever copy was checked most recently (incoming on a tie) and the source stays
/// user-added if either copy was. Nothing present in `existing` is ever dropped.
pub fn merge(existing: &NodePool, incoming: &NodePool) -> NodePool {
    let mut merged = existing.clone();
    for node in incoming.nodes() {
        let combined = match existing.get(&node.id) {
            Some(current) => merge_node(current, node),
            None => node.clone(),
        };
        merged.insert(combined);
    }
    merged
}

fn merge_node(existing: &Node, incoming: &Node) -> Node {
    let mut node = incoming.clone();
    if existing.last_checked > incoming.last_checked {
        node.health = existing.health;
        node.latency_millis = existing.latency_millis;
        node.stability = existing.stability;
        node.last_checked = existing.last_checked;
    }
    node.source = existing.source.combine(incoming.source);
    // a node already present without an origin is a static default or user node and
    // must not become prunable by whichever source happens to list it too
    node.origin = match &existing.origin {
        None => None,
        Some(current) => incoming.origin.clone().or_else(|| Some(current.clone())),
    };
    node
}

/// Immutable point-in-time view: the pool plus per-service lists in score order
#[derive(Debug, Default)]
pub struct PoolState {
    pool: NodePool,
    views: BTreeMap<Service, Arc<Vec<Node>>>,
}

impl PoolState {
    fn build(pool: NodePool, scorer: &Scorer) -> Self {
        let mut grouped: BTreeMap<Service, Vec<Node>> = BTreeMap::new();
        for node in pool.nodes() {
            for service in &node.services {
                grouped.entry(service.clone()).or_default().push(node.clone());
            }
        }
        let views = grouped
            .into_iter()
            .map(|(service, mut nodes)| {
                nodes.sort_by(|a, b| scorer.rank(a, b));
                (service, Arc::new(nodes))
            })
            .collect();
        Self { pool, views }
    }

    pub fn pool(&self) -> &NodePool {
        &self.pool
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.views.keys()
    }
}

/// Counts from applying one remote source's payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteApplyReport {
    pub added: usize,
    pub updated: usize,
    pub pruned: usize,
}

pub struct NodeStore {
    state: ArcSwap<PoolState>,
    writer: Mutex<()>,
    scorer: Scorer,
    next_user_id: AtomicU64,
}

impl NodeStore {
    pub fn new(scorer: Scorer) -> Self {
        Self::with_pool(NodePool::new(), scorer)
    }

    pub fn with_pool(pool: NodePool, scorer: Scorer) -> Self {
        let next_user_id = next_user_id_after(&pool);
        Self {
            state: ArcSwap::from_pointee(PoolState::build(pool, &scorer)),
            writer: Mutex::new(()),
            scorer,
            next_user_id: AtomicU64::new(next_user_id),
        }
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the published state; callers must hold the writer guard
    fn publish(&self, pool: NodePool) {
        self.bump_user_ids(&pool);
        self.state.store(Arc::new(PoolState::build(pool, &self.scorer)));
    }

    fn bump_user_ids(&self, pool: &NodePool) {
        self.next_user_id
            .fetch_max(next_user_id_after(pool), Ordering::SeqCst);
    }

    /// Current full state
    pub fn state(&self) -> Arc<PoolState> {
        self.state.load_full()
    }

    /// Nodes serving `service`, live first, best score first, ties by id
    pub fn snapshot(&self, service: &Service) -> Arc<Vec<Node>> {
        self.state
            .load()
            .views
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Option<Node> {
        self.state.load().pool.get(id).cloned()
    }

    pub fn all_nodes(&self) -> Vec<Node> {
        self.state.load().pool.nodes().cloned().collect()
    }

    pub fn user_nodes(&self) -> Vec<Node> {
        self.state.load().pool.user_nodes().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.load().pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge `incoming` into the current pool atomically
    pub fn merge_in(&self, incoming: &NodePool) {
        let _guard = self.write_guard();
        let merged = merge(&self.state.load().pool, incoming);
        self.publish(merged);
    }

    /// Validate and insert a user-submitted node under a fresh id
    pub fn add_user_node(&self, service: &Service, endpoint: &str, strategy: Strategy) -> Result<Node> {
        let spec = NodeSpec {
            endpoint: endpoint.to_string(),
            services: vec![service.as_str().to_string()],
            strategy: Some(strategy),
            ..Default::default()
        };
        self.add_user_spec(spec)
    }

    /// Like [`add_user_node`](Self::add_user_node) for a full spec; any id in the spec is replaced
    pub fn add_user_spec(&self, spec: NodeSpec) -> Result<Node> {
        let mut node = spec.into_node(NodeSource::UserAdded, None, &SpecDefaults::default())?;

        let _guard = self.write_guard();
        let current = self.state.load();
        node.id = loop {
            let n = self.next_user_id.fetch_add(1, Ordering::SeqCst);
            let candidate = format!("{}{}", USER_ID_PREFIX, n);
            if !current.pool.contains(&candidate) {
                break candidate;
            }
        };

        let mut pool = current.pool.clone();
        pool.insert(node.clone());
        self.publish(pool);
        info!("➕ Added user node {} ({}) for {}", node.id, node.endpoint, join_services(&node));
        Ok(node)
    }

    /// Record a probe outcome; returns false when the node no longer exists
    pub fn update_health(&self, id: &str, sample: &HealthSample) -> bool {
        let _guard = self.write_guard();
        let current = self.state.load();
        if !current.pool.contains(id) {
            debug!("Dropping health sample for removed node {}", id);
            return false;
        }
        let mut pool = current.pool.clone();
        if let Some(node) = pool.nodes.get_mut(id) {
            node.apply_sample(sample);
        }
        self.publish(pool);
        true
    }

    /// Merge one source's nodes and drop remote nodes that source no longer lists
    pub fn apply_remote(&self, origin: &str, nodes: Vec<Node>) -> RemoteApplyReport {
        let _guard = self.write_guard();
        let current = self.state.load();

        let mut incoming = NodePool::new();
        for mut node in nodes {
            node.origin = Some(origin.to_string());
            incoming.insert(node);
        }

        let mut report = RemoteApplyReport::default();
        for node in incoming.nodes() {
            if current.pool.contains(&node.id) {
                report.updated += 1;
            } else {
                report.added += 1;
            }
        }

        let mut merged = merge(&current.pool, &incoming);
        let superseded: Vec<String> = merged
            .nodes()
            .filter(|n| {
                n.source == NodeSource::RemoteFetched
                    && n.origin.as_deref() == Some(origin)
                    && !incoming.contains(&n.id)
            })
            .map(|n| n.id.clone())
            .collect();
        for id in &superseded {
            merged.nodes.remove(id);
        }
        report.pruned = superseded.len();

        self.publish(merged);
        report
    }

    /// Delete a user-added node; remote and default nodes are managed by their sources
    pub fn remove_user_node(&self, id: &str) -> Result<Node> {
        let _guard = self.write_guard();
        let current = self.state.load();
        let node = current
            .pool
            .get(id)
            .ok_or_else(|| Error::NodeNotFound(id.to_string()))?;
        if !node.is_user_added() {
            return Err(Error::Validation(format!(
                "node '{}' was not added by the user and cannot be removed manually",
                id
            )));
        }
        let removed = node.clone();
        let mut pool = current.pool.clone();
        pool.nodes.remove(id);
        self.publish(pool);
        info!("➖ Removed user node {} ({})", removed.id, removed.endpoint);
        Ok(removed)
    }

    /// Restore state: persisted pool, then `defaults`, then the persisted custom nodes
    pub fn load_from(&self, backend: &dyn PersistenceStore, defaults: &NodePool) -> usize {
        let pool: NodePool = backend.get_or_default(NODE_POOL_KEY);
        let custom: Vec<Node> = backend.get_or_default(CUSTOM_NODES_KEY);
        let custom = NodePool::from_nodes(custom.into_iter().map(|mut n| {
            n.source = NodeSource::UserAdded;
            n
        }));
        self.merge_in(&pool);
        self.merge_in(defaults);
        self.merge_in(&custom);
        let restored = pool.len() + custom.len();
        if restored > 0 {
            debug!("Restored {} persisted nodes ({})", restored, backend.store_info());
        }
        restored
    }

    /// Keep only what the current configuration still accounts for: remote nodes whose
    /// source is configured, origin-less nodes that are still static defaults, and every
    /// user-added node. Nodes listed in `defaults` lose any origin. Returns how many went.
    pub fn retain_configured(&self, sources: &[String], defaults: &NodePool) -> usize {
        let _guard = self.write_guard();
        let current = self.state.load();
        let mut pool = current.pool.clone();
        let mut changed = false;
        for node in pool.nodes.values_mut() {
            if defaults.contains(&node.id) && !node.is_user_added() && node.origin.is_some() {
                node.origin = None;
                changed = true;
            }
        }
        pool.nodes.retain(|id, n| {
            n.is_user_added()
                || match &n.origin {
                    Some(origin) => sources.contains(origin),
                    None => defaults.contains(id),
                }
        });
        let dropped = current.pool.len() - pool.len();
        if dropped > 0 {
            info!("🧹 Dropped {} nodes no longer backed by a source or default", dropped);
        }
        if dropped > 0 || changed {
            self.publish(pool);
        }
        dropped
    }

    /// Persist the whole pool and, separately, the user-added nodes
    pub fn save_to(&self, backend: &dyn PersistenceStore) -> Result<()> {
        let state = self.state();
        backend.set_json(NODE_POOL_KEY, &state.pool)?;
        let custom: Vec<&Node> = state.pool.user_nodes().collect();
        backend.set_json(CUSTOM_NODES_KEY, &custom)?;
        debug!("Persisted {} nodes ({} user-added)", state.pool.len(), custom.len());
        Ok(())
    }
}

fn next_user_id_after(pool: &NodePool) -> u64 {
    pool.nodes()
        .filter_map(|n| n.id.strip_prefix(USER_ID_PREFIX))
        .filter_map(|n| n.parse::<u64>().ok())
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

fn join_services(node: &Node) -> String {
    node.services
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(",")
}
