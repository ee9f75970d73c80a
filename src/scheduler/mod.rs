//! Refresh scheduler: periodic remote node-list refresh and health sweep
//!
//! Both activities skip a cycle instead of queueing it when the previous one is still
//! running, and both are bounded by a ceiling. Results are applied as they arrive, so a
//! cycle abandoned at its ceiling keeps whatever it had already learned.

use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::settings::{RefreshConfig, SourceConfig, SweepConfig};
use crate::error::{Error, Result};
use crate::models::{Health, HealthSample, Node, NodeSource, RemoteEntry, RemotePayload, SpecDefaults};
use crate::probe::{HealthProber, HttpTransport, ProbeRequest};
use crate::store::{NodeStore, PersistenceStore};
use crate::utils::elapsed_ms;

/// Upper bound on sources fetched at once during a refresh
const MAX_PARALLEL_FETCHES: usize = 4;

/// Outcome of one health sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub dead: usize,
    /// Stopped at the ceiling before every node was probed
    pub abandoned: bool,
    pub elapsed_ms: u64,
}

impl SweepReport {
    fn record(&mut self, sample: &HealthSample) {
        self.probed += 1;
        match sample.health {
            Health::Healthy => self.healthy += 1,
            Health::Degraded => self.degraded += 1,
            Health::Dead => self.dead += 1,
            Health::Unknown => {}
        }
    }
}

/// Outcome of one remote-list refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub added: usize,
    pub updated: usize,
    pub pruned: usize,
    pub abandoned: bool,
    pub elapsed_ms: u64,
}

/// Clears its flag on drop so a panicking or abandoned cycle never blocks the next one
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RefreshScheduler {
    store: Arc<NodeStore>,
    prober: HealthProber,
    transport: Arc<dyn HttpTransport>,
    persistence: Option<Arc<dyn PersistenceStore>>,
    sweep: SweepConfig,
    refresh: RefreshConfig,
    probe_timeout: Duration,
    sweeping: AtomicBool,
    refreshing: AtomicBool,
}

impl RefreshScheduler {
    pub fn new(
        store: Arc<NodeStore>,
        prober: HealthProber,
        transport: Arc<dyn HttpTransport>,
        sweep: SweepConfig,
        refresh: RefreshConfig,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            store,
            prober,
            transport,
            persistence: None,
            sweep,
            refresh,
            probe_timeout,
            sweeping: AtomicBool::new(false),
            refreshing: AtomicBool::new(false),
        }
    }

    /// Save the pool after every completed cycle
    pub fn with_persistence(mut self, backend: Arc<dyn PersistenceStore>) -> Self {
        self.persistence = Some(backend);
        self
    }

    fn persist(&self) {
        if let Some(backend) = &self.persistence {
            if let Err(e) = self.store.save_to(backend.as_ref()) {
                error!("❌ Failed to persist node pool: {}", e);
            }
        }
    }

    /// Probe every known node once; `None` if a sweep is already running
    pub async fn run_sweep(&self) -> Option<SweepReport> {
        let Some(_guard) = CycleGuard::acquire(&self.sweeping) else {
            debug!("Health sweep already running, skipping");
            return None;
        };

        let start = Instant::now();
        let nodes = self.store.all_nodes();
        let total = nodes.len();
        let mut report = SweepReport::default();

        let mut results = stream::iter(nodes)
            .map(|node| async move {
                let sample = self.probe_with_retries(&node).await;
                (node.id, sample)
            })
            .buffer_unordered(self.sweep.concurrency.max(1));

        let drain = async {
            while let Some((id, sample)) = results.next().await {
                if self.store.update_health(&id, &sample) {
                    report.record(&sample);
                }
            }
        };

        if tokio::time::timeout(self.sweep.ceiling(), drain).await.is_err() {
            report.abandoned = true;
            warn!(
                "⏱️  Health sweep hit its {}s ceiling after probing {}/{} nodes",
                self.sweep.ceiling_secs, report.probed, total
            );
        }

        report.elapsed_ms = elapsed_ms(start);
        info!(
            "🩺 Health sweep: {} probed, {} healthy, {} degraded, {} dead in {}ms",
            report.probed, report.healthy, report.degraded, report.dead, report.elapsed_ms
        );
        self.persist();
        Some(report)
    }

    /// Probe once plus up to `sweep.retries` more attempts while the node keeps failing
    async fn probe_with_retries(&self, node: &Node) -> HealthSample {
        let mut sample = self.prober.probe(node, self.probe_timeout).await;
        let mut attempt = 0;
        while !sample.is_success() && attempt < self.sweep.retries {
            attempt += 1;
            debug!("Retrying probe of {} (attempt {}/{})", node.id, attempt, self.sweep.retries);
            sample = self.prober.probe(node, self.probe_timeout).await;
        }
        sample
    }

    /// Fetch every configured source and merge what arrives; `None` if already running
    pub async fn run_refresh(&self) -> Option<RefreshReport> {
        let Some(_guard) = CycleGuard::acquire(&self.refreshing) else {
            debug!("Node list refresh already running, skipping");
            return None;
        };

        let start = Instant::now();
        let mut report = RefreshReport::default();

        let mut fetches = stream::iter(0..self.refresh.sources.len())
            .map(|i| async move {
                let source = &self.refresh.sources[i];
                (source, self.fetch_source(source).await)
            })
            .buffer_unordered(MAX_PARALLEL_FETCHES);

        let drain = async {
            while let Some((source, outcome)) = fetches.next().await {
                match outcome {
                    Ok(nodes) => {
                        let count = nodes.len();
                        let applied = self.store.apply_remote(&source.url, nodes);
                        report.sources_ok += 1;
                        report.added += applied.added;
                        report.updated += applied.updated;
                        report.pruned += applied.pruned;
                        debug!(
                            "Source {} listed {} nodes ({} new, {} superseded)",
                            source.url, count, applied.added, applied.pruned
                        );
                    }
                    Err(e) => {
                        report.sources_failed += 1;
                        warn!("⚠️  Skipping node source: {}", e);
                    }
                }
            }
        };

        if tokio::time::timeout(self.refresh.ceiling(), drain).await.is_err() {
            report.abandoned = true;
            warn!(
                "⏱️  Node list refresh hit its {}s ceiling; {} sources applied",
                self.refresh.ceiling_secs, report.sources_ok
            );
        }

        report.elapsed_ms = elapsed_ms(start);
        info!(
            "🔄 Node list refresh: {} sources ok, {} failed, {} added, {} updated, {} removed",
            report.sources_ok, report.sources_failed, report.added, report.updated, report.pruned
        );
        self.persist();
        Some(report)
    }

    async fn fetch_source(&self, source: &SourceConfig) -> Result<Vec<Node>> {
        let timeout = self.refresh.fetch_timeout();
        let request = ProbeRequest::fetch(source.url.clone(), timeout);
        let response = tokio::time::timeout(timeout, self.transport.execute(request))
            .await
            .map_err(|_| Error::fetch(&source.url, format!("timed out after {}ms", timeout.as_millis())))?
            .map_err(|e| Error::fetch(&source.url, e.to_string()))?;

        if !response.is_success() {
            return Err(Error::fetch(&source.url, format!("status {}", response.status)));
        }
        parse_payload(&response.body, source)
    }

    /// Start both periodic loops; they stop when `shutdown` flips to true or its sender drops
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(
            "⏰ Scheduler started: sweep every {}s, refresh every {}s ({} sources)",
            self.sweep.interval_secs,
            self.refresh.interval_secs,
            self.refresh.sources.len()
        );

        let sweeper = {
            let this = Arc::clone(self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let period = this.sweep.interval();
                run_periodic(period, shutdown, || this.run_sweep()).await;
                debug!("Health sweep loop stopped");
            })
        };

        let refresher = {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let period = this.refresh.interval();
                run_periodic(period, shutdown, || this.run_refresh()).await;
                debug!("Node list refresh loop stopped");
            })
        };

        vec![sweeper, refresher]
    }
}

async fn run_periodic<F, Fut, T>(period: Duration, mut shutdown: watch::Receiver<bool>, mut cycle: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                cycle().await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Parse a remote list into nodes tagged with `source.url`.
///
/// Individual malformed entries are skipped. A body that is not a node list at all, or
/// a non-empty list in which no entry is usable, fails the whole source.
pub fn parse_payload(body: &str, source: &SourceConfig) -> Result<Vec<Node>> {
    let payload: RemotePayload = serde_json::from_str(body)
        .map_err(|e| Error::fetch(&source.url, format!("malformed payload: {}", e)))?;
    let entries = payload.into_entries();
    let total = entries.len();

    let defaults = SpecDefaults {
        services: source.services.clone(),
        strategy: source.strategy,
    };

    let nodes: Vec<Node> = entries
        .into_iter()
        .filter_map(|value| {
            let parsed = serde_json::from_value::<RemoteEntry>(value)
                .map_err(Error::from)
                .and_then(|entry| {
                    entry
                        .into_spec()
                        .into_node(NodeSource::RemoteFetched, Some(source.url.clone()), &defaults)
                });
            match parsed {
                Ok(node) => Some(node),
                Err(e) => {
                    warn!("Skipping malformed entry from {}: {}", source.url, e);
                    None
                }
            }
        })
        .collect();

    if total > 0 && nodes.is_empty() {
        return Err(Error::fetch(&source.url, format!("none of {} entries were usable", total)));
    }
    Ok(nodes)
}
