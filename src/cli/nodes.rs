//! Node management commands: status board, add/remove, manual switch, on-demand cycles

use anyhow::{anyhow, Result};
use clap::Args;
use std::fmt::Write as _;
use tracing::info;

use crate::models::{Service, Strategy};
use crate::router::{AccelRouter, ServiceStatus};
use crate::utils::format_timestamp;

#[derive(Debug, Args)]
pub struct NodesArgs {
    /// Only show this service
    #[arg(long)]
    pub service: Option<String>,
}

#[derive(Debug, Args)]
pub struct AddNodeArgs {
    /// Service the node accelerates
    #[arg(long)]
    pub service: String,

    /// Absolute http(s) URL of the node
    #[arg(long)]
    pub endpoint: String,

    /// Rewrite strategy: mirror, proxy or cdn-rewrite
    #[arg(long, default_value = "mirror")]
    pub strategy: Strategy,

    /// Optional ws:// or wss:// endpoint for WebSocket traffic
    #[arg(long)]
    pub ws_endpoint: Option<String>,
}

#[derive(Debug, Args)]
pub struct RemoveNodeArgs {
    /// Id of a user-added node
    pub id: String,
}

#[derive(Debug, Args)]
pub struct SwitchArgs {
    /// Service to pin or unpin
    #[arg(long)]
    pub service: String,

    /// Node id to pin the service to
    #[arg(long, conflicts_with = "clear", required_unless_present = "clear")]
    pub node: Option<String>,

    /// Return the service to automatic selection
    #[arg(long, default_value = "false")]
    pub clear: bool,
}

impl NodesArgs {
    pub fn execute(&self, router: &AccelRouter) -> Result<()> {
        let filter = self.service.as_deref().map(Service::from);
        let board = router.status(filter.as_ref())?;
        print!("{}", render_board(&board));
        Ok(())
    }
}

impl AddNodeArgs {
    pub fn execute(&self, router: &AccelRouter) -> Result<()> {
        let node = router.add_node(
            &Service::from(self.service.as_str()),
            &self.endpoint,
            self.strategy,
            self.ws_endpoint.clone(),
        )?;
        println!("Added node {} ({}, {}) for {}", node.id, node.endpoint, node.strategy, self.service);
        Ok(())
    }
}

impl RemoveNodeArgs {
    pub fn execute(&self, router: &AccelRouter) -> Result<()> {
        let node = router.remove_node(&self.id)?;
        println!("Removed node {} ({})", node.id, node.endpoint);
        Ok(())
    }
}

impl SwitchArgs {
    pub fn execute(&self, router: &AccelRouter) -> Result<()> {
        let service = Service::from(self.service.as_str());
        if self.clear {
            if router.clear_override(&service)? {
                println!("{} now uses automatic selection", service);
            } else {
                println!("{} was not pinned", service);
            }
            return Ok(());
        }

        let node = self
            .node
            .as_deref()
            .ok_or_else(|| anyhow!("either --node or --clear is required"))?;
        router.set_override(&service, node)?;
        println!("{} pinned to {}", service, node);
        Ok(())
    }
}

/// Run one health sweep and print its summary
pub async fn sweep(router: &AccelRouter) -> Result<()> {
    let report = router
        .sweep_now()
        .await
        .ok_or_else(|| anyhow!("a health sweep is already running"))?;
    println!(
        "Probed {} nodes: {} healthy, {} degraded, {} dead ({}ms{})",
        report.probed,
        report.healthy,
        report.degraded,
        report.dead,
        report.elapsed_ms,
        if report.abandoned { ", stopped at ceiling" } else { "" }
    );
    Ok(())
}

/// Run one remote refresh and print its summary
pub async fn refresh(router: &AccelRouter) -> Result<()> {
    if router.config().refresh.sources.is_empty() {
        info!("No remote sources configured");
    }
    let report = router
        .refresh_now()
        .await
        .ok_or_else(|| anyhow!("a node list refresh is already running"))?;
    println!(
        "Sources: {} ok, {} failed. Nodes: {} added, {} updated, {} removed ({}ms)",
        report.sources_ok,
        report.sources_failed,
        report.added,
        report.updated,
        report.pruned,
        report.elapsed_ms
    );
    Ok(())
}

/// Plain-text status board, one block per service
pub fn render_board(board: &[ServiceStatus]) -> String {
    let mut out = String::new();
    for status in board {
        let _ = write!(out, "{}", status.service);
        if let Some(node) = &status.override_node {
            let _ = write!(out, " (pinned to {})", node);
        }
        out.push('\n');

        if status.nodes.is_empty() {
            out.push_str("  no nodes\n");
            continue;
        }
        for node in &status.nodes {
            let latency = node
                .latency_millis
                .map(|ms| format!("{}ms", ms))
                .unwrap_or_else(|| "-".to_string());
            let checked = node
                .last_checked
                .map(format_timestamp)
                .unwrap_or_else(|| "never".to_string());
            let _ = writeln!(
                out,
                "{} {:<24} {:<9} {:>7} {:.3} {:<12} {:<14} {} [{}]",
                if node.selected { "*" } else { " " },
                node.id,
                node.health.as_str(),
                latency,
                node.score,
                node.strategy.as_str(),
                node.source.to_string(),
                node.name,
                checked
            );
        }
    }
    out
}
