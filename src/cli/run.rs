//! `run` and `resolve` commands

use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::router::AccelRouter;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Only rewrite against the persisted pool; no background sweep or refresh
    #[arg(long, default_value = "false")]
    pub no_scheduler: bool,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// URLs to resolve
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Run a health sweep before resolving
    #[arg(long, default_value = "false")]
    pub probe: bool,

    /// Show which service and node each URL went through
    #[arg(long, default_value = "false")]
    pub explain: bool,
}

impl RunArgs {
    /// Rewrite stdin to stdout, one URL per line, while the scheduler runs in the background
    pub async fn execute(&self, router: Arc<AccelRouter>) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = if self.no_scheduler {
            info!("⏸️  Background sweep and refresh disabled");
            Vec::new()
        } else {
            router.start(shutdown_rx)
        };

        info!("🚦 Reading URLs from stdin, one per line (Ctrl-C to stop)");

        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();

        tokio::select! {
            result = rewrite_lines(&router, stdin, &mut stdout) => {
                result?;
                debug!("stdin closed");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Received Ctrl-C, shutting down");
            }
        }

        let _ = shutdown_tx.send(true);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Scheduler task ended abnormally: {}", e);
            }
        }

        router.save().context("Failed to persist state on shutdown")?;
        info!("✅ State saved, bye");
        Ok(())
    }
}

/// Resolve every non-empty input line and write the result on its own line
pub async fn rewrite_lines<R, W>(router: &AccelRouter, input: R, output: &mut W) -> Result<usize>
where
    R: AsyncBufReadExt + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        let url = line.trim();
        if url.is_empty() {
            continue;
        }
        let resolved = router.resolve(url);
        output.write_all(resolved.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
        count += 1;
    }
    Ok(count)
}

impl ResolveArgs {
    pub async fn execute(&self, router: &AccelRouter) -> Result<()> {
        if self.probe {
            if let Some(report) = router.sweep_now().await {
                info!("🩺 Probed {} nodes before resolving", report.probed);
            }
        }

        for url in &self.urls {
            let resolution = router.resolve_detail(url);
            if self.explain {
                let service = resolution
                    .service
                    .as_ref()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let node = match (&resolution.node_id, resolution.overridden) {
                    (Some(id), true) => format!("{} (pinned)", id),
                    (Some(id), false) => id.clone(),
                    (None, _) => "-".to_string(),
                };
                println!("{}\t{}\t{}", resolution.url, service, node);
            } else {
                println!("{}", resolution.url);
            }
        }
        Ok(())
    }
}
