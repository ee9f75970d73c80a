//! `check-config` command

use anyhow::Result;
use std::fmt::Write as _;
use std::path::Path;

use crate::classifier::ServiceClassifier;
use crate::config::settings::RouterConfig;

/// Validate the loaded configuration and print a summary of it
pub fn check_config(path: &Path, config: &RouterConfig) -> Result<()> {
    config.validate()?;
    print!("{}", summarize(path, config));
    Ok(())
}

pub fn summarize(path: &Path, config: &RouterConfig) -> String {
    let mut out = String::new();
    let source = if path.exists() {
        path.display().to_string()
    } else {
        format!("built-in defaults ({} not found)", path.display())
    };
    let _ = writeln!(out, "Configuration: {}", source);

    let _ = writeln!(out, "Services:");
    for service in &config.services {
        let nodes = config
            .default_nodes
            .iter()
            .filter(|n| n.services.contains(&service.name))
            .count();
        let _ = writeln!(
            out,
            "  {:<16} {} ({} default nodes)",
            service.name,
            service.patterns.join(", "),
            nodes
        );
    }

    let classifier = ServiceClassifier::from_config(&config.services);
    for (pattern, first, second) in classifier.overlaps() {
        let _ = writeln!(out, "  warning: '{}' is claimed by {} and {}; {} wins", pattern, first, second, first);
    }

    let _ = writeln!(out, "Remote sources: {}", config.refresh.sources.len());
    for source in &config.refresh.sources {
        let _ = writeln!(out, "  {} (default strategy {})", source.url, source.strategy);
    }
    let _ = writeln!(
        out,
        "Probe: {} {}ms timeout, healthy below {}ms",
        config.probe.method, config.probe.timeout_ms, config.probe.healthy_threshold_ms
    );
    let _ = writeln!(
        out,
        "Sweep: every {}s, {} at once, {}s ceiling, {} retries",
        config.sweep.interval_secs, config.sweep.concurrency, config.sweep.ceiling_secs, config.sweep.retries
    );
    let _ = writeln!(
        out,
        "Refresh: every {}s, {}ms per source, {}s ceiling",
        config.refresh.interval_secs, config.refresh.fetch_timeout_ms, config.refresh.ceiling_secs
    );
    let _ = writeln!(
        out,
        "Scoring: speed {} / stability {} / neutral {}",
        config.scoring.speed_weight, config.scoring.stability_weight, config.scoring.neutral_score
    );
    let _ = writeln!(out, "Persistence: {} ({})", config.persistence.backend, config.persistence.path);
    out
}
