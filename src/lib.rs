//! Accel Router - a node routing engine for URL acceleration
//!
//! Requests to a small set of known services are classified, matched to the best
//! acceleration node from a continuously health-checked pool, and rewritten to go
//! through that node. When nothing suitable is available the original URL is used.

pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod probe;
pub mod rewrite;
pub mod router;
pub mod scheduler;
pub mod selector;
pub mod store;
pub mod utils;

// Re-export commonly used items
pub use classifier::ServiceClassifier;
pub use config::settings::RouterConfig;
pub use error::{Error, Result};
pub use logging::init_logger_with_config;
pub use models::{Health, HealthSample, Node, NodeSource, Service, Strategy};
pub use rewrite::rewrite;
pub use router::AccelRouter;
pub use selector::{Scorer, Selector};
pub use store::{merge, NodePool, NodeStore};

/// Runtime utilities for creating single-threaded vs multi-threaded Tokio runtimes
pub mod runtime {
    use crate::config::settings::RuntimeConfig;
    use anyhow::{Context, Result};
    use tokio::runtime::{Builder, Runtime};

    /// Create a Tokio runtime based on the configuration
    pub fn create_runtime(config: &RuntimeConfig) -> Result<Runtime> {
        match config.mode.as_str() {
            "single_threaded" => {
                tracing::debug!("🧵 Initializing single-threaded runtime");
                Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context("Failed to create single-threaded runtime")
            }
            "multi_threaded" => {
                let mut builder = Builder::new_multi_thread();
                builder.enable_all();

                match config.worker_threads {
                    Some(threads) if threads > 0 => {
                        tracing::debug!("🧵 Initializing multi-threaded runtime with {} worker threads", threads);
                        builder.worker_threads(threads);
                    }
                    _ => {
                        tracing::debug!("🧵 Initializing multi-threaded runtime with auto-detected CPU cores");
                    }
                }

                builder.build().context("Failed to create multi-threaded runtime")
            }
            _ => {
                tracing::warn!("⚠️  Unknown runtime mode '{}', defaulting to multi-threaded", config.mode);
                Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .context("Failed to create default multi-threaded runtime")
            }
        }
    }

    /// Execute an async function with the configured runtime
    pub fn run_with_runtime<F, T>(config: &RuntimeConfig, future: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let runtime = create_runtime(config)?;
        runtime.block_on(future)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_runtime_modes() {
            for mode in ["single_threaded", "multi_threaded", "bogus"] {
                let config = RuntimeConfig {
                    mode: mode.to_string(),
                    worker_threads: Some(2),
                };
                let value = run_with_runtime(&config, async { Ok(7) }).unwrap();
                assert_eq!(value, 7);
            }
        }
    }
}
