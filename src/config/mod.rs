//! Configuration loading and validation

pub mod settings;

pub use settings::{
    LoggingConfig, PersistenceConfig, ProbeConfig, RefreshConfig, RouterConfig, RuntimeConfig,
    ScoringConfig, ServiceConfig, SourceConfig, SweepConfig, DEFAULT_CONFIG_PATH,
};
