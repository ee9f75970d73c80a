//! Command-line entry point for the acceleration router

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use accel_router::{
    cli::{self, AddNodeArgs, NodesArgs, RemoveNodeArgs, ResolveArgs, RunArgs, SwitchArgs},
    config::DEFAULT_CONFIG_PATH,
    init_logger_with_config, log_debug, log_error, log_info, log_warning,
    runtime::run_with_runtime,
    AccelRouter, RouterConfig,
};

#[derive(Parser)]
#[command(name = "accel-router")]
#[command(about = "Route requests for known services through the fastest healthy acceleration node")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (built-in defaults are used when it does not exist)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite URLs read from stdin while keeping the node pool fresh
    Run(RunArgs),

    /// Resolve URLs once against the persisted pool
    Resolve(ResolveArgs),

    /// Show the per-service status board
    Nodes(NodesArgs),

    /// Add a user node
    #[command(name = "add-node")]
    AddNode(AddNodeArgs),

    /// Remove a user node
    #[command(name = "remove-node")]
    RemoveNode(RemoveNodeArgs),

    /// Pin a service to a node, or return it to automatic selection
    Switch(SwitchArgs),

    /// Probe every node now
    Sweep,

    /// Fetch every remote node list now
    Refresh,

    /// Validate and summarise the configuration
    #[command(name = "check-config")]
    CheckConfig,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = RouterConfig::load_or_default(&cli.config)?;

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        cli.log_level.clone().unwrap_or_else(|| config.log_level.clone())
    };
    init_logger_with_config(&level, config.logging.file_dir.as_deref());
    if cli.config.exists() {
        log_debug!("📋 Configuration loaded from {}", cli.config.display());
    } else {
        log_warning!("⚠️  {} not found, using built-in defaults", cli.config.display());
    }

    let runtime_config = config.runtime.clone();
    run_with_runtime(&runtime_config, async_main(cli, config))
}

async fn async_main(cli: Cli, config: RouterConfig) -> anyhow::Result<()> {
    if let Commands::CheckConfig = cli.command {
        return cli::check_config(&cli.config, &config);
    }

    log_info!("🚀 accel-router {}", env!("CARGO_PKG_VERSION"));
    let router = Arc::new(AccelRouter::from_config(config)?);

    let result = match &cli.command {
        Commands::Run(args) => args.execute(Arc::clone(&router)).await,
        Commands::Resolve(args) => args.execute(&router).await,
        Commands::Nodes(args) => args.execute(&router),
        Commands::AddNode(args) => args.execute(&router),
        Commands::RemoveNode(args) => args.execute(&router),
        Commands::Switch(args) => args.execute(&router),
        Commands::Sweep => cli::sweep(&router).await,
        Commands::Refresh => cli::refresh(&router).await,
        Commands::CheckConfig => Ok(()),
    };

    if let Err(ref e) = result {
        log_error!("Command failed: {}", e);
    }
    result
}
