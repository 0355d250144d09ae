//! Admin dashboard metrics CLI
//!
//! Aggregates an activity log into dashboard statistics and renders the
//! dashboard in the terminal, either once or continuously.

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

use clap::{Parser, Subcommand, ValueEnum};
use dashboard_core::Config;
use dashboard_metrics::{
    DashboardView, MetricsError, RefreshService, Result, StoreState, init_store, render_text,
};
use std::path::{Path, PathBuf};
use tokio::signal;
use tracing::{info, warn};

/// Command line interface for the dashboard metrics service
#[derive(Parser)]
#[command(
    name = "dashboard-metrics",
    version = env!("CARGO_PKG_VERSION"),
    about = "Admin dashboard metrics aggregation",
    long_about = "Aggregates an activity log into dashboard statistics and growth metrics, and renders the resulting dashboard in the terminal."
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Activity log to aggregate (overrides config)
    #[arg(short, long, value_name = "FILE")]
    activity_log: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable structured JSON logging
    #[arg(long)]
    json: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Output format for rendered views
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// Plain-text dashboard
    #[default]
    Text,
    /// JSON document
    Json,
}

/// Available subcommands
#[derive(Subcommand)]
enum Commands {
    /// Refresh periodically and re-render on every change
    Watch {
        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Refresh once and print the dashboard
    Snapshot {
        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,

        /// Validate configuration file
        #[arg(short, long)]
        validate: bool,
    },
}

/// Main entry point for the dashboard metrics CLI
///
/// # Errors
///
/// Returns error if configuration, logging or the refresh fails
#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (for development convenience)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Note: .env file not loaded: {e}");
    }

    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);

    dashboard_core::init_logging(&config.logging)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.logging.level,
        "Dashboard metrics starting"
    );

    match cli.command {
        Some(Commands::Snapshot { format }) => print_snapshot(&config, format).await,
        Some(Commands::Config { show, validate }) => handle_config_command(&config, show, validate),
        Some(Commands::Watch { format }) => watch(&config, format).await,
        None => watch(&config, OutputFormat::Text).await,
    }
}

/// Load configuration from file or environment
///
/// `DASHBOARD_` environment variables override values from either source.
///
/// # Errors
///
/// Returns error if the configuration file cannot be read, parsed or validated
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = match config_path {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

/// Apply command line overrides on top of the loaded configuration
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(path) = &cli.activity_log {
        config.source.activity_log.clone_from(path);
    }
    if let Some(level) = &cli.log_level {
        config.logging.level.clone_from(level);
    }
    if cli.json {
        config.logging.format = "json".to_string();
    }
}

/// Render a store state in the requested format
fn render(state: &StoreState, format: OutputFormat) -> Result<String> {
    let view = DashboardView::resolve(state);
    match format {
        OutputFormat::Text => Ok(render_text(&view)),
        OutputFormat::Json => serde_json::to_string_pretty(&view)
            .map(|json| json + "\n")
            .map_err(|e| MetricsError::serialization(format!("Failed to serialize view: {e}"))),
    }
}

/// Refresh once and print the resulting dashboard
///
/// # Errors
///
/// Returns error if the refresh fails; the error view is printed first
async fn print_snapshot(config: &Config, format: OutputFormat) -> Result<()> {
    let store = init_store(config);
    let outcome = store.refresh().await;

    print!("{}", render(&store.snapshot(), format)?);
    store.close();

    outcome.map(|_| ()).map_err(MetricsError::from)
}

/// Refresh on an interval and re-render on every state change until Ctrl+C
///
/// # Errors
///
/// Returns error if the refresh service cannot be started or stopped
async fn watch(config: &Config, format: OutputFormat) -> Result<()> {
    let store = init_store(config);

    let _subscription = store.subscribe(move |state| {
        // Skip intermediate frames while a refresh over existing data runs
        if state.refreshing && !state.loading {
            return;
        }
        match render(state, format) {
            Ok(frame) => print!("{frame}"),
            Err(e) => warn!(error = %e, "Failed to render dashboard"),
        }
    });

    let service = RefreshService::new(store.clone(), config.refresh.clone());
    service.start()?;
    info!(
        activity_log = %config.source.activity_log.display(),
        "Watching dashboard metrics. Press Ctrl+C to stop."
    );

    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C, shutting down");
    } else {
        info!("Received Ctrl+C, shutting down gracefully");
    }

    let stopped = service.stop().await;
    store.close();
    stopped?;

    let metrics = service.metrics();
    info!(
        refreshes_completed = metrics.refreshes_completed,
        refreshes_failed = metrics.refreshes_failed,
        "Dashboard metrics stopped"
    );
    Ok(())
}

/// Show configuration as TOML
///
/// # Errors
///
/// Returns error if configuration cannot be serialized
fn show_config(config: &Config) -> Result<()> {
    let config_toml = toml::to_string_pretty(config).map_err(|e| {
        MetricsError::configuration(format!("Failed to serialize configuration: {e}"))
    })?;
    println!("{config_toml}");
    Ok(())
}

/// Handle configuration commands
///
/// # Errors
///
/// Returns error if configuration is invalid or cannot be serialized
fn handle_config_command(config: &Config, show: bool, validate: bool) -> Result<()> {
    if validate {
        config.validate()?;
        if !config.source.activity_log.exists() {
            warn!(
                path = %config.source.activity_log.display(),
                "Activity log does not exist yet"
            );
        }
        println!("Configuration is valid");
    }

    if show {
        show_config(config)?;
    }

    Ok(())
}
