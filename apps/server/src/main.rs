//! artmatrix server - headless AirPlay cover art to LED matrix bridge.
//!
//! Launches and supervises flaschen-taschen's `ft-server`, subscribes to the
//! metadata shairport-sync publishes over MQTT, and pushes every cover image
//! to the matrix. Designed to run as a service next to shairport-sync.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use artmatrix_core::{bootstrap_services, ArtMatrixError, Lifecycle, OutputMode};
use clap::Parser;
use tokio::signal;

use crate::config::{ServerConfig, ServerMode, ServerOutput};

/// artmatrix server - AirPlay cover art on a flaschen-taschen LED matrix.
#[derive(Parser, Debug)]
#[command(name = "artmatrix-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "ARTMATRIX_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Path to the ft-server binary (overrides config file and search).
    #[arg(short = 's', long, value_name = "FILE")]
    server_path: Option<PathBuf>,

    /// Render in the terminal instead of driving LED hardware.
    #[arg(long, conflicts_with = "hardware")]
    terminal: bool,

    /// Drive the LED matrix over GPIO (runs ft-server through sudo).
    #[arg(long)]
    hardware: bool,

    /// Let ft-server write to this terminal.
    #[arg(short = 'v', long)]
    verbose_server: bool,

    /// MQTT broker host (overrides config file).
    #[arg(short = 'm', long)]
    mqtt_host: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("artmatrix server v{}", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(()) => {
            log::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(args: Args) -> Result<()> {
    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(path) = args.server_path {
        config.server.path = Some(path);
    }
    if args.terminal {
        config.server.mode = ServerMode::Terminal;
    }
    if args.hardware {
        config.server.mode = ServerMode::Hardware;
    }
    if args.verbose_server {
        config.server.output = ServerOutput::Inherit;
    }
    if let Some(host) = args.mqtt_host {
        config.mqtt.host = host;
    }

    let core_config = config.to_core_config();
    log::info!(
        "Configuration: display={}x{} mode={:?} mqtt={} topic={}",
        core_config.display.width,
        core_config.display.height,
        config.server.mode,
        core_config.bus.broker(),
        core_config.bus.topic_root
    );
    if core_config.server.output == OutputMode::Inherit {
        log::info!("ft-server output goes to this terminal");
    }

    let services = bootstrap_services(core_config).context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    let lifecycle = services.lifecycle.clone();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        log::info!("Shutdown signal received, cleaning up...");
        lifecycle.request_shutdown("signal");
    });

    let result = services.orchestrator.run().await;
    signal_task.abort();

    result.context("artmatrix stopped with an error")
}

/// Maps a failure to the process exit status.
fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ArtMatrixError>())
        .map_or(1, ArtMatrixError::exit_code)
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
