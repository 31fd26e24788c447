//! StatWatch - resource counter sampler
//!
//! Parses arguments, loads the layered configuration, installs logging and
//! runs the application until the window limit or Ctrl-C.

use anyhow::Result;
use clap::Parser;
use statwatch::{app::App, cli::Cli, config::Config};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            init_logging("error");
            error!("Failed to load configuration: {:#}", err);
            std::process::exit(2);
        }
    };

    init_logging(&config.core.log_level);

    info!("StatWatch starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Target: {:?}", config.target);
    info!(
        "Tick: {}s, window: {} samples, windows: {}",
        config.sampling.tick_interval_seconds,
        config.sampling.window_length,
        config
            .sampling
            .windows
            .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
    );
    info!(
        "Devices: interface={}, disk={}",
        config.devices.network_interface, config.devices.disk_device
    );
    info!(
        "Reference correlation: {}",
        if config.reference.enabled { "Enabled" } else { "Disabled" }
    );
    info!("Output: {:?}", config.output);
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = match App::builder(config).build(shutdown_rx).await {
        Ok(app) => app,
        Err(err) => {
            error!("Startup failed: {:#}", err);
            std::process::exit(1);
        }
    };

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received. Shutting down gracefully...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Dropping the sender would read as a shutdown request.
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    match app.run().await {
        Ok(summary) => {
            info!(
                ticks = summary.ticks,
                windows = summary.windows,
                compared = summary.compared,
                local_only = summary.local_only,
                "Exiting."
            );
            Ok(())
        }
        Err(err) => {
            error!("Sampling stopped: {:#}", err);
            std::process::exit(1);
        }
    }
}

/// Logs go to stderr so that reports on stdout stay machine readable.
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
