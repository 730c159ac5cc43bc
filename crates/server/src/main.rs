use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use fleetdock_server::db::ServerRegistry;
use fleetdock_server::server::config::ServerConfig;
use fleetdock_server::server::core_services::CoreServices;
use fleetdock_server::version::VERSION;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(45);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "fleetdock.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Default to `info` if RUST_LOG is not set.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Keep `--version` output free of clap's formatting.
    if std::env::args().any(|arg| arg == "--version") {
        println!("FleetDock server version: {VERSION}");
        return Ok(());
    }

    let args = Args::parse();
    dotenv().ok();

    // Logging depends on `log_dir`, so configuration errors go to stderr.
    let config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load server configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&config.log_dir);
    info!("Starting FleetDock server, version: {}", VERSION);

    let services = match CoreServices::build(config.clone()) {
        Ok(services) => services,
        Err(e) => {
            error!(error = %e, "Failed to initialize core services.");
            return Err(e.into());
        }
    };

    match services.servers.list_servers(None).await {
        Ok(servers) => info!(count = servers.len(), "Managed servers registered."),
        Err(e) => warn!(error = %e, "Could not count managed servers at startup."),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = services.spawn_background_tasks(shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping background tasks...");
    if shutdown_tx.send(true).is_err() {
        warn!("Background tasks had already stopped.");
    }

    for handle in handles {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Background task ended abnormally."),
            Err(_) => warn!(grace = ?SHUTDOWN_GRACE, "Background task did not stop within the grace period."),
        }
    }

    info!("FleetDock server stopped.");
    Ok(())
}
