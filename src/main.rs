//! Queue sidecar.
//!
//! # Architecture Overview
//!
//! ```text
//!   Request
//!     → handler  (probe answer, reserved-header check, host restore)
//!     → breaker  (waiting room → execution slot)
//!     → proxy    → user container on 127.0.0.1:<user_port>
//!
//!   handler ──ReqEvents──▶ stats aggregator ──▶ Prometheus reporter
//!                                           └─▶ admin API (/admin/stats)
//!
//!   readiness prober ──polls /health──▶ readiness cell ──▶ probe answers
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use queue_sidecar::config::{load_config, validate_config, ConfigError, SidecarConfig};
use queue_sidecar::lifecycle::{create_var_log_link, spawn_signal_handler, Shutdown};
use queue_sidecar::observability::{logging, metrics};
use queue_sidecar::SidecarServer;

#[derive(Parser)]
#[command(name = "queue-sidecar")]
#[command(about = "Admission-controlling sidecar for a single user container", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "QUEUE_SIDECAR_CONFIG")]
    config: Option<PathBuf>,

    /// Port of the user container on 127.0.0.1.
    #[arg(long, env = "USER_PORT")]
    user_port: Option<u16>,

    /// Maximum concurrent requests for the user container (0 = unbounded).
    #[arg(long, env = "CONTAINER_CONCURRENCY")]
    container_concurrency: Option<usize>,
}

fn resolve_config(args: &Args) -> Result<SidecarConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => SidecarConfig::default(),
    };

    if let Some(port) = args.user_port {
        config.user_container.port = port;
    }
    if let Some(concurrency) = args.container_concurrency {
        config.breaker.max_concurrency = concurrency;
        config.breaker.initial_capacity = None;
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    logging::init_logging(&config.observability.log_level);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "queue-sidecar starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        user_port = config.user_container.port,
        max_concurrency = config.breaker.max_concurrency,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    if config.var_log.enabled {
        if let Err(e) = create_var_log_link(
            &config.var_log,
            &config.revision.namespace,
            &config.revision.pod,
        ) {
            tracing::error!(error = %e, "Failed to create log volume link");
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Arc::new(Shutdown::new());
    let server_shutdown = shutdown.subscribe();
    spawn_signal_handler(shutdown.clone());

    let server = SidecarServer::new(config);
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
