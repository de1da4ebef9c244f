//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Assemble the sidecar from its config: breaker, event channel, stats
//!   aggregator, readiness prober, reverse proxy, request handler
//! - Wire up middleware (tracing, timeout, request ID)
//! - Bind the admin API when enabled
//! - Serve until shutdown, then discharge queued requests and drain

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::any, Router};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::{self, AdminState};
use crate::config::SidecarConfig;
use crate::health::{HealthProber, ReadinessProber, ReadinessReader};
use crate::http::handler::{handle_request, RequestHandler};
use crate::http::proxy::ReverseProxy;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::observability::reporter::{PrometheusStatsReporter, StatsReporter};
use crate::queue::{self, Breaker, Stat, StatsAggregator};

/// The queue sidecar's HTTP front.
pub struct SidecarServer {
    router: Router,
    config: SidecarConfig,
    breaker: Option<Arc<Breaker>>,
    prober: ReadinessProber,
    aggregator: StatsAggregator,
    admin_state: AdminState,
    cancel: CancellationToken,
}

impl SidecarServer {
    /// Create a new server with the given configuration.
    pub fn new(config: SidecarConfig) -> Self {
        let breaker = config.breaker.params().map(|params| Arc::new(Breaker::new(params)));
        if breaker.is_none() {
            tracing::warn!("Admission control disabled, requests go straight to the user container");
        }

        let reporter: Arc<dyn StatsReporter> = Arc::new(PrometheusStatsReporter::new());
        let (events, event_rx) = queue::channel(config.events.buffer_size);
        let (aggregator, stats) = StatsAggregator::new(
            event_rx,
            Duration::from_millis(config.events.report_period_ms),
            Some(reporter.clone()),
            config.revision.clone(),
        );

        let prober = ReadinessProber::new(
            HealthProber::new(config.user_container.port, &config.user_container.health_path),
            Duration::from_secs(config.readiness.timeout_secs),
        );
        let readiness = prober.reader();

        let cancel = CancellationToken::new();
        let handler = RequestHandler::new(
            Some(events),
            breaker.clone(),
            Some(Arc::new(ReverseProxy::local(config.user_container.port))),
            Some(readiness.clone().into_probe()),
        )
        .with_reporter(reporter, config.revision.clone())
        .with_shutdown(cancel.clone());

        let admin_state = AdminState {
            api_key: Arc::from(config.admin.api_key.as_str()),
            breaker: breaker.clone(),
            readiness,
            stats,
        };

        let router = Self::build_router(&config, Arc::new(handler));
        Self {
            router,
            config,
            breaker,
            prober,
            aggregator,
            admin_state,
            cancel,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &SidecarConfig, handler: Arc<RequestHandler>) -> Router {
        Router::new()
            .route("/{*path}", any(handle_request))
            .route("/", any(handle_request))
            .with_state(handler)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    pub fn breaker(&self) -> Option<Arc<Breaker>> {
        self.breaker.clone()
    }

    pub fn readiness(&self) -> ReadinessReader {
        self.admin_state.readiness.clone()
    }

    /// Latest aggregated concurrency statistics.
    pub fn stats(&self) -> watch::Receiver<Stat> {
        self.admin_state.stats.clone()
    }

    /// Admin API router over this server's state.
    pub fn admin_router(&self) -> Router {
        admin::setup_admin_router(self.admin_state.clone())
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            user_port = self.config.user_container.port,
            "Sidecar server starting"
        );

        let Self {
            router,
            config,
            prober,
            aggregator,
            admin_state,
            cancel,
            ..
        } = self;

        tokio::spawn(aggregator.run(shutdown.resubscribe()));

        let mut prober_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            tokio::select! {
                // Failure is logged by the prober; probes keep answering 503.
                _ = prober.run() => {}
                _ = prober_shutdown.recv() => {}
            }
        });

        if config.admin.enabled {
            let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
            let admin_shutdown = shutdown.resubscribe();
            tokio::spawn(async move {
                if let Err(e) = admin::serve(admin_listener, admin_state, admin_shutdown).await {
                    tracing::error!(error = %e, "Admin API failed");
                }
            });
        }

        let app = router.into_make_service_with_connect_info::<SocketAddr>();

        // Serve with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining");
                cancel.cancel();
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &SidecarConfig {
        &self.config
    }
}
