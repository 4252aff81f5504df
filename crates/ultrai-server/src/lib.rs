//! Thin HTTP layer over the orchestration pipeline
//!
//! Owns route wiring and wire-format shaping only; all pipeline behavior
//! lives below. Initialization order: credentials, adapters, resilient
//! wrappers, health registry, stage executor, orchestrator.

mod error;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use ultrai_config::Config;
use ultrai_llm::AdapterRegistry;
use ultrai_pipeline::{Orchestrator, ResultCache};

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
}

impl Server {
    /// Build the server from configuration
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let listen_address = config
            .server
            .listen_address
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8085)));

        let registry = Arc::new(AdapterRegistry::from_config(config));
        let cache = config.cache.enabled.then(|| ResultCache::new(&config.cache));
        let orchestrator = Arc::new(Orchestrator::new(registry, config.pipeline.clone(), cache));

        let router = routes::api_router(orchestrator).layer(TraceLayer::new_for_http());

        Self { router, listen_address }
    }

    /// The assembled router, for embedding in tests
    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve until the cancellation token fires
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or the server fails.
    pub async fn serve(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        tracing::info!(address = %self.listen_address, "listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
            })
            .await?;

        Ok(())
    }
}
