//! Relay server using Axum
//!
//! Serves the relay WebSocket endpoint alongside health/status endpoints and
//! the static editor assets.

use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::relay::message::SHUTDOWN_NOTICE;
use crate::relay::{Broadcaster, Registry, WireMessage};

use super::middleware::cors_layer;
use super::routes;

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<Registry>,
    pub broadcaster: Broadcaster,
    /// Relay sessions whose tasks are still running
    pub sessions: Arc<AtomicUsize>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(registry.clone());

        Self {
            config,
            registry,
            broadcaster,
            sessions: Arc::new(AtomicUsize::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// Relay server
pub struct RelayServer {
    state: AppState,
}

impl RelayServer {
    /// Create a new relay server with an empty registry
    pub fn new(config: Config) -> Self {
        Self {
            state: AppState::new(config),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        let server = &self.state.config.server;
        let cors = cors_layer(&server.cors_origins);

        let mut router = routes::create_router(self.state.clone(), &server.ws_path);

        if server.static_dir.is_dir() {
            debug!("Serving static assets from {}", server.static_dir.display());
            router = router.fallback_service(ServeDir::new(&server.static_dir));
        }

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address
    ///
    /// Failure here is fatal: without a listener the relay cannot work at all.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.state.config.server_addr();
        TcpListener::bind(&addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })
    }

    /// Bind and run the server until `shutdown` fires
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Run the server on an already-bound listener
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let router = self.build_router();
        let broadcaster = self.state.broadcaster.clone();
        let registry = self.state.registry.clone();

        info!(
            "Relay server listening on {} (WebSocket path {})",
            listener.local_addr()?,
            self.state.config.server.ws_path
        );

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;

            // Upgraded sockets are not tracked by the HTTP server, so close
            // them here or graceful shutdown would wait on them forever.
            let notice = broadcaster.announce(&WireMessage::system(SHUTDOWN_NOTICE));
            let closed = registry.close_all();
            info!(
                notified = notice.delivered,
                closed, "Closing relay connections"
            );
        })
        .await?;

        info!("Relay server shut down");
        Ok(())
    }
}
