//! branchsync web server and REST API.
//!
//! Provides an Axum-based HTTP server with:
//! - Merge, diff and conflict endpoints under `/api/git`
//! - A WebSocket progress stream at `/api/git/progress`
//! - A health endpoint

pub mod api;
pub mod ws;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use branchsync_core::config::AppConfig;
use branchsync_core::progress::ProgressSink;
use branchsync_core::sync_engine::SyncEngine;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    /// Sink every request reports into; the progress WebSocket subscribes to it.
    pub progress: Arc<ProgressSink>,
    pub config: AppConfig,
    pub started_at: DateTime<Utc>,
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: AppConfig, engine: Arc<SyncEngine>, progress: Arc<ProgressSink>) -> Self {
        let state = Arc::new(AppState {
            engine,
            progress,
            config,
            started_at: Utc::now(),
        });
        Self { state }
    }

    /// Build the application router.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(allowed_origins(&self.state.config.web.allowed_origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]);

        Router::new()
            .merge(api::git::routes())
            .merge(api::status::routes())
            .merge(ws::routes())
            .layer(DefaultBodyLimit::max(64 * 1024))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(Arc::clone(&self.state))
    }

    /// Serve until `shutdown` resolves.
    pub async fn start<F>(self, listen_addr: &str, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = listen_addr.parse()?;
        let app = self.router();

        info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("web server stopped");
        Ok(())
    }
}

fn allowed_origins(origins: &[String]) -> AllowOrigin {
    let values: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    AllowOrigin::list(values)
}
