use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, extract::DefaultBodyLimit, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::api::{self, AppState};
use super::client::HttpGenerationClient;
use super::credentials::HttpSessionVerifier;
use super::ws;
use crate::config::StudioConfig;

/// Configuration for the studio server. CLI flags are already folded in.
pub struct ServerConfig {
    pub studio: StudioConfig,
    /// Open the studio in the default browser once listening.
    pub open_browser: bool,
}

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let ws_tx = state.ws_tx.clone();
    let max_upload = state.config.server.max_upload_bytes;
    let dev_mode = state.config.server.dev_mode;

    let app = api::api_router()
        .route(
            "/ws",
            get(move |ws_upgrade| ws::ws_handler_with_sender(ws_upgrade, ws_tx)),
        )
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Start the studio server and serve until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let studio = config.studio;
    for warning in studio.validate() {
        warn!("{}", warning);
    }
    studio.ensure_directories()?;

    let verifier = HttpSessionVerifier::new(&studio.verification, &studio.generation.user_agent)
        .context("Failed to build verification client")?;
    let client = HttpGenerationClient::new(&studio.generation)
        .context("Failed to build generation client")?;

    let addr = format!("{}:{}", studio.server.host, studio.server.port);
    let state = Arc::new(AppState::new(studio, Arc::new(verifier), Arc::new(client)));
    let app = build_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    let url = format!("http://{}", local_addr);
    info!(%url, "veo studio listening");
    println!("Veo Studio running at {}", url);

    if config.open_browser {
        if let Err(e) = open::that(&url) {
            warn!(error = %e, "failed to open browser");
        }
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.orchestrator.shutdown().await;
    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
