//! Server setup, routing and ordered shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::{handlers, state::AppState};

/// Create the API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(handlers::handle_ping))
        .route("/health", get(handlers::handle_health))
        .route("/v1/models/load", post(handlers::handle_load_model))
        .route("/v1/predict", post(handlers::handle_predict))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP server until `shutdown` is cancelled.
///
/// On cancellation the runtime is drained first (predictions, then models),
/// then the listener stops.
pub async fn run_server(
    state: AppState,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("shutdown requested");
            shutdown_runtime(&state).await;
        })
        .await?;

    info!("server stopped");
    Ok(())
}

/// Stop admitting predictions, wait for in-flight ones, then tear down every
/// cached model. Bounded by `config.shutdown_timeout`.
///
/// Returns false when the timeout elapsed first; teardown keeps running on the
/// blocking pool in that case.
pub async fn shutdown_runtime(state: &AppState) -> bool {
    let predictions = Arc::clone(&state.predictions);
    let registry = Arc::clone(&state.registry);
    let timeout = state.config.shutdown_timeout;

    let teardown = tokio::task::spawn_blocking(move || {
        predictions.shutdown();
        registry.shutdown();
    });

    match tokio::time::timeout(timeout, teardown).await {
        Ok(Ok(())) => {
            info!("runtime shut down");
            true
        }
        Ok(Err(e)) => {
            error!(error = %e, "shutdown task failed");
            false
        }
        Err(_) => {
            warn!(
                timeout_secs = timeout.as_secs_f64(),
                in_flight = state.predictions.in_flight(),
                "shutdown timed out with work in flight"
            );
            false
        }
    }
}
