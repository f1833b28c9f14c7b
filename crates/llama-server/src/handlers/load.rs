//! Model load handler.

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use llama_runtime::RuntimeError;

use crate::error::ServerError;
use crate::models::LoadModelRequest;
use crate::state::AppState;
use crate::streaming::stream_model_load;

/// Handle `POST /v1/models/load`.
///
/// Responds with an SSE stream of load progress. Concurrent requests for the
/// same path share one load.
pub async fn handle_load_model(
    State(state): State<AppState>,
    Json(request): Json<LoadModelRequest>,
) -> Result<Response, ServerError> {
    if request.path.is_empty() {
        return Err(ServerError::InvalidRequest("path is required".to_string()));
    }
    if state.registry.is_closed() {
        return Err(RuntimeError::RegistryClosed.into());
    }

    tracing::info!(path = %request.path, "loading model");
    Ok(stream_model_load(state, request.path).into_response())
}
