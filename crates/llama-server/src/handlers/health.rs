//! Liveness and health handlers.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// Liveness probe. Always answers, even while shutting down.
pub async fn handle_ping() -> Json<Value> {
    Json(json!({}))
}

/// Health check with prediction and model cache stats.
pub async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    let closed = state.predictions.is_closed() || state.registry.is_closed();
    Json(json!({
        "status": if closed { "shutting_down" } else { "ok" },
        "predictions": {
            "in_flight": state.predictions.in_flight(),
            "closed": state.predictions.is_closed(),
        },
        "models": {
            "cached": state.registry.loaded(),
            "entries": state.registry.len(),
            "closed": state.registry.is_closed(),
        }
    }))
}
