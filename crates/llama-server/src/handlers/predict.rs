//! Prediction handler.

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ServerError;
use crate::models::{PredictRequest, PredictResponse, PredictSummary};
use crate::state::AppState;
use crate::streaming::stream_prediction;

/// Handle `POST /v1/predict`.
///
/// The model must already be loaded. A request with `max_tokens == 0` returns
/// an empty completion without touching the model.
pub async fn handle_predict(
    State(state): State<AppState>,
    Json(request): Json<PredictRequest>,
) -> Result<Response, ServerError> {
    if request.model.is_empty() {
        return Err(ServerError::InvalidRequest("model is required".to_string()));
    }

    info!(
        model = %request.model,
        max_tokens = request.max_tokens,
        temperature = request.temperature,
        top_p = request.top_p,
        top_k = request.top_k,
        stream = request.stream,
        "predict request"
    );
    if let Some(options) = request.options.as_ref().filter(|o| o.has_unused_knobs()) {
        debug!(?options, "ignoring options the engine does not support");
    }

    if request.max_tokens == 0 {
        info!(model = %request.model, "max_tokens is 0, skipping generation");
        return Ok(Json(PredictResponse {
            message: String::new(),
            summary: PredictSummary::empty(&request.model),
        })
        .into_response());
    }

    let model = state
        .registry
        .lookup(&request.model)?
        .ok_or_else(|| ServerError::ModelLoading(request.model.clone()))?;
    let permit = state.predictions.admit()?;

    if request.stream {
        return Ok(stream_prediction(state, model, request, permit).into_response());
    }

    // Dropping this future (client gone) cancels generation.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let params = request.to_params(state.config.context);
    let generator = state.generator.clone();
    let prompt = request.prompt.clone();

    let generation = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        generator.run(&**model, &prompt, &params, &cancel, None)
    })
    .await
    .map_err(|e| ServerError::Internal(format!("prediction task failed: {e}")))??;

    let summary = PredictSummary::new(&request.model, &generation);
    Ok(Json(PredictResponse {
        message: generation.text,
        summary,
    })
    .into_response())
}
