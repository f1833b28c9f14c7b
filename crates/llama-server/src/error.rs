//! HTTP error handling and response mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use llama_engine::LlamaError;
use llama_runtime::RuntimeError;
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("model is still loading: {0}")]
    ModelLoading(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Runtime(err) if err.is_closed() => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Runtime(RuntimeError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServerError::Runtime(RuntimeError::PromptTooLong { .. })
            | ServerError::Runtime(RuntimeError::Engine(LlamaError::Tokenization(_)))
            | ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::ModelLoading(_) => StatusCode::CONFLICT,
            ServerError::Runtime(_) | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON error object, also used for SSE `error` events.
    pub fn body(&self) -> Value {
        let error_type = match self.status() {
            StatusCode::BAD_REQUEST => "invalid_request_error",
            StatusCode::NOT_FOUND => "not_found_error",
            StatusCode::CONFLICT => "model_loading_error",
            StatusCode::SERVICE_UNAVAILABLE => "unavailable_error",
            _ => "server_error",
        };
        json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": self.status().as_u16(),
            }
        })
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (ServerError::from(RuntimeError::RegistryClosed), 503),
            (ServerError::from(RuntimeError::TrackerClosed), 503),
            (ServerError::from(RuntimeError::NotFound("m".into())), 404),
            (ServerError::ModelLoading("m".into()), 409),
            (ServerError::InvalidRequest("bad".into()), 400),
            (
                ServerError::from(RuntimeError::PromptTooLong {
                    prompt_tokens: 9,
                    n_ctx: 4,
                }),
                400,
            ),
            (
                ServerError::from(RuntimeError::Engine(LlamaError::ModelLoad("x".into()))),
                500,
            ),
            (ServerError::from(RuntimeError::Decode("x".into())), 500),
        ];
        for (err, code) in cases {
            assert_eq!(err.status().as_u16(), code, "{err}");
        }
    }

    #[test]
    fn body_carries_message() {
        let body = ServerError::from(RuntimeError::NotFound("a.gguf".into())).body();
        assert_eq!(body["error"]["type"], "not_found_error");
        assert_eq!(body["error"]["code"], 404);
        assert!(body["error"]["message"].as_str().unwrap().contains("a.gguf"));
    }
}
