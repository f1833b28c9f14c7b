use llama_engine::LlamaError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("model registry is closed")]
    RegistryClosed,

    #[error("model not found: {0}")]
    NotFound(String),

    #[error("prediction tracker is closed")]
    TrackerClosed,

    #[error("engine error: {0}")]
    Engine(#[from] LlamaError),

    #[error("prompt too long for context size ({prompt_tokens} tokens, context {n_ctx})")]
    PromptTooLong { prompt_tokens: usize, n_ctx: usize },

    #[error("failed to decode batch: {0}")]
    Decode(String),

    #[error("streaming callback failed: {0}")]
    Stream(String),

    #[error("sampling failed: {0}")]
    Sampling(#[from] llama_sampling::SamplingError),
}

impl RuntimeError {
    /// Terminal shutdown errors; callers should not retry.
    pub fn is_closed(&self) -> bool {
        matches!(self, RuntimeError::RegistryClosed | RuntimeError::TrackerClosed)
    }
}
