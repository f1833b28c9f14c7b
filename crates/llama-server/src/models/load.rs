use llama_engine::ModelInfo;
use serde::{Deserialize, Serialize};

/// Load (or reuse) the model stored at `path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadModelRequest {
    pub path: String,
}

/// One `progress` event: a value in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadProgress {
    pub progress: f32,
}

/// Final `loaded` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedModel {
    pub path: String,
    pub description: String,
    pub size_bytes: u64,
    pub n_params: u64,
    pub n_vocab: usize,
}

impl LoadedModel {
    pub fn new(path: impl Into<String>, info: ModelInfo) -> Self {
        Self {
            path: path.into(),
            description: info.description,
            size_bytes: info.size_bytes,
            n_params: info.n_params,
            n_vocab: info.n_vocab,
        }
    }
}
