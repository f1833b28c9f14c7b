//! Predict request parsing and response shapes.

use llama_engine::{ContextParams, TokenId};
use llama_runtime::{Generation, PredictParams, StreamChunk};
use llama_sampling::SamplerParams;
use serde::{Deserialize, Serialize};

/// Prediction request.
///
/// Numeric fields are signed so that negative values from loosely typed
/// clients clamp to zero instead of failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictRequest {
    /// Path of a model previously loaded through `/v1/models/load`.
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub max_tokens: i64,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub top_p: f32,
    #[serde(default)]
    pub top_k: i64,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub options: Option<PredictOptions>,
}

/// Optional sampling and cache knobs. Missing fields take the server defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictOptions {
    pub min_p: f32,
    pub min_tokens_to_keep: i64,
    pub repetition_penalty: f32,
    pub random_seed: i64,
    // Accepted for client compatibility; not used by the engine.
    pub length_penalty: f32,
    pub diversity_penalty: f32,
    pub no_repeat_ngram_size: i64,
    pub max_kv_size: i64,
    pub prefill_step_size: i64,
    pub kv_bits: i64,
    pub kv_group_size: i64,
    pub quantized_kv_start: i64,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            min_p: 0.05,
            min_tokens_to_keep: 1,
            repetition_penalty: 1.0,
            random_seed: -1,
            length_penalty: 1.0,
            diversity_penalty: 0.0,
            no_repeat_ngram_size: 0,
            max_kv_size: 0,
            prefill_step_size: 0,
            kv_bits: 0,
            kv_group_size: 0,
            quantized_kv_start: 0,
        }
    }
}

impl PredictOptions {
    /// Clamp negative sizes and probabilities to zero.
    pub fn clamped(mut self) -> Self {
        self.min_p = self.min_p.max(0.0);
        self.min_tokens_to_keep = self.min_tokens_to_keep.max(0);
        self.max_kv_size = self.max_kv_size.max(0);
        self.prefill_step_size = self.prefill_step_size.max(0);
        self.kv_bits = self.kv_bits.max(0);
        self.kv_group_size = self.kv_group_size.max(0);
        self.quantized_kv_start = self.quantized_kv_start.max(0);
        self
    }

    /// True when any knob the engine ignores differs from its default.
    pub fn has_unused_knobs(&self) -> bool {
        self.length_penalty != 1.0
            || self.diversity_penalty != 0.0
            || self.no_repeat_ngram_size != 0
            || self.max_kv_size != 0
            || self.prefill_step_size != 0
            || self.kv_bits != 0
            || self.kv_group_size != 0
            || self.quantized_kv_start != 0
    }
}

impl PredictRequest {
    /// Budget after clamping negatives.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens.max(0) as usize
    }

    /// Map the request onto generation parameters.
    pub fn to_params(&self, context: ContextParams) -> PredictParams {
        let options = self.options.clone().unwrap_or_default().clamped();
        let sampler = SamplerParams::default()
            .with_temperature(self.temperature.max(0.0))
            .with_top_p(self.top_p.max(0.0))
            .with_top_k(self.top_k.max(0) as usize)
            .with_min_p(options.min_p, options.min_tokens_to_keep.max(1) as usize)
            .with_repetition_penalty(options.repetition_penalty)
            .with_seed(options.random_seed);
        PredictParams::new(self.max_tokens())
            .with_sampler(sampler)
            .with_context(context)
    }
}

/// One streamed piece of generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictChunk {
    pub message: String,
    pub token: TokenId,
    /// Prompt tokens plus tokens generated before this one.
    pub tokens: usize,
}

impl From<&StreamChunk> for PredictChunk {
    fn from(chunk: &StreamChunk) -> Self {
        Self {
            message: chunk.text.clone(),
            token: chunk.token,
            tokens: chunk.tokens_so_far,
        }
    }
}

/// Completion statistics, sent as the final `done` event when streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictSummary {
    pub id: String,
    pub created: i64,
    pub model: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub stop_reason: String,
}

impl PredictSummary {
    pub fn new(model: &str, generation: &Generation) -> Self {
        Self {
            id: format!("pred-{}", uuid::Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            prompt_tokens: generation.prompt_tokens,
            generated_tokens: generation.generated_tokens,
            stop_reason: generation.stop_reason.as_str().to_string(),
        }
    }

    /// Summary of a request that generated nothing.
    pub fn empty(model: &str) -> Self {
        Self {
            id: format!("pred-{}", uuid::Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            prompt_tokens: 0,
            generated_tokens: 0,
            stop_reason: "length".to_string(),
        }
    }
}

/// Non-streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub message: String,
    #[serde(flatten)]
    pub summary: PredictSummary,
}
