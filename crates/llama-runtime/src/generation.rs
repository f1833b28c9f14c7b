//! Token-by-token generation over an [`InferenceModel`].
//!
//! The loop decodes the pending batch, samples one token, and either stops
//! (budget, end of sequence, full context, cancellation) or streams the piece
//! and feeds the token back as the next batch.

use std::fmt;
use std::sync::Arc;

use llama_engine::{ContextParams, DecodeError, InferenceModel, TokenId};
use llama_sampling::{SamplerChain, SamplerParams};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Span};

use crate::error::{Result, RuntimeError};
use crate::telemetry::{InferenceMetrics, InferenceTimer, NoopTelemetry, TelemetryHook};

/// Cells left free when a request's budget has to be shrunk to fit the context.
pub const CONTEXT_MARGIN: usize = 10;

/// Per-request generation parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictParams {
    /// Maximum tokens to generate; 0 means no explicit budget.
    pub max_tokens: usize,
    pub sampler: SamplerParams,
    pub context: ContextParams,
}

impl PredictParams {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            ..Self::default()
        }
    }

    pub fn with_sampler(mut self, sampler: SamplerParams) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_context(mut self, context: ContextParams) -> Self {
        self.context = context;
        self
    }
}

/// Why generation stopped. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Token budget reached.
    Length,
    /// The model produced an end-of-generation token.
    EndOfSequence,
    /// The KV cache ran out of room.
    ContextFull,
    /// The caller cancelled.
    Cancelled,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Length => "length",
            StopReason::EndOfSequence => "stop",
            StopReason::ContextFull => "context_full",
            StopReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One streamed piece of output.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    pub token: TokenId,
    /// Prompt tokens plus tokens generated before this one.
    pub tokens_so_far: usize,
    pub text: String,
}

/// Receives every generated piece. An `Err` aborts generation.
pub type StreamSink<'a> = &'a mut dyn FnMut(&StreamChunk) -> std::result::Result<(), String>;

/// Result of a finished generation.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub stop_reason: StopReason,
    pub metrics: InferenceMetrics,
}

/// Shrink `max_tokens` so that prompt and output fit in `n_ctx`.
///
/// Returns `None` when there is no budget: either `max_tokens == 0`, or the
/// shrunk budget came out at exactly 0. In both cases generation runs until end
/// of sequence or a full context.
pub fn token_budget(prompt_tokens: usize, max_tokens: usize, n_ctx: usize) -> Result<Option<usize>> {
    if max_tokens == 0 {
        return Ok(None);
    }
    if prompt_tokens.saturating_add(max_tokens) <= n_ctx {
        return Ok(Some(max_tokens));
    }
    n_ctx
        .checked_sub(prompt_tokens.saturating_add(CONTEXT_MARGIN))
        .map(|budget| (budget > 0).then_some(budget))
        .ok_or(RuntimeError::PromptTooLong {
            prompt_tokens,
            n_ctx,
        })
}

/// Drives the decode/sample loop. Cheap to clone and share.
#[derive(Clone)]
pub struct Generator {
    span: Span,
    telemetry: Arc<dyn TelemetryHook>,
}

impl Default for Generator {
    fn default() -> Self {
        Self {
            span: tracing::info_span!("generator"),
            telemetry: Arc::new(NoopTelemetry),
        }
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator").finish_non_exhaustive()
    }
}

impl Generator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryHook>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Generate a completion for `prompt`.
    ///
    /// `cancel` is checked once per token. Running out of context, hitting the
    /// budget, end of sequence and cancellation all return `Ok` with whatever
    /// was produced.
    pub fn run(
        &self,
        model: &dyn InferenceModel,
        prompt: &str,
        params: &PredictParams,
        cancel: &CancellationToken,
        mut sink: Option<StreamSink<'_>>,
    ) -> Result<Generation> {
        let mut ctx = model.new_context(&params.context)?;
        let n_ctx = ctx.n_ctx();
        let mut chain = SamplerChain::from_params(&params.sampler, n_ctx);
        debug!(
            parent: &self.span,
            n_ctx,
            n_batch = params.context.n_batch,
            stages = chain.stages().len(),
            "context ready"
        );

        let prompt_tokens = model.tokenize(prompt, ctx.n_used() == 0)?;
        let n_prompt = prompt_tokens.len();
        let budget = token_budget(n_prompt, params.max_tokens, n_ctx)?;
        if params.max_tokens > 0 && budget != Some(params.max_tokens) {
            warn!(
                parent: &self.span,
                prompt_tokens = n_prompt,
                requested = params.max_tokens,
                n_ctx,
                "prompt + generation exceeds context size, shrinking budget"
            );
        }
        debug!(parent: &self.span, prompt_tokens = n_prompt, ?budget, "starting generation loop");

        let mut timer = InferenceTimer::new(n_prompt, Arc::clone(&self.telemetry));
        let mut batch = prompt_tokens;
        let mut history: Vec<usize> = Vec::new();
        let mut text = String::new();

        let stop_reason = loop {
            if budget.is_some_and(|max| timer.tokens() >= max) {
                break StopReason::Length;
            }
            if cancel.is_cancelled() {
                debug!(parent: &self.span, generated = timer.tokens(), "generation cancelled");
                break StopReason::Cancelled;
            }

            match ctx.decode(&batch) {
                Ok(()) => {}
                Err(DecodeError::NoCapacity) => {
                    warn!(parent: &self.span, used = ctx.n_used(), n_ctx, "KV cache full, stopping generation");
                    break StopReason::ContextFull;
                }
                Err(DecodeError::Failed(msg)) => return Err(RuntimeError::Decode(msg)),
            }

            let next = chain.sample(ctx.logits(), &history)? as TokenId;
            timer.mark_prefill_complete();
            if model.is_eog(next) {
                break StopReason::EndOfSequence;
            }

            let piece = model.token_to_piece(next)?;
            if let Some(sink) = sink.as_mut() {
                let chunk = StreamChunk {
                    token: next,
                    tokens_so_far: n_prompt + timer.tokens(),
                    text: piece.clone(),
                };
                sink(&chunk).map_err(RuntimeError::Stream)?;
            }
            text.push_str(&piece);
            history.push(next as usize);
            timer.mark_token();
            batch = vec![next];
        };

        let metrics = timer.finish(ctx.n_used(), n_ctx);
        info!(
            parent: &self.span,
            prompt_tokens = metrics.prompt_tokens,
            generated_tokens = metrics.generated_tokens,
            ttft_ms = metrics.ttft_ms,
            tokens_per_sec = metrics.tokens_per_sec,
            context_usage_pct = metrics.context_usage_pct(),
            stop_reason = %stop_reason,
            "generation completed"
        );

        Ok(Generation {
            text,
            prompt_tokens: n_prompt,
            generated_tokens: metrics.generated_tokens,
            stop_reason,
            metrics,
        })
    }
}

/// One-shot generation with default logging, no telemetry and no cancellation.
pub fn run_generation(
    model: &dyn InferenceModel,
    prompt: &str,
    params: &PredictParams,
    sink: Option<StreamSink<'_>>,
) -> Result<String> {
    Generator::new()
        .run(model, prompt, params, &CancellationToken::new(), sink)
        .map(|generation| generation.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_zero_is_unbounded() {
        assert_eq!(token_budget(5, 0, 16).unwrap(), None);
    }

    #[test]
    fn budget_fits_unchanged() {
        assert_eq!(token_budget(5, 11, 16).unwrap(), Some(11));
    }

    #[test]
    fn budget_shrinks_with_margin() {
        assert_eq!(token_budget(100, 4000, 4096).unwrap(), Some(3986));
        assert_eq!(token_budget(5, 100, 16).unwrap(), Some(1));
    }

    #[test]
    fn budget_shrunk_to_zero_is_unbounded() {
        assert_eq!(token_budget(6, 100, 16).unwrap(), None);
    }

    #[test]
    fn huge_budget_does_not_overflow() {
        assert_eq!(token_budget(5, usize::MAX, 4096).unwrap(), Some(4081));
        assert_eq!(token_budget(0, usize::MAX, usize::MAX).unwrap(), Some(usize::MAX));
        assert!(matches!(
            token_budget(usize::MAX, usize::MAX, 4096),
            Err(RuntimeError::PromptTooLong { .. })
        ));
    }

    #[test]
    fn budget_rejects_long_prompt() {
        assert_eq!(
            token_budget(10, 100, 16),
            Err(RuntimeError::PromptTooLong {
                prompt_tokens: 10,
                n_ctx: 16
            })
        );
    }

    #[test]
    fn stop_reason_strings() {
        assert_eq!(StopReason::EndOfSequence.to_string(), "stop");
        assert_eq!(StopReason::Length.as_str(), "length");
    }
}
