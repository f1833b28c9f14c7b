//! Telemetry hooks for generation performance measurement.
//!
//! Provides:
//! - [`InferenceMetrics`]: TTFT, tokens/sec, context usage and token counts
//! - [`TelemetryHook`] trait: callback interface for real-time metric reporting
//! - [`InferenceTimer`]: records timestamps and computes metrics
//! - [`NoopTelemetry`] / [`LogTelemetry`]: built-in hook implementations

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Aggregate metrics from a generation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceMetrics {
    /// Time to first token in milliseconds (prompt decode + first sample).
    pub ttft_ms: f64,
    /// Tokens generated per second, excluding prompt processing.
    pub tokens_per_sec: f64,
    /// Number of prompt tokens.
    pub prompt_tokens: usize,
    /// Number of tokens generated.
    pub generated_tokens: usize,
    /// Total wall-clock time in milliseconds.
    pub total_time_ms: f64,
    /// KV cells in use when generation stopped.
    pub context_used: usize,
    /// Context window size.
    pub context_size: usize,
}

impl InferenceMetrics {
    /// Context usage as a percentage of the window.
    pub fn context_usage_pct(&self) -> f64 {
        if self.context_size == 0 {
            0.0
        } else {
            self.context_used as f64 / self.context_size as f64 * 100.0
        }
    }
}

/// Callback trait for real-time generation telemetry.
///
/// All methods have default no-op implementations so hooks can be selective.
pub trait TelemetryHook: Send + Sync {
    /// Called once the first token is ready.
    fn on_prefill_complete(&self, _ttft_ms: f64) {}

    /// Called after each generated token.
    fn on_token_generated(&self, _token_idx: usize, _elapsed_ms: f64) {}

    /// Called when generation finishes with the full metrics summary.
    fn on_generation_complete(&self, _metrics: &InferenceMetrics) {}
}

/// No-op telemetry hook.
#[derive(Debug, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {}

/// Collects the last completed generation's metrics into a retrievable report.
#[derive(Debug, Clone, Default)]
pub struct LogTelemetry {
    last_report: Arc<Mutex<Option<InferenceMetrics>>>,
    completed: Arc<Mutex<usize>>,
}

impl LogTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve the last completed generation's metrics.
    pub fn last_metrics(&self) -> Option<InferenceMetrics> {
        self.last_report.lock().clone()
    }

    /// How many generations have completed.
    pub fn completed(&self) -> usize {
        *self.completed.lock()
    }
}

impl TelemetryHook for LogTelemetry {
    fn on_generation_complete(&self, metrics: &InferenceMetrics) {
        *self.last_report.lock() = Some(metrics.clone());
        *self.completed.lock() += 1;
    }
}

/// Records timestamps during generation to compute [`InferenceMetrics`].
///
/// Usage:
/// 1. Call [`InferenceTimer::new`] once the prompt is tokenized
/// 2. Call [`mark_prefill_complete`](Self::mark_prefill_complete) after the first decode
/// 3. Call [`mark_token`](Self::mark_token) after each generated token
/// 4. Call [`finish`](Self::finish) to compute final metrics
pub struct InferenceTimer {
    prompt_tokens: usize,
    start: Instant,
    prefill_end: Option<Instant>,
    token_count: usize,
    hook: Arc<dyn TelemetryHook>,
}

impl InferenceTimer {
    pub fn new(prompt_tokens: usize, hook: Arc<dyn TelemetryHook>) -> Self {
        Self {
            prompt_tokens,
            start: Instant::now(),
            prefill_end: None,
            token_count: 0,
            hook,
        }
    }

    /// Mark prompt processing complete. Only the first call counts.
    pub fn mark_prefill_complete(&mut self) {
        if self.prefill_end.is_some() {
            return;
        }
        let now = Instant::now();
        self.prefill_end = Some(now);
        let ttft_ms = now.duration_since(self.start).as_secs_f64() * 1000.0;
        self.hook.on_prefill_complete(ttft_ms);
    }

    pub fn mark_token(&mut self) {
        self.token_count += 1;
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.hook.on_token_generated(self.token_count, elapsed_ms);
    }

    pub fn tokens(&self) -> usize {
        self.token_count
    }

    /// Finalize and return metrics. Fires `on_generation_complete`.
    pub fn finish(self, context_used: usize, context_size: usize) -> InferenceMetrics {
        let total_time_ms = self.start.elapsed().as_secs_f64() * 1000.0;

        let ttft_ms = self
            .prefill_end
            .map(|t| t.duration_since(self.start).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        let decode_time_ms = total_time_ms - ttft_ms;
        let tokens_per_sec = if decode_time_ms > 0.0 && self.token_count > 0 {
            self.token_count as f64 / (decode_time_ms / 1000.0)
        } else {
            0.0
        };

        let metrics = InferenceMetrics {
            ttft_ms,
            tokens_per_sec,
            prompt_tokens: self.prompt_tokens,
            generated_tokens: self.token_count,
            total_time_ms,
            context_used,
            context_size,
        };

        self.hook.on_generation_complete(&metrics);
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_telemetry_captures_metrics() {
        let hook = LogTelemetry::new();
        assert!(hook.last_metrics().is_none());

        let metrics = InferenceMetrics {
            ttft_ms: 12.5,
            tokens_per_sec: 80.0,
            prompt_tokens: 4,
            generated_tokens: 8,
            total_time_ms: 112.5,
            context_used: 12,
            context_size: 4096,
        };
        hook.on_generation_complete(&metrics);

        let captured = hook.last_metrics().unwrap();
        assert_eq!(captured, metrics);
        assert_eq!(hook.completed(), 1);
    }

    #[test]
    fn inference_timer_fires_hooks() {
        let log = LogTelemetry::new();

        let mut timer = InferenceTimer::new(2, Arc::new(log.clone()));
        timer.mark_prefill_complete();
        timer.mark_prefill_complete();
        timer.mark_token();
        timer.mark_token();
        let metrics = timer.finish(4, 16);

        assert_eq!(metrics.generated_tokens, 2);
        assert_eq!(metrics.prompt_tokens, 2);
        assert!(metrics.ttft_ms >= 0.0);
        assert!(metrics.total_time_ms >= metrics.ttft_ms);
        assert_eq!(metrics.context_usage_pct(), 25.0);

        let captured = log.last_metrics().unwrap();
        assert_eq!(captured.generated_tokens, 2);
    }

    #[test]
    fn inference_timer_no_prefill_mark() {
        let timer = InferenceTimer::new(1, Arc::new(NoopTelemetry));
        let metrics = timer.finish(0, 0);
        assert_eq!(metrics.ttft_ms, 0.0);
        assert_eq!(metrics.generated_tokens, 0);
        assert_eq!(metrics.tokens_per_sec, 0.0);
        assert_eq!(metrics.context_usage_pct(), 0.0);
    }
}
