//! # llama-sampling
//!
//! Sampler chain for llama.rs generation.
//!
//! A chain is an ordered pipeline of filtering stages applied to the logits of
//! the last decoded position, followed by a final draw:
//!
//! 1. Repetition penalty (skipped when the penalty is exactly 1.0)
//! 2. Top-k filtering (skipped when k is 0)
//! 3. Top-p / nucleus filtering (only when 0 < p < 1)
//! 4. Min-p filtering (only when p > 0)
//! 5. Temperature scaling (only when t > 0)
//! 6. Distribution draw with a deterministic seeded RNG
//!
//! Order is fixed; [`SamplerChain::from_params`] decides which stages are present.

use std::fmt;

/// Number of recent tokens the repetition penalty looks at.
pub const PENALTY_LAST_N: usize = 64;

/// Sampling error type.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingError {
    InvalidLogits,
    InvalidTemperature,
    NoValidTokens,
}

impl fmt::Display for SamplingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingError::InvalidLogits => write!(f, "Invalid logits array"),
            SamplingError::InvalidTemperature => write!(f, "Temperature must be > 0"),
            SamplingError::NoValidTokens => write!(f, "No valid tokens after filtering"),
        }
    }
}

impl std::error::Error for SamplingError {}

pub type SamplingResult<T> = std::result::Result<T, SamplingError>;

/// Deterministic RNG for reproducible sampling.
///
/// Uses a simple xorshift64 algorithm for fast, reproducible random numbers.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        // Avoid zero state which would produce all zeros
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Seed from the thread-local OS-seeded generator, for requests that did not
    /// ask for reproducibility.
    pub fn from_entropy() -> Self {
        Self::new(rand::random::<u64>())
    }

    /// Generate next random float in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        // xorshift64
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        (self.state >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// User-facing sampling parameters, as accepted by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerParams {
    /// Temperature; 0 disables the scaling stage.
    pub temperature: f32,
    /// Top-k; 0 disables the stage.
    pub top_k: usize,
    /// Nucleus threshold; only applied when strictly between 0 and 1.
    pub top_p: f32,
    /// Min-p threshold relative to the most likely token; 0 disables the stage.
    pub min_p: f32,
    /// Lower bound on candidates kept by top-p and min-p.
    pub min_keep: usize,
    /// Repetition penalty; exactly 1.0 disables the stage.
    pub repetition_penalty: f32,
    /// Seed for the final draw; negative means "pick one at random".
    pub seed: i64,
}

impl Default for SamplerParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_k: 0,
            top_p: 0.0,
            min_p: 0.05,
            min_keep: 1,
            repetition_penalty: 1.0,
            seed: -1,
        }
    }
}

impl SamplerParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    pub fn with_top_p(mut self, p: f32) -> Self {
        self.top_p = p;
        self
    }

    pub fn with_min_p(mut self, p: f32, min_keep: usize) -> Self {
        self.min_p = p;
        self.min_keep = min_keep;
        self
    }

    pub fn with_repetition_penalty(mut self, penalty: f32) -> Self {
        self.repetition_penalty = penalty;
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    /// Greedy when temperature is off or only one candidate survives top-k.
    pub fn is_greedy(&self) -> bool {
        self.temperature == 0.0 || self.top_k == 1
    }
}

/// One stage of the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Penalties { last_n: usize, repeat: f32 },
    TopK(usize),
    TopP { p: f32, min_keep: usize },
    MinP { p: f32, min_keep: usize },
    Temperature(f32),
    Dist { seed: u64 },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Penalties { last_n, repeat } => {
                write!(f, "penalties(last_n={last_n}, repeat={repeat:.3})")
            }
            Stage::TopK(k) => write!(f, "top-k(k={k})"),
            Stage::TopP { p, min_keep } => write!(f, "top-p(p={p:.3}, min_keep={min_keep})"),
            Stage::MinP { p, min_keep } => write!(f, "min-p(p={p:.3}, min_keep={min_keep})"),
            Stage::Temperature(t) => write!(f, "temp({t:.3})"),
            Stage::Dist { seed } => write!(f, "dist(seed={seed})"),
        }
    }
}

/// A token under consideration, with its (possibly filtered) logit.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    id: usize,
    logit: f32,
}

/// Ordered sampler pipeline with its own RNG state.
#[derive(Debug, Clone)]
pub struct SamplerChain {
    stages: Vec<Stage>,
    rng: SeededRng,
}

impl SamplerChain {
    /// Build the chain for `params`; `n_ctx` caps the penalty window.
    pub fn from_params(params: &SamplerParams, n_ctx: usize) -> Self {
        let mut stages = Vec::with_capacity(6);

        if params.repetition_penalty != 1.0 {
            stages.push(Stage::Penalties {
                last_n: PENALTY_LAST_N.min(n_ctx),
                repeat: params.repetition_penalty,
            });
        }
        if params.top_k > 0 {
            stages.push(Stage::TopK(params.top_k));
        }
        if params.top_p > 0.0 && params.top_p < 1.0 {
            stages.push(Stage::TopP {
                p: params.top_p,
                min_keep: params.min_keep,
            });
        }
        if params.min_p > 0.0 {
            stages.push(Stage::MinP {
                p: params.min_p,
                min_keep: params.min_keep,
            });
        }
        if params.temperature > 0.0 {
            stages.push(Stage::Temperature(params.temperature));
        }

        let rng = if params.seed >= 0 {
            SeededRng::new(params.seed as u64)
        } else {
            SeededRng::from_entropy()
        };
        let seed = if params.seed >= 0 { params.seed as u64 } else { rng.state };
        stages.push(Stage::Dist { seed });

        Self { stages, rng }
    }

    /// The stages in application order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Sample the next token index from `logits`, penalising tokens in `history`.
    pub fn sample(&mut self, logits: &[f32], history: &[usize]) -> SamplingResult<usize> {
        if logits.is_empty() {
            return Err(SamplingError::InvalidLogits);
        }

        let mut candidates: Vec<Candidate> = logits
            .iter()
            .enumerate()
            .map(|(id, &logit)| Candidate { id, logit })
            .collect();

        for stage in &self.stages {
            match *stage {
                Stage::Penalties { last_n, repeat } => {
                    let start = history.len().saturating_sub(last_n);
                    apply_penalty(&mut candidates, &history[start..], repeat);
                }
                Stage::TopK(k) => apply_top_k(&mut candidates, k),
                Stage::TopP { p, min_keep } => apply_top_p(&mut candidates, p, min_keep),
                Stage::MinP { p, min_keep } => apply_min_p(&mut candidates, p, min_keep),
                Stage::Temperature(t) => apply_temperature(&mut candidates, t)?,
                Stage::Dist { .. } => {}
            }
        }

        if candidates.is_empty() {
            return Err(SamplingError::NoValidTokens);
        }

        let probs = softmax(&candidates);
        let picked = sample_from_distribution(&mut self.rng, &probs)?;
        Ok(candidates[picked].id)
    }
}

/// For tokens in history, divide positive logits by the penalty and multiply
/// negative logits by it. Each distinct token is penalised once.
fn apply_penalty(candidates: &mut [Candidate], history: &[usize], penalty: f32) {
    let mut seen = std::collections::HashSet::with_capacity(history.len());
    for &token_id in history {
        if !seen.insert(token_id) {
            continue;
        }
        if let Some(c) = candidates.iter_mut().find(|c| c.id == token_id) {
            if c.logit > 0.0 {
                c.logit /= penalty;
            } else {
                c.logit *= penalty;
            }
        }
    }
}

fn sort_desc(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.logit
            .partial_cmp(&a.logit)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn apply_top_k(candidates: &mut Vec<Candidate>, k: usize) {
    if k == 0 || k >= candidates.len() {
        return;
    }
    sort_desc(candidates);
    candidates.truncate(k);
}

fn apply_top_p(candidates: &mut Vec<Candidate>, p: f32, min_keep: usize) {
    sort_desc(candidates);
    let probs = softmax(candidates);

    let mut cumsum = 0.0;
    let mut keep = candidates.len();
    for (idx, prob) in probs.iter().enumerate() {
        cumsum += prob;
        if cumsum >= p && idx + 1 >= min_keep {
            keep = idx + 1;
            break;
        }
    }
    candidates.truncate(keep);
}

fn apply_min_p(candidates: &mut Vec<Candidate>, p: f32, min_keep: usize) {
    if candidates.is_empty() {
        return;
    }
    sort_desc(candidates);
    let probs = softmax(candidates);
    let threshold = probs[0] * p;

    let keep = probs
        .iter()
        .take_while(|&&prob| prob >= threshold)
        .count()
        .max(min_keep)
        .min(candidates.len());
    candidates.truncate(keep);
}

fn apply_temperature(candidates: &mut [Candidate], temperature: f32) -> SamplingResult<()> {
    if temperature <= 0.0 {
        return Err(SamplingError::InvalidTemperature);
    }
    if (temperature - 1.0).abs() > 1e-6 {
        for c in candidates.iter_mut() {
            c.logit /= temperature;
        }
    }
    Ok(())
}

fn softmax(candidates: &[Candidate]) -> Vec<f32> {
    let max_logit = candidates
        .iter()
        .map(|c| c.logit)
        .fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = candidates
        .iter()
        .map(|c| (c.logit - max_logit).exp())
        .collect();
    let sum: f32 = exps.iter().sum();

    if sum > 0.0 && sum.is_finite() {
        exps.iter().map(|&e| e / sum).collect()
    } else {
        vec![1.0 / candidates.len() as f32; candidates.len()]
    }
}

fn sample_from_distribution(rng: &mut SeededRng, probs: &[f32]) -> SamplingResult<usize> {
    let r = rng.next_f32();
    let mut cumsum = 0.0;

    for (i, &prob) in probs.iter().enumerate() {
        cumsum += prob;
        if r < cumsum {
            return Ok(i);
        }
    }

    // Fallback to last token with nonzero probability
    for (i, &prob) in probs.iter().enumerate().rev() {
        if prob > 0.0 {
            return Ok(i);
        }
    }

    Err(SamplingError::NoValidTokens)
}
