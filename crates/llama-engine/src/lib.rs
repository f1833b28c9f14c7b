//! # llama-engine
//!
//! The "narrow waist" of the llama.rs server stack. Defines the boundary between
//! the resource-lifecycle core and the native inference library, which is treated
//! as a black box: a blocking model load with a progress side channel, an optional
//! destroy capability on the loaded model, and the single-step decode primitives
//! the generation loop drives.
//!
//! ## Design Notes
//!
//! ### Interior Mutability
//! Loaded models are shared by reference between every caller that acquired them,
//! so [`InferenceModel`] methods take `&self`. Per-request mutable state lives in an
//! [`InferenceContext`], which is created fresh for each prediction and never shared.
//!
//! ### Destroy Capability
//! Native models own memory outside the Rust allocator. A model type that needs
//! explicit cleanup implements [`Destroy`] and exposes it through
//! [`Resource::as_destroy`]; every other type keeps the default `None` and is
//! simply dropped.
//!
//! ### Token Type
//! `TokenId` is aliased as `i32` for FFI compatibility, though token IDs are logically
//! non-negative.

use std::fmt;

pub type Result<T> = std::result::Result<T, LlamaError>;

/// Token ID type (i32 for FFI compat; logically non-negative).
pub type TokenId = i32;

/// Top-level error type for all engine operations.
///
/// `Clone` so that one failed load can be handed to every caller that was
/// waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlamaError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),
    #[error("Tokenization failed: {0}")]
    Tokenization(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Context creation failed: {0}")]
    Context(String),
    #[error("Model destruction failed: {0}")]
    Destroy(String),
}

/// Explicit cleanup for resources that own native memory.
pub trait Destroy {
    /// Release the native resources. Called at most once by the registry, after
    /// no load is in flight for the owning key.
    fn destroy(&self) -> Result<()>;
}

/// A long-lived, expensive-to-construct value the registry can cache.
pub trait Resource: Send + Sync + 'static {
    /// Capability check for explicit destruction. Types without one are dropped.
    fn as_destroy(&self) -> Option<&dyn Destroy> {
        None
    }
}

/// Options passed through to the native loader unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Number of layers to offload to the GPU.
    pub n_gpu_layers: i32,
    /// Map the model file instead of reading it into memory.
    pub use_mmap: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            n_gpu_layers: 99,
            use_mmap: false,
        }
    }
}

impl LoadOptions {
    pub fn with_n_gpu_layers(mut self, n: i32) -> Self {
        self.n_gpu_layers = n;
        self
    }

    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }
}

/// Blocking model construction.
///
/// `progress` may be invoked zero or more times with values in `[0, 1]` before
/// the call returns. It must not be called after `load` returns.
pub trait ModelLoader: Send + Sync {
    type Model: Resource;

    fn load(&self, path: &str, progress: &mut dyn FnMut(f32)) -> Result<Self::Model>;
}

impl<F, M> ModelLoader for F
where
    F: Fn(&str, &mut dyn FnMut(f32)) -> Result<M> + Send + Sync,
    M: Resource,
{
    type Model = M;

    fn load(&self, path: &str, progress: &mut dyn FnMut(f32)) -> Result<M> {
        self(path, progress)
    }
}

/// Descriptive metadata reported by a loaded model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelInfo {
    pub description: String,
    pub size_bytes: u64,
    pub n_params: u64,
    pub n_vocab: usize,
}

/// Parameters for a fresh inference context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextParams {
    /// Context window, in tokens.
    pub n_ctx: usize,
    /// Maximum tokens per decode call.
    pub n_batch: usize,
    /// Generation threads (0 = auto).
    pub n_threads: usize,
    /// Prompt-processing threads (0 = auto).
    pub n_threads_batch: usize,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            n_ctx: 4096,
            n_batch: 2048,
            n_threads: 0,
            n_threads_batch: 0,
        }
    }
}

impl ContextParams {
    pub fn with_n_ctx(mut self, n_ctx: usize) -> Self {
        self.n_ctx = n_ctx;
        self
    }

    pub fn with_n_batch(mut self, n_batch: usize) -> Self {
        self.n_batch = n_batch;
        self
    }

    pub fn with_threads(mut self, n_threads: usize, n_threads_batch: usize) -> Self {
        self.n_threads = n_threads;
        self.n_threads_batch = n_threads_batch;
        self
    }
}

/// Outcome of a failed decode step.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// The KV cache has no room for the batch. Transient: generation stops
    /// with what it has so far.
    #[error("no KV cache capacity for batch")]
    NoCapacity,
    /// Any other decode failure. Generation aborts.
    #[error("decode failed: {0}")]
    Failed(String),
}

/// Per-request decoding state (KV cache, logits of the last position).
///
/// Not shared between requests; dropped when the prediction finishes.
pub trait InferenceContext: Send {
    /// Context window in tokens.
    fn n_ctx(&self) -> usize;

    /// Tokens currently occupying the KV cache.
    fn n_used(&self) -> usize;

    /// Feed a batch of tokens through the model.
    fn decode(&mut self, batch: &[TokenId]) -> std::result::Result<(), DecodeError>;

    /// Logits for the last decoded position, one per vocabulary entry.
    fn logits(&self) -> &[f32];
}

/// A loaded model: the opaque primitives the generation loop consumes.
pub trait InferenceModel: Resource {
    fn info(&self) -> ModelInfo;

    /// Create a new decoding context bound to this model.
    fn new_context(&self, params: &ContextParams) -> Result<Box<dyn InferenceContext + '_>>;

    /// Convert text into token IDs. `add_special` prepends BOS when the vocabulary asks for it.
    fn tokenize(&self, text: &str, add_special: bool) -> Result<Vec<TokenId>>;

    /// End-of-generation predicate.
    fn is_eog(&self, token: TokenId) -> bool;

    /// Displayable text for a single token.
    fn token_to_piece(&self, token: TokenId) -> Result<String>;
}

/// Type-erased model, for callers that serve several engine implementations.
pub type DynModel = Box<dyn InferenceModel>;

impl Resource for DynModel {
    fn as_destroy(&self) -> Option<&dyn Destroy> {
        (**self).as_destroy()
    }
}

/// Adapts any loader of [`InferenceModel`]s into a loader of [`DynModel`]s.
pub struct BoxedLoader<L>(pub L);

impl<L> ModelLoader for BoxedLoader<L>
where
    L: ModelLoader,
    L::Model: InferenceModel,
{
    type Model = DynModel;

    fn load(&self, path: &str, progress: &mut dyn FnMut(f32)) -> Result<DynModel> {
        let model = self.0.load(path, progress)?;
        Ok(Box::new(model))
    }
}

impl<L> fmt::Debug for BoxedLoader<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedLoader").finish_non_exhaustive()
    }
}
