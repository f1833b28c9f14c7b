//! Integration tests for llama-engine boundary traits and types.
//!
//! Validates:
//! - ModelLoader can be implemented by structs and by plain closures
//! - The destroy capability is opt-in and defaults to "no-op"
//! - InferenceModel / InferenceContext work behind trait objects
//! - Error types display correctly and are cloneable
//! - Core types satisfy required trait bounds (Send, Sync)

use llama_engine::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Mock Backends
// ---------------------------------------------------------------------------

/// A model with a four-word vocabulary; token 3 ends generation.
struct WordModel {
    vocab: Vec<&'static str>,
    destroyed: AtomicBool,
}

impl WordModel {
    fn new() -> Self {
        Self {
            vocab: vec!["hello", "world", "llama", "</s>"],
            destroyed: AtomicBool::new(false),
        }
    }
}

impl Destroy for WordModel {
    fn destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Resource for WordModel {
    fn as_destroy(&self) -> Option<&dyn Destroy> {
        Some(self)
    }
}

struct WordContext {
    n_ctx: usize,
    used: usize,
    logits: Vec<f32>,
}

impl InferenceContext for WordContext {
    fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    fn n_used(&self) -> usize {
        self.used
    }

    fn decode(&mut self, batch: &[TokenId]) -> std::result::Result<(), DecodeError> {
        if batch.is_empty() {
            return Err(DecodeError::Failed("empty batch".to_string()));
        }
        if self.used + batch.len() > self.n_ctx {
            return Err(DecodeError::NoCapacity);
        }
        self.used += batch.len();
        let last = *batch.last().unwrap_or(&0) as usize;
        self.logits = vec![0.0; 4];
        self.logits[(last + 1) % 4] = 10.0;
        Ok(())
    }

    fn logits(&self) -> &[f32] {
        &self.logits
    }
}

impl InferenceModel for WordModel {
    fn info(&self) -> ModelInfo {
        ModelInfo {
            description: "word model".to_string(),
            n_vocab: self.vocab.len(),
            ..ModelInfo::default()
        }
    }

    fn new_context(&self, params: &ContextParams) -> Result<Box<dyn InferenceContext + '_>> {
        Ok(Box::new(WordContext {
            n_ctx: params.n_ctx,
            used: 0,
            logits: Vec::new(),
        }))
    }

    fn tokenize(&self, text: &str, _add_special: bool) -> Result<Vec<TokenId>> {
        text.split_whitespace()
            .map(|word| {
                self.vocab
                    .iter()
                    .position(|w| *w == word)
                    .map(|i| i as TokenId)
                    .ok_or_else(|| LlamaError::Tokenization(format!("unknown word {word}")))
            })
            .collect()
    }

    fn is_eog(&self, token: TokenId) -> bool {
        token == 3
    }

    fn token_to_piece(&self, token: TokenId) -> Result<String> {
        self.vocab
            .get(token as usize)
            .map(|w| format!("{w} "))
            .ok_or_else(|| LlamaError::Tokenization(format!("invalid id {token}")))
    }
}

/// Plain value without the destroy capability.
struct PlainResource;

impl Resource for PlainResource {}

struct WordLoader {
    calls: AtomicUsize,
}

impl ModelLoader for WordLoader {
    type Model = WordModel;

    fn load(&self, path: &str, progress: &mut dyn FnMut(f32)) -> Result<WordModel> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if path.is_empty() {
            return Err(LlamaError::ModelLoad("empty path".to_string()));
        }
        progress(0.0);
        progress(0.5);
        progress(1.0);
        Ok(WordModel::new())
    }
}

// ---------------------------------------------------------------------------
// ModelLoader
// ---------------------------------------------------------------------------

#[test]
fn struct_loader_reports_progress() {
    let loader = WordLoader {
        calls: AtomicUsize::new(0),
    };
    let mut seen = Vec::new();
    let model = loader.load("/models/word.bin", &mut |p| seen.push(p)).unwrap();
    assert_eq!(seen, vec![0.0, 0.5, 1.0]);
    assert_eq!(model.info().n_vocab, 4);
    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn struct_loader_empty_path_errors() {
    let loader = WordLoader {
        calls: AtomicUsize::new(0),
    };
    let err = loader.load("", &mut |_| {}).err().unwrap();
    assert!(matches!(err, LlamaError::ModelLoad(_)));
}

#[test]
fn closure_is_a_loader() {
    let loader = |path: &str, progress: &mut dyn FnMut(f32)| -> Result<PlainResource> {
        progress(1.0);
        if path == "missing" {
            Err(LlamaError::ModelLoad(format!("unable to load model: {path}")))
        } else {
            Ok(PlainResource)
        }
    };
    let mut last = 0.0;
    assert!(loader.load("model.gguf", &mut |p| last = p).is_ok());
    assert_eq!(last, 1.0);
    assert!(loader.load("missing", &mut |_| {}).is_err());
}

#[test]
fn boxed_loader_erases_model_type() {
    let loader = BoxedLoader(WordLoader {
        calls: AtomicUsize::new(0),
    });
    let model: DynModel = loader.load("/models/word.bin", &mut |_| {}).unwrap();
    assert_eq!(model.tokenize("hello llama", true).unwrap(), vec![0, 2]);
    assert!(model.as_destroy().is_some());
}

// ---------------------------------------------------------------------------
// Destroy capability
// ---------------------------------------------------------------------------

#[test]
fn destroy_capability_defaults_to_none() {
    assert!(PlainResource.as_destroy().is_none());
}

#[test]
fn destroy_capability_reaches_model() {
    let model = WordModel::new();
    model.as_destroy().unwrap().destroy().unwrap();
    assert!(model.destroyed.load(Ordering::SeqCst));
}

#[test]
fn dyn_model_forwards_destroy_capability() {
    let model: DynModel = Box::new(WordModel::new());
    let destroy = model.as_destroy().expect("word model is destroyable");
    assert!(destroy.destroy().is_ok());
}

// ---------------------------------------------------------------------------
// Decode primitives
// ---------------------------------------------------------------------------

#[test]
fn context_decode_fills_logits() {
    let model = WordModel::new();
    let mut ctx = model.new_context(&ContextParams::default()).unwrap();
    ctx.decode(&[0, 1]).unwrap();
    assert_eq!(ctx.n_used(), 2);
    assert_eq!(ctx.logits().len(), 4);
    assert_eq!(ctx.logits()[2], 10.0);
}

#[test]
fn context_reports_no_capacity() {
    let model = WordModel::new();
    let mut ctx = model
        .new_context(&ContextParams::default().with_n_ctx(2))
        .unwrap();
    ctx.decode(&[0, 1]).unwrap();
    assert_eq!(ctx.decode(&[2]), Err(DecodeError::NoCapacity));
}

#[test]
fn context_reports_hard_failure() {
    let model = WordModel::new();
    let mut ctx = model.new_context(&ContextParams::default()).unwrap();
    assert!(matches!(ctx.decode(&[]), Err(DecodeError::Failed(_))));
}

#[test]
fn model_tokenize_unknown_word_errors() {
    let model = WordModel::new();
    let err = model.tokenize("hello unknown", true).unwrap_err();
    assert!(matches!(err, LlamaError::Tokenization(_)));
}

#[test]
fn model_eog_and_pieces() {
    let model = WordModel::new();
    assert!(model.is_eog(3));
    assert!(!model.is_eog(0));
    assert_eq!(model.token_to_piece(2).unwrap(), "llama ");
    assert!(model.token_to_piece(9).is_err());
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

#[test]
fn context_params_defaults() {
    let params = ContextParams::default();
    assert_eq!(params.n_ctx, 4096);
    assert_eq!(params.n_batch, 2048);
    assert_eq!(params.n_threads, 0);
    assert_eq!(params.n_threads_batch, 0);
}

#[test]
fn context_params_builder() {
    let params = ContextParams::default()
        .with_n_ctx(512)
        .with_n_batch(64)
        .with_threads(4, 8);
    assert_eq!(params.n_ctx, 512);
    assert_eq!(params.n_batch, 64);
    assert_eq!(params.n_threads, 4);
    assert_eq!(params.n_threads_batch, 8);
}

#[test]
fn load_options_builder() {
    let options = LoadOptions::default().with_n_gpu_layers(0).with_mmap(true);
    assert_eq!(options.n_gpu_layers, 0);
    assert!(options.use_mmap);
    assert_eq!(LoadOptions::default().n_gpu_layers, 99);
}

// ---------------------------------------------------------------------------
// Error Type Tests
// ---------------------------------------------------------------------------

#[test]
fn error_model_load_display() {
    let err = LlamaError::ModelLoad("file not found".to_string());
    let msg = format!("{}", err);
    assert!(msg.contains("Model loading failed"));
    assert!(msg.contains("file not found"));
}

#[test]
fn error_destroy_display() {
    let err = LlamaError::Destroy("double free".to_string());
    assert!(err.to_string().contains("Model destruction failed"));
}

#[test]
fn error_clone_is_equal() {
    let err = LlamaError::Inference("OOM".to_string());
    assert_eq!(err.clone(), err);
}

#[test]
fn decode_error_display() {
    assert!(DecodeError::NoCapacity.to_string().contains("capacity"));
    assert!(DecodeError::Failed("bad batch".to_string())
        .to_string()
        .contains("bad batch"));
}

#[test]
fn error_is_std_error() {
    let err: Box<dyn std::error::Error> = Box::new(LlamaError::ModelLoad("test".to_string()));
    assert!(err.to_string().contains("test"));
}

// ---------------------------------------------------------------------------
// Send + Sync Compile-Time Tests
// ---------------------------------------------------------------------------

#[test]
fn model_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<WordModel>();
    assert_send_sync::<DynModel>();
    assert_send_sync::<WordLoader>();
}

#[test]
fn model_behind_arc_is_thread_safe() {
    let model: Arc<DynModel> = Arc::new(Box::new(WordModel::new()));
    let model_clone = Arc::clone(&model);

    let handle = std::thread::spawn(move || model_clone.tokenize("hello", true).unwrap());

    let tokens_main = model.tokenize("hello", true).unwrap();
    let tokens_thread = handle.join().unwrap();
    assert_eq!(tokens_main, tokens_thread);
}
