//! Deterministic reference engine.
//!
//! [`MockEngine`] "loads" a plain text file as a word-level bigram model so the
//! server and its tests run without a native inference library. Loading reads
//! the file in chunks and reports byte progress.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};

use llama_engine::{
    ContextParams, DecodeError, Destroy, InferenceContext, InferenceModel, LlamaError, LoadOptions,
    ModelInfo, ModelLoader, Resource, Result, TokenId,
};

pub const BOS: TokenId = 0;
pub const EOS: TokenId = 1;
pub const UNK: TokenId = 2;

const SPECIAL: [&str; 3] = ["<s>", "</s>", "<unk>"];
const DEFAULT_CHUNK: usize = 64 * 1024;
/// Logit given to tokens that never follow the current one.
const UNSEEN_LOGIT: f32 = -1.0e4;

#[derive(Debug, Clone)]
pub struct MockEngine {
    options: LoadOptions,
    chunk_size: usize,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new(LoadOptions::default())
    }
}

impl MockEngine {
    pub fn new(options: LoadOptions) -> Self {
        Self {
            options,
            chunk_size: DEFAULT_CHUNK,
        }
    }

    /// Read size per progress report.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn options(&self) -> LoadOptions {
        self.options
    }
}

impl ModelLoader for MockEngine {
    type Model = MockModel;

    fn load(&self, path: &str, progress: &mut dyn FnMut(f32)) -> Result<MockModel> {
        let load_err = |e: std::io::Error| LlamaError::ModelLoad(format!("unable to load model from {path}: {e}"));

        let mut file = File::open(path).map_err(load_err)?;
        let total = file.metadata().map_err(load_err)?.len();

        progress(0.0);
        let mut bytes = Vec::with_capacity(total as usize);
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = file.read(&mut buf).map_err(load_err)?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&buf[..n]);
            if (bytes.len() as u64) < total {
                progress(bytes.len() as f32 / total as f32);
            }
        }

        let corpus = String::from_utf8(bytes)
            .map_err(|e| LlamaError::ModelLoad(format!("{path} is not a text model: {e}")))?;
        let model = MockModel::from_corpus(&corpus, total, self.options);
        progress(1.0);
        Ok(model)
    }
}

/// Word-level bigram model.
pub struct MockModel {
    vocab: Vec<String>,
    index: HashMap<String, TokenId>,
    successors: HashMap<TokenId, HashMap<TokenId, u32>>,
    size_bytes: u64,
    options: LoadOptions,
    destroyed: AtomicBool,
}

impl MockModel {
    /// Build from a corpus. Each line is a sequence that ends in `</s>`.
    pub fn from_corpus(corpus: &str, size_bytes: u64, options: LoadOptions) -> Self {
        let mut model = Self {
            vocab: SPECIAL.iter().map(|s| s.to_string()).collect(),
            index: SPECIAL
                .iter()
                .enumerate()
                .map(|(i, s)| (s.to_string(), i as TokenId))
                .collect(),
            successors: HashMap::new(),
            size_bytes,
            options,
            destroyed: AtomicBool::new(false),
        };

        for line in corpus.lines() {
            let mut prev = BOS;
            for word in line.split_whitespace() {
                let id = model.intern(word);
                model.observe(prev, id);
                prev = id;
            }
            if prev != BOS {
                model.observe(prev, EOS);
            }
        }
        model
    }

    fn intern(&mut self, word: &str) -> TokenId {
        if let Some(&id) = self.index.get(word) {
            return id;
        }
        let id = self.vocab.len() as TokenId;
        self.vocab.push(word.to_string());
        self.index.insert(word.to_string(), id);
        id
    }

    fn observe(&mut self, from: TokenId, to: TokenId) {
        *self.successors.entry(from).or_default().entry(to).or_insert(0) += 1;
    }

    fn next_logits(&self, last: TokenId) -> Vec<f32> {
        let mut logits = vec![UNSEEN_LOGIT; self.vocab.len()];
        match self.successors.get(&last) {
            Some(next) => {
                for (&id, &count) in next {
                    logits[id as usize] = (count as f32).ln() * 4.0;
                }
            }
            None => logits[EOS as usize] = 0.0,
        }
        logits
    }

    pub fn options(&self) -> LoadOptions {
        self.options
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl Destroy for MockModel {
    fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Err(LlamaError::Destroy("model already destroyed".to_string()));
        }
        Ok(())
    }
}

impl Resource for MockModel {
    fn as_destroy(&self) -> Option<&dyn Destroy> {
        Some(self)
    }
}

impl InferenceModel for MockModel {
    fn info(&self) -> ModelInfo {
        ModelInfo {
            description: format!("mock bigram ({} words)", self.vocab.len() - SPECIAL.len()),
            size_bytes: self.size_bytes,
            n_params: self.successors.values().map(|s| s.len() as u64).sum(),
            n_vocab: self.vocab.len(),
        }
    }

    fn new_context(&self, params: &ContextParams) -> Result<Box<dyn InferenceContext + '_>> {
        if self.is_destroyed() {
            return Err(LlamaError::Context("model has been destroyed".to_string()));
        }
        if params.n_ctx == 0 {
            return Err(LlamaError::Context("n_ctx must be > 0".to_string()));
        }
        Ok(Box::new(MockContext {
            model: self,
            n_ctx: params.n_ctx,
            n_batch: params.n_batch,
            used: 0,
            logits: Vec::new(),
        }))
    }

    fn tokenize(&self, text: &str, add_special: bool) -> Result<Vec<TokenId>> {
        let mut tokens = Vec::new();
        if add_special {
            tokens.push(BOS);
        }
        tokens.extend(
            text.split_whitespace()
                .map(|w| self.index.get(w).copied().unwrap_or(UNK)),
        );
        Ok(tokens)
    }

    fn is_eog(&self, token: TokenId) -> bool {
        token == EOS
    }

    fn token_to_piece(&self, token: TokenId) -> Result<String> {
        match token {
            BOS | EOS | UNK => Ok(String::new()),
            _ => self
                .vocab
                .get(token as usize)
                .map(|w| format!(" {w}"))
                .ok_or_else(|| LlamaError::Tokenization(format!("invalid token id {token}"))),
        }
    }
}

struct MockContext<'m> {
    model: &'m MockModel,
    n_ctx: usize,
    n_batch: usize,
    used: usize,
    logits: Vec<f32>,
}

impl InferenceContext for MockContext<'_> {
    fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    fn n_used(&self) -> usize {
        self.used
    }

    fn decode(&mut self, batch: &[TokenId]) -> std::result::Result<(), DecodeError> {
        let last = match batch.last() {
            Some(&last) => last,
            None => return Err(DecodeError::Failed("empty batch".to_string())),
        };
        if self.model.is_destroyed() {
            return Err(DecodeError::Failed("model has been destroyed".to_string()));
        }
        if self.n_batch > 0 && batch.len() > self.n_batch {
            return Err(DecodeError::Failed(format!(
                "batch of {} exceeds n_batch {}",
                batch.len(),
                self.n_batch
            )));
        }
        if self.used + batch.len() > self.n_ctx {
            return Err(DecodeError::NoCapacity);
        }
        self.used += batch.len();
        self.logits = self.model.next_logits(last);
        Ok(())
    }

    fn logits(&self) -> &[f32] {
        &self.logits
    }
}
