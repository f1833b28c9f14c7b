//! Application state and configuration.

use std::sync::Arc;
use std::time::Duration;

use llama_engine::{BoxedLoader, ContextParams, DynModel, InferenceModel, ModelLoader};
use llama_runtime::{Generator, ModelRegistry, PredictionTracker};

/// Type-erased loader so handlers are not generic over the engine.
pub struct DynLoader(Box<dyn ModelLoader<Model = DynModel>>);

impl DynLoader {
    pub fn new<L>(loader: L) -> Self
    where
        L: ModelLoader + 'static,
        L::Model: InferenceModel,
    {
        Self(Box::new(BoxedLoader(loader)))
    }
}

impl ModelLoader for DynLoader {
    type Model = DynModel;

    fn load(&self, path: &str, progress: &mut dyn FnMut(f32)) -> llama_engine::Result<DynModel> {
        self.0.load(path, progress)
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Loaded models, keyed by path.
    pub registry: Arc<ModelRegistry<DynLoader>>,
    /// In-flight predictions.
    pub predictions: Arc<PredictionTracker>,
    pub generator: Generator,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new<L>(loader: L, config: ServerConfig) -> Self
    where
        L: ModelLoader + 'static,
        L::Model: InferenceModel,
    {
        Self {
            registry: Arc::new(
                ModelRegistry::new(DynLoader::new(loader))
                    .with_span(tracing::info_span!("model_manager")),
            ),
            predictions: Arc::new(
                PredictionTracker::new().with_span(tracing::info_span!("predictions")),
            ),
            generator: Generator::new().with_span(tracing::info_span!("predict")),
            config,
        }
    }
}

/// Server configuration parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Context used for every prediction.
    pub context: ContextParams,
    /// Upper bound on draining predictions and tearing down models.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            context: ContextParams::default(),
            shutdown_timeout: Duration::from_secs(25),
        }
    }
}

impl ServerConfig {
    pub fn with_context(mut self, context: ContextParams) -> Self {
        self.context = context;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
