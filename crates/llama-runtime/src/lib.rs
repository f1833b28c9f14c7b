//! # llama-runtime
//!
//! Resource lifecycle for the llama.rs server: a singleflight model registry with
//! progress fan-out, an admission tracker that drains in-flight predictions on
//! shutdown, the token generation loop, telemetry hooks, and a deterministic
//! reference engine.

pub mod error;
pub mod generation;
pub mod mock;
pub mod progress;
pub mod registry;
pub mod telemetry;
pub mod tracker;

pub use error::{Result, RuntimeError};
pub use generation::{
    run_generation, token_budget, Generation, Generator, PredictParams, StopReason, StreamChunk,
    StreamSink,
};
pub use mock::{MockEngine, MockModel};
pub use progress::ProgressThrottle;
pub use registry::{ModelRegistry, ProgressSink};
pub use telemetry::{InferenceMetrics, InferenceTimer, LogTelemetry, NoopTelemetry, TelemetryHook};
pub use tracker::{PredictionPermit, PredictionTracker};
