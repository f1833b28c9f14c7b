//! Request/response types for the load and predict endpoints.

pub mod load;
pub mod predict;

pub use load::{LoadModelRequest, LoadProgress, LoadedModel};
pub use predict::{PredictChunk, PredictOptions, PredictRequest, PredictResponse, PredictSummary};
