//! # llama-server
//!
//! HTTP front end for the llama.rs runtime.
//!
//! - `POST /v1/models/load`: load a model once, streaming progress over SSE
//! - `POST /v1/predict`: generate from a loaded model, as JSON or SSE
//! - `GET /ping`, `GET /health`
//!
//! Shutdown drains predictions before destroying models, so no model is torn
//! down underneath a running generation.

pub mod error;
pub mod handlers;
pub mod models;
pub mod server;
pub mod state;
pub mod streaming;

pub use error::ServerError;
pub use server::{create_router, run_server, shutdown_runtime};
pub use state::{AppState, DynLoader, ServerConfig};
