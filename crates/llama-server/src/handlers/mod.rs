//! HTTP request handlers for API endpoints.

pub mod health;
pub mod load;
pub mod predict;

pub use health::{handle_health, handle_ping};
pub use load::handle_load_model;
pub use predict::handle_predict;
