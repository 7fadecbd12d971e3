pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod generation;
pub mod provider;
pub mod store;

pub use config::Config;
pub use error::EngineError;
pub use generation::{ChatRequest, GenerationEngine, ToolOutput};
