pub mod backend;
mod breaker;
mod client;
pub mod scripted;
mod types;
pub mod verdict;

pub use backend::{ModelInfo, OllamaBackend, VisionBackend};
pub use breaker::{BreakerState, CircuitBreaker};
pub use client::{InferenceClient, InferenceSettings};
pub use types::{InferenceResult, QARequest};
