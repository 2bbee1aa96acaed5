//! LLM integration for Mail Triage.
//!
//! The pipeline talks to models only through the `LlmProvider` trait.
//! Classification and drafting each get their own provider instance so they
//! can run different models.

pub mod ollama;
pub mod provider;

pub use ollama::OllamaProvider;
pub use provider::*;

use std::sync::Arc;

use crate::config::{InferenceConfig, ModelConfig};
use crate::error::LlmError;

/// Create a provider for one model role.
pub fn create_provider(
    inference: &InferenceConfig,
    model: &ModelConfig,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OllamaProvider::new(&inference.base_url, &model.model, inference.timeout)?;
    tracing::info!("Using Ollama at {} (model: {})", inference.base_url, model.model);
    Ok(Arc::new(provider))
}
