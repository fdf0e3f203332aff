mod embedding;
mod llm;
mod types;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use crate::error::AppResult;
use crate::services::AppConfig;

pub use embedding::{Embedder, FastEmbedder, IndexHit, IndexRecord, SchemaIndex};
pub use llm::{LlmService, TextGenerator};
pub use types::*;

/// External model capabilities shared by every dataset generation.
#[derive(Clone)]
pub struct AiServices {
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn TextGenerator>,
}

impl AiServices {
    pub fn new(embedder: Arc<dyn Embedder>, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            embedder,
            generator,
        }
    }

    /// Local fastembed model plus the configured HTTP text-generation endpoint.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let embedder = Arc::new(FastEmbedder::new(&config.vector)?);
        let generator = Arc::new(LlmService::new(config.llm.clone())?);
        Ok(Self::new(embedder, generator))
    }
}
