//! Embedder - text to fixed-size vectors

use async_trait::async_trait;
use fastembed::{EmbeddingModel, TextEmbedding, TextInitOptions};
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult, ResultExt};
use crate::services::VectorConfig;

/// Anything that turns text into fixed-length vectors.
///
/// Indexing and retrieval must share one instance: vectors from different
/// models live in different spaces and their similarities mean nothing.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier recorded next to every stored vector.
    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> AppResult<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("query text is empty".to_string()));
        }

        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::AiService("query embedding missing".to_string()))
    }
}

/// Local ONNX embedding via fastembed.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedder {
    pub fn new(config: &VectorConfig) -> AppResult<Self> {
        let model: EmbeddingModel = config
            .embedding_model
            .parse::<EmbeddingModel>()
            .config_err("unknown embedding model")?;

        let embedding = TextEmbedding::try_new(TextInitOptions::new(model))
            .ai_err("embedding model init failed")?;

        tracing::info!(model = %config.embedding_model, "embedding model loaded");

        Ok(Self {
            model: Mutex::new(embedding),
            model_name: config.embedding_model.clone(),
            dimension: config.vector_size as usize,
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = {
            let mut model = self.model.lock().await;
            model.embed(texts, None)
        }
        .ai_err("embedding failed")?;

        if vectors.len() != texts.len() {
            return Err(AppError::AiService(
                "embedding result count mismatch".to_string(),
            ));
        }
        if let Some(vector) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(AppError::Config(format!(
                "embedding dimension {} does not match configured vector_size {}",
                vector.len(),
                self.dimension
            )));
        }

        Ok(vectors)
    }
}
