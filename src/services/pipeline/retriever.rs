use std::path::{Path, PathBuf};

use sqlx::Connection;

use super::{RetrievalResult, RetrievalSource, FALLBACK_SOURCE};
use crate::db::{list_user_tables, open_read_only};
use crate::error::{AppError, AppResult};
use crate::services::ai::{Embedder, IndexHit, SchemaIndex};

/// Picks the schema context handed to the SQL generator.
pub struct SchemaRetriever<'a> {
    embedder: &'a dyn Embedder,
    index: &'a SchemaIndex,
    store_path: PathBuf,
}

impl<'a> SchemaRetriever<'a> {
    pub fn new(embedder: &'a dyn Embedder, index: &'a SchemaIndex, store_path: &Path) -> Self {
        Self {
            embedder,
            index,
            store_path: store_path.to_path_buf(),
        }
    }

    /// Top-k table documents for `question`. Never fails: when the index
    /// cannot answer, every table in the store is listed instead.
    pub async fn retrieve(&self, question: &str, k: usize) -> RetrievalResult {
        let reason = match self.search(question, k).await {
            Ok(hits) if !hits.is_empty() => return build_context(&hits),
            Ok(_) => "vector index is empty".to_string(),
            Err(err) => err.to_string(),
        };

        tracing::warn!(reason = %reason, "schema retrieval fell back to table listing");
        self.table_listing(reason).await
    }

    async fn search(&self, question: &str, k: usize) -> AppResult<Vec<IndexHit>> {
        let vector = self.embedder.embed_query(question).await?;
        let hits = self.index.search(vector, k).await?;

        let active = self.embedder.model_name();
        if let Some(hit) = hits.iter().find(|hit| hit.embedding_model != active) {
            return Err(AppError::VectorStore(format!(
                "index built with {}, active embedder is {}",
                hit.embedding_model, active
            )));
        }

        Ok(hits)
    }

    async fn table_listing(&self, reason: String) -> RetrievalResult {
        match list_store_tables(&self.store_path).await {
            Ok(tables) => {
                let mut context_text = String::from("Available tables:\n");
                for table in &tables {
                    context_text.push_str(&format!("- {}\n", table));
                }
                RetrievalResult {
                    context_text,
                    source_table_names: vec![FALLBACK_SOURCE.to_string()],
                    source: RetrievalSource::TableListing,
                    fallback_reason: Some(reason),
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "table listing failed");
                RetrievalResult {
                    context_text: String::new(),
                    source_table_names: Vec::new(),
                    source: RetrievalSource::Unavailable,
                    fallback_reason: Some(format!("{reason}; table listing failed: {err}")),
                }
            }
        }
    }
}

fn build_context(hits: &[IndexHit]) -> RetrievalResult {
    let mut context_text = String::new();
    for (idx, hit) in hits.iter().enumerate() {
        context_text.push_str(&format!("\n[Source {}]\n{}\n", idx + 1, hit.document_text));
    }

    RetrievalResult {
        context_text,
        source_table_names: hits
            .iter()
            .map(|hit| hit.document.table_name.clone())
            .collect(),
        source: RetrievalSource::Index,
        fallback_reason: None,
    }
}

async fn list_store_tables(store_path: &Path) -> AppResult<Vec<String>> {
    if !store_path.is_file() {
        return Err(AppError::Validation(format!(
            "store not found: {}",
            store_path.display()
        )));
    }

    let mut conn = open_read_only(store_path).await?;
    let tables = list_user_tables(&mut conn).await;
    conn.close().await?;
    tables
}
