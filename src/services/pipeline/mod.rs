//! Natural-language-to-SQL pipeline
//!
//! question → retriever (schema context) → generator (SQL) → executor (rows)
//!
//! Split into submodules:
//! - `indexer`: schema documents from the store into the vector index
//! - `retriever`: top-k schema context for a question, with table-listing fallback
//! - `sanitize`: free-text model output to one SQL statement
//! - `generator`: prompt construction and the model call
//! - `executor`: read-only execution with typed errors
//! - `answer`: optional natural-language answer over the result rows

mod answer;
mod executor;
mod generator;
mod indexer;
mod retriever;
mod sanitize;
mod types;

pub use answer::{render_table, AnswerSynthesizer};
pub use executor::QueryExecutor;
pub use generator::{build_system_prompt, SqlGenerator};
pub use indexer::{collect_documents, index_store};
pub use retriever::SchemaRetriever;
pub use sanitize::{carries_sentinel, clean_sql, is_sentinel};
pub use types::*;

// Constants
pub(crate) const SQL_TEMPERATURE: f32 = 0.0;
pub(crate) const ANSWER_TEMPERATURE: f32 = 0.2;
pub(crate) const ANSWER_MAX_TOKENS: u32 = 1000;
pub(crate) const ERROR_SENTINEL: &str = "ERROR";
pub(crate) const UNANSWERABLE_REPLY: &str = "ERROR: Cannot answer this question with available data";
pub(crate) const FALLBACK_SOURCE: &str = "Database Tables";
