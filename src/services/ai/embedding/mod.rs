//! Embedding and the schema vector index
//!
//! Split into submodules:
//! - `model`: the `Embedder` trait and the fastembed-backed implementation
//! - `store`: LanceDB storage of embedded schema documents

mod model;
mod store;

pub use model::{Embedder, FastEmbedder};
pub use store::{IndexHit, IndexRecord, SchemaIndex};

// Column name constants
pub(crate) const COLUMN_DISTANCE: &str = "_distance";

pub(crate) const COLUMN_SOURCE_ID: &str = "source_id";
pub(crate) const COLUMN_TABLE_NAME: &str = "table_name";
pub(crate) const COLUMN_DOCUMENT_TEXT: &str = "document_text";
pub(crate) const COLUMN_COLUMNS_JSON: &str = "columns_json";
pub(crate) const COLUMN_ROW_COUNT: &str = "row_count";
pub(crate) const COLUMN_SAMPLE_AVAILABLE: &str = "sample_available";
pub(crate) const COLUMN_EMBEDDING_MODEL: &str = "embedding_model";
pub(crate) const COLUMN_EMBEDDING_HASH: &str = "embedding_hash";
pub(crate) const COLUMN_ORDINAL: &str = "ordinal";
pub(crate) const COLUMN_VECTOR: &str = "vector";
