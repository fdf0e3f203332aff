use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::QueryError;

/// Where the schema context of a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    /// k-NN hits from the vector index
    Index,
    /// Every table name in the store, no column detail
    TableListing,
    /// Neither the index nor the store could be read
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub context_text: String,
    pub source_table_names: Vec<String>,
    pub source: RetrievalSource,
    /// Why the index was bypassed, when it was.
    pub fallback_reason: Option<String>,
}

/// What the model actually said, once cleaned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Sql(String),
    /// The model declared the question unanswerable from the schema.
    Unanswerable(String),
    /// The model call itself failed.
    Failure(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedQuery {
    pub raw_text: String,
    pub cleaned_sql: String,
    #[serde(serialize_with = "serialize_secs")]
    pub generation_latency: Duration,
    pub is_error: bool,
    pub outcome: GenerationOutcome,
}

impl GeneratedQuery {
    pub fn sql(&self) -> Option<&str> {
        match &self.outcome {
            GenerationOutcome::Sql(sql) => Some(sql),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<QueryError> {
        match &self.outcome {
            GenerationOutcome::Sql(_) => None,
            GenerationOutcome::Unanswerable(reason) => {
                Some(QueryError::GenerationSentinel(reason.clone()))
            }
            GenerationOutcome::Failure(cause) => Some(QueryError::GenerationFailure(cause.clone())),
        }
    }
}

/// Rows materialized from one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// More rows existed than the executor's row cap.
    pub truncated: bool,
}

impl QueryTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub type ExecutionResult = Result<QueryTable, QueryError>;

/// Lifecycle of one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    Received,
    SchemaRetrieved,
    SqlGenerated,
    Rejected,
    Executed,
    Reported,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexOutcome {
    /// Store missing or without usable tables; the previous index is untouched.
    NothingToIndex { reason: String },
    Indexed {
        tables: Vec<String>,
        skipped: Vec<String>,
    },
}

pub(crate) fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}
