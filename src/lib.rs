//! Natural-language questions over an uploaded table.
//!
//! An uploaded dataset becomes a SQLite store plus a LanceDB index of one
//! schema document per table. Each question retrieves the closest schema
//! documents, asks a text-generation model for one SQLite statement and runs
//! it read-only.

pub mod db;
pub mod error;
pub mod services;
pub mod utils;
pub mod workspace;

use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub use error::{AppError, AppResult, PreconditionFailure, QueryError};
pub use services::pipeline::{clean_sql, QueryTable, RetrievalSource};
pub use services::{AiServices, AppConfig, Embedder, TextGenerator};
pub use workspace::{AskResponse, IngestReport, Workspace};

/// Logs go to stderr; `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .finish();

    if subscriber.try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
