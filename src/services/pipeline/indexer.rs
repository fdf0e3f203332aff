use std::path::Path;

use sqlx::Connection;
use sqlx::sqlite::SqliteConnection;

use super::IndexOutcome;
use crate::db::{describe_table, list_user_tables, open_read_only, SchemaDocument};
use crate::error::{AppError, AppResult};
use crate::services::ai::{Embedder, IndexRecord, SchemaIndex};

/// Builds one document per table. Tables whose metadata cannot be read are
/// logged and returned in the second list.
pub async fn collect_documents(
    conn: &mut SqliteConnection,
    tables: &[String],
) -> (Vec<SchemaDocument>, Vec<String>) {
    let mut documents = Vec::with_capacity(tables.len());
    let mut skipped = Vec::new();

    for table in tables {
        match describe_table(conn, table).await {
            Ok(document) => documents.push(document),
            Err(err) => {
                tracing::warn!(table = %table, error = %err, "schema document skipped");
                skipped.push(table.clone());
            }
        }
    }

    (documents, skipped)
}

/// Re-indexes the schema of the store at `store_path`.
///
/// The index is only touched once there is something to replace it with.
pub async fn index_store(
    store_path: &Path,
    index: &SchemaIndex,
    embedder: &dyn Embedder,
) -> AppResult<IndexOutcome> {
    if !store_path.is_file() {
        return Ok(IndexOutcome::NothingToIndex {
            reason: format!("store not found: {}", store_path.display()),
        });
    }

    let mut conn = open_read_only(store_path).await?;
    let scanned = scan_store(&mut conn).await;
    conn.close().await?;
    let (documents, skipped) = scanned?;

    if documents.is_empty() {
        let reason = if skipped.is_empty() {
            "store has no user tables".to_string()
        } else {
            format!("no readable tables (skipped: {})", skipped.join(", "))
        };
        return Ok(IndexOutcome::NothingToIndex { reason });
    }

    if embedder.dimension() != index.dimension() {
        return Err(AppError::Config(format!(
            "embedder dimension {} does not match index dimension {}",
            embedder.dimension(),
            index.dimension()
        )));
    }

    let texts: Vec<String> = documents.iter().map(SchemaDocument::to_text).collect();
    let vectors = embedder.embed(&texts).await?;
    if vectors.len() != documents.len() {
        return Err(AppError::AiService(format!(
            "expected {} embeddings, got {}",
            documents.len(),
            vectors.len()
        )));
    }

    let records: Vec<IndexRecord> = documents
        .into_iter()
        .zip(vectors)
        .enumerate()
        .map(|(ordinal, (document, vector))| {
            IndexRecord::new(document, vector, embedder.model_name(), ordinal as i32)
        })
        .collect();

    index.replace(&records).await?;

    let tables: Vec<String> = records
        .iter()
        .map(|record| record.document.table_name.clone())
        .collect();

    tracing::info!(
        indexed = tables.len(),
        skipped = skipped.len(),
        model = embedder.model_name(),
        "schema index rebuilt"
    );

    Ok(IndexOutcome::Indexed { tables, skipped })
}

async fn scan_store(conn: &mut SqliteConnection) -> AppResult<(Vec<SchemaDocument>, Vec<String>)> {
    let tables = list_user_tables(conn).await?;
    Ok(collect_documents(conn, &tables).await)
}
