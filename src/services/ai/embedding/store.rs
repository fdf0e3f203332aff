//! LanceDB storage of embedded schema documents

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use arrow_array::builder::{FixedSizeListBuilder, Float32Builder};
use arrow_array::{
    Array, BooleanArray, Float32Array, Int32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use futures_util::TryStreamExt;
use lancedb::arrow::SendableRecordBatchStream;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, DistanceType, Error as LanceError, Table};

use super::{
    COLUMN_COLUMNS_JSON, COLUMN_DISTANCE, COLUMN_DOCUMENT_TEXT, COLUMN_EMBEDDING_HASH,
    COLUMN_EMBEDDING_MODEL, COLUMN_ORDINAL, COLUMN_ROW_COUNT, COLUMN_SAMPLE_AVAILABLE,
    COLUMN_SOURCE_ID, COLUMN_TABLE_NAME, COLUMN_VECTOR,
};
use crate::db::{ColumnInfo, SchemaDocument};
use crate::error::{AppError, AppResult, ResultExt};
use crate::services::VectorConfig;
use crate::utils::compute_sha256;

/// One embedded schema document as stored in the index
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub source_id: String,
    pub document: SchemaDocument,
    pub vector: Vec<f32>,
    pub embedding_model: String,
    pub ordinal: i32,
}

impl IndexRecord {
    pub fn new(
        document: SchemaDocument,
        vector: Vec<f32>,
        embedding_model: &str,
        ordinal: i32,
    ) -> Self {
        Self {
            source_id: uuid::Uuid::new_v4().to_string(),
            document,
            vector,
            embedding_model: embedding_model.to_string(),
            ordinal,
        }
    }
}

/// A nearest-neighbour hit
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub source_id: String,
    pub document: SchemaDocument,
    pub document_text: String,
    pub embedding_model: String,
    pub ordinal: i32,
    pub similarity: f64,
}

/// Vector index over per-table schema documents.
///
/// One LanceDB directory per dataset generation.
pub struct SchemaIndex {
    table: Table,
    schema: Arc<Schema>,
    dimension: usize,
}

impl SchemaIndex {
    pub async fn open(path: &Path, config: &VectorConfig) -> AppResult<Self> {
        let schema = build_schema(config)?;
        let table = open_or_create_table(path, &config.table_name, schema.clone()).await?;

        Ok(Self {
            table,
            schema,
            dimension: config.vector_size as usize,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn count(&self) -> AppResult<usize> {
        Ok(self.table.count_rows(None).await?)
    }

    /// Discards every stored record, then inserts `records`. Never merges.
    pub async fn replace(&self, records: &[IndexRecord]) -> AppResult<()> {
        self.table.delete("true").await?;

        if records.is_empty() {
            return Ok(());
        }

        let batch = build_record_batch(self.schema.clone(), records)?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], self.schema.clone());
        self.table.add(batches).execute().await?;

        Ok(())
    }

    /// Cosine k-NN search, ranked by descending similarity.
    ///
    /// Equal similarities keep insertion order, so repeated calls against an
    /// unchanged index return the same ranking.
    pub async fn search(&self, vector: Vec<f32>, k: usize) -> AppResult<Vec<IndexHit>> {
        if vector.len() != self.dimension {
            return Err(AppError::VectorStore(format!(
                "query vector has {} dims, index expects {}",
                vector.len(),
                self.dimension
            )));
        }

        let total = self.count().await?;
        if total == 0 || k == 0 {
            return Ok(Vec::new());
        }

        // Schema indexes hold one row per table, so scoring every row is cheap
        // and lets ties be broken by ordinal rather than by scan order.
        let stream = self
            .table
            .query()
            .nearest_to(vector)?
            .column(COLUMN_VECTOR)
            .distance_type(DistanceType::Cosine)
            .limit(total)
            .execute()
            .await?;

        let mut hits = collect_hits(stream).await?;
        rank_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    /// Every stored document in insertion order.
    pub async fn documents(&self) -> AppResult<Vec<SchemaDocument>> {
        let total = self.count().await?;
        if total == 0 {
            return Ok(Vec::new());
        }

        let stream = self.table.query().limit(total).execute().await?;
        let mut hits = collect_hits(stream).await?;
        hits.sort_by_key(|hit| hit.ordinal);
        Ok(hits.into_iter().map(|hit| hit.document).collect())
    }
}

pub fn build_schema(config: &VectorConfig) -> AppResult<Arc<Schema>> {
    let dim = i32::try_from(config.vector_size)
        .map_err(|_| AppError::Config("vector_size overflow".to_string()))?;

    let vector = DataType::FixedSizeList(
        Arc::new(Field::new("item", DataType::Float32, true)),
        dim,
    );

    Ok(Arc::new(Schema::new(vec![
        Field::new(COLUMN_SOURCE_ID, DataType::Utf8, false),
        Field::new(COLUMN_TABLE_NAME, DataType::Utf8, false),
        Field::new(COLUMN_DOCUMENT_TEXT, DataType::Utf8, false),
        Field::new(COLUMN_COLUMNS_JSON, DataType::Utf8, false),
        Field::new(COLUMN_ROW_COUNT, DataType::Int64, false),
        Field::new(COLUMN_SAMPLE_AVAILABLE, DataType::Boolean, false),
        Field::new(COLUMN_EMBEDDING_MODEL, DataType::Utf8, false),
        Field::new(COLUMN_EMBEDDING_HASH, DataType::Utf8, false),
        Field::new(COLUMN_ORDINAL, DataType::Int32, false),
        Field::new(COLUMN_VECTOR, vector, true),
    ])))
}

pub async fn open_or_create_table(
    path: &Path,
    table_name: &str,
    schema: Arc<Schema>,
) -> AppResult<Table> {
    let uri = path.to_string_lossy().to_string();
    let db = connect(&uri).execute().await?;

    match db.open_table(table_name).execute().await {
        Ok(table) => Ok(table),
        Err(LanceError::TableNotFound { .. }) => {
            let table = db.create_empty_table(table_name, schema).execute().await?;
            Ok(table)
        }
        Err(err) => Err(err.into()),
    }
}

pub fn build_record_batch(schema: Arc<Schema>, rows: &[IndexRecord]) -> AppResult<RecordBatch> {
    let columns_json = rows
        .iter()
        .map(|row| serde_json::to_string(&row.document.columns))
        .collect::<Result<Vec<_>, _>>()?;
    let texts: Vec<String> = rows.iter().map(|row| row.document.to_text()).collect();
    let hashes: Vec<String> = texts.iter().map(|text| compute_embedding_hash(text)).collect();

    let source_ids = StringArray::from_iter_values(rows.iter().map(|row| row.source_id.as_str()));
    let table_names =
        StringArray::from_iter_values(rows.iter().map(|row| row.document.table_name.as_str()));
    let document_texts = StringArray::from_iter_values(texts.iter());
    let columns_json = StringArray::from_iter_values(columns_json.iter());
    let row_counts = Int64Array::from_iter_values(rows.iter().map(|row| row.document.row_count));
    let samples = BooleanArray::from(
        rows.iter()
            .map(|row| row.document.sample_available)
            .collect::<Vec<bool>>(),
    );
    let models =
        StringArray::from_iter_values(rows.iter().map(|row| row.embedding_model.as_str()));
    let hashes = StringArray::from_iter_values(hashes.iter());
    let ordinals = Int32Array::from_iter_values(rows.iter().map(|row| row.ordinal));

    let dim = match schema.field_with_name(COLUMN_VECTOR)?.data_type() {
        DataType::FixedSizeList(_, size) => *size as usize,
        _ => return Err(AppError::VectorStore("vector is not fixed size list".to_string())),
    };
    let vectors = build_vector_column(rows, dim)?;

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(source_ids),
            Arc::new(table_names),
            Arc::new(document_texts),
            Arc::new(columns_json),
            Arc::new(row_counts),
            Arc::new(samples),
            Arc::new(models),
            Arc::new(hashes),
            Arc::new(ordinals),
            Arc::new(vectors),
        ],
    )
    .map_err(AppError::from)
}

fn build_vector_column(
    rows: &[IndexRecord],
    dim: usize,
) -> AppResult<arrow_array::FixedSizeListArray> {
    let mut builder = FixedSizeListBuilder::with_capacity(
        Float32Builder::with_capacity(rows.len() * dim),
        dim as i32,
        rows.len(),
    );

    for row in rows {
        if row.vector.len() != dim {
            return Err(AppError::VectorStore(
                "embedding vector size mismatch".to_string(),
            ));
        }
        builder.values().append_slice(&row.vector);
        builder.append(true);
    }

    Ok(builder.finish())
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> AppResult<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| AppError::VectorStore(format!("search result missing {}", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| AppError::VectorStore(format!("{} column type mismatch", name)))
}

pub async fn collect_hits(mut stream: SendableRecordBatchStream) -> AppResult<Vec<IndexHit>> {
    let mut results = Vec::new();

    while let Some(batch) = stream.try_next().await? {
        if batch.num_rows() == 0 {
            continue;
        }

        let source_ids = string_column(&batch, COLUMN_SOURCE_ID)?;
        let table_names = string_column(&batch, COLUMN_TABLE_NAME)?;
        let document_texts = string_column(&batch, COLUMN_DOCUMENT_TEXT)?;
        let columns_json = string_column(&batch, COLUMN_COLUMNS_JSON)?;
        let models = string_column(&batch, COLUMN_EMBEDDING_MODEL)?;
        let row_counts = batch
            .column_by_name(COLUMN_ROW_COUNT)
            .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
            .ok_or_else(|| AppError::VectorStore("row_count column type mismatch".to_string()))?;
        let samples = batch
            .column_by_name(COLUMN_SAMPLE_AVAILABLE)
            .and_then(|c| c.as_any().downcast_ref::<BooleanArray>())
            .ok_or_else(|| {
                AppError::VectorStore("sample_available column type mismatch".to_string())
            })?;
        let ordinals = batch
            .column_by_name(COLUMN_ORDINAL)
            .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
            .ok_or_else(|| AppError::VectorStore("ordinal column type mismatch".to_string()))?;

        let similarities = match batch.column_by_name(COLUMN_DISTANCE) {
            Some(column) => column
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| AppError::VectorStore("distance column type mismatch".to_string()))?
                .iter()
                .map(|value| 1.0 - value.unwrap_or(1.0) as f64)
                .collect::<Vec<f64>>(),
            None => vec![0.0; batch.num_rows()],
        };

        for row_idx in 0..batch.num_rows() {
            let columns: Vec<ColumnInfo> = serde_json::from_str(columns_json.value(row_idx))
                .vector_err("columns_json invalid")?;
            let row_count = row_counts.value(row_idx);

            results.push(IndexHit {
                source_id: source_ids.value(row_idx).to_string(),
                document: SchemaDocument {
                    table_name: table_names.value(row_idx).to_string(),
                    columns,
                    row_count,
                    sample_available: samples.value(row_idx),
                },
                document_text: document_texts.value(row_idx).to_string(),
                embedding_model: models.value(row_idx).to_string(),
                ordinal: ordinals.value(row_idx),
                similarity: similarities.get(row_idx).copied().unwrap_or(0.0),
            });
        }
    }

    Ok(results)
}

/// Descending similarity; NaN sinks to the bottom; ties by ordinal.
pub fn rank_hits(hits: &mut [IndexHit]) {
    hits.sort_by(|a, b| {
        let by_score = match (a.similarity.is_nan(), b.similarity.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => b
                .similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal),
        };
        by_score.then(a.ordinal.cmp(&b.ordinal))
    });
}

pub fn compute_embedding_hash(text: &str) -> String {
    let hash = compute_sha256(text.as_bytes());
    hash.chars().take(16).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(table: &str, similarity: f64, ordinal: i32) -> IndexHit {
        IndexHit {
            source_id: table.to_string(),
            document: SchemaDocument::new(table, Vec::new(), 0),
            document_text: String::new(),
            embedding_model: "test".to_string(),
            ordinal,
            similarity,
        }
    }

    #[test]
    fn rank_orders_by_similarity_then_ordinal() {
        let mut hits = vec![
            hit("c", 0.5, 2),
            hit("nan", f64::NAN, 0),
            hit("a", 0.9, 3),
            hit("b", 0.5, 1),
        ];
        rank_hits(&mut hits);
        let order: Vec<&str> = hits.iter().map(|h| h.document.table_name.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c", "nan"]);
    }

    #[test]
    fn record_batch_rejects_wrong_dimension() {
        let config = VectorConfig {
            vector_size: 4,
            ..VectorConfig::default()
        };
        let schema = build_schema(&config).unwrap();
        let record = IndexRecord::new(
            SchemaDocument::new("sales", Vec::new(), 0),
            vec![0.0; 3],
            "test",
            0,
        );
        assert!(build_record_batch(schema, &[record]).is_err());
    }

    #[test]
    fn embedding_hash_is_short_and_stable() {
        let a = compute_embedding_hash("Table Name: sales");
        assert_eq!(a.len(), 16);
        assert_eq!(a, compute_embedding_hash("Table Name: sales"));
    }
}
