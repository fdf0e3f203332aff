//! 数据集句柄
//!
//! `Workspace` 持有当前活跃的一代数据。提问全程拿读锁，导入只在切换时拿写锁：
//! 替换数据集时不会有查询看到半新半旧的库和索引。

mod generation;


use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::db::{load_dataset, SchemaDocument};
use crate::error::{AppError, AppResult, PreconditionFailure, QueryError};
use crate::services::pipeline::{
    index_store, serialize_secs, AnswerSynthesizer, IndexOutcome, QueryExecutor, QueryStage,
    RetrievalSource, SchemaRetriever, SqlGenerator,
};
use crate::services::{AppConfig, Embedder, TextGenerator};
use crate::utils::validate_not_empty;

pub use generation::{
    read_marker, sweep_stale, write_marker, Generation, GenerationMarker, ACTIVE_FILE_NAME,
    GENERATIONS_DIR, INDEX_DIR_NAME, STORE_FILE_NAME,
};

/// 一次提问的完整结果，任何失败都落在 `error` 里
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub question: String,
    pub sql: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub truncated: bool,
    pub error: Option<QueryError>,
    /// 检索降级为表名列表时记录原因，不影响后续阶段
    pub warning: Option<QueryError>,
    #[serde(serialize_with = "serialize_secs")]
    pub latency: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub generation_latency: Duration,
    pub sources: Vec<String>,
    pub retrieval_source: Option<RetrievalSource>,
    pub stages: Vec<QueryStage>,
    pub answer: Option<String>,
}

impl AskResponse {
    fn new(question: &str) -> Self {
        Self {
            question: question.to_string(),
            sql: None,
            columns: Vec::new(),
            rows: Vec::new(),
            truncated: false,
            error: None,
            warning: None,
            latency: Duration::ZERO,
            generation_latency: Duration::ZERO,
            sources: Vec::new(),
            retrieval_source: None,
            stages: vec![QueryStage::Received],
            answer: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn fail(&mut self, error: QueryError) {
        self.stages.push(QueryStage::Errored);
        self.error = Some(error);
    }
}

/// 导入结果
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub generation_id: String,
    pub tables: Vec<String>,
    pub indexed: IndexOutcome,
    pub rows_loaded: u64,
}

pub struct Workspace {
    config: AppConfig,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn TextGenerator>,
    active: RwLock<Option<Generation>>,
    ingest_lock: Mutex<()>,
}

impl Workspace {
    /// 打开数据目录，恢复 `ACTIVE` 指向的那一代（如果有）
    pub async fn open(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn TextGenerator>,
    ) -> AppResult<Self> {
        if embedder.dimension() != config.vector.vector_size as usize {
            return Err(AppError::Config(format!(
                "embedder dimension {} 与 vector_size {} 不一致",
                embedder.dimension(),
                config.vector.vector_size
            )));
        }

        let data_dir = config.data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let marker = read_marker(&data_dir)?;
        let active = match &marker {
            Some(marker) => match Generation::restore(&data_dir, marker, &config.vector).await {
                Ok(generation) => {
                    tracing::info!(generation = %generation.id, "restored active dataset");
                    Some(generation)
                }
                Err(err) => {
                    tracing::warn!(generation = %marker.id, error = %err, "active dataset unavailable");
                    None
                }
            },
            None => None,
        };

        // 恢复失败时目录也保留，`ACTIVE` 仍指向它
        let keep = marker.as_ref().map(|m| m.id.as_str());
        let removed = sweep_stale(&data_dir, keep).await?;
        if removed > 0 {
            tracing::info!(removed, "removed stale generation directories");
        }

        Ok(Self {
            config,
            embedder,
            generator,
            active: RwLock::new(active),
            ingest_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn data_dir(&self) -> PathBuf {
        self.config.data_dir()
    }

    pub async fn active_generation(&self) -> Option<GenerationMarker> {
        self.active.read().await.as_ref().map(Generation::marker)
    }

    /// 导入数据集：新建一代、导入、建索引，成功后原子切换
    ///
    /// 构建在锁外进行，只有切换时才拿写锁；导入之间用 `ingest_lock` 串行。
    /// 任何一步失败都丢弃新目录，之前的数据集保持可用。
    pub async fn ingest(&self, dataset_file: &Path) -> AppResult<IngestReport> {
        let _serial = self.ingest_lock.lock().await;
        let data_dir = self.data_dir();

        let generation = Generation::create(&data_dir, &self.config.vector).await?;
        tracing::info!(
            generation = %generation.id,
            file = %dataset_file.display(),
            "ingesting dataset"
        );

        let built = self.build(&generation, dataset_file).await;
        let (loaded, outcome) = match built {
            Ok(built) => built,
            Err(err) => {
                generation.discard().await;
                return Err(err);
            }
        };

        let tables = match &outcome {
            IndexOutcome::Indexed { tables, .. } => tables.clone(),
            IndexOutcome::NothingToIndex { reason } => {
                let reason = reason.clone();
                generation.discard().await;
                return Err(AppError::Validation(format!("数据集没有可用的表: {}", reason)));
            }
        };

        let report = IngestReport {
            generation_id: generation.id.clone(),
            tables,
            indexed: outcome,
            rows_loaded: loaded.rows_loaded,
        };

        let previous = {
            let mut active = self.active.write().await;
            if let Err(err) = write_marker(&data_dir, &generation.marker()) {
                drop(active);
                generation.discard().await;
                return Err(err);
            }
            active.replace(generation)
        };

        if let Some(previous) = previous {
            tracing::debug!(generation = %previous.id, "retiring previous dataset");
            previous.discard().await;
        }

        tracing::info!(
            generation = %report.generation_id,
            tables = report.tables.len(),
            rows = report.rows_loaded,
            "dataset active"
        );
        Ok(report)
    }

    async fn build(
        &self,
        generation: &Generation,
        dataset_file: &Path,
    ) -> AppResult<(crate::db::LoadedDataset, IndexOutcome)> {
        let store_path = generation.store_path();
        let loaded =
            load_dataset(dataset_file, &store_path, &self.config.dataset.table_name).await?;
        let outcome = index_store(&store_path, &generation.index, self.embedder.as_ref()).await?;
        Ok((loaded, outcome))
    }

    /// 提问：检索 → 生成 SQL → 执行 →（可选）生成回答
    ///
    /// 不返回 `Err`，所有失败都记录在 `AskResponse::error`。
    pub async fn ask(&self, question: &str) -> AskResponse {
        let started = Instant::now();
        let mut response = AskResponse::new(question);

        let active = self.active.read().await;
        self.run(active.as_ref(), question, &mut response).await;
        drop(active);

        response.latency = started.elapsed();
        match &response.error {
            None => tracing::info!(
                latency_ms = response.latency.as_millis() as u64,
                rows = response.rows.len(),
                "question answered"
            ),
            Some(err) => tracing::warn!(
                latency_ms = response.latency.as_millis() as u64,
                kind = err.kind(),
                error = %err,
                "question failed"
            ),
        }
        response
    }

    async fn run(&self, generation: Option<&Generation>, question: &str, response: &mut AskResponse) {
        let Some(generation) = generation else {
            response.fail(QueryError::Precondition(PreconditionFailure::MissingStore(
                self.data_dir().join(STORE_FILE_NAME),
            )));
            return;
        };
        let question = match validate_not_empty(question, "question") {
            Ok(question) => question,
            Err(_) => {
                response.fail(QueryError::Precondition(PreconditionFailure::EmptyQuery));
                return;
            }
        };
        let store_path = generation.store_path();

        let retrieval = SchemaRetriever::new(self.embedder.as_ref(), &generation.index, &store_path)
            .retrieve(question, self.config.retrieval.top_k)
            .await;
        response.stages.push(QueryStage::SchemaRetrieved);
        response.retrieval_source = Some(retrieval.source);
        response.sources = retrieval.source_table_names.clone();
        if let Some(reason) = &retrieval.fallback_reason {
            response.warning = Some(QueryError::RetrievalUnavailable(reason.clone()));
        }

        let generated = SqlGenerator::new(self.generator.as_ref(), self.config.llm.max_tokens)
            .generate(question, &retrieval.context_text)
            .await;
        response.stages.push(QueryStage::SqlGenerated);
        response.sql = Some(generated.cleaned_sql.clone());
        response.generation_latency = generated.generation_latency;

        let sql = match (generated.sql(), generated.error()) {
            (Some(sql), _) => sql,
            (None, error) => {
                response.stages.push(QueryStage::Rejected);
                response.fail(error.unwrap_or_else(|| {
                    QueryError::GenerationFailure("no SQL produced".to_string())
                }));
                return;
            }
        };

        let executor = QueryExecutor::new(
            &store_path,
            self.config.executor.max_rows,
            self.config.executor.min_query_len,
        );
        let table = match executor.execute(sql).await {
            Ok(table) => table,
            Err(err) => {
                response.stages.push(match err {
                    QueryError::SyntaxOrSchema(_) | QueryError::Execution(_) => QueryStage::Executed,
                    _ => QueryStage::Rejected,
                });
                response.fail(err);
                return;
            }
        };
        response.stages.push(QueryStage::Executed);

        if self.config.answer.enabled {
            let answer = AnswerSynthesizer::new(self.generator.as_ref())
                .synthesize(question, &table, &response.sources)
                .await;
            response.answer = Some(answer);
        }

        response.columns = table.columns;
        response.rows = table.rows;
        response.truncated = table.truncated;
        response.stages.push(QueryStage::Reported);
    }

    /// 当前数据集的 schema 文档，按索引顺序
    pub async fn schema(&self) -> AppResult<Vec<SchemaDocument>> {
        let active = self.active.read().await;
        match active.as_ref() {
            Some(generation) => generation.index.documents().await,
            None => Ok(Vec::new()),
        }
    }
}
