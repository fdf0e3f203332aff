//! 数据集代（generation）
//!
//! 每次导入都在 `<data_dir>/generations/<uuid>/` 下生成一套完整数据：
//! `dataset.sqlite3`（关系库）和 `lancedb/`（向量索引）。两者同生同灭，
//! 查询看到的永远是同一代的库和索引。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::{SchemaIndex, VectorConfig};
use crate::utils::write_atomic;

pub const GENERATIONS_DIR: &str = "generations";
pub const STORE_FILE_NAME: &str = "dataset.sqlite3";
pub const INDEX_DIR_NAME: &str = "lancedb";
pub const ACTIVE_FILE_NAME: &str = "ACTIVE";

/// `ACTIVE` 文件内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationMarker {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

pub struct Generation {
    pub id: String,
    pub dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub index: SchemaIndex,
}

impl Generation {
    /// 新建空目录和空索引
    pub async fn create(data_dir: &Path, vector: &VectorConfig) -> AppResult<Self> {
        let id = Uuid::new_v4().to_string();
        let dir = data_dir.join(GENERATIONS_DIR).join(&id);
        tokio::fs::create_dir_all(&dir).await?;

        let index = match SchemaIndex::open(&dir.join(INDEX_DIR_NAME), vector).await {
            Ok(index) => index,
            Err(err) => {
                let _ = tokio::fs::remove_dir_all(&dir).await;
                return Err(err);
            }
        };

        Ok(Self {
            id,
            dir,
            created_at: Utc::now(),
            index,
        })
    }

    /// 按 `ACTIVE` 记录恢复已有的一代
    pub async fn restore(
        data_dir: &Path,
        marker: &GenerationMarker,
        vector: &VectorConfig,
    ) -> AppResult<Self> {
        let dir = data_dir.join(GENERATIONS_DIR).join(&marker.id);
        if !dir.join(STORE_FILE_NAME).is_file() {
            return Err(AppError::Business(format!(
                "generation {} 缺少数据库文件",
                marker.id
            )));
        }

        let index = SchemaIndex::open(&dir.join(INDEX_DIR_NAME), vector).await?;
        Ok(Self {
            id: marker.id.clone(),
            dir,
            created_at: marker.created_at,
            index,
        })
    }

    pub fn store_path(&self) -> PathBuf {
        self.dir.join(STORE_FILE_NAME)
    }

    pub fn marker(&self) -> GenerationMarker {
        GenerationMarker {
            id: self.id.clone(),
            created_at: self.created_at,
        }
    }

    /// 关闭索引句柄并删除整个目录
    pub async fn discard(self) {
        let Generation { id, dir, index, .. } = self;
        drop(index);
        if let Err(err) = tokio::fs::remove_dir_all(&dir).await {
            tracing::warn!(generation = %id, error = %err, "failed to remove generation directory");
        }
    }
}

pub fn read_marker(data_dir: &Path) -> AppResult<Option<GenerationMarker>> {
    let path = data_dir.join(ACTIVE_FILE_NAME);
    if !path.is_file() {
        return Ok(None);
    }
    let raw = std::fs::read(&path)?;
    Ok(Some(serde_json::from_slice(&raw)?))
}

pub fn write_marker(data_dir: &Path, marker: &GenerationMarker) -> AppResult<()> {
    let json = serde_json::to_vec_pretty(marker)?;
    write_atomic(&data_dir.join(ACTIVE_FILE_NAME), &json)?;
    Ok(())
}

/// 删除除 `keep` 之外的所有代目录（上次导入中途退出留下的残留）
pub async fn sweep_stale(data_dir: &Path, keep: Option<&str>) -> AppResult<usize> {
    let root = data_dir.join(GENERATIONS_DIR);
    if !root.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(&root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if Some(name.as_str()) == keep || !entry.file_type().await?.is_dir() {
            continue;
        }
        tokio::fs::remove_dir_all(entry.path()).await?;
        removed += 1;
    }
    Ok(removed)
}
