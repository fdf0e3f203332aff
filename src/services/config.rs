//! 应用配置
//!
//! 配置文件为 `<data_dir>/config.json`，缺失字段使用默认值；
//! API Key 可写在配置中，也可以来自环境变量。
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::error::{AppError, AppResult, ResultExt};

pub const CONFIG_FILE_NAME: &str = "config.json";

/// 依次尝试的 API Key 环境变量
const API_KEY_ENV_VARS: &[&str] = &["SQLRAG_API_KEY", "GROQ_API_KEY", "GEMINI_API_KEY"];

/// 存储配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

/// 向量库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub table_name: String,
    pub embedding_model: String,
    pub vector_size: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            table_name: "schema_documents".to_string(),
            embedding_model: "Qdrant/all-MiniLM-L6-v2-onnx".to_string(),
            vector_size: 384,
        }
    }
}

/// 检索配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

/// 文本生成模型配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `openai`（任意 OpenAI 兼容端点，默认 Groq）或 `gemini`
    pub provider: String,
    pub model: String,
    pub api_key: String,
    /// 为空时使用 provider 的默认地址
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key: String::new(),
            base_url: None,
            max_tokens: 500,
            timeout_secs: 60,
        }
    }
}

/// 数据集导入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// CSV 导入后的表名
    pub table_name: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            table_name: "sales".to_string(),
        }
    }
}

/// 执行器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_rows: usize,
    pub min_query_len: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_rows: 100,
            min_query_len: 5,
        }
    }
}

/// 答案生成配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerConfig {
    pub enabled: bool,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// 配置数据结构
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub version: u32,
    pub storage: StorageConfig,
    pub vector: VectorConfig,
    pub retrieval: RetrievalConfig,
    pub llm: LlmConfig,
    pub dataset: DatasetConfig,
    pub executor: ExecutorConfig,
    pub answer: AnswerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            storage: StorageConfig::default(),
            vector: VectorConfig::default(),
            retrieval: RetrievalConfig::default(),
            llm: LlmConfig::default(),
            dataset: DatasetConfig::default(),
            executor: ExecutorConfig::default(),
            answer: AnswerConfig::default(),
        }
    }
}

impl AppConfig {
    /// 指定数据目录的默认配置
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let mut config = Self::default();
        config.storage.data_dir = data_dir.as_ref().to_string_lossy().to_string();
        config
    }

    /// 加载配置（如果文件不存在则返回默认配置）
    pub fn load(data_dir: impl AsRef<Path>) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        let config_path = data_dir.join(CONFIG_FILE_NAME);

        let mut config = if config_path.exists() {
            let raw = fs::read(&config_path)?;
            serde_json::from_slice::<AppConfig>(&raw).config_err("config.json 解析失败")?
        } else {
            AppConfig::default()
        };

        config.apply_defaults(data_dir);
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// 保存配置
    pub fn save(&self) -> AppResult<()> {
        let data_dir = self.data_dir();
        fs::create_dir_all(&data_dir)?;
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(data_dir.join(CONFIG_FILE_NAME), json)?;
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir)
    }

    fn apply_defaults(&mut self, data_dir: &Path) {
        if self.storage.data_dir.trim().is_empty() {
            self.storage.data_dir = data_dir.to_string_lossy().to_string();
        }
        if self.retrieval.top_k == 0 {
            self.retrieval.top_k = RetrievalConfig::default().top_k;
        }
        if self.executor.max_rows == 0 {
            self.executor.max_rows = ExecutorConfig::default().max_rows;
        }
    }

    fn apply_env(&mut self) {
        if !self.llm.api_key.trim().is_empty() {
            return;
        }
        if let Some(key) = API_KEY_ENV_VARS
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|value| !value.trim().is_empty())
        {
            self.llm.api_key = key;
        }
    }

    fn validate(&self) -> AppResult<()> {
        match self.llm.provider.to_lowercase().as_str() {
            "openai" | "groq" | "gemini" | "google" => {}
            other => {
                return Err(AppError::Config(format!("不支持的 provider: {}", other)));
            }
        }
        if self.vector.vector_size == 0 {
            return Err(AppError::Config("vector_size 必须大于 0".to_string()));
        }
        Ok(())
    }
}

/// 系统标准的应用数据目录
pub fn default_data_dir() -> AppResult<PathBuf> {
    ProjectDirs::from("dev", "sqlrag", "sqlrag")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| AppError::Config("无法确定应用数据目录".to_string()))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn load_without_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load(dir.path()).unwrap();

        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.executor.max_rows, 100);
        assert_eq!(config.dataset.table_name, "sales");
        assert_eq!(config.llm.max_tokens, 500);
        assert_eq!(config.data_dir(), dir.path());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{ "retrieval": { "top_k": 5 }, "llm": { "provider": "gemini", "model": "gemini-2.0-flash" } }"#,
        )
        .unwrap();

        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.llm.provider, "gemini");
        assert_eq!(config.llm.timeout_secs, 60);
        assert_eq!(config.vector.vector_size, 384);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{ "llm": { "provider": "carrier-pigeon" } }"#,
        )
        .unwrap();

        assert!(matches!(AppConfig::load(dir.path()), Err(AppError::Config(_))));
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::with_data_dir(dir.path());
        config.answer.enabled = false;
        config.save().unwrap();

        let loaded = AppConfig::load(dir.path()).unwrap();
        assert!(!loaded.answer.enabled);
    }
}
