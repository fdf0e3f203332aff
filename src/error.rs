//! 统一错误类型定义
//!
//! 两层错误：
//! - `AppError`：基础设施错误（数据库、文件、向量库、模型服务），配合 `AppResult` 和 `?` 使用；
//! - `QueryError`：单个问题生命周期中的结构化错误类别，调用方根据它分支处理，永远不会让进程崩溃。

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// 应用级统一错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 数据库错误
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    /// 文件操作错误
    #[error("文件操作错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV 解析错误
    #[error("CSV 解析错误: {0}")]
    Csv(#[from] csv::Error),

    /// 向量库错误（LanceDB / Arrow）
    #[error("向量库错误: {0}")]
    VectorStore(String),

    /// 验证错误（输入参数不合法）
    #[error("验证失败: {0}")]
    Validation(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// AI 服务错误
    #[error("AI 服务错误: {0}")]
    AiService(String),

    /// 业务逻辑错误
    #[error("{0}")]
    Business(String),
}

impl From<lancedb::Error> for AppError {
    fn from(err: lancedb::Error) -> Self {
        AppError::VectorStore(err.to_string())
    }
}

impl From<arrow_schema::ArrowError> for AppError {
    fn from(err: arrow_schema::ArrowError) -> Self {
        AppError::VectorStore(err.to_string())
    }
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Io(_) => "io",
            AppError::Json(_) => "json",
            AppError::Csv(_) => "csv",
            AppError::VectorStore(_) => "vector_store",
            AppError::Validation(_) => "validation",
            AppError::Config(_) => "config",
            AppError::AiService(_) => "ai_service",
            AppError::Business(_) => "business",
        }
    }
}

// ========== Serialize 实现：调用方拿到 {type, message} ==========

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("AppError", 2)?;
        state.serialize_field("type", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// 应用级 Result 类型别名
pub type AppResult<T> = Result<T, AppError>;

// ========== 扩展 trait：为 Result 添加上下文方法 ==========

/// 为 Result 类型添加错误上下文转换方法
pub trait ResultExt<T> {
    /// 将错误转换为配置错误
    fn config_err(self, msg: &str) -> AppResult<T>;

    /// 将错误转换为 AI 服务错误
    fn ai_err(self, msg: &str) -> AppResult<T>;

    /// 将错误转换为向量库错误
    fn vector_err(self, msg: &str) -> AppResult<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn config_err(self, msg: &str) -> AppResult<T> {
        self.map_err(|e| AppError::Config(format!("{}: {}", msg, e)))
    }

    fn ai_err(self, msg: &str) -> AppResult<T> {
        self.map_err(|e| AppError::AiService(format!("{}: {}", msg, e)))
    }

    fn vector_err(self, msg: &str) -> AppResult<T> {
        self.map_err(|e| AppError::VectorStore(format!("{}: {}", msg, e)))
    }
}

// ========== 问题级错误类别 ==========

/// 执行前置条件失败的具体原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionFailure {
    /// SQL 为空或过短
    EmptyQuery,
    /// 数据库文件不存在
    MissingStore(PathBuf),
}

/// 单个问题在流水线中可能出现的错误类别
///
/// 所有类别都不是致命错误，都以结构化结果返回给调用方。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// 向量检索不可用，已降级为表名列表（不终止请求）
    #[error("Schema retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// 模型明确表示无法回答，原文透传
    #[error("{0}")]
    GenerationSentinel(String),

    /// 模型调用本身失败（网络、鉴权、超时）
    #[error("SQL generation failed: {0}")]
    GenerationFailure(String),

    /// 执行前即被拒绝
    #[error("{}", precondition_message(.0))]
    Precondition(PreconditionFailure),

    /// 引擎因标识符错误或语法错误拒绝 SQL
    #[error("SQL Error: {0}. {hint}", hint = SCHEMA_HINT)]
    SyntaxOrSchema(String),

    /// 其他执行期错误
    #[error("Execution Error: {0}")]
    Execution(String),
}

const SCHEMA_HINT: &str = "Please check table and column names.";

fn precondition_message(failure: &PreconditionFailure) -> String {
    match failure {
        PreconditionFailure::EmptyQuery => "Query is empty or too short".to_string(),
        PreconditionFailure::MissingStore(path) => format!(
            "Database file not found at {}. Please upload a file first.",
            path.display()
        ),
    }
}

impl QueryError {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::RetrievalUnavailable(_) => "retrieval_unavailable",
            QueryError::GenerationSentinel(_) => "generation_sentinel",
            QueryError::GenerationFailure(_) => "generation_failure",
            QueryError::Precondition(PreconditionFailure::EmptyQuery) => "precondition_empty_query",
            QueryError::Precondition(PreconditionFailure::MissingStore(_)) => {
                "precondition_missing_store"
            }
            QueryError::SyntaxOrSchema(_) => "syntax_or_schema",
            QueryError::Execution(_) => "execution",
        }
    }

    /// 给调用方的修复提示，只有部分类别有
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            QueryError::SyntaxOrSchema(_) => Some(SCHEMA_HINT),
            QueryError::Precondition(PreconditionFailure::MissingStore(_)) => {
                Some("Upload a dataset before asking questions.")
            }
            QueryError::GenerationSentinel(_) => {
                Some("Rephrase the question using the available tables.")
            }
            _ => None,
        }
    }
}

impl Serialize for QueryError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("QueryError", 3)?;
        state.serialize_field("type", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.serialize_field("hint", &self.hint())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_error_serializes_type_and_message() {
        let err = AppError::Validation("bad input".to_string());
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "validation");
        assert_eq!(value["message"], "验证失败: bad input");
    }

    #[test]
    fn syntax_error_carries_hint() {
        let err = QueryError::SyntaxOrSchema("no such column: amt".to_string());
        assert_eq!(
            err.to_string(),
            "SQL Error: no such column: amt. Please check table and column names."
        );
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "syntax_or_schema");
        assert_eq!(value["hint"], "Please check table and column names.");
    }

    #[test]
    fn missing_store_message_cites_path() {
        let err = QueryError::Precondition(PreconditionFailure::MissingStore(PathBuf::from(
            "/tmp/nowhere/dataset.sqlite3",
        )));
        assert!(err.to_string().contains("/tmp/nowhere/dataset.sqlite3"));
        assert_eq!(err.kind(), "precondition_missing_store");
    }

    #[test]
    fn execution_error_has_no_hint() {
        let err = QueryError::Execution("disk I/O error".to_string());
        assert!(err.hint().is_none());
        assert_eq!(err.to_string(), "Execution Error: disk I/O error");
    }
}
