//! 元数据与查询结果类型

use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};

/// 数据库连接池类型别名
pub type DbPool = Pool<Sqlite>;

/// 列名 + 声明类型，顺序与建表顺序一致
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
}

/// 单张表的 schema 文档，是检索的最小单位
///
/// 索引时由实时元数据生成，嵌入后不再修改；重新导入时整体替换。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    pub row_count: i64,
    pub sample_available: bool,
}

impl SchemaDocument {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnInfo>, row_count: i64) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
            row_count,
            sample_available: row_count > 0,
        }
    }

    /// 嵌入与提示词使用的文本形式
    pub fn to_text(&self) -> String {
        let column_lines = self
            .columns
            .iter()
            .map(|column| {
                if column.declared_type.is_empty() {
                    format!("- {}", column.name)
                } else {
                    format!("- {} ({})", column.name, column.declared_type)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Table Name: {}\n\nColumns:\n{}\n\nRow Count: {}\n\nSample Data Available: {}",
            self.table_name,
            column_lines,
            self.row_count,
            if self.sample_available { "Yes" } else { "No" }
        )
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// 数据集导入结果
#[derive(Debug, Clone, Serialize)]
pub struct LoadedDataset {
    pub tables: Vec<String>,
    pub rows_loaded: u64,
}
