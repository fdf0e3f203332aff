//! 元数据读取：用户表、列信息、行数

use sqlx::sqlite::SqliteConnection;
use sqlx::Row;

use super::{ColumnInfo, SchemaDocument};
use crate::error::{AppError, AppResult};

/// 把标识符包成 SQLite 双引号形式，内部的双引号翻倍
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// 列出所有用户表（排除 `sqlite_` 开头的内部表），按名称排序
pub async fn list_user_tables(conn: &mut SqliteConnection) -> AppResult<Vec<String>> {
    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY name",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(tables)
}

/// 读取列信息，顺序与建表声明一致
pub async fn table_columns(conn: &mut SqliteConnection, table: &str) -> AppResult<Vec<ColumnInfo>> {
    let sql = format!("PRAGMA table_info({})", quote_ident(table));
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

    rows.iter()
        .map(|row| {
            Ok(ColumnInfo {
                name: row.try_get::<String, _>("name")?,
                declared_type: row.try_get::<String, _>("type")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(AppError::from)
}

pub async fn row_count(conn: &mut SqliteConnection, table: &str) -> AppResult<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *conn).await?;
    Ok(count)
}

/// 生成单张表的 schema 文档；没有列的表视为错误，由调用方决定跳过
pub async fn describe_table(conn: &mut SqliteConnection, table: &str) -> AppResult<SchemaDocument> {
    let columns = table_columns(conn, table).await?;
    if columns.is_empty() {
        return Err(AppError::Validation(format!("表 {} 没有任何列", table)));
    }
    let count = row_count(conn, table).await?;
    Ok(SchemaDocument::new(table, columns, count))
}
