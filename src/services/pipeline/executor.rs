use std::path::{Path, PathBuf};

use futures_util::TryStreamExt;
use serde_json::{Number, Value};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Executor, Row, Statement, TypeInfo, ValueRef};

use super::sanitize::carries_sentinel;
use super::{ExecutionResult, QueryTable};
use crate::db::open_read_only;
use crate::error::{PreconditionFailure, QueryError};

/// SQLITE_ERROR: unknown table or column, syntax error
const SQLITE_GENERIC_ERROR: &str = "1";

/// Runs one cleaned statement against the store, read-only.
pub struct QueryExecutor {
    store_path: PathBuf,
    max_rows: usize,
    min_query_len: usize,
}

impl QueryExecutor {
    pub fn new(store_path: &Path, max_rows: usize, min_query_len: usize) -> Self {
        Self {
            store_path: store_path.to_path_buf(),
            max_rows: max_rows.max(1),
            min_query_len,
        }
    }

    pub async fn execute(&self, sql: &str) -> ExecutionResult {
        self.check(sql)?;

        let mut conn = open_read_only(&self.store_path)
            .await
            .map_err(|e| QueryError::Execution(format!("cannot open store: {e}")))?;

        let result = fetch_table(&mut conn, sql.trim(), self.max_rows).await;

        if let Err(err) = conn.close().await {
            tracing::warn!(error = %err, "closing read-only connection failed");
        }

        match result {
            Ok(table) => {
                tracing::debug!(
                    rows = table.rows.len(),
                    truncated = table.truncated,
                    "query executed"
                );
                Ok(table)
            }
            Err(err) => {
                tracing::warn!(error = %err, sql = %sql, "query failed");
                Err(classify_error(err))
            }
        }
    }

    /// Rejections that never reach the engine.
    fn check(&self, sql: &str) -> Result<(), QueryError> {
        if carries_sentinel(sql) {
            return Err(QueryError::GenerationSentinel(sql.trim().to_string()));
        }
        if sql.trim().chars().count() < self.min_query_len {
            return Err(QueryError::Precondition(PreconditionFailure::EmptyQuery));
        }
        if !self.store_path.is_file() {
            return Err(QueryError::Precondition(PreconditionFailure::MissingStore(
                self.store_path.clone(),
            )));
        }
        Ok(())
    }
}

async fn fetch_table(
    conn: &mut SqliteConnection,
    sql: &str,
    max_rows: usize,
) -> Result<QueryTable, sqlx::Error> {
    let mut table = QueryTable::default();

    {
        let mut stream = sqlx::query(sql).fetch(&mut *conn);
        while let Some(row) = stream.try_next().await? {
            if table.rows.len() == max_rows {
                table.truncated = true;
                break;
            }
            if table.columns.is_empty() {
                table.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
            }
            table.rows.push(decode_row(&row)?);
        }
    }

    if table.columns.is_empty() {
        let statement = (&mut *conn).prepare(sql).await?;
        table.columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
    }

    Ok(table)
}

fn decode_row(row: &SqliteRow) -> Result<Vec<Value>, sqlx::Error> {
    (0..row.len()).map(|idx| decode_value(row, idx)).collect()
}

/// SQLite is dynamically typed, so decode by the value's storage class
/// rather than the column's declared type.
fn decode_value(row: &SqliteRow, idx: usize) -> Result<Value, sqlx::Error> {
    let storage = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        raw.type_info().name().to_ascii_uppercase()
    };

    let value = match storage.as_str() {
        "INTEGER" | "BIGINT" | "INT8" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(idx)?),
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => {
            float_value(row.try_get_unchecked::<f64, _>(idx)?)
        }
        "BLOB" => {
            let bytes: Vec<u8> = row.try_get_unchecked(idx)?;
            Value::String(format!("<blob {} bytes>", bytes.len()))
        }
        _ => Value::String(row.try_get_unchecked::<String, _>(idx)?),
    };

    Ok(value)
}

fn float_value(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

fn classify_error(err: sqlx::Error) -> QueryError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            let generic = db_err.code().as_deref() == Some(SQLITE_GENERIC_ERROR);
            if generic || is_schema_message(&message) {
                QueryError::SyntaxOrSchema(message)
            } else {
                QueryError::Execution(message)
            }
        }
        _ => QueryError::Execution(err.to_string()),
    }
}

fn is_schema_message(message: &str) -> bool {
    let message = message.to_lowercase();
    ["no such table", "no such column", "syntax error", "ambiguous column"]
        .iter()
        .any(|needle| message.contains(needle))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::db::testing::{sales_store, store_with};

    #[tokio::test]
    async fn select_returns_columns_and_rows() {
        let dir = tempdir().unwrap();
        let store = sales_store(dir.path()).await;
        let executor = QueryExecutor::new(&store, 100, 5);

        let table = executor
            .execute("SELECT city, amount FROM sales ORDER BY city LIMIT 100")
            .await
            .unwrap();

        assert_eq!(table.columns, vec!["city", "amount"]);
        assert_eq!(
            table.rows,
            vec![vec![json!("A"), json!(10.0)], vec![json!("B"), json!(20.0)]]
        );
        assert!(!table.truncated);
    }

    #[tokio::test]
    async fn aggregate_sums_amount() {
        let dir = tempdir().unwrap();
        let store = sales_store(dir.path()).await;
        let table = QueryExecutor::new(&store, 100, 5)
            .execute("SELECT SUM(amount) AS total FROM sales")
            .await
            .unwrap();

        assert_eq!(table.columns, vec!["total"]);
        assert_eq!(table.rows[0][0].as_f64(), Some(30.0));
    }

    #[tokio::test]
    async fn zero_matches_is_success_with_column_names() {
        let dir = tempdir().unwrap();
        let store = sales_store(dir.path()).await;
        let table = QueryExecutor::new(&store, 100, 5)
            .execute("SELECT city FROM sales WHERE amount > 1000")
            .await
            .unwrap();

        assert!(table.is_empty());
        assert_eq!(table.columns, vec!["city"]);
    }

    #[tokio::test]
    async fn sentinel_is_never_executed() {
        let dir = tempdir().unwrap();
        let executor = QueryExecutor::new(&dir.path().join("missing.sqlite3"), 100, 5);

        let err = executor
            .execute("ERROR: Cannot answer this question with available data")
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::GenerationSentinel(_)));
    }

    #[tokio::test]
    async fn short_or_empty_query_is_a_precondition() {
        let dir = tempdir().unwrap();
        let store = sales_store(dir.path()).await;
        let executor = QueryExecutor::new(&store, 100, 5);

        for sql in ["", "   ", "SEL"] {
            let err = executor.execute(sql).await.unwrap_err();
            assert_eq!(err, QueryError::Precondition(PreconditionFailure::EmptyQuery));
        }
    }

    #[tokio::test]
    async fn missing_store_cites_the_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.sqlite3");
        let err = QueryExecutor::new(&path, 100, 5)
            .execute("SELECT 1 AS one")
            .await
            .unwrap_err();

        assert_eq!(
            err,
            QueryError::Precondition(PreconditionFailure::MissingStore(path.clone()))
        );
        assert!(err.to_string().contains(&path.display().to_string()));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn unknown_column_is_syntax_or_schema() {
        let dir = tempdir().unwrap();
        let store = sales_store(dir.path()).await;
        let executor = QueryExecutor::new(&store, 100, 5);

        let err = executor.execute("SELECT amt FROM sales").await.unwrap_err();
        assert!(matches!(err, QueryError::SyntaxOrSchema(_)));
        assert!(err.hint().is_some());

        let err = executor.execute("SELEC city FROM sales").await.unwrap_err();
        assert!(matches!(err, QueryError::SyntaxOrSchema(_)));
    }

    #[tokio::test]
    async fn writes_fail_on_read_only_connection() {
        let dir = tempdir().unwrap();
        let store = sales_store(dir.path()).await;
        let executor = QueryExecutor::new(&store, 100, 5);

        let err = executor.execute("DELETE FROM sales").await.unwrap_err();
        assert!(matches!(err, QueryError::Execution(_)));

        let table = executor.execute("SELECT COUNT(*) AS n FROM sales").await.unwrap();
        assert_eq!(table.rows[0][0], json!(2));
    }

    #[tokio::test]
    async fn row_cap_sets_truncated() {
        let dir = tempdir().unwrap();
        let store = store_with(
            dir.path(),
            "numbers.sqlite3",
            &[
                "CREATE TABLE numbers (n INTEGER)",
                "WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < 150) \
                 INSERT INTO numbers SELECT n FROM seq",
            ],
        )
        .await;

        let table = QueryExecutor::new(&store, 100, 5)
            .execute("SELECT n FROM numbers ORDER BY n")
            .await
            .unwrap();
        assert_eq!(table.rows.len(), 100);
        assert!(table.truncated);
        assert_eq!(table.rows[99][0], json!(100));
    }

    #[tokio::test]
    async fn storage_classes_map_to_json() {
        let dir = tempdir().unwrap();
        let store = sales_store(dir.path()).await;
        let table = QueryExecutor::new(&store, 100, 5)
            .execute("SELECT 7 AS i, 2.5 AS r, 'x' AS t, NULL AS n, x'0102' AS b")
            .await
            .unwrap();

        assert_eq!(
            table.rows[0],
            vec![json!(7), json!(2.5), json!("x"), Value::Null, json!("<blob 2 bytes>")]
        );
    }
}
