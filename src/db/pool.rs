use std::{path::Path, str::FromStr, time::Duration};

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::ConnectOptions;

use super::DbPool;

fn sqlite_url(db_path: &Path) -> String {
    format!("sqlite://{}", db_path.to_string_lossy())
}

/// 打开（必要时创建）可写的数据集数据库，仅在导入阶段使用
///
/// 数据集文件是单文件交付的，所以不用 WAL，避免遗留 -wal / -shm 文件。
pub async fn init_pool(db_path: impl AsRef<Path>) -> Result<DbPool, sqlx::Error> {
    let db_url = sqlite_url(db_path.as_ref());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}

/// 打开只读单连接
///
/// 文件不存在时直接报错，不会创建空库。调用方负责 `close()`。
pub async fn open_read_only(db_path: impl AsRef<Path>) -> Result<SqliteConnection, sqlx::Error> {
    SqliteConnectOptions::new()
        .filename(db_path.as_ref())
        .read_only(true)
        .create_if_missing(false)
        .busy_timeout(Duration::from_secs(5))
        .connect()
        .await
}
