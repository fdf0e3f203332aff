//! Store fixtures shared by pipeline tests.

use std::path::{Path, PathBuf};

use super::init_pool;

/// `sales(city TEXT, amount REAL)` with rows A=10 and B=20.
pub async fn sales_store(dir: &Path) -> PathBuf {
    store_with(
        dir,
        "dataset.sqlite3",
        &[
            "CREATE TABLE sales (city TEXT, amount REAL)",
            "INSERT INTO sales VALUES ('A', 10.0), ('B', 20.0)",
        ],
    )
    .await
}

/// Fresh store at `dir/file_name` after running `statements` in order.
pub async fn store_with(dir: &Path, file_name: &str, statements: &[&str]) -> PathBuf {
    let path = dir.join(file_name);
    let pool = init_pool(&path).await.unwrap();
    for statement in statements {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }
    pool.close().await;
    path
}
