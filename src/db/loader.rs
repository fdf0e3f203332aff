//! 数据集导入
//!
//! CSV 和 Excel（第一个工作表）导入为单张表（类型推断 INTEGER / REAL / TEXT，
//! 空单元格为 NULL）；SQLite 文件原样复制为新的数据库文件。

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use sqlx::Connection;
use tokio::io::AsyncReadExt;

use super::{init_pool, list_user_tables, open_read_only, quote_ident, LoadedDataset};
use crate::error::{AppError, AppResult};
use crate::utils::get_extension;

const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// 推断出的列类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredType {
    Integer,
    Real,
    Text,
}

impl InferredType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            InferredType::Integer => "INTEGER",
            InferredType::Real => "REAL",
            InferredType::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

/// 读出的表格：原始表头 + 按表头宽度对齐的单元格文本
struct RawSheet {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    /// 比表头长、被截掉多余单元格的行数
    overlong_rows: usize,
}

impl RawSheet {
    fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
            overlong_rows: 0,
        }
    }

    fn push(&mut self, mut row: Vec<String>) {
        if row.len() > self.headers.len() {
            self.overlong_rows += 1;
        }
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }
}

/// 把数据集文件导入到 `store_path`（必须是尚不存在的新文件）
pub async fn load_dataset(
    dataset_file: &Path,
    store_path: &Path,
    table_name: &str,
) -> AppResult<LoadedDataset> {
    if !dataset_file.is_file() {
        return Err(AppError::Validation(format!(
            "数据集文件不存在: {}",
            dataset_file.display()
        )));
    }

    let extension = get_extension(&dataset_file.to_string_lossy()).unwrap_or_default();
    let sheet = match extension.as_str() {
        "csv" => read_blocking(dataset_file, read_csv).await?,
        "xlsx" | "xls" => read_blocking(dataset_file, read_excel).await?,
        "db" | "sqlite" | "sqlite3" => return copy_sqlite(dataset_file, store_path).await,
        other => {
            return Err(AppError::Validation(format!(
                "不支持的数据集格式: .{} (支持 .csv / .xlsx / .xls / .db / .sqlite / .sqlite3)",
                other
            )))
        }
    };

    if sheet.overlong_rows > 0 {
        tracing::warn!(
            file = %dataset_file.display(),
            rows = sheet.overlong_rows,
            "rows longer than the header were truncated"
        );
    }

    write_table(&sheet, store_path, table_name, &extension).await
}

/// 文件解析是同步 IO，放到阻塞线程池
async fn read_blocking(
    path: &Path,
    read: fn(&Path) -> AppResult<RawSheet>,
) -> AppResult<RawSheet> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || read(&path))
        .await
        .map_err(|e| AppError::Business(format!("dataset read task failed: {e}")))?
}

fn read_csv(csv_path: &Path) -> AppResult<RawSheet> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(csv_path)?;

    let headers = reader.headers()?.clone();
    if headers.is_empty() || (headers.len() == 1 && headers[0].trim().is_empty()) {
        return Err(AppError::Validation("CSV 文件缺少表头".to_string()));
    }

    let mut sheet = RawSheet::new(headers.iter().map(str::to_string).collect());
    for record in reader.records() {
        let record = record?;
        sheet.push(record.iter().map(str::to_string).collect());
    }
    Ok(sheet)
}

/// 只读第一个工作表，第一行是表头
fn read_excel(path: &Path) -> AppResult<RawSheet> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| AppError::Validation(format!("无法读取 Excel 文件: {e}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::Validation("Excel 文件没有工作表".to_string()))?
        .map_err(|e| AppError::Validation(format!("无法读取工作表: {e}")))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header) if header.iter().any(|cell| !cell_text(cell).trim().is_empty()) => {
            header.iter().map(cell_text).collect()
        }
        _ => return Err(AppError::Validation("Excel 工作表缺少表头".to_string())),
    };

    let mut sheet = RawSheet::new(headers);
    for row in rows {
        sheet.push(row.iter().map(cell_text).collect());
    }
    Ok(sheet)
}

/// Excel 单元格转为与 CSV 相同的文本形式，再走同一套类型推断
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Int(v) => v.to_string(),
        Data::Float(v) => v.to_string(),
        Data::Bool(v) => String::from(if *v { "1" } else { "0" }),
        Data::DateTime(v) => v
            .as_datetime()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| v.as_f64().to_string()),
    }
}

/// 建表并在一个事务里插入全部行
async fn write_table(
    sheet: &RawSheet,
    store_path: &Path,
    table_name: &str,
    format: &str,
) -> AppResult<LoadedDataset> {
    let columns = normalize_headers(sheet.headers.iter().map(String::as_str));
    let types: Vec<InferredType> = (0..columns.len())
        .map(|idx| infer_column_type(sheet.rows.iter().map(|row| row[idx].as_str())))
        .collect();

    let pool = init_pool(store_path).await?;
    let table = quote_ident(table_name);

    let column_defs = columns
        .iter()
        .zip(&types)
        .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.as_sql()))
        .collect::<Vec<_>>()
        .join(", ");
    let insert_sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
        vec!["?"; columns.len()].join(", ")
    );

    let mut tx = pool.begin().await?;
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&format!("CREATE TABLE {} ({})", table, column_defs))
        .execute(&mut *tx)
        .await?;

    for row in &sheet.rows {
        let mut query = sqlx::query(&insert_sql);
        for (value, ty) in row.iter().zip(&types) {
            query = match parse_cell(value, *ty) {
                Cell::Null => query.bind(None::<String>),
                Cell::Integer(v) => query.bind(v),
                Cell::Real(v) => query.bind(v),
                Cell::Text(v) => query.bind(v),
            };
        }
        query.execute(&mut *tx).await?;
    }
    tx.commit().await?;
    pool.close().await;

    tracing::info!(
        table = table_name,
        format,
        columns = columns.len(),
        rows = sheet.rows.len(),
        "tabular dataset loaded"
    );

    Ok(LoadedDataset {
        tables: vec![table_name.to_string()],
        rows_loaded: sheet.rows.len() as u64,
    })
}

async fn copy_sqlite(source: &Path, store_path: &Path) -> AppResult<LoadedDataset> {
    let mut header = [0u8; 16];
    let mut file = tokio::fs::File::open(source).await?;
    let read = file.read(&mut header).await?;
    if read < header.len() || &header != SQLITE_MAGIC {
        return Err(AppError::Validation(format!(
            "不是有效的 SQLite 文件: {}",
            source.display()
        )));
    }
    drop(file);

    tokio::fs::copy(source, store_path).await?;

    let mut conn = open_read_only(store_path).await?;
    let tables = list_user_tables(&mut conn).await;
    conn.close().await?;
    let tables = tables?;

    tracing::info!(tables = tables.len(), "SQLite dataset copied");

    Ok(LoadedDataset {
        tables,
        rows_loaded: 0,
    })
}

/// 表头规范化：去空白、空名补 `column_<i>`、重名加后缀
pub fn normalize_headers<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut result = Vec::new();

    for (idx, raw) in headers.enumerate() {
        let base = match raw.trim() {
            "" => format!("column_{}", idx + 1),
            name => name.to_string(),
        };

        let mut name = base.clone();
        let mut suffix = 2;
        while !seen.insert(name.to_lowercase()) {
            name = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        result.push(name);
    }

    result
}

/// 根据所有非空单元格推断列类型
pub fn infer_column_type<'a>(cells: impl Iterator<Item = &'a str>) -> InferredType {
    let mut inferred = InferredType::Integer;
    let mut any_value = false;

    for cell in cells {
        let cell = cell.trim();
        if cell.is_empty() {
            continue;
        }
        any_value = true;
        match inferred {
            InferredType::Integer if cell.parse::<i64>().is_ok() => {}
            InferredType::Integer | InferredType::Real if is_real(cell) => {
                inferred = InferredType::Real;
            }
            _ => return InferredType::Text,
        }
    }

    if any_value {
        inferred
    } else {
        InferredType::Text
    }
}

fn is_real(cell: &str) -> bool {
    cell.parse::<f64>().map(|v| v.is_finite()).unwrap_or(false)
}

fn parse_cell(raw: &str, ty: InferredType) -> Cell {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Cell::Null;
    }
    match ty {
        InferredType::Integer => trimmed
            .parse::<i64>()
            .map(Cell::Integer)
            .unwrap_or_else(|_| Cell::Text(raw.to_string())),
        InferredType::Real => trimmed
            .parse::<f64>()
            .map(Cell::Real)
            .unwrap_or_else(|_| Cell::Text(raw.to_string())),
        InferredType::Text => Cell::Text(raw.to_string()),
    }
}
