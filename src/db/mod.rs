//! 关系型存储（SQLite）
//!
//! - `pool`: 连接打开（可写连接池 / 只读单连接）
//! - `catalog`: 表、列、行数等元数据读取
//! - `loader`: 把上传的数据集导入为新的数据库文件
//! - `types`: 元数据与结果类型

mod catalog;
mod loader;
mod pool;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::*;
pub use loader::*;
pub use pool::*;
pub use types::*;
