//! 通用验证函数

use crate::error::{AppError, AppResult};

/// 验证字符串非空（通用）
///
/// 返回 trim 后的字符串引用
pub fn validate_not_empty<'a>(value: &'a str, field_name: &str) -> AppResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} 不能为空", field_name)));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_not_empty() {
        assert!(validate_not_empty("  ", "question").is_err());
        assert!(validate_not_empty("", "question").is_err());
        assert_eq!(validate_not_empty("  hello  ", "question").unwrap(), "hello");
    }
}
