//! Model output → one SQL statement
//!
//! The model is told to answer with bare SQL but does not always comply, so
//! the completion is treated as untrusted text and normalized in layers:
//! code fences, then a conversational lead-in, then `--` comments and
//! everything after the first statement, then whitespace. A sentinel reply
//! skips the statement cut and is passed on whole.

use once_cell::sync::Lazy;
use regex::Regex;

use super::ERROR_SENTINEL;

/// A fence marker plus its info string. The tag either ends the line
/// (```` ```sqlite\n ````) or is a dialect name used inline (```` ```sql SELECT ````).
const FENCE_OPEN: &str = r"```(?:[A-Za-z0-9_+-]*[ \t]*\r?\n|(?i:sqlite3?|sql|mysql|postgres(?:ql)?|psql)\b)?";

static FENCE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(FENCE_OPEN).unwrap());

static FENCED_BLOCK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?s){FENCE_OPEN}(.*?)```")).unwrap());

/// Lead-in, then a mention of the query/SQL, then a colon on the same line.
static PREAMBLE_COLON_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:here(?:'s|’s)?|the|this)\b[^:\n]{0,80}?\b(?:query|sql)\b[^:\n]{0,40}:\s*")
        .unwrap()
});

/// Lead-in without a colon: "The SQL query is SELECT ..."
static PREAMBLE_BARE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:here(?:'s|’s)?|the|this)\b.*?\b(?:query|sql)\b(?:\s+(?:query|statement))?(?:\s+is)?\s*;?\s*",
    )
    .unwrap()
});

/// Normalizes a raw completion into a single-line SQL statement.
pub fn clean_sql(raw: &str) -> String {
    let raw = raw.trim();
    let text = match FENCED_BLOCK_REGEX.captures(raw) {
        Some(block) if !is_sentinel(raw) => block.get(1).map_or("", |m| m.as_str()).to_string(),
        _ => FENCE_REGEX.replace_all(raw, "").into_owned(),
    };
    let text = text.replace('`', "");
    let text = strip_preamble(text.trim());
    let text = if is_sentinel(&text) {
        text
    } else {
        first_statement(&strip_line_comments(&text))
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_preamble(text: &str) -> String {
    if let Some(found) = PREAMBLE_COLON_REGEX.find(text) {
        return text[found.end()..].to_string();
    }
    PREAMBLE_BARE_REGEX.replace(text, "").into_owned()
}

/// Drops `--` comments outside quotes. The newline stays so the collapse
/// still separates the lines around it.
fn strip_line_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (None, '-') if chars.peek() == Some(&'-') => {
                while chars.next_if(|next| *next != '\n').is_some() {}
            }
            (None, '\'' | '"') => {
                quote = Some(ch);
                out.push(ch);
            }
            (Some(open), c) if c == open => {
                quote = None;
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Text up to the first `;` outside quotes. Trailing chatter after the
/// statement is dropped.
fn first_statement(text: &str) -> String {
    let mut quote: Option<char> = None;
    for (idx, ch) in text.char_indices() {
        match (quote, ch) {
            (None, '\'' | '"') => quote = Some(ch),
            (Some(open), c) if c == open => quote = None,
            (None, ';') => return text[..idx].to_string(),
            _ => {}
        }
    }
    text.to_string()
}

/// A cleaned completion that *is* the unanswerable sentinel.
pub fn is_sentinel(cleaned: &str) -> bool {
    cleaned.trim_start().starts_with(ERROR_SENTINEL)
}

/// Text that still carries the sentinel anywhere a model would put it.
///
/// `error_code` or `ERRORS` columns do not count; `ERROR:` anywhere does.
pub fn carries_sentinel(text: &str) -> bool {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix(ERROR_SENTINEL) {
        if rest.is_empty() || !rest.starts_with(|c: char| c.is_alphanumeric() || c == '_') {
            return true;
        }
    }
    text.contains("ERROR:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_block_with_lead_in() {
        assert_eq!(clean_sql("Here's the SQL query: ```sql SELECT 1```"), "SELECT 1");
    }

    #[test]
    fn multiline_fence_collapses_whitespace() {
        let raw = "```sql\nSELECT city,\n       SUM(amount)\nFROM sales\nGROUP BY city\n```";
        assert_eq!(clean_sql(raw), "SELECT city, SUM(amount) FROM sales GROUP BY city");
    }

    #[test]
    fn uppercase_fence_and_stray_backticks() {
        assert_eq!(clean_sql("```SQL\nSELECT `city` FROM sales\n```"), "SELECT city FROM sales");
        assert_eq!(
            clean_sql("```sqlite\nSELECT SUM(amount) FROM sales\n```"),
            "SELECT SUM(amount) FROM sales"
        );
        assert_eq!(clean_sql("```sqlite SELECT 1```"), "SELECT 1");
        assert_eq!(clean_sql("```SELECT 1```"), "SELECT 1");
    }

    #[test]
    fn explanation_after_fence_is_dropped() {
        let raw = "```sql\nSELECT SUM(amount) FROM sales\n```\nThis query sums the amount.";
        assert_eq!(clean_sql(raw), "SELECT SUM(amount) FROM sales");
    }

    #[test]
    fn line_comments_are_removed_before_collapsing() {
        assert_eq!(
            clean_sql("SELECT city -- the city\nFROM sales\n-- done"),
            "SELECT city FROM sales"
        );
        assert_eq!(clean_sql("SELECT '--x' AS v FROM t"), "SELECT '--x' AS v FROM t");
    }

    #[test]
    fn lead_in_variants() {
        assert_eq!(
            clean_sql("This query calculates the total: SELECT SUM(amount) FROM sales"),
            "SELECT SUM(amount) FROM sales"
        );
        assert_eq!(
            clean_sql("The SQL query is SELECT COUNT(*) FROM sales"),
            "SELECT COUNT(*) FROM sales"
        );
        assert_eq!(
            clean_sql("Here is the SQL:\n\nSELECT * FROM sales LIMIT 100"),
            "SELECT * FROM sales LIMIT 100"
        );
    }

    #[test]
    fn bare_sql_is_untouched() {
        assert_eq!(
            clean_sql("SELECT SUM(amount) FROM sales LIMIT 100"),
            "SELECT SUM(amount) FROM sales LIMIT 100"
        );
    }

    #[test]
    fn keeps_only_first_statement() {
        assert_eq!(
            clean_sql("SELECT 1; This returns one."),
            "SELECT 1"
        );
        assert_eq!(
            clean_sql("SELECT 'a;b' AS v;"),
            "SELECT 'a;b' AS v"
        );
    }

    #[test]
    fn sentinel_detection() {
        let cleaned = clean_sql("ERROR: Cannot answer this question with available data");
        assert_eq!(cleaned, "ERROR: Cannot answer this question with available data");
        assert!(is_sentinel(&cleaned));
        assert!(carries_sentinel(&cleaned));
        assert!(carries_sentinel("ERROR"));
        assert!(carries_sentinel("SELECT 1 -- ERROR: model drifted"));
    }

    #[test]
    fn sentinel_is_not_cut_at_semicolon() {
        let raw = "ERROR: Cannot answer this question; the schema has no weather table";
        assert_eq!(clean_sql(raw), raw);
    }

    #[test]
    fn error_named_columns_are_not_sentinels() {
        let sql = "SELECT error_code FROM logs LIMIT 100";
        assert!(!is_sentinel(sql));
        assert!(!carries_sentinel(sql));
        assert!(!carries_sentinel("SELECT ERROR_CODE FROM logs"));
        assert!(!carries_sentinel("ERRORS"));
    }
}
