//! Natural-language answer over executed rows, with inline citations

use serde_json::Value;

use super::{QueryTable, ANSWER_MAX_TOKENS, ANSWER_TEMPERATURE};
use crate::services::ai::{ChatMessage, CompletionRequest, TextGenerator};

pub(crate) const NO_DATA_ANSWER: &str =
    "No data found matching your query. Try rephrasing your question.";

pub struct AnswerSynthesizer<'a> {
    generator: &'a dyn TextGenerator,
}

impl<'a> AnswerSynthesizer<'a> {
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self { generator }
    }

    /// Always returns text; a failed model call is reported inside it.
    pub async fn synthesize(&self, question: &str, table: &QueryTable, sources: &[String]) -> String {
        if table.is_empty() {
            return NO_DATA_ANSWER.to_string();
        }

        let prompt = build_answer_prompt(question, &render_table(table), &citations(sources));
        let request = CompletionRequest::new(
            vec![ChatMessage::user(prompt)],
            ANSWER_TEMPERATURE,
            ANSWER_MAX_TOKENS,
        );

        match self.generator.complete(&request).await {
            Ok(answer) => answer.trim().to_string(),
            Err(err) => {
                tracing::warn!(error = %err, "answer synthesis failed");
                format!("Error generating answer: {err}")
            }
        }
    }
}

fn build_answer_prompt(question: &str, data: &str, citations: &str) -> String {
    format!(
        "Based on the following data, answer the user's question clearly and concisely.

User Question: {question}

Data Retrieved:
{data}

Sources: {citations}

Instructions:
1. Answer the question directly using only the provided data
2. Include inline citations like [1], [2] etc. where relevant
3. Format numbers with proper formatting (currency, percentages, etc.)
4. Be concise and clear
5. If data shows totals/sums, highlight them"
    )
}

/// `[1] a | [2] b`, first occurrence wins.
fn citations(sources: &[String]) -> String {
    let mut unique: Vec<&str> = Vec::new();
    for source in sources {
        if !unique.contains(&source.as_str()) {
            unique.push(source);
        }
    }
    unique
        .iter()
        .enumerate()
        .map(|(idx, source)| format!("[{}] {}", idx + 1, source))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Right-aligned plain-text table, header first.
pub fn render_table(table: &QueryTable) -> String {
    let cells: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| row.iter().map(render_cell).collect())
        .collect();

    let widths: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            cells
                .iter()
                .filter_map(|row| row.get(idx))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let format_line = |values: Vec<&str>| {
        values
            .iter()
            .zip(&widths)
            .map(|(value, width)| format!("{:>width$}", value, width = *width))
            .collect::<Vec<_>>()
            .join(" ")
    };

    let mut lines = vec![format_line(table.columns.iter().map(String::as_str).collect())];
    for row in &cells {
        lines.push(format_line(row.iter().map(String::as_str).collect()));
    }
    if table.truncated {
        lines.push(format!("... (first {} rows shown)", table.rows.len()));
    }
    lines.join("\n")
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::services::ai::testing::ScriptedGenerator;

    fn totals() -> QueryTable {
        QueryTable {
            columns: vec!["city".to_string(), "total".to_string()],
            rows: vec![vec![json!("A"), json!(10.0)], vec![json!("Boston"), Value::Null]],
            truncated: false,
        }
    }

    #[test]
    fn table_is_right_aligned() {
        assert_eq!(render_table(&totals()), "  city total\n     A  10.0\nBoston  NULL");
    }

    #[test]
    fn citations_are_deduplicated_in_order() {
        let sources = vec!["sales".to_string(), "cities".to_string(), "sales".to_string()];
        assert_eq!(citations(&sources), "[1] sales | [2] cities");
    }

    #[tokio::test]
    async fn empty_table_skips_the_model() {
        let model = ScriptedGenerator::replying("unused");
        let answer = AnswerSynthesizer::new(&model)
            .synthesize("q", &QueryTable::default(), &[])
            .await;
        assert_eq!(answer, NO_DATA_ANSWER);
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn prompt_carries_rows_and_sources() {
        let model = ScriptedGenerator::replying(" Boston leads [1]. ");
        let answer = AnswerSynthesizer::new(&model)
            .synthesize("which city?", &totals(), &["sales".to_string()])
            .await;
        assert_eq!(answer, "Boston leads [1].");

        let requests = model.requests();
        assert_eq!(requests[0].temperature, ANSWER_TEMPERATURE);
        assert_eq!(requests[0].max_tokens, ANSWER_MAX_TOKENS);
        let prompt = requests[0].user_prompt().unwrap();
        assert!(prompt.contains("User Question: which city?"));
        assert!(prompt.contains("Sources: [1] sales"));
        assert!(prompt.contains("Boston"));
    }

    #[tokio::test]
    async fn model_failure_is_reported_in_text() {
        let model = ScriptedGenerator::failing("rate limited");
        let answer = AnswerSynthesizer::new(&model)
            .synthesize("q", &totals(), &[])
            .await;
        assert!(answer.starts_with("Error generating answer: "));
        assert!(answer.contains("rate limited"));
    }
}
