use std::time::{Duration, Instant};

use super::sanitize::{clean_sql, is_sentinel};
use super::{GeneratedQuery, GenerationOutcome, ERROR_SENTINEL, SQL_TEMPERATURE, UNANSWERABLE_REPLY};
use crate::services::ai::{ChatMessage, CompletionRequest, TextGenerator};

/// System instruction for SQL generation over `schema_context`.
pub fn build_system_prompt(schema_context: &str) -> String {
    format!(
        r#"You are an expert SQL Developer for SQLite databases.

Database Schema:
{schema_context}

Instructions:
1. Generate a valid SQLite query that answers the user's question
2. Return ONLY the SQL query - no explanations, no markdown, no backticks
3. Use table names exactly as provided in the schema
4. If the question cannot be answered with available schema, return: "{UNANSWERABLE_REPLY}"
5. Always use proper SQL syntax for SQLite
6. For aggregations, use: COUNT(), SUM(), AVG(), MAX(), MIN()
7. If joining tables, use explicit JOIN syntax
8. Add LIMIT 100 to prevent huge result sets"#
    )
}

/// Turns a question plus schema context into one cleaned statement.
pub struct SqlGenerator<'a> {
    generator: &'a dyn TextGenerator,
    max_tokens: u32,
}

impl<'a> SqlGenerator<'a> {
    pub fn new(generator: &'a dyn TextGenerator, max_tokens: u32) -> Self {
        Self {
            generator,
            max_tokens,
        }
    }

    /// Model failures come back as a `Failure` outcome, never as `Err`.
    pub async fn generate(&self, question: &str, schema_context: &str) -> GeneratedQuery {
        let request = CompletionRequest::new(
            vec![
                ChatMessage::system(build_system_prompt(schema_context)),
                ChatMessage::user(question),
            ],
            SQL_TEMPERATURE,
            self.max_tokens,
        );

        let started = Instant::now();
        let raw_text = match self.generator.complete(&request).await {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                tracing::error!(error = %err, "sql generation failed");
                return failure(err.to_string());
            }
        };
        let generation_latency = started.elapsed();

        let cleaned_sql = clean_sql(&raw_text);
        if cleaned_sql.is_empty() {
            tracing::warn!(raw = %raw_text, "model returned no SQL");
            return failure("model returned an empty response".to_string());
        }

        let outcome = if is_sentinel(&cleaned_sql) {
            GenerationOutcome::Unanswerable(cleaned_sql.clone())
        } else {
            GenerationOutcome::Sql(cleaned_sql.clone())
        };

        tracing::debug!(
            sql = %cleaned_sql,
            latency_ms = generation_latency.as_millis() as u64,
            "sql generated"
        );

        GeneratedQuery {
            raw_text,
            is_error: !matches!(outcome, GenerationOutcome::Sql(_)),
            cleaned_sql,
            generation_latency,
            outcome,
        }
    }
}

fn failure(cause: String) -> GeneratedQuery {
    GeneratedQuery {
        raw_text: String::new(),
        cleaned_sql: format!("{ERROR_SENTINEL}: {cause}"),
        generation_latency: Duration::ZERO,
        is_error: true,
        outcome: GenerationOutcome::Failure(cause),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::services::ai::testing::ScriptedGenerator;
    use crate::services::ai::ChatRole;

    #[test]
    fn prompt_embeds_context_and_rules() {
        let prompt = build_system_prompt("Table Name: sales");
        assert!(prompt.contains("Table Name: sales"));
        assert!(prompt.contains("LIMIT 100"));
        assert!(prompt.contains("ERROR: Cannot answer this question with available data"));
    }

    #[tokio::test]
    async fn cleans_model_output() {
        let model = ScriptedGenerator::replying("```sql\nSELECT SUM(amount)\nFROM sales\n```");
        let query = SqlGenerator::new(&model, 500)
            .generate("total sales amount", "ctx")
            .await;

        assert_eq!(query.sql(), Some("SELECT SUM(amount) FROM sales"));
        assert!(!query.is_error);

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].temperature, 0.0);
        assert_eq!(requests[0].max_tokens, 500);
        assert_eq!(requests[0].messages[0].role, ChatRole::System);
        assert_eq!(requests[0].user_prompt(), Some("total sales amount"));
    }

    #[tokio::test]
    async fn sentinel_reply_is_unanswerable() {
        let model = ScriptedGenerator::replying(UNANSWERABLE_REPLY);
        let query = SqlGenerator::new(&model, 500).generate("weather?", "ctx").await;

        assert!(query.is_error);
        assert_eq!(
            query.outcome,
            GenerationOutcome::Unanswerable(UNANSWERABLE_REPLY.to_string())
        );
        assert!(query.sql().is_none());
    }

    #[tokio::test]
    async fn sentinel_with_semicolon_is_passed_on_whole() {
        let reply = "ERROR: Cannot answer this question; the schema has no weather table";
        let model = ScriptedGenerator::replying(reply);
        let query = SqlGenerator::new(&model, 500).generate("weather?", "ctx").await;

        assert_eq!(query.outcome, GenerationOutcome::Unanswerable(reply.to_string()));
        assert_eq!(query.error(), Some(QueryError::GenerationSentinel(reply.to_string())));
    }

    #[tokio::test]
    async fn error_code_column_is_still_sql() {
        let model = ScriptedGenerator::replying("SELECT error_code FROM logs LIMIT 100");
        let query = SqlGenerator::new(&model, 500).generate("codes", "ctx").await;
        assert_eq!(query.sql(), Some("SELECT error_code FROM logs LIMIT 100"));
    }

    #[tokio::test]
    async fn model_failure_is_tagged_not_raised() {
        let model = ScriptedGenerator::failing("connection refused");
        let query = SqlGenerator::new(&model, 500).generate("q", "ctx").await;

        assert!(query.is_error);
        assert_eq!(query.generation_latency, Duration::ZERO);
        assert!(query.cleaned_sql.starts_with("ERROR: "));
        assert!(query.cleaned_sql.contains("connection refused"));
        assert!(matches!(query.outcome, GenerationOutcome::Failure(_)));
    }

    #[tokio::test]
    async fn empty_reply_is_a_failure() {
        let model = ScriptedGenerator::replying("```sql\n```");
        let query = SqlGenerator::new(&model, 500).generate("q", "ctx").await;
        assert!(matches!(query.outcome, GenerationOutcome::Failure(_)));
    }
}
