use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::services::LlmConfig;

use super::types::{ChatMessage, ChatRole, CompletionRequest};

const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// A text-generation model endpoint.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> AppResult<String>;
}

pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| AppError::Config(format!("http client init failed: {e}")))?;

        Ok(Self { client, config })
    }

    fn api_key(&self) -> AppResult<&str> {
        let api_key = self.config.api_key.trim();
        if api_key.is_empty() {
            return Err(AppError::AiService("missing api key".to_string()));
        }
        Ok(api_key)
    }

    async fn complete_openai(&self, request: &CompletionRequest) -> AppResult<String> {
        let api_key = self.api_key()?;
        let base_url = build_base_url(self.config.base_url.as_deref(), DEFAULT_OPENAI_BASE_URL);

        let body = OpenAiChatRequest {
            model: self.config.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|message| OpenAiMessage {
                    role: match message.role {
                        ChatRole::System => "system",
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    },
                    content: message.content.clone(),
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::AiService(format!("chat request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::AiService(format!(
                "chat request failed: {status} {body}"
            )));
        }

        let response: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::AiService(format!("chat response invalid: {e}")))?;

        let output = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        if output.trim().is_empty() {
            return Err(AppError::AiService("chat response missing text".to_string()));
        }

        Ok(output)
    }

    async fn complete_gemini(&self, request: &CompletionRequest) -> AppResult<String> {
        let api_key = self.api_key()?;
        let base_url = build_base_url(self.config.base_url.as_deref(), DEFAULT_GEMINI_BASE_URL);

        let mut system_parts = Vec::new();
        let mut contents = Vec::new();
        for message in &request.messages {
            if message.content.trim().is_empty() {
                continue;
            }
            match message.role {
                ChatRole::System => system_parts.push(GeminiPart::text(message.content.clone())),
                ChatRole::User => contents.push(GeminiContent::new("user", &message.content)),
                ChatRole::Assistant => contents.push(GeminiContent::new("model", &message.content)),
            }
        }

        if contents.is_empty() {
            return Err(AppError::AiService("no messages to send".to_string()));
        }

        let body = GeminiGenerateRequest {
            system_instruction: if system_parts.is_empty() {
                None
            } else {
                Some(GeminiSystemInstruction {
                    parts: system_parts,
                })
            },
            contents,
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            base_url, self.config.model
        );
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::AiService(format!("gemini request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::AiService(format!(
                "gemini request failed: {status} {body}"
            )));
        }

        let response: GeminiGenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::AiService(format!("gemini response invalid: {e}")))?;

        let mut output = String::new();
        if let Some(candidate) = response.candidates.and_then(|list| list.into_iter().next()) {
            if let Some(content) = candidate.content {
                for part in content.parts {
                    if let Some(text) = part.text {
                        output.push_str(&text);
                    }
                }
            }
        }

        if output.trim().is_empty() {
            return Err(AppError::AiService("gemini response missing text".to_string()));
        }

        Ok(output)
    }
}

#[async_trait]
impl TextGenerator for LlmService {
    async fn complete(&self, request: &CompletionRequest) -> AppResult<String> {
        let provider = self.config.provider.to_lowercase();
        tracing::debug!(
            provider = %provider,
            model = %self.config.model,
            temperature = request.temperature,
            "llm completion"
        );

        match provider.as_str() {
            "openai" | "groq" => self.complete_openai(request).await,
            "gemini" | "google" => self.complete_gemini(request).await,
            other => Err(AppError::AiService(format!("provider {other} not supported"))),
        }
    }
}

fn build_base_url(base_url: Option<&str>, default: &str) -> String {
    let base = base_url.unwrap_or(default).trim().trim_end_matches('/');
    if base.is_empty() {
        default.to_string()
    } else {
        base.to_string()
    }
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }
}

#[derive(Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Clone)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

impl GeminiContent {
    fn new(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![GeminiPart::text(text.to_string())],
        }
    }
}

#[derive(Serialize, Clone)]
struct GeminiPart {
    text: String,
}

impl GeminiPart {
    fn text(text: String) -> Self {
        Self { text }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GeminiGenerateResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Deserialize)]
struct GeminiResponseContent {
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponsePart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_falls_back_and_trims() {
        assert_eq!(build_base_url(None, DEFAULT_OPENAI_BASE_URL), DEFAULT_OPENAI_BASE_URL);
        assert_eq!(
            build_base_url(Some("http://localhost:8080/v1/"), DEFAULT_OPENAI_BASE_URL),
            "http://localhost:8080/v1"
        );
        assert_eq!(build_base_url(Some("  "), DEFAULT_GEMINI_BASE_URL), DEFAULT_GEMINI_BASE_URL);
    }

    #[test]
    fn gemini_request_uses_camel_case_fields() {
        let body = GeminiGenerateRequest {
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiPart::text("rules".to_string())],
            }),
            contents: vec![GeminiContent::new("user", "question")],
            generation_config: GeminiGenerationConfig {
                temperature: 0.0,
                max_output_tokens: 500,
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "rules");
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 500);
    }

    #[tokio::test]
    async fn missing_api_key_is_an_ai_service_error() {
        let service = LlmService::new(LlmConfig::default()).unwrap();
        let request = CompletionRequest::new(vec![ChatMessage::user("hi")], 0.0, 10);
        let err = service.complete(&request).await.unwrap_err();
        assert!(matches!(err, AppError::AiService(_)));
    }
}
