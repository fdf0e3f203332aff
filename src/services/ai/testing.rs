//! Deterministic stand-ins for the embedding and generation endpoints.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{CompletionRequest, Embedder, TextGenerator};
use crate::error::{AppError, AppResult};

/// Bag-of-words hashed into a fixed number of buckets.
///
/// The last bucket is a constant so no vector is all zeros.
pub struct HashEmbedder {
    name: String,
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self::named("test-hash-embedder", dimension)
    }

    pub fn named(name: &str, dimension: usize) -> Self {
        Self {
            name: name.to_string(),
            dimension,
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let buckets = self.dimension - 1;
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| t.len() > 2)
        {
            let hash = token
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
                    (h ^ b as u64).wrapping_mul(0x0100_0000_01b3)
                });
            vector[(hash % buckets as u64) as usize] += 1.0;
        }
        vector[buckets] = 0.5;
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.vectorize(text)).collect())
    }
}

/// Embedder whose endpoint is always down.
pub struct FailingEmbedder {
    pub dimension: usize,
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing-embedder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, _texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Err(AppError::AiService("embedding endpoint unreachable".to_string()))
    }
}

/// Replies with a fixed completion (or error) and records every request.
pub struct ScriptedGenerator {
    reply: Result<String, String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(cause: &str) -> Self {
        Self {
            reply: Err(cause.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn complete(&self, request: &CompletionRequest) -> AppResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.reply
            .clone()
            .map_err(AppError::AiService)
    }
}

/// Like `ScriptedGenerator`, but the first call parks until `release`.
pub struct GatedGenerator {
    inner: ScriptedGenerator,
    armed: AtomicBool,
    entered: Notify,
    released: Notify,
}

impl GatedGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            inner: ScriptedGenerator::replying(reply),
            armed: AtomicBool::new(true),
            entered: Notify::new(),
            released: Notify::new(),
        }
    }

    /// Resolves once the first call is parked.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.inner.requests()
    }
}

#[async_trait]
impl TextGenerator for GatedGenerator {
    async fn complete(&self, request: &CompletionRequest) -> AppResult<String> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.released.notified().await;
        }
        self.inner.complete(request).await
    }
}
