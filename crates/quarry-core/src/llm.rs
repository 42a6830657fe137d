//! Abstract LLM and embedding collaborator interfaces.
//!
//! The core never speaks HTTP itself; provider crates implement these
//! traits and hand the engine an `Arc<dyn Llm>` / `Arc<dyn Embedder>`.
//! Implementations may block; callers on async paths dispatch through
//! `spawn_blocking`.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{LlmErrorKind, QuarryError, QuarryResult};

/// Default retry count for rate-limited and recoverable LLM failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Minimum content length an LLM response must have to be usable.
const MIN_RESPONSE_CHARS: usize = 10;

// ---------------------------------------------------------------------------
// Embedder
// ---------------------------------------------------------------------------

/// Dense-vector embedding provider.
///
/// Must be deterministic per `(model, text)`; the index relies on this for
/// idempotent re-embedding.
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    fn embed_one(&self, text: &str) -> QuarryResult<Vec<f32>>;

    /// Embed a batch of texts, preserving order.
    fn embed_many(&self, texts: &[&str]) -> QuarryResult<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }

    /// Output vector dimension.
    fn dimension(&self) -> usize;
}

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

/// One message in a chat exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Build a user-role message.
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }

    /// Build an assistant-role message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

/// Options for one completion call.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    /// System prompt, if any.
    pub system: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Response token cap.
    pub max_tokens: Option<u32>,
    /// Cooperative cancellation signal.
    pub cancel: Option<CancellationToken>,
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens produced.
    pub output_tokens: u64,
}

/// A completed LLM response.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Response text.
    pub content: String,
    /// Model that produced the response.
    pub model: String,
    /// Usage accounting, when the provider reports it.
    pub usage: Option<Usage>,
}

/// Chat-completion provider.
pub trait Llm: Send + Sync {
    /// Identifier of the backing model.
    fn model_name(&self) -> &str;

    /// Run a completion.
    fn complete(&self, messages: &[ChatMessage], opts: &CompletionOptions)
        -> QuarryResult<Completion>;
}

/// Run a completion and validate the output as JSON of type `T`.
pub fn complete_json<T: DeserializeOwned>(
    llm: &dyn Llm,
    messages: &[ChatMessage],
    opts: &CompletionOptions,
) -> QuarryResult<T> {
    let completion = llm.complete(messages, opts)?;
    parse_json_response(&completion.content)
}

/// Parse and validate an LLM response as JSON of type `T`.
///
/// Responses shorter than 10 characters or failing validation are an
/// [`QuarryError::InvalidResponse`], counted as non-recoverable item
/// failures by callers.
pub fn parse_json_response<T: DeserializeOwned>(content: &str) -> QuarryResult<T> {
    let trimmed = content.trim();
    if trimmed.len() < MIN_RESPONSE_CHARS {
        return Err(QuarryError::InvalidResponse {
            message: format!("response too short ({} chars)", trimmed.len()),
        });
    }
    // Tolerate fenced output: strip a ```json ... ``` wrapper when present.
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    serde_json::from_str(body).map_err(|e| QuarryError::InvalidResponse {
        message: format!("JSON validation failed: {e}"),
    })
}

/// Run `op` with exponential backoff on retryable LLM failures.
///
/// Rate-limited and recoverable errors are retried up to `max_retries`
/// times with doubling delays; everything else propagates immediately.
pub async fn with_backoff<T, F>(max_retries: u32, mut op: F) -> QuarryResult<T>
where
    F: FnMut() -> QuarryResult<T>,
{
    let mut delay = Duration::from_millis(500);
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying LLM call");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Deterministic embedder for tests: hashes the text into a unit vector.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Create a hash embedder with the given output dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashEmbedder {
    fn embed_one(&self, text: &str) -> QuarryResult<Vec<f32>> {
        use sha2::{Digest, Sha256};
        let mut v = vec![0.0f32; self.dimension];
        // Spread word digests across the vector so related texts overlap.
        for word in text.split_whitespace() {
            let digest = Sha256::digest(word.as_bytes());
            let slot = (u16::from_be_bytes([digest[0], digest[1]]) as usize) % self.dimension;
            v[slot] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Scripted LLM for tests: pops canned responses in order, or echoes a
/// fixed fallback when the script is exhausted.
pub struct ScriptedLlm {
    responses: parking_lot::Mutex<std::collections::VecDeque<QuarryResult<String>>>,
    fallback: String,
    calls: std::sync::atomic::AtomicU64,
}

impl ScriptedLlm {
    /// Create a scripted LLM with a fallback response.
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            responses: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            fallback: fallback.into(),
            calls: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Queue a successful canned response.
    pub fn push_response(&self, content: impl Into<String>) {
        self.responses.lock().push_back(Ok(content.into()));
    }

    /// Queue a canned failure.
    pub fn push_error(&self, kind: LlmErrorKind, message: impl Into<String>) {
        self.responses
            .lock()
            .push_back(Err(QuarryError::Llm { kind, message: message.into() }));
    }

    /// Number of completion calls made so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Wrap in an `Arc<dyn Llm>`.
    pub fn into_arc(self) -> Arc<dyn Llm> {
        Arc::new(self)
    }
}

impl Llm for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn complete(
        &self,
        _messages: &[ChatMessage],
        opts: &CompletionOptions,
    ) -> QuarryResult<Completion> {
        if let Some(cancel) = &opts.cancel {
            if cancel.is_cancelled() {
                return Err(QuarryError::Aborted);
            }
        }
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let next = self.responses.lock().pop_front();
        let content = match next {
            Some(Ok(content)) => content,
            Some(Err(e)) => return Err(e),
            None => self.fallback.clone(),
        };
        Ok(Completion {
            content,
            model: "scripted".into(),
            usage: Some(Usage { input_tokens: 10, output_tokens: 10 }),
        })
    }
}
