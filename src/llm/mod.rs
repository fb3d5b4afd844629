//! Unified LLM surface over three backends: the local inference server
//! (default), the remote chat API (`glm-` prefix), and the cookie-
//! authenticated web client (web-AI prefix set). Callers never pick a
//! backend directly; routing is by model name.

pub mod cookies;
mod ollama;
mod registry;
mod summary;
mod webai;
mod zhipu;

pub use cookies::CookieBundle;
pub use ollama::{OllamaClient, DEFAULT_EMBED_MODEL};
pub use registry::{ModelRegistry, ModelSettings};
pub use summary::{
    build_crowd_sentiment_prompt, build_summary_prompt, crowd_sentiment_timeout_secs,
    extract_json_block, parse_crowd_sentiment, parse_summary_response, ChainOfThoughtSummary,
    CrowdSentiment, LogicCheck,
};
pub use webai::{WebAiClient, WEBAI_MODEL_PREFIX};
pub use zhipu::ZhipuClient;

use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{info, warn};

pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(90);
pub const EMBEDDING_DIM: usize = 768;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM backend disabled")]
    Disabled,
    #[error("request timed out")]
    Timeout,
    #[error("rate limited by LLM provider")]
    RateLimited,
    #[error("API error: {0}")]
    Api(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("credential missing: {0}")]
    CredentialMissing(String),
}

/// Per-call generation knobs. Backend adapters map these onto their wire
/// formats; JSON mode is a format flag locally and prompt discipline
/// elsewhere.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub system: Option<String>,
    pub json_mode: bool,
    pub temperature: Option<f32>,
    pub num_ctx: Option<u32>,
    pub num_predict: Option<i32>,
    pub stream_timeout: Option<Duration>,
}

/// Pull-based stream of response chunks with a wall-clock deadline counted
/// from the first byte. On timeout the stream emits one final
/// "[ERROR: streaming timed out]" chunk and terminates cleanly.
pub struct LlmStream {
    rx: mpsc::Receiver<Result<String, LlmError>>,
    timeout: Duration,
    deadline: Option<Instant>,
    finished: bool,
    cancel: watch::Receiver<bool>,
    cancel_closed: bool,
}

enum PullOutcome {
    TimedOut,
    CancelEvent(bool),
    Item(Option<Result<String, LlmError>>),
}

impl LlmStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<Result<String, LlmError>>,
        timeout: Duration,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            rx,
            timeout,
            deadline: None,
            finished: false,
            cancel,
            cancel_closed: false,
        }
    }

    /// Next chunk, or None when the stream is done. Checks the cancellation
    /// signal and the streaming deadline at every pull.
    pub async fn next_chunk(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }
        if *self.cancel.borrow() {
            self.finished = true;
            return None;
        }

        let deadline = self
            .deadline
            .unwrap_or_else(|| Instant::now() + self.timeout);

        loop {
            let mut cancel = self.cancel.clone();
            let watch_cancel = !self.cancel_closed;

            let outcome = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => PullOutcome::TimedOut,
                res = cancel.changed(), if watch_cancel => PullOutcome::CancelEvent(res.is_ok()),
                item = self.rx.recv() => PullOutcome::Item(item),
            };

            match outcome {
                PullOutcome::TimedOut => {
                    warn!("LLM streaming deadline of {:?} reached", self.timeout);
                    self.finished = true;
                    return Some("[ERROR: streaming timed out]".to_string());
                }
                PullOutcome::CancelEvent(true) => {
                    if *self.cancel.borrow_and_update() {
                        self.finished = true;
                        return None;
                    }
                    // Value flipped back; keep pulling
                }
                PullOutcome::CancelEvent(false) => {
                    // Cancel sender dropped; stop polling that channel
                    self.cancel_closed = true;
                }
                PullOutcome::Item(Some(Ok(chunk))) => {
                    // Deadline starts at the first byte
                    if self.deadline.is_none() {
                        self.deadline = Some(Instant::now() + self.timeout);
                    }
                    return Some(chunk);
                }
                PullOutcome::Item(Some(Err(e))) => {
                    self.finished = true;
                    return Some(format!("[ERROR: {e}]"));
                }
                PullOutcome::Item(None) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Drain the remaining chunks into one string.
    pub async fn collect_text(mut self) -> String {
        let mut out = String::new();
        while let Some(chunk) = self.next_chunk().await {
            out.push_str(&chunk);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Local,
    RemoteChat,
    WebAi,
}

fn backend_for(model: &str) -> Backend {
    if model.starts_with(WEBAI_MODEL_PREFIX) {
        Backend::WebAi
    } else if model.starts_with("glm-") {
        Backend::RemoteChat
    } else {
        Backend::Local
    }
}

/// The single surface job code talks to.
#[derive(Clone)]
pub struct LlmRouter {
    ollama: OllamaClient,
    zhipu: Option<ZhipuClient>,
    webai: Option<WebAiClient>,
    registry: ModelRegistry,
}

impl LlmRouter {
    pub fn new(
        ollama: OllamaClient,
        zhipu: Option<ZhipuClient>,
        webai: Option<WebAiClient>,
        registry: ModelRegistry,
    ) -> Self {
        Self {
            ollama,
            zhipu,
            webai,
            registry,
        }
    }

    pub fn from_env() -> Self {
        let ollama = OllamaClient::from_env();
        let zhipu = ZhipuClient::from_env();
        let webai = match WebAiClient::from_env() {
            Ok(client) => client,
            Err(e) => {
                info!("Web AI client unavailable: {}", e);
                None
            }
        };
        Self::new(ollama, zhipu, webai, ModelRegistry::from_env())
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// The configured default model for jobs that don't pick their own.
    pub fn default_model(&self) -> &str {
        &self.ollama.default_model
    }

    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<String, LlmError> {
        let opts = self.registry.apply_defaults(model, opts);
        match backend_for(model) {
            Backend::Local => self.ollama.generate(model, prompt, &opts).await,
            Backend::RemoteChat => {
                let zhipu = self.zhipu.as_ref().ok_or_else(|| {
                    LlmError::CredentialMissing("ZHIPU_API_KEY not set for glm-* model".into())
                })?;
                zhipu.generate(model, prompt, &opts).await
            }
            Backend::WebAi => {
                let webai = self.webai.as_ref().ok_or_else(|| {
                    LlmError::CredentialMissing("web AI cookies not provisioned".into())
                })?;
                webai.generate(model, prompt, &opts).await
            }
        }
    }

    pub async fn stream(
        &self,
        model: &str,
        prompt: &str,
        opts: &GenerateOptions,
        cancel: watch::Receiver<bool>,
    ) -> Result<LlmStream, LlmError> {
        let opts = self.registry.apply_defaults(model, opts);
        match backend_for(model) {
            Backend::Local => self.ollama.stream(model, prompt, &opts, cancel).await,
            Backend::RemoteChat => {
                let zhipu = self.zhipu.as_ref().ok_or_else(|| {
                    LlmError::CredentialMissing("ZHIPU_API_KEY not set for glm-* model".into())
                })?;
                zhipu.stream(model, prompt, &opts, cancel).await
            }
            Backend::WebAi => {
                let webai = self.webai.as_ref().ok_or_else(|| {
                    LlmError::CredentialMissing("web AI cookies not provisioned".into())
                })?;
                webai.stream(model, prompt, &opts, cancel).await
            }
        }
    }

    /// Embeddings exist only on the local backend. Any other model — or a
    /// disabled local backend — yields an empty vector, which callers treat
    /// as "no embedding".
    pub async fn embed(&self, text: &str, model: &str) -> Vec<f32> {
        if backend_for(model) != Backend::Local {
            return Vec::new();
        }
        match self.ollama.embed(text, model).await {
            Ok(v) => v,
            Err(e) => {
                warn!("Embedding failed ({e}); continuing without");
                Vec::new()
            }
        }
    }

    /// Visible models across all configured backends; `include_hidden`
    /// also lists models the registry marks hidden.
    pub async fn list_models(&self, include_hidden: bool) -> Vec<String> {
        let mut models = Vec::new();

        match self.ollama.list_tags().await {
            Ok(tags) => models.extend(tags),
            Err(e) => info!("Local model listing unavailable: {}", e),
        }

        models.extend(webai::webai_models());

        if let Some(zhipu) = &self.zhipu {
            models.extend(zhipu.known_models());
        }

        // Registry-configured models stay listed even when their backend
        // listing is down; the registry is also the visibility authority
        models.extend(if include_hidden {
            self.registry.all()
        } else {
            self.registry.visible()
        });

        models.retain(|m| include_hidden || !self.registry.is_hidden(m));
        models.sort();
        models.dedup();
        models
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_routing_by_prefix() {
        assert_eq!(backend_for("llama3"), Backend::Local);
        assert_eq!(backend_for("nomic-embed-text"), Backend::Local);
        assert_eq!(backend_for("glm-4-flash"), Backend::RemoteChat);
        assert_eq!(backend_for("gemini-2.5-pro"), Backend::WebAi);
    }

    #[tokio::test]
    async fn test_stream_emits_timeout_chunk() {
        let (tx, rx) = mpsc::channel(4);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut stream = LlmStream::new(rx, Duration::from_millis(30), cancel_rx);

        // First chunk arrives, starting the deadline; then the sender stalls.
        tx.send(Ok("hello ".to_string())).await.unwrap();
        assert_eq!(stream.next_chunk().await.as_deref(), Some("hello "));

        let chunk = stream.next_chunk().await;
        assert_eq!(chunk.as_deref(), Some("[ERROR: streaming timed out]"));
        assert!(stream.next_chunk().await.is_none());
        drop(tx);
    }

    #[tokio::test]
    async fn test_stream_completes_cleanly() {
        let (tx, rx) = mpsc::channel(4);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut stream = LlmStream::new(rx, Duration::from_secs(5), cancel_rx);

        tx.send(Ok("a".to_string())).await.unwrap();
        tx.send(Ok("b".to_string())).await.unwrap();
        drop(tx);

        assert_eq!(stream.next_chunk().await.as_deref(), Some("a"));
        assert_eq!(stream.next_chunk().await.as_deref(), Some("b"));
        assert!(stream.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_cancellation() {
        let (tx, rx) = mpsc::channel(4);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut stream = LlmStream::new(rx, Duration::from_secs(5), cancel_rx);

        cancel_tx.send(true).unwrap();
        assert!(stream.next_chunk().await.is_none());
        drop(tx);
    }

    #[tokio::test]
    async fn test_stream_error_becomes_final_chunk() {
        let (tx, rx) = mpsc::channel(4);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut stream = LlmStream::new(rx, Duration::from_secs(5), cancel_rx);

        tx.send(Err(LlmError::RateLimited)).await.unwrap();
        let chunk = stream.next_chunk().await.unwrap();
        assert!(chunk.starts_with("[ERROR:"));
        assert!(stream.next_chunk().await.is_none());
        drop(tx);
    }
}
