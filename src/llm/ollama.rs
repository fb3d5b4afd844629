//! Local inference server backend (Ollama wire format).

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::{GenerateOptions, LlmError, LlmStream, DEFAULT_STREAM_TIMEOUT};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: Client,
    timeout: Duration,
    enabled: bool,
    pub default_model: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

impl OllamaClient {
    pub fn new(base_url: String, timeout: Duration, enabled: bool, default_model: String) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        info!(
            "Ollama client initialized: base_url={}, timeout={}s, enabled={}",
            base_url,
            timeout.as_secs(),
            enabled
        );
        Self {
            base_url,
            client,
            timeout,
            enabled,
            default_model,
        }
    }

    pub fn from_env() -> Self {
        let base_url =
            std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let timeout = std::env::var("OLLAMA_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let enabled = std::env::var("OLLAMA_ENABLED")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(true);
        let default_model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3".to_string());
        Self::new(
            base_url.trim_end_matches('/').to_string(),
            Duration::from_secs(timeout),
            enabled,
            default_model,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn check_health(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).timeout(Duration::from_secs(5)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn build_payload(&self, model: &str, prompt: &str, opts: &GenerateOptions, stream: bool) -> serde_json::Value {
        let mut options = serde_json::Map::new();
        if let Some(t) = opts.temperature {
            options.insert("temperature".into(), json!(t));
        }
        if let Some(c) = opts.num_ctx {
            options.insert("num_ctx".into(), json!(c));
        }
        if let Some(p) = opts.num_predict {
            options.insert("num_predict".into(), json!(p));
        }

        let mut payload = json!({
            "model": model,
            "prompt": prompt,
            "stream": stream,
            "options": options,
        });
        if let Some(system) = &opts.system {
            payload["system"] = json!(system);
        }
        if opts.json_mode {
            payload["format"] = json!("json");
        }
        payload
    }

    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<String, LlmError> {
        if !self.enabled {
            return Err(LlmError::Disabled);
        }

        debug!(
            "🤖 Ollama query: model={}, json_mode={}, prompt_len={}",
            model,
            opts.json_mode,
            prompt.len()
        );

        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&self.build_payload(model, prompt, opts, false))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!("❌ Ollama request timed out after {:?}", self.timeout);
                    LlmError::Timeout
                } else {
                    LlmError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {status}: {body}")));
        }

        let body: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(body.response)
    }

    /// Streamed generation: the server emits one JSON object per line.
    pub async fn stream(
        &self,
        model: &str,
        prompt: &str,
        opts: &GenerateOptions,
        cancel: watch::Receiver<bool>,
    ) -> Result<LlmStream, LlmError> {
        if !self.enabled {
            return Err(LlmError::Disabled);
        }

        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&self.build_payload(model, prompt, opts, true))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Network(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(LlmError::Api(format!("HTTP {}", resp.status())));
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            use futures::StreamExt;

            let mut body = resp.bytes_stream();
            let mut buf = String::new();

            while let Some(chunk) = body.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::Network(e.to_string()))).await;
                        return;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<GenerateResponse>(&line) {
                        Ok(parsed) => {
                            if !parsed.response.is_empty()
                                && tx.send(Ok(parsed.response)).await.is_err()
                            {
                                return;
                            }
                            if parsed.done {
                                return;
                            }
                        }
                        Err(e) => debug!("Skipping unparseable stream line: {e}"),
                    }
                }
            }
        });

        Ok(LlmStream::new(
            rx,
            opts.stream_timeout.unwrap_or(DEFAULT_STREAM_TIMEOUT),
            cancel,
        ))
    }

    /// 768-dim embedding from the local embedding model.
    pub async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, LlmError> {
        if !self.enabled {
            warn!("Ollama embedding rejected: backend disabled");
            return Err(LlmError::Disabled);
        }

        let resp = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Network(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(LlmError::Api(format!("HTTP {}", resp.status())));
        }

        let body: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if body.embedding.is_empty() {
            warn!("No embedding returned from model {}", model);
        }
        Ok(body.embedding)
    }

    pub async fn list_tags(&self) -> Result<Vec<String>, LlmError> {
        if !self.enabled {
            return Err(LlmError::Disabled);
        }
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(LlmError::Api(format!("HTTP {}", resp.status())));
        }

        let body: TagsResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(body.models.into_iter().map(|m| m.name).collect())
    }
}
