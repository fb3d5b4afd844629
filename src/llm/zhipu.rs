//! Remote chat API backend for `glm-*` models (bearer-key auth, SSE
//! streaming). JSON mode is prompt discipline here, not a format flag.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{GenerateOptions, LlmError, LlmStream, DEFAULT_STREAM_TIMEOUT};

const DEFAULT_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";
const HTTP_TIMEOUT_SECS: u64 = 120;

const KNOWN_MODELS: [&str; 3] = ["glm-4-flash", "glm-4-plus", "glm-4-air"];

#[derive(Clone)]
pub struct ZhipuClient {
    api_key: String,
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: String,
}

impl ZhipuClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            base_url,
            client,
        }
    }

    /// Enabled only when `ZHIPU_API_KEY` is present.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("ZHIPU_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
        let base_url = std::env::var("ZHIPU_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Some(Self::new(api_key, base_url.trim_end_matches('/').to_string()))
    }

    pub fn known_models(&self) -> Vec<String> {
        KNOWN_MODELS.iter().map(|m| m.to_string()).collect()
    }

    fn messages(prompt: &str, opts: &GenerateOptions) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &opts.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        let user_content = if opts.json_mode {
            format!("{prompt}\n\nRespond with a single valid JSON object and nothing else.")
        } else {
            prompt.to_string()
        };
        messages.push(json!({"role": "user", "content": user_content}));
        json!(messages)
    }

    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<String, LlmError> {
        let payload = json!({
            "model": model,
            "messages": Self::messages(prompt, opts),
            "temperature": opts.temperature.unwrap_or(0.7),
            "stream": false,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
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

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".into()))
    }

    /// SSE streaming: `data: {json}` lines, terminated by `data: [DONE]`.
    pub async fn stream(
        &self,
        model: &str,
        prompt: &str,
        opts: &GenerateOptions,
        cancel: watch::Receiver<bool>,
    ) -> Result<LlmStream, LlmError> {
        let payload = json!({
            "model": model,
            "messages": Self::messages(prompt, opts),
            "temperature": opts.temperature.unwrap_or(0.7),
            "stream": true,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
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

                    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(parsed) => {
                            for choice in parsed.choices {
                                if !choice.delta.content.is_empty()
                                    && tx.send(Ok(choice.delta.content)).await.is_err()
                                {
                                    return;
                                }
                            }
                        }
                        Err(e) => debug!("Skipping unparseable SSE line: {e}"),
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
}
