//! Cookie-authenticated web AI client.
//!
//! Talks to the consumer web front-end of the AI service using the session
//! cookies maintained by the refresher sidecar. The model list is fixed;
//! JSON mode is prompt discipline. Cookies are re-read from the shared
//! artifact before every call so a refresh lands without a restart.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::cookies::{cookie_input_path, CookieBundle};
use super::{GenerateOptions, LlmError, LlmStream, DEFAULT_STREAM_TIMEOUT};

pub const WEBAI_MODEL_PREFIX: &str = "gemini-";

const WEBAI_MODELS: [&str; 3] = ["gemini-2.5-flash", "gemini-2.5-pro", "gemini-3.0-pro"];

const HTTP_TIMEOUT_SECS: u64 = 120;

pub fn webai_models() -> Vec<String> {
    WEBAI_MODELS.iter().map(|m| m.to_string()).collect()
}

pub fn is_webai_model(model: &str) -> bool {
    model.starts_with(WEBAI_MODEL_PREFIX)
}

#[derive(Clone)]
pub struct WebAiClient {
    base_url: String,
    client: Client,
    /// Env-provisioned bundle; when None, the shared artifact is read per call.
    env_cookies: Option<CookieBundle>,
}

#[derive(Debug, Deserialize)]
struct WebAiResponse {
    #[serde(default)]
    text: String,
}

impl WebAiClient {
    pub fn new(base_url: String, env_cookies: Option<CookieBundle>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            base_url,
            client,
            env_cookies,
        }
    }

    /// Ok(None) when no service URL is configured; Err only when the URL is
    /// set but no cookies can be resolved (fail fast, do not attempt calls).
    pub fn from_env() -> Result<Option<Self>, LlmError> {
        let Ok(base_url) = std::env::var("AI_SERVICE_WEB_URL") else {
            return Ok(None);
        };
        if base_url.trim().is_empty() {
            return Ok(None);
        }

        let env_cookies = CookieBundle::from_env();
        if env_cookies.is_none() && !cookie_input_path().exists() {
            return Err(LlmError::CredentialMissing(
                "AI_SERVICE_WEB_URL set but no cookies provisioned".into(),
            ));
        }

        Ok(Some(Self::new(
            base_url.trim_end_matches('/').to_string(),
            env_cookies,
        )))
    }

    fn cookies(&self) -> Result<CookieBundle, LlmError> {
        match &self.env_cookies {
            Some(bundle) => Ok(bundle.clone()),
            None => CookieBundle::load(&cookie_input_path()),
        }
    }

    fn prompt_with_discipline(prompt: &str, opts: &GenerateOptions) -> String {
        let mut text = String::new();
        if let Some(system) = &opts.system {
            text.push_str(system);
            text.push_str("\n\n");
        }
        text.push_str(prompt);
        if opts.json_mode {
            text.push_str("\n\nRespond with a single valid JSON object and nothing else.");
        }
        text
    }

    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<String, LlmError> {
        let cookies = self.cookies()?;

        debug!("Web AI query: model={}, prompt_len={}", model, prompt.len());

        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .header("Cookie", cookies.header_value())
            .json(&json!({
                "model": model,
                "prompt": Self::prompt_with_discipline(prompt, opts),
            }))
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
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(LlmError::CredentialMissing(
                "web AI session rejected; cookies may be stale".into(),
            ));
        }
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            return Err(LlmError::Api(format!("HTTP {status}")));
        }

        let body: WebAiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(body.text)
    }

    /// The web front-end has no chunked wire format we can rely on; stream
    /// by yielding the full response as a single chunk under the same
    /// deadline contract.
    pub async fn stream(
        &self,
        model: &str,
        prompt: &str,
        opts: &GenerateOptions,
        cancel: watch::Receiver<bool>,
    ) -> Result<LlmStream, LlmError> {
        let (tx, rx) = mpsc::channel(1);
        let this = self.clone();
        let model = model.to_string();
        let prompt = prompt.to_string();
        let opts_cloned = opts.clone();

        tokio::spawn(async move {
            let result = this.generate(&model, &prompt, &opts_cloned).await;
            let _ = tx.send(result).await;
        });

        Ok(LlmStream::new(
            rx,
            opts.stream_timeout.unwrap_or(DEFAULT_STREAM_TIMEOUT),
            cancel,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_prefix_detection() {
        assert!(is_webai_model("gemini-2.5-pro"));
        assert!(!is_webai_model("glm-4-flash"));
        assert!(!is_webai_model("llama3"));
    }

    #[test]
    fn test_fixed_model_list() {
        let models = webai_models();
        assert_eq!(models.len(), 3);
        assert!(models.iter().all(|m| is_webai_model(m)));
    }
}
