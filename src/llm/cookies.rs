//! Cookie bundle for the web AI service.
//!
//! Provisioning order: `WEBAI_COOKIES_JSON`, `WEBAI_COOKIES_JSON_B64`,
//! `WEBAI_SECURE_1PSID` (+ optional `WEBAI_SECURE_1PSIDTS`), then the
//! shared-volume artifact. Readers always read the file in full and never
//! hold handles across calls; the refresher is the only writer and replaces
//! the artifact atomically (write temp, then rename).

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::LlmError;

pub const DEFAULT_COOKIE_FILE: &str = "/shared/cookies/webai_cookies.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CookieBundle {
    #[serde(rename = "__Secure-1PSID")]
    pub secure_1psid: String,
    #[serde(rename = "__Secure-1PSIDTS", skip_serializing_if = "Option::is_none")]
    pub secure_1psidts: Option<String>,
    /// Metadata fields; readers tolerate their absence.
    #[serde(rename = "_refreshed_at", skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<DateTime<Utc>>,
    #[serde(rename = "_refresh_count", default)]
    pub refresh_count: i64,
}

impl CookieBundle {
    pub fn new(secure_1psid: String, secure_1psidts: Option<String>) -> Self {
        Self {
            secure_1psid,
            secure_1psidts,
            refreshed_at: None,
            refresh_count: 0,
        }
    }

    /// Resolve cookies from the environment, falling back to the shared
    /// artifact. Returns None when nothing is provisioned.
    pub fn from_env() -> Option<Self> {
        if let Ok(raw) = std::env::var("WEBAI_COOKIES_JSON") {
            if let Ok(bundle) = serde_json::from_str::<CookieBundle>(&raw) {
                debug!("Cookies loaded from WEBAI_COOKIES_JSON");
                return Some(bundle);
            }
        }

        if let Ok(b64) = std::env::var("WEBAI_COOKIES_JSON_B64") {
            if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(b64.trim()) {
                if let Ok(bundle) = serde_json::from_slice::<CookieBundle>(&decoded) {
                    debug!("Cookies loaded from WEBAI_COOKIES_JSON_B64");
                    return Some(bundle);
                }
            }
        }

        if let Ok(psid) = std::env::var("WEBAI_SECURE_1PSID") {
            if !psid.trim().is_empty() {
                debug!("Cookies loaded from WEBAI_SECURE_1PSID pair");
                return Some(Self::new(
                    psid,
                    std::env::var("WEBAI_SECURE_1PSIDTS").ok().filter(|s| !s.is_empty()),
                ));
            }
        }

        Self::load(&cookie_input_path()).ok()
    }

    /// Read the artifact in full. The writer's atomic rename guarantees we
    /// see either the previous or the next bundle, never a partial write.
    pub fn load(path: &Path) -> Result<Self, LlmError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LlmError::CredentialMissing(format!("cookie file {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| LlmError::InvalidResponse(format!("cookie file parse: {e}")))
    }

    /// Atomically replace the artifact: write a temp file in the same
    /// directory, then rename over the target (invariant C1).
    pub fn save_atomic(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        let payload = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, path)
    }

    /// The successor bundle the refresher writes after a successful cycle.
    pub fn refreshed(&self, secure_1psid: String, secure_1psidts: Option<String>) -> Self {
        Self {
            secure_1psid,
            secure_1psidts,
            refreshed_at: Some(Utc::now()),
            refresh_count: self.refresh_count + 1,
        }
    }

    /// Cookie header value for HTTP requests against the web service.
    pub fn header_value(&self) -> String {
        match &self.secure_1psidts {
            Some(ts) => format!("__Secure-1PSID={}; __Secure-1PSIDTS={}", self.secure_1psid, ts),
            None => format!("__Secure-1PSID={}", self.secure_1psid),
        }
    }
}

pub fn cookie_input_path() -> PathBuf {
    std::env::var("COOKIE_INPUT_FILE")
        .unwrap_or_else(|_| DEFAULT_COOKIE_FILE.to_string())
        .into()
}

pub fn cookie_output_path() -> PathBuf {
    std::env::var("COOKIE_OUTPUT_FILE")
        .unwrap_or_else(|_| DEFAULT_COOKIE_FILE.to_string())
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_round_trip_with_metadata() {
        let bundle = CookieBundle {
            secure_1psid: "psid-value".into(),
            secure_1psidts: Some("psidts-value".into()),
            refreshed_at: Some(Utc::now()),
            refresh_count: 7,
        };
        let json = serde_json::to_string(&bundle).unwrap();
        assert!(json.contains("__Secure-1PSID"));
        let back: CookieBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(back.secure_1psid, "psid-value");
        assert_eq!(back.refresh_count, 7);
    }

    #[test]
    fn test_metadata_fields_optional() {
        let json = r#"{"__Secure-1PSID": "abc"}"#;
        let bundle: CookieBundle = serde_json::from_str(json).unwrap();
        assert_eq!(bundle.secure_1psid, "abc");
        assert!(bundle.secure_1psidts.is_none());
        assert!(bundle.refreshed_at.is_none());
        assert_eq!(bundle.refresh_count, 0);
    }

    #[test]
    fn test_save_atomic_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webai_cookies.json");

        let bundle = CookieBundle::new("abc".into(), None);
        bundle.save_atomic(&path).unwrap();

        let loaded = CookieBundle::load(&path).unwrap();
        assert_eq!(loaded, bundle);

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.path() != path)
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_refreshed_increments_count() {
        let bundle = CookieBundle::new("old".into(), None);
        let next = bundle.refreshed("new".into(), Some("ts".into()));
        assert_eq!(next.refresh_count, 1);
        assert_eq!(next.secure_1psid, "new");
        assert!(next.refreshed_at.is_some());
    }

    #[test]
    fn test_header_value() {
        let with_ts = CookieBundle::new("a".into(), Some("b".into()));
        assert_eq!(
            with_ts.header_value(),
            "__Secure-1PSID=a; __Secure-1PSIDTS=b"
        );
        let without = CookieBundle::new("a".into(), None);
        assert_eq!(without.header_value(), "__Secure-1PSID=a");
    }
}
