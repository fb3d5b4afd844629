//! Model registry: per-model settings and visibility, loaded from an
//! optional JSON config. Explicit `visible()`/`all()` accessors replace
//! ad-hoc dictionary reflection.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use super::GenerateOptions;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelSettings {
    pub temperature: Option<f32>,
    pub num_ctx: Option<u32>,
    pub num_predict: Option<i32>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    models: HashMap<String, ModelSettings>,
    #[serde(default)]
    default_config: ModelSettings,
}

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelSettings>,
    defaults: ModelSettings,
}

impl ModelRegistry {
    pub fn from_env() -> Self {
        match std::env::var("MODEL_CONFIG_PATH") {
            Ok(path) => Self::load(Path::new(&path)),
            Err(_) => Self::default(),
        }
    }

    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(r) => r,
            Err(e) => {
                debug!("No model config at {} ({e}); using defaults", path.display());
                return Self::default();
            }
        };
        match serde_json::from_str::<RegistryFile>(&raw) {
            Ok(file) => Self {
                models: file.models,
                defaults: file.default_config,
            },
            Err(e) => {
                warn!("Invalid model config {}: {e}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn settings_for(&self, model: &str) -> ModelSettings {
        let specific = self.models.get(model).cloned().unwrap_or_default();
        ModelSettings {
            temperature: specific.temperature.or(self.defaults.temperature),
            num_ctx: specific.num_ctx.or(self.defaults.num_ctx),
            num_predict: specific.num_predict.or(self.defaults.num_predict),
            hidden: specific.hidden,
            description: if specific.description.is_empty() {
                self.defaults.description.clone()
            } else {
                specific.description
            },
        }
    }

    pub fn is_hidden(&self, model: &str) -> bool {
        self.models.get(model).map(|s| s.hidden).unwrap_or(false)
    }

    /// Configured model names with hidden entries excluded.
    pub fn visible(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .models
            .iter()
            .filter(|(_, s)| !s.hidden)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Every configured model name, hidden included.
    pub fn all(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.keys().cloned().collect();
        names.sort();
        names
    }

    /// Fill unset generation knobs from the registry for this model.
    pub fn apply_defaults(&self, model: &str, opts: &GenerateOptions) -> GenerateOptions {
        let settings = self.settings_for(model);
        GenerateOptions {
            system: opts.system.clone(),
            json_mode: opts.json_mode,
            temperature: opts.temperature.or(settings.temperature),
            num_ctx: opts.num_ctx.or(settings.num_ctx),
            num_predict: opts.num_predict.or(settings.num_predict),
            stream_timeout: opts.stream_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModelRegistry {
        let file: RegistryFile = serde_json::from_str(
            r#"{
                "models": {
                    "llama3": {"temperature": 0.2, "num_ctx": 8192},
                    "secret-model": {"hidden": true}
                },
                "default_config": {"temperature": 0.7, "num_predict": 512}
            }"#,
        )
        .unwrap();
        ModelRegistry {
            models: file.models,
            defaults: file.default_config,
        }
    }

    #[test]
    fn test_visible_excludes_hidden() {
        let reg = registry();
        assert_eq!(reg.visible(), vec!["llama3".to_string()]);
        assert_eq!(
            reg.all(),
            vec!["llama3".to_string(), "secret-model".to_string()]
        );
        assert!(reg.is_hidden("secret-model"));
        assert!(!reg.is_hidden("unknown-model"));
    }

    #[test]
    fn test_settings_fall_back_to_defaults() {
        let reg = registry();
        let s = reg.settings_for("llama3");
        assert_eq!(s.temperature, Some(0.2));
        assert_eq!(s.num_ctx, Some(8192));
        assert_eq!(s.num_predict, Some(512));

        let unknown = reg.settings_for("other");
        assert_eq!(unknown.temperature, Some(0.7));
    }

    #[test]
    fn test_apply_defaults_respects_explicit_opts() {
        let reg = registry();
        let opts = GenerateOptions {
            temperature: Some(0.9),
            ..Default::default()
        };
        let applied = reg.apply_defaults("llama3", &opts);
        assert_eq!(applied.temperature, Some(0.9));
        assert_eq!(applied.num_ctx, Some(8192));
    }
}
