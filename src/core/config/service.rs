use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use super::paths::AppPaths;
use crate::core::errors::ApiError;

const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Typed view of `config.yml` merged with `secrets.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub retrieval: RetrievalSettings,
    pub answer: AnswerSettings,
    pub openai: OpenAiSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub docs_dir: String,
    pub index_dir: String,
    pub top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Character budget for the compact synthesized string.
    pub synthesis_budget: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            docs_dir: "docs".to_string(),
            index_dir: "storage".to_string(),
            top_k: 3,
            chunk_size: 500,
            chunk_overlap: 50,
            synthesis_budget: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerModeSetting {
    /// Second completion call over the retrieved context.
    Synthesis,
    /// Use the engine-synthesized string directly, no completion call.
    RetrievalOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerSettings {
    pub mode: AnswerModeSetting,
    pub stream: bool,
}

impl Default for AnswerSettings {
    fn default() -> Self {
        Self {
            mode: AnswerModeSetting::Synthesis,
            stream: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub embedding_model: String,
    pub temperature: f64,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com".to_string(),
            api_key: None,
            model: "gpt-3.5-turbo".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            temperature: 0.9,
        }
    }
}

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("VETA_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    /// Loads `config.yml`, overlays `secrets.yaml`, and deserializes the
    /// merged document. Missing files fall back to defaults; a file that
    /// exists but does not parse is a configuration error.
    pub fn load_settings(&self) -> Result<Settings, ApiError> {
        let public_config = load_yaml_file(&self.config_path())?;
        let secrets_config = load_yaml_file(&self.secrets_path())?;
        let merged = deep_merge(&public_config, &secrets_config);

        let mut settings: Settings = serde_yaml::from_value(merged)
            .map_err(|e| ApiError::Config(format!("invalid config: {}", e)))?;

        if let Ok(key) = env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                settings.openai.api_key = Some(key);
            }
        }

        Ok(settings)
    }
}

fn load_yaml_file(path: &Path) -> Result<Value, ApiError> {
    if !path.exists() {
        return Ok(Value::Mapping(Mapping::new()));
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| ApiError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let value: Value = serde_yaml::from_str(&contents)
        .map_err(|e| ApiError::Config(format!("failed to parse {}: {}", path.display(), e)))?;

    match value {
        Value::Mapping(_) => Ok(value),
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        _ => Err(ApiError::Config(format!(
            "{} must contain a mapping at the top level",
            path.display()
        ))),
    }
}

/// Overlays `patch` onto `base`, recursing into nested mappings.
fn deep_merge(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Mapping(base_map), Value::Mapping(patch_map)) => {
            let mut merged = base_map.clone();
            for (key, patch_value) in patch_map {
                let next = match merged.get(key) {
                    Some(base_value) => deep_merge(base_value, patch_value),
                    None => patch_value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Mapping(merged)
        }
        _ => patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_shipped_configuration() {
        let settings = Settings::default();
        assert_eq!(settings.retrieval.top_k, 3);
        assert_eq!(settings.retrieval.index_dir, "storage");
        assert_eq!(settings.openai.model, "gpt-3.5-turbo");
        assert!((settings.openai.temperature - 0.9).abs() < f64::EPSILON);
        assert!(settings.answer.stream);
        assert_eq!(settings.answer.mode, AnswerModeSetting::Synthesis);
    }

    #[test]
    fn deep_merge_overlays_nested_keys() {
        let base: Value = serde_yaml::from_str("openai:\n  model: a\n  temperature: 0.5\n").unwrap();
        let patch: Value = serde_yaml::from_str("openai:\n  model: b\n").unwrap();

        let merged = deep_merge(&base, &patch);
        let settings: Settings = serde_yaml::from_value(merged).unwrap();

        assert_eq!(settings.openai.model, "b");
        assert!((settings.openai.temperature - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn retrieval_only_mode_parses() {
        let value: Value = serde_yaml::from_str("answer:\n  mode: retrieval_only\n").unwrap();
        let settings: Settings = serde_yaml::from_value(value).unwrap();
        assert_eq!(settings.answer.mode, AnswerModeSetting::RetrievalOnly);
    }
}
