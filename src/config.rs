//! Application configuration.
//!
//! The config lives as YAML at `<config_dir>/config.yaml` and holds the
//! default model, per-provider API keys, the Ollama endpoint, and the
//! retrieval cutoff. Keys left empty in the file fall back to the usual
//! environment variables (`OPENAI_API_KEY` and friends) at load time, so
//! the file never has to contain a secret.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::{env, fs};
use thiserror::Error;
use tracing::debug;

use crate::models::Runtime;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn default_ollama_base() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_min_similarity() -> f32 {
    0.5
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Runtime settings for the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemchatConfig {
    /// Model used when `chat` is invoked without an argument.
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub google_api_key: Option<String>,
    #[serde(default)]
    pub xai_api_key: Option<String>,

    /// OpenAI-compatible endpoint of the local Ollama daemon.
    #[serde(default = "default_ollama_base")]
    pub ollama_base_url: String,

    /// Minimum bounded similarity score (1 / (1 + distance)) a retrieved
    /// snippet needs to be included as context.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
}

impl Default for MemchatConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            openai_api_key: None,
            anthropic_api_key: None,
            google_api_key: None,
            xai_api_key: None,
            ollama_base_url: default_ollama_base(),
            min_similarity: default_min_similarity(),
        }
    }
}

impl MemchatConfig {
    /// API key configured for a hosted runtime, if any. Local runtimes need
    /// no key and always return `None`.
    pub fn key_for(&self, runtime: Runtime) -> Option<&str> {
        let key = match runtime {
            Runtime::OpenAi => &self.openai_api_key,
            Runtime::Anthropic => &self.anthropic_api_key,
            Runtime::Google => &self.google_api_key,
            Runtime::XAi => &self.xai_api_key,
            Runtime::Ollama => &None,
        };
        key.as_deref().filter(|k| !k.is_empty())
    }
}

/// Load the config from `path`, filling empty API keys from the environment.
pub fn load_config(path: &Path) -> Result<MemchatConfig, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let content = fs::read_to_string(path)?;
    let mut config: MemchatConfig = serde_yaml::from_str(&content)?;

    fill_from_env(&mut config.openai_api_key, "OPENAI_API_KEY");
    fill_from_env(&mut config.anthropic_api_key, "ANTHROPIC_API_KEY");
    fill_from_env(&mut config.google_api_key, "GOOGLE_API_KEY");
    fill_from_env(&mut config.xai_api_key, "XAI_API_KEY");

    Ok(config)
}

/// Write a default config at `path` unless one already exists. Returns true
/// if a new file was written.
pub fn ensure_config_exists(path: &Path) -> Result<bool, ConfigError> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(&MemchatConfig::default())?;
    fs::write(path, yaml)?;
    Ok(true)
}

fn fill_from_env(slot: &mut Option<String>, var: &str) {
    if slot.as_deref().is_none_or(str::is_empty) {
        if let Ok(value) = env::var(var) {
            if !value.is_empty() {
                *slot = Some(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_config_reads_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            r#"
default_model: "claude-3.5"
anthropic_api_key: "sk-test"
min_similarity: 0.7
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.default_model, "claude-3.5");
        assert_eq!(config.key_for(Runtime::Anthropic), Some("sk-test"));
        assert_eq!(config.min_similarity, 0.7);
        assert_eq!(config.ollama_base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn missing_config_is_an_error() {
        assert!(load_config(Path::new("/nonexistent/config.yaml")).is_err());
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "default_model: [unclosed").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn ensure_config_writes_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");

        assert!(ensure_config_exists(&path).unwrap());
        assert!(!ensure_config_exists(&path).unwrap());

        let config = load_config(&path).unwrap();
        assert_eq!(config.default_model, "gpt-4o-mini");
    }

    #[test]
    fn local_runtime_never_needs_a_key() {
        let config = MemchatConfig::default();
        assert_eq!(config.key_for(Runtime::Ollama), None);
    }
}
