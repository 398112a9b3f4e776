//! `cbt.toml` configuration and the generator factory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use cbt_core::source::SourceConfig;
use cbt_core::traits::TextGenerator;

use crate::ollama::OllamaProvider;
use crate::openai::OpenAiProvider;

/// Configuration for a single generative backend.
///
/// Note: Custom Debug impl masks API keys to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    OpenAI {
        api_key: String,
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        org_id: Option<String>,
    },
    Ollama {
        #[serde(default = "default_ollama_url")]
        base_url: String,
    },
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderConfig::OpenAI {
                api_key: _,
                base_url,
                org_id,
            } => f
                .debug_struct("OpenAI")
                .field("api_key", &"***")
                .field("base_url", base_url)
                .field("org_id", org_id)
                .finish(),
            ProviderConfig::Ollama { base_url } => f
                .debug_struct("Ollama")
                .field("base_url", base_url)
                .finish(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

/// Top-level `cbt` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CbtConfig {
    /// Backend configurations keyed by name.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Backend used for question synthesis. Unset means bank-only.
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Synthesis is abandoned after this many milliseconds.
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
    /// Question bank file; the built-in bank when unset.
    #[serde(default)]
    pub bank_path: Option<PathBuf>,
    /// Directory holding results, profiles and usage counters.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    /// Seed for fallback sampling.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_model() -> String {
    "gpt-4.1-mini".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_generation_timeout_ms() -> u64 {
    8000
}
fn default_store_dir() -> PathBuf {
    PathBuf::from("./cbt-data")
}

impl Default for CbtConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: None,
            default_model: default_model(),
            temperature: default_temperature(),
            generation_timeout_ms: default_generation_timeout_ms(),
            bank_path: None,
            store_dir: default_store_dir(),
            seed: None,
        }
    }
}

impl CbtConfig {
    /// Synthesis settings for the question source.
    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            model: self.default_model.clone(),
            temperature: self.temperature,
            timeout: Duration::from_millis(self.generation_timeout_ms),
            seed: self.seed,
            ..SourceConfig::default()
        }
    }

    /// Build the default backend, or `None` when none is configured.
    pub fn default_generator(&self) -> Result<Option<Arc<dyn TextGenerator>>> {
        let Some(name) = self.default_provider.as_deref() else {
            return Ok(None);
        };
        let provider = self.providers.get(name).with_context(|| {
            format!("default provider '{name}' is not configured under [providers]")
        })?;
        create_generator(name, provider).map(Some)
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

fn resolve_provider_config(config: &ProviderConfig) -> ProviderConfig {
    match config {
        ProviderConfig::OpenAI {
            api_key,
            base_url,
            org_id,
        } => ProviderConfig::OpenAI {
            api_key: resolve_env_vars(api_key),
            base_url: base_url.as_ref().map(|u| resolve_env_vars(u)),
            org_id: org_id.as_ref().map(|o| resolve_env_vars(o)),
        },
        ProviderConfig::Ollama { base_url } => ProviderConfig::Ollama {
            base_url: resolve_env_vars(base_url),
        },
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `cbt.toml` in the current directory
/// 2. `~/.config/cbt/config.toml`
///
/// Environment variable override: `CBT_OPENAI_KEY`.
pub fn load_config() -> Result<CbtConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<CbtConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("cbt.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            tracing::debug!("loading config from {}", path.display());
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<CbtConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => CbtConfig::default(),
    };

    if let Ok(key) = std::env::var("CBT_OPENAI_KEY") {
        let entry = config
            .providers
            .entry("openai".into())
            .or_insert(ProviderConfig::OpenAI {
                api_key: String::new(),
                base_url: None,
                org_id: None,
            });
        if let ProviderConfig::OpenAI { api_key, .. } = entry {
            *api_key = key;
        }
    }

    config.providers = config
        .providers
        .iter()
        .map(|(k, v)| (k.clone(), resolve_provider_config(v)))
        .collect();

    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("cbt"))
}

/// Create a generator from its configuration.
pub fn create_generator(name: &str, config: &ProviderConfig) -> Result<Arc<dyn TextGenerator>> {
    match config {
        ProviderConfig::OpenAI {
            api_key,
            base_url,
            org_id,
        } => {
            if api_key.trim().is_empty() {
                anyhow::bail!("provider '{name}' has an empty api_key");
            }
            Ok(Arc::new(OpenAiProvider::new(
                api_key,
                base_url.clone(),
                org_id.clone(),
            )))
        }
        ProviderConfig::Ollama { base_url } => Ok(Arc::new(OllamaProvider::new(base_url))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_CBT_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_CBT_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_CBT_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        assert_eq!(resolve_env_vars("${_CBT_UNSET_VAR}"), "");
        assert_eq!(resolve_env_vars("dangling ${brace"), "dangling ${brace");
        std::env::remove_var("_CBT_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = CbtConfig::default();
        assert!(config.default_provider.is_none());
        assert_eq!(config.generation_timeout_ms, 8000);
        assert_eq!(config.default_model, "gpt-4.1-mini");
        assert!(config.default_generator().unwrap().is_none());

        let source = config.source_config();
        assert_eq!(source.timeout, Duration::from_secs(8));
        assert_eq!(source.model, "gpt-4.1-mini");
    }

    #[test]
    fn parse_provider_config() {
        let toml_str = r#"
default_provider = "openai"
default_model = "gpt-4.1"
generation_timeout_ms = 5000
seed = 42

[providers.openai]
type = "openai"
api_key = "sk-openai"

[providers.local]
type = "ollama"
"#;
        let config: CbtConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.providers.len(), 2);
        assert!(matches!(
            config.providers.get("local"),
            Some(ProviderConfig::Ollama { base_url }) if base_url == "http://localhost:11434"
        ));
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.source_config().timeout, Duration::from_millis(5000));

        let generator = config.default_generator().unwrap().unwrap();
        assert_eq!(generator.name(), "openai");
    }

    #[test]
    fn debug_masks_api_key() {
        let config = ProviderConfig::OpenAI {
            api_key: "sk-secret".into(),
            base_url: None,
            org_id: None,
        };
        let shown = format!("{config:?}");
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("***"));
    }

    #[test]
    fn load_from_file_expands_env_vars() {
        std::env::set_var("_CBT_TEST_KEY", "sk-from-env");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cbt.toml");
        std::fs::write(
            &path,
            r#"
store_dir = "/tmp/cbt-results"

[providers.work]
type = "openai"
api_key = "${_CBT_TEST_KEY}"
base_url = "https://llm.example.edu"
"#,
        )
        .unwrap();

        let config = load_config_from(Some(&path)).unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/tmp/cbt-results"));
        match config.providers.get("work") {
            Some(ProviderConfig::OpenAI { api_key, .. }) => assert_eq!(api_key, "sk-from-env"),
            other => panic!("unexpected provider {other:?}"),
        }
        std::env::remove_var("_CBT_TEST_KEY");
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let err = load_config_from(Some(Path::new("/nonexistent/cbt.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn unknown_default_provider_is_an_error() {
        let config = CbtConfig {
            default_provider: Some("missing".into()),
            ..CbtConfig::default()
        };
        assert!(config.default_generator().is_err());
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let config = ProviderConfig::OpenAI {
            api_key: " ".into(),
            base_url: None,
            org_id: None,
        };
        assert!(create_generator("openai", &config).is_err());
        assert!(create_generator(
            "local",
            &ProviderConfig::Ollama {
                base_url: default_ollama_url()
            }
        )
        .is_ok());
    }
}
