//! Configuration file support

use scribe_ai::{ProviderCredentials, ProviderId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Model used when neither the config nor the command line names one
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4-5";

/// Configuration for scribe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model as `<provider>/<model-id>`
    pub model: Option<String>,
    /// Ask for reasoning output
    pub thinking: Option<bool>,
    /// Step budget per turn
    pub max_steps: Option<usize>,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
    /// Custom system prompt file path
    pub system_prompt_file: Option<String>,
    /// API keys by provider id (alternative to environment variables)
    pub api_keys: HashMap<String, String>,
    /// Endpoint overrides by provider id
    pub base_urls: HashMap<String, String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scribe")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("SCRIBE_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`. A missing or broken file yields the defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Write the example config to `path` unless a file is already there
    pub fn init_at(path: &Path) -> std::io::Result<()> {
        if path.exists() {
            return Ok(());
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, example_config())
    }

    /// Create the default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        Self::init_at(&path)?;
        Ok(path)
    }

    /// Key and endpoint for `provider`. Environment variables still apply
    /// when the config has no key.
    pub fn credentials(&self, provider: ProviderId) -> ProviderCredentials {
        ProviderCredentials {
            api_key: self.api_keys.get(provider.as_str()).cloned(),
            base_url: self.base_urls.get(provider.as_str()).cloned(),
        }
    }

    /// Contents of `system_prompt_file`, with `~/` expanded
    pub fn system_prompt(&self) -> std::io::Result<Option<String>> {
        match &self.system_prompt_file {
            Some(file) => fs::read_to_string(expand_home(file)).map(Some),
            None => Ok(None),
        }
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# scribe configuration file
# Place at ~/.config/scribe/config.toml (Linux) or set SCRIBE_CONFIG_PATH

# Default model as <provider>/<model-id>
# Providers: anthropic, openai, google, ollama, openrouter, groq
model = "anthropic/claude-sonnet-4-5"

# Ask the model for reasoning output
thinking = false

# Inference passes allowed per turn (1-10)
max_steps = 10

# Maximum tokens per response (optional)
# max_tokens = 8192

# Custom system prompt file (optional)
# system_prompt_file = "~/.config/scribe/system_prompt.txt"

# API keys (optional - environment variables are used otherwise)
[api_keys]
# anthropic = "sk-ant-..."
# openai = "sk-..."
# google = "..."

# Endpoint overrides (optional)
[base_urls]
# ollama = "http://gpu-box:11434"
"#
}
