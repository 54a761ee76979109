//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use tailgrid_ai::{DEFAULT_MODEL, InferenceConfig};
use tailgrid_core::{GridConfig, SessionConfig, WorkspaceConfig, provision::DEFAULT_API_BASE};

const ACCOUNT_ID_ENV: &str = "CLOUDFLARE_ACCOUNT_ID";
const API_TOKEN_ENV: &str = "CLOUDFLARE_API_TOKEN";

/// Configuration for tailgrid
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Account that owns the workers
    pub account_id: Option<String>,
    /// API token (alternative to environment variables)
    pub api_token: Option<String>,
    /// Base URL of the platform API
    pub api_base_url: Option<String>,
    pub ai: AiSettings,
    pub buffers: BufferSettings,
}

/// Inference settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    /// Model identifier
    pub model: Option<String>,
    /// Full endpoint URL, replacing the one derived from account and model
    pub endpoint: Option<String>,
    /// Character budget for log context
    pub char_budget: Option<usize>,
    /// File holding a replacement system prompt
    pub system_prompt_file: Option<String>,
}

/// Buffer sizes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// Lines kept per live session
    pub session_capacity: Option<usize>,
    /// Lines kept per pane
    pub pane_capacity: Option<usize>,
    /// Batches buffered between a session and the display loop
    pub conduit_capacity: Option<usize>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tailgrid")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("TAILGRID_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
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

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            api_base_url: Some(DEFAULT_API_BASE.to_string()),
            ai: AiSettings {
                model: Some(DEFAULT_MODEL.to_string()),
                char_budget: Some(WorkspaceConfig::default().char_budget),
                ..Default::default()
            },
            ..Default::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// Account ID from config, then environment
    pub fn account_id(&self) -> Option<String> {
        config_or_env(self.account_id.as_deref(), std::env::var(ACCOUNT_ID_ENV).ok())
    }

    /// API token from config, then environment
    pub fn api_token(&self) -> Option<String> {
        config_or_env(self.api_token.as_deref(), std::env::var(API_TOKEN_ENV).ok())
    }

    pub fn api_base(&self) -> String {
        self.api_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
    }

    /// Inference endpoint settings. `model` overrides the configured model.
    pub fn inference_config(
        &self,
        account_id: &str,
        api_token: &str,
        model: Option<&str>,
    ) -> InferenceConfig {
        let model = model
            .map(str::to_string)
            .or_else(|| self.ai.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let mut config = InferenceConfig::workers_ai(&self.api_base(), account_id, api_token, model);
        if let Some(endpoint) = self.ai.endpoint.as_deref().filter(|e| !e.is_empty()) {
            config.endpoint = endpoint.to_string();
        }
        config
    }

    /// Workspace settings with configured sizes applied over the defaults
    pub fn workspace_config(&self, char_budget: Option<usize>) -> WorkspaceConfig {
        let defaults = WorkspaceConfig::default();
        let session_defaults = SessionConfig::default();
        let grid_defaults = GridConfig::default();

        WorkspaceConfig {
            session: SessionConfig {
                history_capacity: self
                    .buffers
                    .session_capacity
                    .unwrap_or(session_defaults.history_capacity),
                conduit_capacity: self
                    .buffers
                    .conduit_capacity
                    .unwrap_or(session_defaults.conduit_capacity),
                ..session_defaults
            },
            grid: GridConfig {
                pane_capacity: self
                    .buffers
                    .pane_capacity
                    .unwrap_or(grid_defaults.pane_capacity),
            },
            char_budget: char_budget
                .or(self.ai.char_budget)
                .unwrap_or(defaults.char_budget),
            ..defaults
        }
    }

    /// Read the system prompt override, if one is configured
    pub fn system_prompt(&self) -> std::io::Result<Option<String>> {
        match &self.ai.system_prompt_file {
            Some(path) => fs::read_to_string(expand_home(path)).map(Some),
            None => Ok(None),
        }
    }
}

fn config_or_env(from_config: Option<&str>, from_env: Option<String>) -> Option<String> {
    from_config
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or(from_env.filter(|v| !v.is_empty()))
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# tailgrid configuration file
# Place at ~/.config/tailgrid/config.toml (Linux) or set TAILGRID_CONFIG_PATH

# Credentials (optional - CLOUDFLARE_ACCOUNT_ID and CLOUDFLARE_API_TOKEN also work)
# account_id = "..."
# api_token = "..."

# api_base_url = "https://api.cloudflare.com/client/v4"

[ai]
model = "@cf/meta/llama-3.1-8b-instruct"
# endpoint = "https://gateway.example.com/v1/run"
char_budget = 12000
# system_prompt_file = "~/.config/tailgrid/system_prompt.txt"

[buffers]
# session_capacity = 500
# pane_capacity = 200
# conduit_capacity = 64
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_config() {
        let config: Config = toml::from_str(
            r#"
            account_id = "acct"

            [ai]
            model = "@cf/custom"

            [buffers]
            pane_capacity = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.account_id.as_deref(), Some("acct"));
        assert_eq!(config.ai.model.as_deref(), Some("@cf/custom"));
        assert_eq!(config.buffers.pane_capacity, Some(50));
        assert!(config.buffers.session_capacity.is_none());
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.ai.model.as_deref(), Some(DEFAULT_MODEL));
        assert_eq!(config.ai.char_budget, Some(12_000));
    }

    #[test]
    fn test_config_value_wins_over_env() {
        assert_eq!(
            config_or_env(Some("from-file"), Some("from-env".into())).as_deref(),
            Some("from-file")
        );
        assert_eq!(
            config_or_env(None, Some("from-env".into())).as_deref(),
            Some("from-env")
        );
        assert_eq!(
            config_or_env(Some(""), Some("from-env".into())).as_deref(),
            Some("from-env")
        );
        assert!(config_or_env(None, Some(String::new())).is_none());
    }

    #[test]
    fn test_workspace_config_overrides() {
        let mut config = Config::default();
        config.buffers.session_capacity = Some(10);
        config.buffers.pane_capacity = Some(20);
        config.ai.char_budget = Some(3000);

        let ws = config.workspace_config(None);
        assert_eq!(ws.session.history_capacity, 10);
        assert_eq!(ws.session.conduit_capacity, 64);
        assert_eq!(ws.grid.pane_capacity, 20);
        assert_eq!(ws.char_budget, 3000);

        // Command line beats the file.
        assert_eq!(config.workspace_config(Some(999)).char_budget, 999);
    }

    #[test]
    fn test_inference_endpoint() {
        let mut config = Config::default();
        let inference = config.inference_config("acct", "tok", None);
        assert_eq!(
            inference.endpoint,
            format!("{}/accounts/acct/ai/run/{}", DEFAULT_API_BASE, DEFAULT_MODEL)
        );

        let inference = config.inference_config("acct", "tok", Some("@cf/other"));
        assert!(inference.endpoint.ends_with("/ai/run/@cf/other"));
        assert_eq!(inference.model, "@cf/other");

        config.ai.endpoint = Some("http://localhost:9000/run".into());
        let inference = config.inference_config("acct", "tok", None);
        assert_eq!(inference.endpoint, "http://localhost:9000/run");
    }
}
