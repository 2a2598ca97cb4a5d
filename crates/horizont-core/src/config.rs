use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{HorizontError, Result};

/// Top-level configuration for the Horizont assistant.
///
/// Loaded from `~/.horizont/config.toml` by default. Every section falls back
/// to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HorizontConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

impl HorizontConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HorizontConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| HorizontError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Full path of the SQLite database file, with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.general.data_dir).join(&self.storage.db_file)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.horizont/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Durable store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file name inside `general.data_dir`.
    pub db_file: String,
    /// How long a writer waits on a lock held by another worker.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_file: "horizont.db".to_string(),
            busy_timeout_ms: 5000,
        }
    }
}

/// External completion service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    /// Output ceiling sent with every request.
    pub max_output_tokens: u32,
    /// Latency ceiling for a single HTTP attempt.
    pub request_timeout_secs: u64,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_output_tokens: 3000,
            request_timeout_secs: 60,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
        }
    }
}

impl CompletionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Conversation orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Longest accepted user message, in characters.
    pub max_message_chars: usize,
    /// Number of most recent messages sent upstream.
    pub context_window: usize,
    /// Wall-clock budget for one whole send.
    pub send_budget_secs: u64,
    /// Pause before the single retry of a transient failure.
    pub retry_backoff_ms: u64,
    /// Substitute the static reply when the service is unusable.
    pub fallback_enabled: bool,
    /// Characters of each attached document forwarded upstream.
    pub attachment_max_chars: usize,
    /// Characters of the first message used as the chat title.
    pub title_max_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 4000,
            context_window: 10,
            send_budget_secs: 90,
            retry_backoff_ms: 500,
            fallback_enabled: true,
            attachment_max_chars: 3000,
            title_max_chars: 50,
        }
    }
}

impl ChatConfig {
    pub fn send_budget(&self) -> Duration {
        Duration::from_secs(self.send_budget_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE"));
        if let Ok(home) = home {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = HorizontConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.storage.db_file, "horizont.db");
        assert_eq!(config.completion.max_output_tokens, 3000);
        assert_eq!(config.chat.context_window, 10);
        assert_eq!(config.chat.attachment_max_chars, 3000);
        assert!(config.chat.fallback_enabled);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[chat]
context_window = 4
fallback_enabled = false

[completion]
model = "claude-3-haiku-20240307"
"#;
        let file = create_temp_config(content);
        let config = HorizontConfig::load(file.path()).unwrap();
        assert_eq!(config.chat.context_window, 4);
        assert!(!config.chat.fallback_enabled);
        assert_eq!(config.chat.max_message_chars, 4000);
        assert_eq!(config.completion.model, "claude-3-haiku-20240307");
        assert_eq!(config.completion.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(config.storage.busy_timeout_ms, 5000);
    }

    #[test]
    fn test_load_invalid_toml_is_config_error() {
        let file = create_temp_config("[chat\ncontext_window = ");
        let err = HorizontConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, HorizontError::Config(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = HorizontConfig::default();
        config.chat.send_budget_secs = 15;
        config.save(&path).unwrap();

        let reloaded = HorizontConfig::load(&path).unwrap();
        assert_eq!(reloaded.chat.send_budget_secs, 15);
        assert_eq!(reloaded.completion.base_url, config.completion.base_url);
    }

    #[test]
    fn test_database_path_joins_data_dir() {
        let mut config = HorizontConfig::default();
        config.general.data_dir = "/var/lib/horizont".to_string();
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/horizont/horizont.db")
        );
    }

    #[test]
    fn test_durations() {
        let chat = ChatConfig::default();
        assert_eq!(chat.send_budget(), Duration::from_secs(90));
        assert_eq!(chat.retry_backoff(), Duration::from_millis(500));
    }
}
