//! CLI argument definitions for the `horizont` binary.
//!
//! Priority resolution: CLI args > `HORIZONT_*` env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use horizont_core::types::ChatId;

/// Horizont sales assistant: chats, system prompts and client proposals.
#[derive(Parser, Debug)]
#[command(name = "horizont", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the SQLite database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Representative the chats belong to.
    #[arg(short = 'u', long = "user", global = true)]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage chats.
    #[command(subcommand)]
    Chat(ChatCommand),

    /// Send a message and print the assistant reply.
    Send {
        chat: ChatId,
        text: String,
        /// Text document to forward with this message (repeatable).
        #[arg(long = "attach")]
        attach: Vec<PathBuf>,
    },

    /// Inspect or replace the system prompt.
    #[command(subcommand)]
    Prompt(PromptCommand),

    /// Build client proposal data from a chat.
    Presentation {
        chat: ChatId,
        #[arg(long = "client", default_value = "Cliente")]
        client: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ChatCommand {
    /// Create an empty chat.
    New {
        #[arg(long = "title", default_value = "Nova Conversa")]
        title: String,
    },
    /// List the user's chats, most recently active first.
    List,
    /// Print a chat and its transcript.
    Show { chat: ChatId },
    Rename { chat: ChatId, title: String },
    /// Delete a chat and all of its messages.
    Delete { chat: ChatId },
}

#[derive(Subcommand, Debug)]
pub enum PromptCommand {
    /// Print the active version.
    Show,
    /// Activate a new version.
    Set {
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        content: Option<String>,
        /// Read the prompt from a file instead.
        #[arg(long = "file")]
        file: Option<PathBuf>,
    },
    /// Every version, newest first.
    History,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > HORIZONT_CONFIG env var > ~/.horizont/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("HORIZONT_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory.
    ///
    /// Priority: --data-dir flag > HORIZONT_DATA_DIR env var. `None` keeps
    /// the config file value.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
            .or_else(|| std::env::var("HORIZONT_DATA_DIR").ok())
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > HORIZONT_LOG env var.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level
            .clone()
            .or_else(|| std::env::var("HORIZONT_LOG").ok())
    }

    /// Resolve the acting representative.
    ///
    /// Priority: --user flag > HORIZONT_USER env var > "default".
    pub fn resolve_user(&self) -> String {
        self.user
            .clone()
            .or_else(|| std::env::var("HORIZONT_USER").ok())
            .filter(|user| !user.trim().is_empty())
            .unwrap_or_else(|| "default".to_string())
    }
}

fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".horizont").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".horizont").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_with_attachments() {
        let id = ChatId::new();
        let args = CliArgs::parse_from([
            "horizont",
            "send",
            id.to_string().as_str(),
            "Veja o extrato",
            "--attach",
            "a.txt",
            "--attach",
            "b.txt",
        ]);
        match args.command {
            Command::Send { chat, text, attach } => {
                assert_eq!(chat, id);
                assert_eq!(text, "Veja o extrato");
                assert_eq!(attach, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_chat_id_rejected() {
        let result = CliArgs::try_parse_from(["horizont", "chat", "show", "not-a-uuid"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = CliArgs::parse_from(["horizont", "chat", "list", "--user", "carlos"]);
        assert_eq!(args.resolve_user(), "carlos");
        assert!(matches!(args.command, Command::Chat(ChatCommand::List)));
    }

    #[test]
    fn test_flag_beats_defaults() {
        let args = CliArgs::parse_from([
            "horizont",
            "--config",
            "/tmp/h.toml",
            "--data-dir",
            "/tmp/data",
            "prompt",
            "history",
        ]);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/tmp/h.toml"));
        assert_eq!(args.resolve_data_dir().as_deref(), Some("/tmp/data"));
    }

    #[test]
    fn test_presentation_client_default() {
        let id = ChatId::new();
        let args = CliArgs::parse_from(["horizont", "presentation", id.to_string().as_str()]);
        match args.command {
            Command::Presentation { client, .. } => assert_eq!(client, "Cliente"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_prompt_set_needs_content_or_file() {
        assert!(CliArgs::try_parse_from(["horizont", "prompt", "set"]).is_err());
        assert!(CliArgs::try_parse_from(["horizont", "prompt", "set", "texto"]).is_ok());
        assert!(
            CliArgs::try_parse_from(["horizont", "prompt", "set", "--file", "p.txt"]).is_ok()
        );
    }
}
