//! Horizont application binary - composition root.
//!
//! 1. Parse CLI args and load configuration from TOML
//! 2. Initialize tracing (stderr, so stdout carries only JSON)
//! 3. Open the shared SQLite database and seed the default prompt
//! 4. Dispatch the subcommand; `send` builds the Anthropic client and the
//!    conversation orchestrator on demand
//!
//! Every command prints one JSON document on stdout. Failures print
//! `{"error": <class>, "message": <text>}` and exit non-zero.

mod cli;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use secrecy::SecretString;
use serde::Serialize;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use horizont_chat::fallback::DEFAULT_SYSTEM_PROMPT;
use horizont_chat::{
    build_presentation, AnthropicClient, ChatError, ConversationOrchestrator, DocumentText,
};
use horizont_core::config::HorizontConfig;
use horizont_core::error::HorizontError;
use horizont_storage::{ChatStore, Database, PromptRegistry};

use cli::{ChatCommand, CliArgs, Command, PromptCommand};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Store(#[from] HorizontError),

    #[error("API key variable {0} is not set")]
    MissingApiKey(String),

    #[error("Cannot attach {0}: PDF text extraction is not available here, attach the extracted text instead")]
    UnsupportedAttachment(String),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
}

impl CliError {
    fn class(&self) -> &'static str {
        match self {
            CliError::Chat(e) => e.class(),
            CliError::Store(HorizontError::ChatNotFound(_)) => "not_found",
            CliError::Store(HorizontError::InvalidInput(_)) => "validation_failed",
            CliError::Store(HorizontError::Config(_)) => "config_error",
            CliError::Store(_) => "persistence_failed",
            CliError::MissingApiKey(_) => "auth_failed",
            CliError::UnsupportedAttachment(_) => "validation_failed",
            CliError::Read { .. } => "io_error",
        }
    }
}

/// Stores shared by every command.
struct Services {
    chats: Arc<ChatStore>,
    prompts: Arc<PromptRegistry>,
}

fn open_services(config: &HorizontConfig) -> Result<Services, HorizontError> {
    let db_path = config.database_path();
    let db = Arc::new(Database::new(
        &db_path,
        Duration::from_millis(config.storage.busy_timeout_ms),
    )?);
    tracing::debug!(path = %db_path.display(), "SQLite database ready");

    let prompts = Arc::new(PromptRegistry::new(Arc::clone(&db)));
    if prompts.ensure_default(DEFAULT_SYSTEM_PROMPT, "system")? {
        tracing::info!("Seeded default system prompt");
    }

    Ok(Services {
        chats: Arc::new(ChatStore::new(db)),
        prompts,
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, CliError> {
    serde_json::to_value(value).map_err(|e| CliError::Store(e.into()))
}

/// Load an attached text document for forwarding with a message.
///
/// Binary PDFs are rejected up front; only already-extracted text is forwarded.
fn read_document(path: &Path) -> Result<DocumentText, CliError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    if extension.as_deref() == Some("pdf") {
        return Err(CliError::UnsupportedAttachment(path.display().to_string()));
    }

    let read_err = |source: std::io::Error| CliError::Read {
        path: path.display().to_string(),
        source,
    };
    let text = std::fs::read_to_string(path).map_err(read_err)?;
    let size_bytes = std::fs::metadata(path).map_err(read_err)?.len();

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let mime_type = match extension.as_deref() {
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        _ => "text/plain",
    };

    Ok(DocumentText {
        name,
        mime_type: mime_type.to_string(),
        size_bytes,
        text,
    })
}

async fn run(args: CliArgs, config: HorizontConfig) -> Result<Value, CliError> {
    let user = args.resolve_user();
    let services = open_services(&config)?;
    let Services { chats, prompts } = services;

    match args.command {
        Command::Chat(ChatCommand::New { title }) => {
            let id = chats.create(&user, &title)?;
            tracing::info!(chat_id = %id, owner = %user, "Chat created");
            Ok(json!({ "id": id, "title": title }))
        }
        Command::Chat(ChatCommand::List) => to_json(&chats.summaries(&user)?),
        Command::Chat(ChatCommand::Show { chat }) => {
            let found = chats.get(chat)?.ok_or(HorizontError::ChatNotFound(chat))?;
            let messages = chats.list_messages(chat)?;
            Ok(json!({ "chat": found, "messages": messages }))
        }
        Command::Chat(ChatCommand::Rename { chat, title }) => {
            chats.rename(chat, &title)?;
            Ok(json!({ "id": chat, "title": title }))
        }
        Command::Chat(ChatCommand::Delete { chat }) => {
            chats.delete(chat)?;
            Ok(json!({ "id": chat, "deleted": true }))
        }
        Command::Send { chat, text, attach } => {
            let documents = attach
                .iter()
                .map(|path| read_document(path))
                .collect::<Result<Vec<_>, _>>()?;

            let key_env = &config.completion.api_key_env;
            let api_key = std::env::var(key_env)
                .ok()
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| CliError::MissingApiKey(key_env.clone()))?;
            let client = AnthropicClient::new(SecretString::from(api_key), &config.completion)?;
            tracing::debug!(model = client.model(), "Completion client ready");

            let orchestrator =
                ConversationOrchestrator::new(chats, prompts, Arc::new(client), &config);
            let outcome = orchestrator.send(chat, &text, documents).await?;
            to_json(&outcome)
        }
        Command::Prompt(PromptCommand::Show) => to_json(&prompts.active_version()?),
        Command::Prompt(PromptCommand::Set { content, file }) => {
            let content = match (content, file) {
                (Some(content), _) => content,
                (None, Some(path)) => {
                    std::fs::read_to_string(&path).map_err(|source| CliError::Read {
                        path: path.display().to_string(),
                        source,
                    })?
                }
                (None, None) => {
                    return Err(HorizontError::InvalidInput("prompt content is empty".to_string()).into())
                }
            };
            to_json(&prompts.set_active(&content, &user)?)
        }
        Command::Prompt(PromptCommand::History) => to_json(&prompts.history()?),
        Command::Presentation { chat, client } => {
            to_json(&build_presentation(&chats, chat, &client)?)
        }
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Failed to render output: {}", e),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let loaded = HorizontConfig::load(&config_file);
    let mut config = loaded.as_ref().cloned().unwrap_or_default();
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.general.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match &loaded {
        Ok(_) => tracing::debug!(path = %config_file.display(), "Configuration loaded"),
        Err(_) if !config_file.exists() => {
            tracing::debug!(path = %config_file.display(), "No configuration file, using defaults")
        }
        Err(e) => {
            tracing::warn!(path = %config_file.display(), error = %e, "Invalid configuration file, using defaults")
        }
    }

    match run(args, config).await {
        Ok(value) => {
            print_json(&value);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(class = e.class(), error = %e, "Command failed");
            print_json(&json!({ "error": e.class(), "message": e.to_string() }));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_in(dir: &Path) -> HorizontConfig {
        let mut config = HorizontConfig::default();
        config.general.data_dir = dir.to_string_lossy().to_string();
        config.completion.api_key_env = "HORIZONT_TEST_KEY_NEVER_SET".to_string();
        config
    }

    async fn exec(config: &HorizontConfig, argv: &[&str]) -> Result<Value, CliError> {
        let mut full = vec!["horizont", "--user", "carlos"];
        full.extend_from_slice(argv);
        run(CliArgs::parse_from(full), config.clone()).await
    }

    #[tokio::test]
    async fn test_chat_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let created = exec(&config, &["chat", "new", "--title", "Cliente Silva"])
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        let listed = exec(&config, &["chat", "list"]).await.unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["title"], "Cliente Silva");

        exec(&config, &["chat", "rename", id.as_str(), "Sr. Silva"]).await.unwrap();
        let shown = exec(&config, &["chat", "show", id.as_str()]).await.unwrap();
        assert_eq!(shown["chat"]["title"], "Sr. Silva");
        assert_eq!(shown["messages"].as_array().unwrap().len(), 0);

        exec(&config, &["chat", "delete", id.as_str()]).await.unwrap();
        let err = exec(&config, &["chat", "show", id.as_str()]).await.unwrap_err();
        assert_eq!(err.class(), "not_found");
    }

    #[tokio::test]
    async fn test_default_prompt_seeded_then_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let active = exec(&config, &["prompt", "show"]).await.unwrap();
        assert_eq!(active["content"], DEFAULT_SYSTEM_PROMPT);

        exec(&config, &["prompt", "set", "Seja breve."]).await.unwrap();
        let active = exec(&config, &["prompt", "show"]).await.unwrap();
        assert_eq!(active["content"], "Seja breve.");

        let history = exec(&config, &["prompt", "history"]).await.unwrap();
        assert_eq!(history.as_array().unwrap().len(), 2);

        let err = exec(&config, &["prompt", "set", "   "]).await.unwrap_err();
        assert_eq!(err.class(), "validation_failed");
    }

    #[tokio::test]
    async fn test_send_without_api_key_is_auth_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let created = exec(&config, &["chat", "new"]).await.unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        let err = exec(&config, &["send", id.as_str(), "Hello"]).await.unwrap_err();
        assert_eq!(err.class(), "auth_failed");

        let shown = exec(&config, &["chat", "show", id.as_str()]).await.unwrap();
        assert_eq!(shown["messages"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_presentation_for_empty_chat() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let created = exec(&config, &["chat", "new"]).await.unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        let value = exec(&config, &["presentation", id.as_str(), "--client", "Sra. Lima"])
            .await
            .unwrap();
        assert_eq!(value["title"], "Proposta Horizont Investimentos");
        assert_eq!(value["client"], "Sra. Lima");
        assert!(value["charts"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_read_document_metadata() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all("ano;saldo\n2024;80000".as_bytes()).unwrap();

        let doc = read_document(file.path()).unwrap();
        assert_eq!(doc.mime_type, "text/csv");
        assert_eq!(doc.size_bytes, 20);
        assert!(doc.text.starts_with("ano;saldo"));
        assert!(doc.name.ends_with(".csv"));
    }

    #[test]
    fn test_read_document_rejects_pdf() {
        let mut file = tempfile::Builder::new().suffix(".PDF").tempfile().unwrap();
        file.write_all(b"%PDF-1.7\n\xff\xfe binary").unwrap();

        let err = read_document(file.path()).unwrap_err();
        assert_eq!(err.class(), "validation_failed");
        assert!(err.to_string().contains("attach the extracted text"));
    }

    #[test]
    fn test_read_document_missing_file() {
        let err = read_document(Path::new("/nonexistent/extrato.txt")).unwrap_err();
        assert_eq!(err.class(), "io_error");
        assert!(err.to_string().contains("/nonexistent/extrato.txt"));
    }

    #[test]
    fn test_error_classes() {
        let missing = CliError::from(HorizontError::ChatNotFound(horizont_core::types::ChatId::new()));
        assert_eq!(missing.class(), "not_found");
        let storage = CliError::from(HorizontError::Storage("locked".to_string()));
        assert_eq!(storage.class(), "persistence_failed");
        let chat = CliError::from(ChatError::TimeoutExceeded { budget_ms: 90_000 });
        assert_eq!(chat.class(), "timeout_exceeded");
    }
}
