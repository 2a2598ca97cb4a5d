//! Horizont storage crate - SQLite persistence for chats and prompts.
//!
//! Provides a WAL-mode SQLite database with migrations, the chat store
//! (chats + ordered messages) and the versioned system prompt registry.
//! Every worker opens the same database file; no chat or prompt state is
//! kept in process memory.

pub mod chat_store;
pub mod db;
pub mod migrations;
pub mod prompts;

pub use chat_store::ChatStore;
pub use db::Database;
pub use prompts::PromptRegistry;
