//! Database schema migrations.
//!
//! Applies the initial schema: chats, chat_messages, prompts and the
//! schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use horizont_core::error::HorizontError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), HorizontError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| HorizontError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| HorizontError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
///
/// All timestamps are epoch milliseconds.
fn apply_v1(conn: &Connection) -> Result<(), HorizontError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS chats (
            id              TEXT PRIMARY KEY NOT NULL,
            owner_id        TEXT NOT NULL,
            title           TEXT NOT NULL DEFAULT '',
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            last_message_at INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_chats_owner_last_message
            ON chats (owner_id, last_message_at DESC);

        -- seq is the append order; created_at never decreases within a chat.
        CREATE TABLE IF NOT EXISTS chat_messages (
            seq              INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id          TEXT NOT NULL,
            role             TEXT NOT NULL
                             CHECK (role IN ('user', 'assistant')),
            content          TEXT NOT NULL,
            created_at       INTEGER NOT NULL,
            chart_json       TEXT,
            attachments_json TEXT NOT NULL DEFAULT '[]',
            FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_chat
            ON chat_messages (chat_id, created_at ASC, seq ASC);

        -- Prompt versions are append-only; only is_active is ever updated.
        CREATE TABLE IF NOT EXISTS prompts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            content     TEXT NOT NULL,
            created_by  TEXT NOT NULL,
            updated_by  TEXT NOT NULL,
            updated_at  INTEGER NOT NULL,
            is_active   INTEGER NOT NULL DEFAULT 0
                        CHECK (is_active IN (0, 1))
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_prompts_single_active
            ON prompts (is_active)
            WHERE is_active = 1;

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| HorizontError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
