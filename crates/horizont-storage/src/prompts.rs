//! Versioned system prompt registry.
//!
//! Versions are append-only. Activating a new version flips every active row
//! to inactive and inserts the new one in the same IMMEDIATE transaction, so
//! concurrent writers (threads or processes) serialise on the database lock
//! and exactly one row stays active after each commit.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use horizont_core::error::HorizontError;
use horizont_core::types::{PromptVersion, Timestamp};

use crate::db::{sql_err, Database};

const DEFAULT_NAME: &str = "Prompt Padrão";
const DEFAULT_DESCRIPTION: &str = "Prompt padrão do sistema";
const UPDATED_NAME: &str = "Prompt Atualizado";
const UPDATED_DESCRIPTION: &str = "Atualização do prompt do sistema";

const SELECT_COLUMNS: &str =
    "SELECT id, name, description, content, created_by, updated_by, updated_at, is_active
     FROM prompts";

/// Registry of system prompt versions with a single active version.
pub struct PromptRegistry {
    db: Arc<Database>,
}

impl PromptRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Content of the active prompt, or `None` when none is configured.
    ///
    /// Callers fall back to a built-in default on `None`.
    pub fn get_active(&self) -> Result<Option<String>, HorizontError> {
        Ok(self.active_version()?.map(|version| version.content))
    }

    /// The active version with its metadata.
    pub fn active_version(&self) -> Result<Option<PromptVersion>, HorizontError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("{} WHERE is_active = 1 LIMIT 1", SELECT_COLUMNS),
                    [],
                    |row| Ok(row_to_version(row)),
                )
                .optional()
                .map_err(sql_err)?;

            match row {
                Some(version) => Ok(Some(version?)),
                None => Ok(None),
            }
        })
    }

    /// Make `content` the active prompt.
    ///
    /// Previously active versions stay in the history with `is_active = false`.
    pub fn set_active(&self, content: &str, author: &str) -> Result<PromptVersion, HorizontError> {
        if content.trim().is_empty() {
            return Err(HorizontError::InvalidInput(
                "prompt content cannot be empty".to_string(),
            ));
        }

        let version = self.db.write_tx(|tx| {
            tx.execute("UPDATE prompts SET is_active = 0 WHERE is_active = 1", [])
                .map_err(|e| {
                    HorizontError::Storage(format!("Failed to deactivate prompts: {}", e))
                })?;
            insert_active(tx, UPDATED_NAME, UPDATED_DESCRIPTION, content, author)
        })?;

        info!(prompt_id = version.id, author = %author, "System prompt activated");
        Ok(version)
    }

    /// Seed `content` as the active prompt if the registry has no versions.
    ///
    /// Returns `true` when a version was inserted.
    pub fn ensure_default(&self, content: &str, author: &str) -> Result<bool, HorizontError> {
        let inserted = self.db.write_tx(|tx| {
            let existing: i64 = tx
                .query_row("SELECT COUNT(*) FROM prompts", [], |row| row.get(0))
                .map_err(sql_err)?;
            if existing > 0 {
                return Ok(false);
            }
            insert_active(tx, DEFAULT_NAME, DEFAULT_DESCRIPTION, content, author)?;
            Ok(true)
        })?;

        if inserted {
            info!(author = %author, "Default system prompt seeded");
        }
        Ok(inserted)
    }

    /// All versions, newest first.
    pub fn history(&self) -> Result<Vec<PromptVersion>, HorizontError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("{} ORDER BY id DESC", SELECT_COLUMNS))
                .map_err(sql_err)?;
            let rows = stmt
                .query_map([], |row| Ok(row_to_version(row)))
                .map_err(sql_err)?;

            let mut versions = Vec::new();
            for row in rows {
                versions.push(row.map_err(sql_err)??);
            }
            Ok(versions)
        })
    }
}

fn insert_active(
    conn: &rusqlite::Connection,
    name: &str,
    description: &str,
    content: &str,
    author: &str,
) -> Result<PromptVersion, HorizontError> {
    let now = Timestamp::now();
    conn.execute(
        "INSERT INTO prompts (name, description, content, created_by, updated_by, updated_at, is_active)
         VALUES (?1, ?2, ?3, ?4, ?4, ?5, 1)",
        params![name, description, content, author, now.0],
    )
    .map_err(|e| HorizontError::Storage(format!("Failed to insert prompt: {}", e)))?;

    Ok(PromptVersion {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        description: description.to_string(),
        content: content.to_string(),
        created_by: author.to_string(),
        updated_by: author.to_string(),
        updated_at: now,
        is_active: true,
    })
}

fn row_to_version(row: &Row<'_>) -> Result<PromptVersion, HorizontError> {
    let is_active: i64 = row.get(7).map_err(sql_err)?;
    Ok(PromptVersion {
        id: row.get(0).map_err(sql_err)?,
        name: row.get(1).map_err(sql_err)?,
        description: row.get(2).map_err(sql_err)?,
        content: row.get(3).map_err(sql_err)?,
        created_by: row.get(4).map_err(sql_err)?,
        updated_by: row.get(5).map_err(sql_err)?,
        updated_at: Timestamp(row.get(6).map_err(sql_err)?),
        is_active: is_active == 1,
    })
}
