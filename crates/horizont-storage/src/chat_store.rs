//! Durable chats and their ordered messages.
//!
//! The store is the source of truth for transcript order. An append writes
//! the message row and bumps `chats.last_message_at` inside one IMMEDIATE
//! transaction, so either both land or neither does.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};

use horizont_core::error::HorizontError;
use horizont_core::types::{
    Attachment, Chat, ChartSpec, ChatId, ChatSummary, Message, NewMessage, Role, Timestamp,
};

use crate::db::{sql_err, Database};

/// Characters of the newest message shown in a chat summary.
const PREVIEW_CHARS: usize = 100;

/// Repository for chats and chat messages.
pub struct ChatStore {
    db: Arc<Database>,
}

impl ChatStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create an empty chat owned by `owner_id`.
    ///
    /// `last_message_at` starts at the creation time.
    pub fn create(&self, owner_id: &str, title: &str) -> Result<ChatId, HorizontError> {
        let id = ChatId::new();
        let now = Timestamp::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chats (id, owner_id, title, created_at, updated_at, last_message_at)
                 VALUES (?1, ?2, ?3, ?4, ?4, ?4)",
                params![id.to_string(), owner_id, title, now.0],
            )
            .map_err(|e| HorizontError::Storage(format!("Failed to create chat: {}", e)))?;
            Ok(())
        })?;
        info!(chat_id = %id, owner = %owner_id, "Chat created");
        Ok(id)
    }

    /// Fetch a chat by id.
    pub fn get(&self, chat_id: ChatId) -> Result<Option<Chat>, HorizontError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, owner_id, title, created_at, last_message_at
                     FROM chats WHERE id = ?1",
                    params![chat_id.to_string()],
                    |row| Ok(row_to_chat(row)),
                )
                .optional()
                .map_err(sql_err)?;

            match row {
                Some(chat) => Ok(Some(chat?)),
                None => Ok(None),
            }
        })
    }

    /// Append a message to a chat.
    ///
    /// Fails with `ChatNotFound` for an unknown chat. The message timestamp
    /// is server-assigned and never earlier than the chat's current
    /// `last_message_at`, which keeps `created_at` non-decreasing in append
    /// order. Any failure rolls back both the insert and the timestamp bump
    /// and is reported as `Storage`.
    pub fn append_message(
        &self,
        chat_id: ChatId,
        role: Role,
        message: NewMessage,
    ) -> Result<Message, HorizontError> {
        let chart_json = message
            .chart
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let attachments_json = serde_json::to_string(&message.attachments)?;

        let (seq, created_at) = self.db.write_tx(|tx| {
            let last: Option<Option<i64>> = tx
                .query_row(
                    "SELECT last_message_at FROM chats WHERE id = ?1",
                    params![chat_id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_err)?;

            let last = match last {
                Some(last) => last,
                None => return Err(HorizontError::ChatNotFound(chat_id)),
            };

            let created_at = match last {
                Some(prev) => Timestamp::now().0.max(prev),
                None => Timestamp::now().0,
            };

            tx.execute(
                "INSERT INTO chat_messages (chat_id, role, content, created_at, chart_json, attachments_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    chat_id.to_string(),
                    role.as_str(),
                    message.content,
                    created_at,
                    chart_json,
                    attachments_json,
                ],
            )
            .map_err(|e| HorizontError::Storage(format!("Failed to insert message: {}", e)))?;
            let seq = tx.last_insert_rowid();

            tx.execute(
                "UPDATE chats SET last_message_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![created_at, chat_id.to_string()],
            )
            .map_err(|e| {
                HorizontError::Storage(format!("Failed to update last_message_at: {}", e))
            })?;

            Ok((seq, created_at))
        })?;

        debug!(chat_id = %chat_id, role = %role, seq, "Message appended");

        Ok(Message {
            seq,
            chat_id,
            role,
            content: message.content,
            created_at: Timestamp(created_at),
            chart: message.chart,
            attachments: message.attachments,
        })
    }

    /// All messages of a chat, oldest first.
    ///
    /// Returns an empty list for a chat without messages (or an unknown id).
    pub fn list_messages(&self, chat_id: ChatId) -> Result<Vec<Message>, HorizontError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT seq, chat_id, role, content, created_at, chart_json, attachments_json
                     FROM chat_messages
                     WHERE chat_id = ?1
                     ORDER BY created_at ASC, seq ASC",
                )
                .map_err(sql_err)?;

            let rows = stmt
                .query_map(params![chat_id.to_string()], |row| Ok(row_to_message(row)))
                .map_err(sql_err)?;

            let mut messages = Vec::new();
            for row in rows {
                messages.push(row.map_err(sql_err)??);
            }
            Ok(messages)
        })
    }

    /// Number of messages in a chat.
    pub fn count_messages(&self, chat_id: ChatId) -> Result<u64, HorizontError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM chat_messages WHERE chat_id = ?1",
                    params![chat_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(sql_err)?;
            Ok(count as u64)
        })
    }

    /// Chats of an owner, most recently active first.
    ///
    /// A NULL `last_message_at` sorts as the earliest possible instant.
    pub fn list_chats(&self, owner_id: &str) -> Result<Vec<Chat>, HorizontError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, owner_id, title, created_at, last_message_at
                     FROM chats
                     WHERE owner_id = ?1
                     ORDER BY COALESCE(last_message_at, -9223372036854775808) DESC,
                              created_at DESC, rowid DESC",
                )
                .map_err(sql_err)?;

            let rows = stmt
                .query_map(params![owner_id], |row| Ok(row_to_chat(row)))
                .map_err(sql_err)?;

            let mut chats = Vec::new();
            for row in rows {
                chats.push(row.map_err(sql_err)??);
            }
            Ok(chats)
        })
    }

    /// Chat listing with message counts and a preview of the newest message.
    pub fn summaries(&self, owner_id: &str) -> Result<Vec<ChatSummary>, HorizontError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT c.id, c.title, c.created_at, c.last_message_at,
                            (SELECT COUNT(*) FROM chat_messages m WHERE m.chat_id = c.id),
                            COALESCE((SELECT m.content FROM chat_messages m
                                      WHERE m.chat_id = c.id
                                      ORDER BY m.created_at DESC, m.seq DESC
                                      LIMIT 1), '')
                     FROM chats c
                     WHERE c.owner_id = ?1
                     ORDER BY COALESCE(c.last_message_at, -9223372036854775808) DESC,
                              c.created_at DESC, c.rowid DESC",
                )
                .map_err(sql_err)?;

            let rows = stmt
                .query_map(params![owner_id], |row| Ok(row_to_summary(row)))
                .map_err(sql_err)?;

            let mut summaries = Vec::new();
            for row in rows {
                summaries.push(row.map_err(sql_err)??);
            }
            Ok(summaries)
        })
    }

    /// Change the title of a chat.
    pub fn rename(&self, chat_id: ChatId, title: &str) -> Result<(), HorizontError> {
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE chats SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, Timestamp::now().0, chat_id.to_string()],
            )
            .map_err(|e| HorizontError::Storage(format!("Failed to rename chat: {}", e)))
        })?;
        if changed == 0 {
            return Err(HorizontError::ChatNotFound(chat_id));
        }
        Ok(())
    }

    /// Delete a chat and, by cascade, its messages.
    ///
    /// Deleting an absent chat is not an error.
    pub fn delete(&self, chat_id: ChatId) -> Result<(), HorizontError> {
        let removed = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM chats WHERE id = ?1",
                params![chat_id.to_string()],
            )
            .map_err(|e| HorizontError::Storage(format!("Failed to delete chat: {}", e)))
        })?;
        if removed > 0 {
            info!(chat_id = %chat_id, "Chat deleted");
        }
        Ok(())
    }
}

// =============================================================================
// Row mappers
// =============================================================================

fn row_to_chat(row: &Row<'_>) -> Result<Chat, HorizontError> {
    let id: String = row.get(0).map_err(sql_err)?;
    Ok(Chat {
        id: id.parse()?,
        owner_id: row.get(1).map_err(sql_err)?,
        title: row.get(2).map_err(sql_err)?,
        created_at: Timestamp(row.get(3).map_err(sql_err)?),
        last_message_at: row
            .get::<_, Option<i64>>(4)
            .map_err(sql_err)?
            .map(Timestamp),
    })
}

fn row_to_summary(row: &Row<'_>) -> Result<ChatSummary, HorizontError> {
    let id: String = row.get(0).map_err(sql_err)?;
    let last_content: String = row.get(5).map_err(sql_err)?;
    Ok(ChatSummary {
        id: id.parse()?,
        title: row.get(1).map_err(sql_err)?,
        created_at: Timestamp(row.get(2).map_err(sql_err)?),
        last_message_at: row
            .get::<_, Option<i64>>(3)
            .map_err(sql_err)?
            .map(Timestamp),
        message_count: row.get::<_, i64>(4).map_err(sql_err)? as u64,
        last_message_preview: last_content.chars().take(PREVIEW_CHARS).collect(),
    })
}

fn row_to_message(row: &Row<'_>) -> Result<Message, HorizontError> {
    let chat_id: String = row.get(1).map_err(sql_err)?;
    let role: String = row.get(2).map_err(sql_err)?;
    let chart_json: Option<String> = row.get(5).map_err(sql_err)?;
    let attachments_json: String = row.get(6).map_err(sql_err)?;

    let chart: Option<ChartSpec> = chart_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    let attachments: Vec<Attachment> = serde_json::from_str(&attachments_json)?;

    Ok(Message {
        seq: row.get(0).map_err(sql_err)?,
        chat_id: chat_id.parse()?,
        role: role.parse()?,
        content: row.get(3).map_err(sql_err)?,
        created_at: Timestamp(row.get(4).map_err(sql_err)?),
        chart,
        attachments,
    })
}
