use chrono::{DateTime, Utc};
use sqlx::Row;

use intake_core::domain::message::{Message, MessageId, Sender};
use intake_core::domain::session::SessionId;

use super::{decode, parse_timestamp, MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, RepositoryError> {
    let sender: String = row.try_get("sender").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;

    Ok(Message {
        id: MessageId(row.try_get("id").map_err(decode)?),
        session_id: SessionId(row.try_get("session_id").map_err(decode)?),
        sender: sender.parse::<Sender>().map_err(decode)?,
        content: row.try_get("content").map_err(decode)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(
        &self,
        session_id: SessionId,
        sender: Sender,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Message, RepositoryError> {
        let id = sqlx::query(
            "INSERT INTO messages (session_id, sender, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id.0)
        .bind(sender.as_str())
        .bind(content)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Message {
            id: MessageId(id),
            session_id,
            sender,
            content: content.to_string(),
            created_at: now,
        })
    }

    async fn list_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, session_id, sender, content, created_at
             FROM messages WHERE session_id = ? ORDER BY id ASC",
        )
        .bind(session_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    async fn recent(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, session_id, sender, content, created_at
             FROM messages WHERE session_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(session_id.0)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows.iter().map(row_to_message).collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn count_by_sender(
        &self,
        session_id: SessionId,
        sender: Sender,
    ) -> Result<i64, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM messages WHERE session_id = ? AND sender = ?",
        )
        .bind(session_id.0)
        .bind(sender.as_str())
        .fetch_one(&self.pool)
        .await?;

        row.try_get("count").map_err(decode)
    }
}
