//! Full-text mirror of the message table.
//!
//! The mirror is its own SQLite database with an FTS5 table. It holds enough
//! of each message to answer a search without touching the entity store.

mod sync;

pub use sync::{IndexOp, IndexSync};

use futures_util::TryStreamExt;
use sqlx::SqlitePool;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{debug, info};

use crate::{
    AppResult,
    conversations::ConversationId,
    messages::{Message, MessageId},
    people::PersonId,
};

#[derive(Debug, Clone)]
pub struct MessageIndex {
    pool: SqlitePool,
}

impl MessageIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn apply(&self, op: &IndexOp) -> AppResult<()> {
        match op {
            IndexOp::Upsert(message) => self.upsert(message).await,
            IndexOp::Remove(id) => self.remove(*id).await,
        }
    }

    pub async fn upsert(&self, message: &Message) -> AppResult<()> {
        let created_at = message.created_at.format(&Rfc3339)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM message_index WHERE message_id=?")
            .bind(message.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO message_index (content,message_id,author_id,conversation_id,created_at) VALUES (?,?,?,?,?)",
        )
        .bind(&message.content)
        .bind(message.id)
        .bind(message.author_id)
        .bind(message.conversation_id)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    pub async fn remove(&self, id: MessageId) -> AppResult<()> {
        sqlx::query("DELETE FROM message_index WHERE message_id=?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Messages matching `query`, best match first. Whitespace separates terms,
    /// any term may match, and a trailing `*` matches by prefix.
    pub async fn search(&self, query: &str) -> AppResult<Vec<Message>> {
        let Some(expression) = match_expression(query) else {
            return Ok(Vec::new());
        };
        debug!("searching message index for {expression}");

        let rows: Vec<(i64, String, String, i64, i64)> = sqlx::query_as(
            "SELECT CAST(message_id AS INTEGER),content,created_at,CAST(author_id AS INTEGER),CAST(conversation_id AS INTEGER)
            FROM message_index WHERE message_index MATCH ? ORDER BY rank",
        )
        .bind(expression)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for (id, content, created_at, author_id, conversation_id) in rows {
            messages.push(Message {
                id: MessageId(id),
                content,
                created_at: OffsetDateTime::parse(&created_at, &Rfc3339)?,
                author_id: PersonId(author_id),
                conversation_id: ConversationId(conversation_id),
            });
        }
        Ok(messages)
    }

    /// Throws the mirror away and reloads it from the entity store.
    pub async fn rebuild(&self, primary: &SqlitePool) -> AppResult<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM message_index").execute(&mut *tx).await?;

        let mut count = 0;
        let mut rows = sqlx::query_as::<_, Message>(
            "SELECT id,content,created_at,author_id,conversation_id FROM messages ORDER BY id",
        )
        .fetch(primary);
        while let Some(message) = rows.try_next().await? {
            sqlx::query(
                "INSERT INTO message_index (content,message_id,author_id,conversation_id,created_at) VALUES (?,?,?,?,?)",
            )
            .bind(&message.content)
            .bind(message.id)
            .bind(message.author_id)
            .bind(message.conversation_id)
            .bind(message.created_at.format(&Rfc3339)?)
            .execute(&mut *tx)
            .await?;
            count += 1;
        }
        drop(rows);
        tx.commit().await?;

        info!("rebuilt message index with {count} messages");
        Ok(count)
    }
}

fn match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .filter_map(|raw| {
            let (word, prefix) = match raw.strip_suffix('*') {
                Some(word) => (word, true),
                None => (raw, false),
            };
            let word: String = word.chars().filter(|c| *c != '"').collect();
            if word.is_empty() {
                None
            } else if prefix {
                Some(format!("\"{word}\"*"))
            } else {
                Some(format!("\"{word}\""))
            }
        })
        .collect();

    (!terms.is_empty()).then(|| terms.join(" OR "))
}
