//! Messages inside conversations.
//!
//! Every operation takes the acting person. Reads outside the actor's
//! conversations come back empty and mutations there do nothing; neither is an
//! error. Store failures are.

mod dto;
mod save;

pub use dto::{AuthorDto, MessageDto};
pub use save::{MessageDraft, SaveOutcome};

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use tracing::debug;

use anyhow::anyhow;

use crate::{
    AppResult, Lookup, Removal,
    conversations::{self, ConversationId, can_access},
    participation::{self, ParentKind, ParentRef},
    people::{self, Person, PersonId},
    search::{IndexOp, IndexSync},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct MessageId(pub i64);

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub created_at: OffsetDateTime,
    pub author_id: PersonId,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone)]
pub struct Messages {
    db_pool: SqlitePool,
    index: IndexSync,
}

impl Messages {
    pub fn new(db_pool: SqlitePool, index: IndexSync) -> Self {
        Self { db_pool, index }
    }

    /// Every message in every conversation `actor` takes part in, newest
    /// first. Messages with equal timestamps keep their conversation order.
    pub async fn find_all(&self, actor: &Person) -> AppResult<Vec<Message>> {
        debug!("Request to get all Messages for {}", actor.diaspora_id);
        let mut conn = self.db_pool.acquire().await?;

        let mut messages: Vec<Message> = conversations::for_person(&mut conn, actor.id)
            .await?
            .into_iter()
            .flat_map(|conversation| conversation.messages)
            .collect();
        messages.sort_by(|m1, m2| m2.created_at.cmp(&m1.created_at));
        Ok(messages)
    }

    /// The conversation's messages in the order they were posted. Unlike
    /// [`Messages::find_all`] this is not sorted newest first.
    pub async fn find_all_by_conversation(&self, actor: &Person, conversation: ConversationId) -> AppResult<Vec<Message>> {
        debug!("Request to get all Messages of {conversation:?}");
        let mut conn = self.db_pool.acquire().await?;

        match conversations::load(&mut conn, conversation).await? {
            Some(conversation) if can_access(actor, &conversation) => Ok(conversation.messages),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn find_one(&self, actor: &Person, id: MessageId) -> AppResult<Lookup<Message>> {
        debug!("Request to get Message : {id:?}");
        let mut conn = self.db_pool.acquire().await?;

        let Some(message) = find(&mut conn, id).await? else {
            return Ok(Lookup::NotFound);
        };
        let Some(conversation) = conversations::load(&mut conn, message.conversation_id).await? else {
            return Ok(Lookup::NotFound);
        };

        if can_access(actor, &conversation) {
            Ok(Lookup::Found(message))
        } else {
            Ok(Lookup::Forbidden)
        }
    }

    /// Only the author may delete a message. The entity store commits first;
    /// the index follows on a best-effort basis.
    pub async fn delete(&self, actor: &Person, id: MessageId) -> AppResult<Removal> {
        debug!("Request to delete Message : {id:?}");

        let mut tx = self.db_pool.begin().await?;
        let Some(message) = find(&mut tx, id).await? else {
            return Ok(Removal::NotFound);
        };
        if message.author_id != actor.id {
            debug!("{} is not the author of {id:?}", actor.diaspora_id);
            return Ok(Removal::NotAuthor);
        }

        sqlx::query("DELETE FROM messages WHERE id=?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        conversations::touch(&mut tx, message.conversation_id, OffsetDateTime::now_utc()).await?;
        tx.commit().await?;

        self.index.apply(IndexOp::Remove(id)).await;
        Ok(Removal::Removed)
    }

    /// Full-text search over every indexed message, best match first.
    ///
    /// This does NOT check that `actor` takes part in the conversations the
    /// hits come from. Use [`Messages::search_visible`] for anything shown to
    /// a user.
    pub async fn search(&self, actor: &Person, query: &str) -> AppResult<Vec<Message>> {
        debug!("Request to search Messages for query {query} by {}", actor.diaspora_id);
        self.index.index().search(query).await
    }

    /// [`Messages::search`] limited to the actor's conversations.
    pub async fn search_visible(&self, actor: &Person, query: &str) -> AppResult<Vec<Message>> {
        let hits = self.search(actor, query).await?;

        let mut conn = self.db_pool.acquire().await?;
        let visible: HashSet<ConversationId> = participation::parents_of(&mut conn, actor.id, ParentKind::Conversation)
            .await?
            .into_iter()
            .filter_map(|parent| match parent {
                ParentRef::Conversation(id) => Some(id),
                _ => None,
            })
            .collect();

        Ok(hits
            .into_iter()
            .filter(|message| visible.contains(&message.conversation_id))
            .collect())
    }

    pub async fn to_dto(&self, message: &Message) -> AppResult<MessageDto> {
        let mut conn = self.db_pool.acquire().await?;
        let author = people::find(&mut conn, message.author_id)
            .await?
            .ok_or_else(|| anyhow!("author {:?} of message {:?} is gone", message.author_id, message.id))?;
        Ok(MessageDto::new(message, AuthorDto::from(&author)))
    }
}

pub(crate) async fn find(conn: &mut SqliteConnection, id: MessageId) -> AppResult<Option<Message>> {
    Ok(
        sqlx::query_as("SELECT id,content,created_at,author_id,conversation_id FROM messages WHERE id=?")
            .bind(id)
            .fetch_optional(conn)
            .await?,
    )
}

/// A conversation's messages in the order they were stored.
pub(crate) async fn of_conversation(conn: &mut SqliteConnection, conversation: ConversationId) -> AppResult<Vec<Message>> {
    Ok(sqlx::query_as(
        "SELECT id,content,created_at,author_id,conversation_id FROM messages WHERE conversation_id=? ORDER BY id",
    )
    .bind(conversation)
    .fetch_all(conn)
    .await?)
}
