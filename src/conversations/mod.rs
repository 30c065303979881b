mod guard;

pub use guard::can_access;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use anyhow::anyhow;

use crate::{
    AppResult, Lookup, Removal,
    messages::{self, Message},
    participation::{self, ParentKind, ParentRef},
    people::{self, Person, PersonId},
    search::{IndexOp, IndexSync},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct ConversationId(pub i64);

#[derive(Debug, Clone, FromRow)]
pub struct Conversation {
    pub id: ConversationId,
    pub guid: Uuid,
    pub subject: String,
    /// Whoever started it.
    pub author_id: PersonId,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,

    #[sqlx(skip)]
    pub participants: Vec<PersonId>,
    /// In the order they were posted.
    #[sqlx(skip)]
    pub messages: Vec<Message>,
}

impl Conversation {
    pub(crate) fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }
}

/// Where a new message goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationTarget {
    Existing(ConversationId),
    /// Starts a conversation between the sender and `participants`.
    New { subject: String, participants: Vec<PersonId> },
}

#[derive(Debug, Clone)]
pub struct Conversations {
    db_pool: SqlitePool,
    index: IndexSync,
}

impl Conversations {
    pub fn new(db_pool: SqlitePool, index: IndexSync) -> Self {
        Self { db_pool, index }
    }

    pub async fn start(&self, actor: &Person, subject: &str, participants: &[PersonId]) -> AppResult<Conversation> {
        let mut tx = self.db_pool.begin().await?;
        let conversation = create(&mut tx, actor, subject, participants).await?;
        tx.commit().await?;
        Ok(conversation)
    }

    pub async fn load(&self, actor: &Person, id: ConversationId) -> AppResult<Lookup<Conversation>> {
        let mut conn = self.db_pool.acquire().await?;
        Ok(match load(&mut conn, id).await? {
            None => Lookup::NotFound,
            Some(conversation) if can_access(actor, &conversation) => Lookup::Found(conversation),
            Some(_) => Lookup::Forbidden,
        })
    }

    /// Conversations `actor` takes part in, in the order they joined them.
    pub async fn list_for(&self, actor: &Person) -> AppResult<Vec<Conversation>> {
        let mut conn = self.db_pool.acquire().await?;
        for_person(&mut conn, actor.id).await
    }

    /// Only whoever started a conversation may delete it. Its messages and
    /// participations go with it.
    pub async fn delete(&self, actor: &Person, id: ConversationId) -> AppResult<Removal> {
        debug!("Request to delete Conversation : {id:?}");

        let mut tx = self.db_pool.begin().await?;
        let Some(conversation) = load(&mut tx, id).await? else {
            return Ok(Removal::NotFound);
        };
        if conversation.author_id != actor.id {
            debug!("{} may not delete {id:?}", actor.diaspora_id);
            return Ok(Removal::NotAuthor);
        }

        participation::unregister_parent(&mut tx, ParentRef::Conversation(id)).await?;
        sqlx::query("DELETE FROM conversations WHERE id=?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        for message in conversation.messages {
            self.index.apply(IndexOp::Remove(message.id)).await;
        }
        Ok(Removal::Removed)
    }
}

/// The conversation with its participants and messages.
pub(crate) async fn load(conn: &mut SqliteConnection, id: ConversationId) -> AppResult<Option<Conversation>> {
    let conversation: Option<Conversation> = sqlx::query_as(
        "SELECT id,guid,subject,author_id,created_at,updated_at FROM conversations WHERE id=?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(mut conversation) = conversation else {
        return Ok(None);
    };
    conversation.participants = participation::participants_of(&mut *conn, ParentRef::Conversation(id)).await?;
    conversation.messages = messages::of_conversation(&mut *conn, id).await?;
    Ok(Some(conversation))
}

pub(crate) async fn for_person(conn: &mut SqliteConnection, person: PersonId) -> AppResult<Vec<Conversation>> {
    let parents = participation::parents_of(&mut *conn, person, ParentKind::Conversation).await?;

    let mut conversations = Vec::with_capacity(parents.len());
    for parent in parents {
        let ParentRef::Conversation(id) = parent else {
            continue;
        };
        if let Some(conversation) = load(&mut *conn, id).await? {
            conversations.push(conversation);
        }
    }
    Ok(conversations)
}

/// Creates a conversation between `actor` and `participants`. `actor` always
/// takes part, whether listed or not.
pub(crate) async fn create(
    conn: &mut SqliteConnection,
    actor: &Person,
    subject: &str,
    participants: &[PersonId],
) -> AppResult<Conversation> {
    let now = OffsetDateTime::now_utc();
    let mut conversation: Conversation = sqlx::query_as(
        "INSERT INTO conversations (guid,subject,author_id,created_at,updated_at) VALUES (?,?,?,?,?)
        RETURNING id,guid,subject,author_id,created_at,updated_at",
    )
    .bind(Uuid::now_v7())
    .bind(subject)
    .bind(actor.id)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    let parent = ParentRef::Conversation(conversation.id);
    participation::register_parent(&mut *conn, parent).await?;
    participation::participate(&mut *conn, actor, parent).await?;
    conversation.participants.push(actor.id);

    for &id in participants {
        if conversation.participants.contains(&id) {
            continue;
        }
        let person = people::find(&mut *conn, id)
            .await?
            .ok_or_else(|| anyhow!("cannot add unknown person {id:?} to a conversation"))?;
        participation::participate(&mut *conn, &person, parent).await?;
        conversation.participants.push(id);
    }

    debug!("{} started {:?} with {:?}", actor.diaspora_id, conversation.id, conversation.participants);
    Ok(conversation)
}

/// Finds the conversation a message is aimed at, creating it if asked to.
pub(crate) async fn locate_or_create(
    conn: &mut SqliteConnection,
    actor: &Person,
    target: &ConversationTarget,
) -> AppResult<Option<Conversation>> {
    match target {
        ConversationTarget::Existing(id) => load(conn, *id).await,
        ConversationTarget::New { subject, participants } => {
            Ok(Some(create(conn, actor, subject, participants).await?))
        }
    }
}

pub(crate) async fn touch(conn: &mut SqliteConnection, id: ConversationId, at: OffsetDateTime) -> AppResult<()> {
    sqlx::query("UPDATE conversations SET updated_at=? WHERE id=?")
        .bind(at)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}
