//! Links between people and the things they take part in.
//!
//! A participation points at its parent by guid. The guid is only ever turned
//! back into a typed reference through the `parents` table, which every parent
//! registers itself in when it is created.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};
use tracing::debug;
use uuid::Uuid;

use anyhow::anyhow;

use crate::{
    AppResult,
    conversations::ConversationId,
    people::{Person, PersonId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct ParticipationId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct PostId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct CommentId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum ParentKind {
    Conversation,
    Post,
    Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParentRef {
    Conversation(ConversationId),
    Post(PostId),
    Comment(CommentId),
}

impl ParentRef {
    pub fn kind(&self) -> ParentKind {
        match self {
            ParentRef::Conversation(_) => ParentKind::Conversation,
            ParentRef::Post(_) => ParentKind::Post,
            ParentRef::Comment(_) => ParentKind::Comment,
        }
    }

    fn local_id(&self) -> i64 {
        match *self {
            ParentRef::Conversation(ConversationId(id)) => id,
            ParentRef::Post(PostId(id)) => id,
            ParentRef::Comment(CommentId(id)) => id,
        }
    }

    fn from_parts(kind: ParentKind, local_id: i64) -> Self {
        match kind {
            ParentKind::Conversation => ParentRef::Conversation(ConversationId(local_id)),
            ParentKind::Post => ParentRef::Post(PostId(local_id)),
            ParentKind::Comment => ParentRef::Comment(CommentId(local_id)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Participation {
    pub id: ParticipationId,
    /// Handle of the participating person.
    pub author: String,
    pub guid: Uuid,
    pub parentguid: Uuid,
    pub parenttype: ParentKind,
    pub person_id: PersonId,

    // unique: author, guid
    // unique: person_id, parentguid
}

const COLUMNS: &str = "id,author,guid,parentguid,parenttype,person_id";

/// Gives `parent` a guid in the lookup table, or returns the one it has.
pub async fn register_parent(conn: &mut SqliteConnection, parent: ParentRef) -> AppResult<Uuid> {
    if let Some(guid) = guid_of(&mut *conn, parent).await? {
        return Ok(guid);
    }

    let guid = Uuid::now_v7();
    sqlx::query("INSERT INTO parents (guid,kind,local_id) VALUES (?,?,?)")
        .bind(guid)
        .bind(parent.kind())
        .bind(parent.local_id())
        .execute(conn)
        .await?;

    Ok(guid)
}

/// Drops `parent` from the lookup table along with every participation in it.
pub async fn unregister_parent(conn: &mut SqliteConnection, parent: ParentRef) -> AppResult<()> {
    sqlx::query("DELETE FROM parents WHERE kind=? AND local_id=?")
        .bind(parent.kind())
        .bind(parent.local_id())
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn guid_of(conn: &mut SqliteConnection, parent: ParentRef) -> AppResult<Option<Uuid>> {
    let row: Option<(Uuid,)> = sqlx::query_as("SELECT guid FROM parents WHERE kind=? AND local_id=?")
        .bind(parent.kind())
        .bind(parent.local_id())
        .fetch_optional(conn)
        .await?;
    Ok(row.map(|(guid,)| guid))
}

pub async fn resolve(conn: &mut SqliteConnection, guid: Uuid) -> AppResult<Option<ParentRef>> {
    let row: Option<(ParentKind, i64)> = sqlx::query_as("SELECT kind,local_id FROM parents WHERE guid=?")
        .bind(guid)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(|(kind, local_id)| ParentRef::from_parts(kind, local_id)))
}

/// Records that `person` takes part in `parent`. Taking part twice returns the
/// first record.
pub async fn participate(conn: &mut SqliteConnection, person: &Person, parent: ParentRef) -> AppResult<Participation> {
    let parentguid = guid_of(&mut *conn, parent)
        .await?
        .ok_or_else(|| anyhow!("{parent:?} was never registered as a participation parent"))?;

    let inserted = sqlx::query(
        "INSERT INTO participations (author,guid,parentguid,parenttype,person_id) VALUES (?,?,?,?,?)
        ON CONFLICT (person_id,parentguid) DO NOTHING",
    )
    .bind(&person.diaspora_id)
    .bind(Uuid::now_v7())
    .bind(parentguid)
    .bind(parent.kind())
    .bind(person.id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if inserted > 0 {
        debug!("{} now participates in {parent:?}", person.diaspora_id);
    }

    let participation = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM participations WHERE person_id=? AND parentguid=?"
    ))
    .bind(person.id)
    .bind(parentguid)
    .fetch_one(conn)
    .await?;

    Ok(participation)
}

pub async fn for_parent(conn: &mut SqliteConnection, parent: ParentRef) -> AppResult<Vec<Participation>> {
    Ok(sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM participations
        WHERE parentguid=(SELECT guid FROM parents WHERE kind=? AND local_id=?)
        ORDER BY id"
    ))
    .bind(parent.kind())
    .bind(parent.local_id())
    .fetch_all(conn)
    .await?)
}

/// People taking part in `parent`, in the order they joined.
pub async fn participants_of(conn: &mut SqliteConnection, parent: ParentRef) -> AppResult<Vec<PersonId>> {
    Ok(for_parent(conn, parent).await?.into_iter().map(|p| p.person_id).collect())
}

/// Everything of `kind` that `person` takes part in, oldest participation first.
pub async fn parents_of(conn: &mut SqliteConnection, person: PersonId, kind: ParentKind) -> AppResult<Vec<ParentRef>> {
    let guids: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT parentguid FROM participations WHERE person_id=? AND parenttype=? ORDER BY id",
    )
    .bind(person)
    .bind(kind)
    .fetch_all(&mut *conn)
    .await?;

    let mut parents = Vec::with_capacity(guids.len());
    for (guid,) in guids {
        if let Some(parent) = resolve(&mut *conn, guid).await? {
            parents.push(parent);
        }
    }
    Ok(parents)
}
