use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct PersonId(pub i64);

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Person {
    pub id: PersonId,
    pub guid: Uuid,
    pub diaspora_id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub created_at: OffsetDateTime,

    // unique: guid
    // unique: diaspora_id
}

#[derive(Debug, Clone)]
pub struct People {
    db_pool: SqlitePool,
}

impl People {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    /// Stores a new identity. Login and account setup live elsewhere; this is
    /// the seam they call into.
    pub async fn register(&self, diaspora_id: &str, name: &str, avatar_url: Option<&str>) -> AppResult<Person> {
        let guid = Uuid::now_v7();
        debug!("registering {diaspora_id} as {guid}");

        let person = sqlx::query_as::<_, Person>(
            "INSERT INTO people (guid,diaspora_id,name,avatar_url,created_at) VALUES (?,?,?,?,?)
            RETURNING id,guid,diaspora_id,name,avatar_url,created_at",
        )
        .bind(guid)
        .bind(diaspora_id)
        .bind(name)
        .bind(avatar_url)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.db_pool)
        .await?;

        Ok(person)
    }

    pub async fn find(&self, id: PersonId) -> AppResult<Option<Person>> {
        let mut conn = self.db_pool.acquire().await?;
        find(&mut conn, id).await
    }

    pub async fn find_by_handle(&self, diaspora_id: &str) -> AppResult<Option<Person>> {
        Ok(
            sqlx::query_as("SELECT id,guid,diaspora_id,name,avatar_url,created_at FROM people WHERE diaspora_id=?")
                .bind(diaspora_id)
                .fetch_optional(&self.db_pool)
                .await?,
        )
    }
}

pub(crate) async fn find(conn: &mut SqliteConnection, id: PersonId) -> AppResult<Option<Person>> {
    Ok(
        sqlx::query_as("SELECT id,guid,diaspora_id,name,avatar_url,created_at FROM people WHERE id=?")
            .bind(id)
            .fetch_optional(conn)
            .await?,
    )
}
