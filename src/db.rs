use std::str::FromStr;

use anyhow::Context;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tracing::info;

use crate::{AppResult, config::Config};

/// The primary entity store and the search index mirror. They are separate
/// databases, so nothing spans both in one transaction.
#[derive(Debug, Clone)]
pub struct Stores {
    pub primary: SqlitePool,
    pub index: SqlitePool,
}

impl Stores {
    pub async fn connect(config: &Config) -> AppResult<Self> {
        let primary = open(&config.database_url, config.max_connections)
            .await
            .context("connecting to the entity store")?;
        let index = open(&config.index_url, config.max_connections)
            .await
            .context("connecting to the search index")?;

        Ok(Self { primary, index })
    }

    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations/primary")
            .run(&self.primary)
            .await
            .context("migrating the entity store")?;
        sqlx::migrate!("./migrations/index")
            .run(&self.index)
            .await
            .context("migrating the search index")?;

        info!("stores migrated");
        Ok(())
    }
}

async fn open(url: &str, max_connections: u32) -> sqlx::Result<SqlitePool> {
    let in_memory = url.contains(":memory:") || url.contains("mode=memory");
    let mut options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    // every in-memory connection is its own database
    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?
    };

    Ok(pool)
}
