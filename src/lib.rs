pub mod appresult;
pub mod config;
pub mod conversations;
pub mod db;
pub mod messages;
pub mod participation;
pub mod people;
pub mod search;

pub use appresult::{AppError, AppResult};

use std::time::Duration;

use sqlx::SqlitePool;
use tokio::task::JoinHandle;

use config::Config;
use conversations::Conversations;
use db::Stores;
use messages::Messages;
use people::People;
use search::{IndexSync, MessageIndex};

/// Result of reading something scoped to a conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    /// It exists, but the actor does not take part in its conversation.
    Forbidden,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound | Lookup::Forbidden => None,
        }
    }
}

/// Result of a delete. Anything but `Removed` left the stores untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    NotAuthor,
    NotFound,
}

#[derive(Clone)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub index: IndexSync,
}

impl AppState {
    /// Connects both stores, migrates them and starts the index sync worker.
    pub async fn open(config: &Config) -> AppResult<(Self, JoinHandle<()>)> {
        let stores = Stores::connect(config).await?;
        stores.migrate().await?;
        Ok(Self::from_stores(stores, config.index_retry_interval, config.index_max_attempts))
    }

    pub async fn in_memory() -> AppResult<Self> {
        let (state, _worker) = Self::open(&Config::in_memory()).await?;
        Ok(state)
    }

    pub fn from_stores(stores: Stores, retry_interval: Duration, max_attempts: u32) -> (Self, JoinHandle<()>) {
        let (index, worker) = IndexSync::spawn(MessageIndex::new(stores.index), retry_interval, max_attempts);
        (Self { db_pool: stores.primary, index }, worker)
    }

    pub fn people(&self) -> People {
        People::new(self.db_pool.clone())
    }

    pub fn conversations(&self) -> Conversations {
        Conversations::new(self.db_pool.clone(), self.index.clone())
    }

    pub fn messages(&self) -> Messages {
        Messages::new(self.db_pool.clone(), self.index.clone())
    }
}
