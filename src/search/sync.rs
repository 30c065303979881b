use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::messages::{Message, MessageId};

use super::MessageIndex;

#[derive(Debug, Clone)]
pub enum IndexOp {
    Upsert(Message),
    Remove(MessageId),
}

impl IndexOp {
    fn message_id(&self) -> MessageId {
        match self {
            IndexOp::Upsert(message) => message.id,
            IndexOp::Remove(id) => *id,
        }
    }
}

#[derive(Debug)]
enum Retry {
    Queue(IndexOp),
    /// A later removal went through, so queued upserts of this id are stale.
    Superseded(MessageId),
}

/// Writes to the index after the entity store has committed. A failed write
/// is logged and handed to a background task that retries it on an interval;
/// the entity store is never rolled back.
#[derive(Debug, Clone)]
pub struct IndexSync {
    index: MessageIndex,
    retries: mpsc::UnboundedSender<Retry>,
    backlog: Arc<AtomicUsize>,
    max_attempts: u32,
}

impl IndexSync {
    /// Must be called inside a tokio runtime. The worker stops once every
    /// clone of the returned handle is dropped. With `max_attempts` of one or
    /// less a failed write is dropped straight away.
    pub fn spawn(index: MessageIndex, retry_interval: Duration, max_attempts: u32) -> (Self, JoinHandle<()>) {
        let max_attempts = max_attempts.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));

        let worker = tokio::spawn(retry_loop(
            index.clone(),
            rx,
            retry_interval,
            max_attempts,
            backlog.clone(),
        ));

        (Self { index, retries: tx, backlog, max_attempts }, worker)
    }

    pub fn index(&self) -> &MessageIndex {
        &self.index
    }

    /// Index writes waiting for a retry.
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::SeqCst)
    }

    pub async fn apply(&self, op: IndexOp) {
        match self.index.apply(&op).await {
            Ok(()) => {
                if let IndexOp::Remove(id) = op {
                    let _ = self.retries.send(Retry::Superseded(id));
                }
            }
            Err(err) if self.max_attempts <= 1 => {
                error!("index write for message {:?} failed and retries are off: {err}", op.message_id());
            }
            Err(err) => {
                warn!("index write for message {:?} failed, will retry: {err}", op.message_id());
                self.backlog.fetch_add(1, Ordering::SeqCst);
                if self.retries.send(Retry::Queue(op)).is_err() {
                    self.backlog.fetch_sub(1, Ordering::SeqCst);
                    error!("index sync worker is gone, index write dropped");
                }
            }
        }
    }
}

async fn retry_loop(
    index: MessageIndex,
    mut rx: mpsc::UnboundedReceiver<Retry>,
    retry_interval: Duration,
    max_attempts: u32,
    backlog: Arc<AtomicUsize>,
) {
    // the failed write that queued an op counts as its first attempt
    let mut pending: VecDeque<(IndexOp, u32)> = VecDeque::new();
    let mut ticker = tokio::time::interval(retry_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Retry::Queue(op)) => {
                    if let IndexOp::Remove(id) = op {
                        drop_upserts(&mut pending, id, &backlog);
                    }
                    pending.push_back((op, 1));
                }
                Some(Retry::Superseded(id)) => drop_upserts(&mut pending, id, &backlog),
                None => break,
            },
            _ = ticker.tick(), if !pending.is_empty() => {
                retry_pending(&index, &mut pending, max_attempts, &backlog).await;
            }
        }
    }

    if !pending.is_empty() {
        debug!("index sync shutting down with {} queued writes", pending.len());
        retry_pending(&index, &mut pending, 0, &backlog).await;
    }
}

fn drop_upserts(pending: &mut VecDeque<(IndexOp, u32)>, id: MessageId, backlog: &AtomicUsize) {
    let before = pending.len();
    pending.retain(|(op, _)| !matches!(op, IndexOp::Upsert(message) if message.id == id));
    backlog.fetch_sub(before - pending.len(), Ordering::SeqCst);
}

/// One pass over the queue. Ops that fail again go to the back unless they
/// have used up `max_attempts`; a `max_attempts` of zero drops every failure.
async fn retry_pending(
    index: &MessageIndex,
    pending: &mut VecDeque<(IndexOp, u32)>,
    max_attempts: u32,
    backlog: &AtomicUsize,
) {
    for _ in 0..pending.len() {
        let Some((op, attempts)) = pending.pop_front() else {
            break;
        };

        match index.apply(&op).await {
            Ok(()) => {
                debug!("index write for message {:?} went through on retry", op.message_id());
                backlog.fetch_sub(1, Ordering::SeqCst);
            }
            Err(err) if attempts + 1 >= max_attempts => {
                error!(
                    "giving up on index write for message {:?} after {} attempts: {err}",
                    op.message_id(),
                    attempts + 1
                );
                backlog.fetch_sub(1, Ordering::SeqCst);
            }
            Err(_) => pending.push_back((op, attempts + 1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::{config::Config, conversations::ConversationId, db::Stores, people::PersonId};

    fn message(id: i64, content: &str) -> Message {
        Message {
            id: MessageId(id),
            content: content.to_owned(),
            created_at: OffsetDateTime::now_utc(),
            author_id: PersonId(1),
            conversation_id: ConversationId(1),
        }
    }

    #[tokio::test]
    async fn healthy_writes_skip_the_queue() {
        let stores = Stores::connect(&Config::in_memory()).await.unwrap();
        stores.migrate().await.unwrap();
        let (sync, _worker) = IndexSync::spawn(MessageIndex::new(stores.index), Duration::from_millis(10), 3);

        sync.apply(IndexOp::Upsert(message(1, "kettle is on"))).await;
        assert_eq!(sync.backlog(), 0);
        assert_eq!(sync.index().search("kettle").await.unwrap().len(), 1);

        sync.apply(IndexOp::Remove(MessageId(1))).await;
        assert!(sync.index().search("kettle").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_writes_are_queued_then_given_up() {
        let stores = Stores::connect(&Config::in_memory()).await.unwrap();
        stores.migrate().await.unwrap();
        stores.index.close().await;
        let (sync, _worker) = IndexSync::spawn(MessageIndex::new(stores.index), Duration::from_millis(10), 2);

        sync.apply(IndexOp::Upsert(message(1, "lost"))).await;
        assert_eq!(sync.backlog(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sync.backlog(), 0);
    }

    #[tokio::test]
    async fn queued_writes_land_once_the_index_recovers() {
        let stores = Stores::connect(&Config::in_memory()).await.unwrap();
        stores.migrate().await.unwrap();
        let (sync, _worker) = IndexSync::spawn(MessageIndex::new(stores.index.clone()), Duration::from_millis(10), 10);

        sqlx::query("ALTER TABLE message_index RENAME TO message_index_offline")
            .execute(&stores.index)
            .await
            .unwrap();
        sync.apply(IndexOp::Upsert(message(7, "delayed teapot"))).await;
        assert_eq!(sync.backlog(), 1);

        sqlx::query("ALTER TABLE message_index_offline RENAME TO message_index")
            .execute(&stores.index)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(sync.backlog(), 0);
        let hits = sync.index().search("teapot").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, MessageId(7));
    }

    #[tokio::test]
    async fn single_attempt_means_no_retry() {
        let stores = Stores::connect(&Config::in_memory()).await.unwrap();
        stores.migrate().await.unwrap();
        stores.index.close().await;
        let (sync, _worker) = IndexSync::spawn(MessageIndex::new(stores.index), Duration::from_millis(10), 1);

        sync.apply(IndexOp::Upsert(message(1, "once only"))).await;
        assert_eq!(sync.backlog(), 0);
    }

    #[tokio::test]
    async fn removal_supersedes_a_queued_upsert() {
        let mut pending = VecDeque::from([(IndexOp::Upsert(message(4, "x")), 1), (IndexOp::Upsert(message(5, "y")), 1)]);
        let backlog = AtomicUsize::new(2);

        drop_upserts(&mut pending, MessageId(4), &backlog);

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0.message_id(), MessageId(5));
        assert_eq!(backlog.load(Ordering::SeqCst), 1);
    }
}
