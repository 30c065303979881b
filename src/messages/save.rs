use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use anyhow::anyhow;

use crate::{
    AppError, AppResult,
    conversations::{self, Conversation, ConversationTarget, can_access},
    people::Person,
    search::IndexOp,
};

use super::{Message, MessageDto, Messages};

/// A message that has not been stored yet. The author is whoever saves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub conversation: ConversationTarget,
    pub content: String,
}

#[derive(Debug, Clone)]
pub enum SaveOutcome {
    /// `conversation` already lists `message` last.
    Saved { message: Message, conversation: Conversation },
    NoSuchConversation,
    NotParticipant,
}

impl SaveOutcome {
    pub fn saved(self) -> Option<Message> {
        match self {
            SaveOutcome::Saved { message, .. } => Some(message),
            SaveOutcome::NoSuchConversation | SaveOutcome::NotParticipant => None,
        }
    }
}

impl TryFrom<MessageDto> for MessageDraft {
    type Error = AppError;

    fn try_from(dto: MessageDto) -> AppResult<Self> {
        let conversation = dto
            .conversation_id
            .ok_or_else(|| anyhow!("message has no conversation"))?;
        Ok(Self {
            conversation: ConversationTarget::Existing(conversation),
            content: dto.content,
        })
    }
}

impl Messages {
    /// Stores `draft` as written by `actor` and mirrors it into the index.
    /// The timestamp is assigned here; a new conversation is created first if
    /// the draft asks for one.
    pub async fn save(&self, actor: &Person, draft: MessageDraft) -> AppResult<SaveOutcome> {
        debug!("Request to save Message : {draft:?}");

        let mut tx = self.db_pool.begin().await?;
        let Some(mut conversation) = conversations::locate_or_create(&mut tx, actor, &draft.conversation).await? else {
            return Ok(SaveOutcome::NoSuchConversation);
        };
        if !can_access(actor, &conversation) {
            debug!("{} does not take part in {:?}", actor.diaspora_id, conversation.id);
            return Ok(SaveOutcome::NotParticipant);
        }

        let now = OffsetDateTime::now_utc();
        let message: Message = sqlx::query_as(
            "INSERT INTO messages (content,created_at,author_id,conversation_id) VALUES (?,?,?,?)
            RETURNING id,content,created_at,author_id,conversation_id",
        )
        .bind(&draft.content)
        .bind(now)
        .bind(actor.id)
        .bind(conversation.id)
        .fetch_one(&mut *tx)
        .await?;
        conversations::touch(&mut tx, conversation.id, now).await?;
        tx.commit().await?;

        self.index.apply(IndexOp::Upsert(message.clone())).await;

        conversation.updated_at = message.created_at;
        conversation.add_message(message.clone());
        Ok(SaveOutcome::Saved { message, conversation })
    }

    /// Saves a transfer object. Whatever author it names, the message is
    /// stored as written by `actor`.
    pub async fn save_dto(&self, actor: &Person, dto: MessageDto) -> AppResult<SaveOutcome> {
        if let Some(author) = dto.author.as_ref().filter(|author| author.id != actor.id) {
            debug!("ignoring author {:?} on a message saved by {}", author.id, actor.diaspora_id);
        }
        self.save(actor, MessageDraft::try_from(dto)?).await
    }
}
