use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{conversations::ConversationId, people::{Person, PersonId}};

use super::{Message, MessageId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorDto {
    pub id: PersonId,
    pub diaspora_id: String,
    pub name: String,
    pub avatar: Option<String>,
}

impl From<&Person> for AuthorDto {
    fn from(person: &Person) -> Self {
        Self {
            id: person.id,
            diaspora_id: person.diaspora_id.clone(),
            name: person.name.clone(),
            avatar: person.avatar_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    #[serde(default)]
    pub author: Option<AuthorDto>,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    pub content: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

impl MessageDto {
    pub fn new(message: &Message, author: AuthorDto) -> Self {
        Self {
            id: Some(message.id),
            author: Some(author),
            conversation_id: Some(message.conversation_id),
            content: message.content.clone(),
            created_at: Some(message.created_at),
        }
    }
}
