#![allow(dead_code)]

use std::time::Duration;

use parley::{
    AppState,
    conversations::{ConversationId, ConversationTarget},
    messages::{Message, MessageDraft},
    people::Person,
};

pub async fn state() -> AppState {
    AppState::in_memory().await.unwrap()
}

pub async fn person(state: &AppState, handle: &str) -> Person {
    let name = handle.split('@').next().unwrap_or(handle);
    state.people().register(handle, name, None).await.unwrap()
}

/// Starts a conversation between `from` and `with` by sending the first message.
pub async fn open(state: &AppState, from: &Person, with: &[&Person], content: &str) -> (ConversationId, Message) {
    tokio::time::sleep(Duration::from_millis(2)).await;
    let draft = MessageDraft {
        conversation: ConversationTarget::New {
            subject: format!("from {}", from.name),
            participants: with.iter().map(|p| p.id).collect(),
        },
        content: content.to_owned(),
    };
    let message = state.messages().save(from, draft).await.unwrap().saved().unwrap();
    (message.conversation_id, message)
}

pub async fn reply(state: &AppState, from: &Person, conversation: ConversationId, content: &str) -> Message {
    // keeps timestamps strictly increasing
    tokio::time::sleep(Duration::from_millis(2)).await;
    let draft = MessageDraft {
        conversation: ConversationTarget::Existing(conversation),
        content: content.to_owned(),
    };
    state.messages().save(from, draft).await.unwrap().saved().unwrap()
}
