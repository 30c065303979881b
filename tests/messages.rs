mod common;

use common::{open, person, reply, state};
use parley::{
    Lookup, Removal,
    conversations::{ConversationId, ConversationTarget},
    messages::{MessageDraft, MessageDto, MessageId, SaveOutcome},
};

#[tokio::test]
async fn saved_messages_get_an_id_and_timestamp() {
    let state = state().await;
    let alice = person(&state, "alice@pod.example").await;
    let bob = person(&state, "bob@pod.example").await;

    let draft = MessageDraft {
        conversation: ConversationTarget::New { subject: "plans".to_owned(), participants: vec![bob.id] },
        content: "dinner?".to_owned(),
    };
    let SaveOutcome::Saved { message, conversation } = state.messages().save(&alice, draft).await.unwrap() else {
        panic!("expected the message to be saved");
    };

    assert!(message.id.0 > 0);
    assert_eq!(message.author_id, alice.id);
    assert_eq!(conversation.participants, vec![alice.id, bob.id]);
    assert_eq!(conversation.messages, vec![message.clone()]);
}

#[tokio::test]
async fn every_participant_sees_a_saved_message() {
    let state = state().await;
    let alice = person(&state, "alice@pod.example").await;
    let bob = person(&state, "bob@pod.example").await;
    let carol = person(&state, "carol@pod.example").await;

    let (conversation, first) = open(&state, &alice, &[&bob, &carol], "hello all").await;
    let second = reply(&state, &bob, conversation, "hi alice").await;

    for reader in [&alice, &bob, &carol] {
        let messages = state.messages().find_all_by_conversation(reader, conversation).await.unwrap();
        assert_eq!(messages, vec![first.clone(), second.clone()]);
    }
}

#[tokio::test]
async fn outsiders_get_empty_results() {
    let state = state().await;
    let alice = person(&state, "alice@pod.example").await;
    let bob = person(&state, "bob@pod.example").await;
    let mallory = person(&state, "mallory@pod.example").await;

    let (conversation, message) = open(&state, &alice, &[&bob], "secret").await;

    let messages = state.messages();
    assert!(messages.find_all_by_conversation(&mallory, conversation).await.unwrap().is_empty());
    assert!(messages.find_all(&mallory).await.unwrap().is_empty());
    assert!(messages.find_all_by_conversation(&alice, ConversationId(999)).await.unwrap().is_empty());
}

#[tokio::test]
async fn find_one_tells_forbidden_from_missing() {
    let state = state().await;
    let alice = person(&state, "alice@pod.example").await;
    let bob = person(&state, "bob@pod.example").await;
    let mallory = person(&state, "mallory@pod.example").await;

    let (_, message) = open(&state, &alice, &[&bob], "secret").await;

    let messages = state.messages();
    assert_eq!(messages.find_one(&bob, message.id).await.unwrap(), Lookup::Found(message.clone()));
    assert_eq!(messages.find_one(&mallory, message.id).await.unwrap(), Lookup::Forbidden);
    assert_eq!(messages.find_one(&bob, MessageId(999)).await.unwrap(), Lookup::NotFound);
}

#[tokio::test]
async fn find_all_is_newest_first_across_own_conversations() {
    let state = state().await;
    let alice = person(&state, "alice@pod.example").await;
    let bob = person(&state, "bob@pod.example").await;
    let carol = person(&state, "carol@pod.example").await;

    let (with_bob, m1) = open(&state, &alice, &[&bob], "one").await;
    let (with_carol, m2) = open(&state, &carol, &[&alice], "two").await;
    let m3 = reply(&state, &bob, with_bob, "three").await;
    let m4 = reply(&state, &alice, with_carol, "four").await;
    let (_, elsewhere) = open(&state, &bob, &[&carol], "not for alice").await;

    let ids: Vec<_> = state.messages().find_all(&alice).await.unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![m4.id, m3.id, m2.id, m1.id]);
    assert!(!ids.contains(&elsewhere.id));
}

#[tokio::test]
async fn conversation_listing_keeps_posting_order() {
    let state = state().await;
    let alice = person(&state, "alice@pod.example").await;
    let bob = person(&state, "bob@pod.example").await;

    let (conversation, m1) = open(&state, &alice, &[&bob], "first").await;
    let m2 = reply(&state, &bob, conversation, "second").await;
    let m3 = reply(&state, &alice, conversation, "third").await;

    // oldest first here, whereas find_all is newest first
    let ids: Vec<_> = state
        .messages()
        .find_all_by_conversation(&alice, conversation)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec![m1.id, m2.id, m3.id]);
}

#[tokio::test]
async fn outsiders_cannot_post_into_a_conversation() {
    let state = state().await;
    let alice = person(&state, "alice@pod.example").await;
    let bob = person(&state, "bob@pod.example").await;
    let mallory = person(&state, "mallory@pod.example").await;

    let (conversation, _) = open(&state, &alice, &[&bob], "hi").await;

    let messages = state.messages();
    let intrusion = MessageDraft {
        conversation: ConversationTarget::Existing(conversation),
        content: "let me in".to_owned(),
    };
    assert!(matches!(messages.save(&mallory, intrusion).await.unwrap(), SaveOutcome::NotParticipant));

    let nowhere = MessageDraft {
        conversation: ConversationTarget::Existing(ConversationId(999)),
        content: "anyone?".to_owned(),
    };
    assert!(matches!(messages.save(&alice, nowhere).await.unwrap(), SaveOutcome::NoSuchConversation));

    assert_eq!(messages.find_all_by_conversation(&alice, conversation).await.unwrap().len(), 1);
    assert!(messages.search(&alice, "let").await.unwrap().is_empty());
}

#[tokio::test]
async fn only_the_author_can_delete() {
    let state = state().await;
    let alice = person(&state, "alice@pod.example").await;
    let bob = person(&state, "bob@pod.example").await;

    let (_, message) = open(&state, &alice, &[&bob], "keep me").await;

    let messages = state.messages();
    assert_eq!(messages.delete(&bob, message.id).await.unwrap(), Removal::NotAuthor);
    assert_eq!(messages.find_one(&bob, message.id).await.unwrap(), Lookup::Found(message.clone()));
    assert_eq!(messages.search(&bob, "keep").await.unwrap().len(), 1);
}

#[tokio::test]
async fn author_delete_clears_store_and_index() {
    let state = state().await;
    let alice = person(&state, "alice@pod.example").await;
    let bob = person(&state, "bob@pod.example").await;

    let (conversation, message) = open(&state, &alice, &[&bob], "xylophone rehearsal").await;
    let kept = reply(&state, &bob, conversation, "sounds good").await;

    let messages = state.messages();
    assert_eq!(messages.search(&alice, "xylophone").await.unwrap(), vec![message.clone()]);

    assert_eq!(messages.delete(&alice, message.id).await.unwrap(), Removal::Removed);
    assert_eq!(messages.find_one(&alice, message.id).await.unwrap(), Lookup::NotFound);
    assert!(messages.search(&alice, "xylophone").await.unwrap().is_empty());
    assert_eq!(messages.find_all_by_conversation(&alice, conversation).await.unwrap(), vec![kept]);

    assert_eq!(messages.delete(&alice, message.id).await.unwrap(), Removal::NotFound);
}

#[tokio::test]
async fn search_ignores_membership_unless_asked() {
    let state = state().await;
    let alice = person(&state, "alice@pod.example").await;
    let bob = person(&state, "bob@pod.example").await;
    let mallory = person(&state, "mallory@pod.example").await;

    let (_, private) = open(&state, &alice, &[&bob], "the vault code is marmalade").await;
    let (_, own) = open(&state, &mallory, &[&bob], "I like marmalade").await;

    let messages = state.messages();
    let mut all: Vec<_> = messages.search(&mallory, "marmalade").await.unwrap().into_iter().map(|m| m.id).collect();
    all.sort();
    assert_eq!(all, vec![private.id, own.id]);

    let visible = messages.search_visible(&mallory, "marmalade").await.unwrap();
    assert_eq!(visible, vec![own]);
}

#[tokio::test]
async fn dto_author_is_overridden_by_the_actor() {
    let state = state().await;
    let alice = person(&state, "alice@pod.example").await;
    let bob = person(&state, "bob@pod.example").await;

    let (conversation, _) = open(&state, &alice, &[&bob], "hi").await;
    let messages = state.messages();

    let forged = MessageDto {
        id: None,
        author: Some((&alice).into()),
        conversation_id: Some(conversation),
        content: "signed alice".to_owned(),
        created_at: None,
    };
    let message = messages.save_dto(&bob, forged).await.unwrap().saved().unwrap();
    assert_eq!(message.author_id, bob.id);

    let dto = messages.to_dto(&message).await.unwrap();
    assert_eq!(dto.id, Some(message.id));
    assert_eq!(dto.author.unwrap().diaspora_id, "bob@pod.example");
    assert_eq!(dto.created_at, Some(message.created_at));
}

#[tokio::test]
async fn index_outage_does_not_lose_the_message() {
    let state = state().await;
    let alice = person(&state, "alice@pod.example").await;
    let bob = person(&state, "bob@pod.example").await;

    state.index.index().pool().close().await;
    let (_, message) = open(&state, &alice, &[&bob], "written while the index was down").await;

    assert_eq!(state.index.backlog(), 1);
    assert_eq!(state.messages().find_one(&bob, message.id).await.unwrap(), Lookup::Found(message));
}

#[tokio::test]
async fn rebuild_restores_the_index() {
    let state = state().await;
    let alice = person(&state, "alice@pod.example").await;
    let bob = person(&state, "bob@pod.example").await;

    let (conversation, first) = open(&state, &alice, &[&bob], "quokka sighting").await;
    reply(&state, &bob, conversation, "another quokka").await;

    let index = state.index.index();
    index.remove(first.id).await.unwrap();
    assert_eq!(index.search("quokka").await.unwrap().len(), 1);

    assert_eq!(index.rebuild(&state.db_pool).await.unwrap(), 2);
    assert_eq!(index.search("quokka").await.unwrap().len(), 2);
}
