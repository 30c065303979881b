use crate::people::Person;

use super::Conversation;

/// Whether `actor` may read or change anything scoped to `conversation`.
/// Callers turn `false` into an empty result or a no-op, never an error.
pub fn can_access(actor: &Person, conversation: &Conversation) -> bool {
    conversation.participants.contains(&actor.id)
}
