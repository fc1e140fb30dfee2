use threadline_backend::{Conversation, ConversationId, UserId};

/// Conversations fetched for the signed-in user, in store order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationDirectory {
    conversations: Vec<Conversation>,
}

impl ConversationDirectory {
    pub fn new(conversations: Vec<Conversation>) -> Self {
        Self { conversations }
    }

    /// Keeps only the conversations the user takes part in.
    pub fn for_user(user_id: &UserId, conversations: Vec<Conversation>) -> Self {
        Self::new(
            conversations
                .into_iter()
                .filter(|conversation| conversation.involves(user_id))
                .collect(),
        )
    }

    pub fn find(&self, conversation_id: &ConversationId) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|conversation| conversation.id == *conversation_id)
    }

    pub fn contains(&self, conversation_id: &ConversationId) -> bool {
        self.find(conversation_id).is_some()
    }

    pub fn first(&self) -> Option<&Conversation> {
        self.conversations.first()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.iter()
    }

    /// Case-insensitive substring match over buyer and seller full names.
    /// A blank term returns every conversation.
    pub fn search(&self, term: &str) -> Vec<Conversation> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return self.conversations.clone();
        }

        self.conversations
            .iter()
            .filter(|conversation| {
                conversation.buyer.full_name.to_lowercase().contains(&needle)
                    || conversation.seller.full_name.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }
}
