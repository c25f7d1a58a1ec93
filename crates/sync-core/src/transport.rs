use async_trait::async_trait;

use crate::{
    error::ChatError,
    types::{ConversationSummary, Message, MessagePage, SeenAck, SendRequest},
};

/// Request/response collaborator used by the engine.
///
/// Failures resolve to `ChatError` values; implementations must not panic
/// across this boundary. Timeout and retry policy belong to the implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch_conversation(&self, conversation_id: &str)
    -> Result<ConversationSummary, ChatError>;

    /// Fetch one page of history, newest first, starting below `cursor`.
    ///
    /// `cursor == None` requests the newest page.
    async fn fetch_message_page(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        page_size: u16,
    ) -> Result<MessagePage, ChatError>;

    /// Send a message. The returned message carries the request's `local_id`
    /// when the server echoes it.
    async fn send_message(&self, request: &SendRequest) -> Result<Message, ChatError>;

    async fn edit_message(&self, message_id: &str, text: &str) -> Result<Message, ChatError>;

    async fn delete_message(&self, message_id: &str) -> Result<(), ChatError>;

    async fn mark_seen(&self, conversation_id: &str) -> Result<SeenAck, ChatError>;
}
