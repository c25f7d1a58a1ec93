//! In-memory server for the synchronization engine.
//!
//! `InMemoryTransport` keeps conversations and their messages in process and
//! optionally mirrors every server-side change onto a push channel, the way a
//! real server would deliver them to connected clients.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use sync_core::{
    ChatError, ConversationSummary, ErrorCategory, Message, MessagePage, MessagePatch, PushEvent,
    SeenAck, SendRequest, Transport,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const CLOCK_START_MS: u64 = 1_700_000_000_000;
const CURSOR_PREFIX: &str = "before:";

#[derive(Debug, Default)]
struct ServerState {
    conversations: HashMap<String, ConversationSummary>,
    /// Oldest first.
    messages: HashMap<String, Vec<Message>>,
    clock_ms: u64,
    next_id: u64,
    fail_next: Option<ChatError>,
}

impl ServerState {
    fn tick(&mut self) -> u64 {
        self.clock_ms = self.clock_ms.max(CLOCK_START_MS) + 1;
        self.clock_ms
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("srv-{}", self.next_id)
    }

    fn take_failure(&mut self) -> Result<(), ChatError> {
        match self.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn timeline(&self, conversation_id: &str) -> Result<&Vec<Message>, ChatError> {
        self.messages
            .get(conversation_id)
            .ok_or_else(|| not_found("conversation", conversation_id))
    }

    fn timeline_mut(&mut self, conversation_id: &str) -> Result<&mut Vec<Message>, ChatError> {
        self.messages
            .get_mut(conversation_id)
            .ok_or_else(|| not_found("conversation", conversation_id))
    }

    fn find_mut(&mut self, message_id: &str) -> Result<&mut Message, ChatError> {
        self.messages
            .values_mut()
            .flat_map(|timeline| timeline.iter_mut())
            .find(|m| m.id() == Some(message_id))
            .ok_or_else(|| not_found("message", message_id))
    }

    fn append(&mut self, message: Message) -> Result<(), ChatError> {
        self.timeline_mut(&message.conversation_id)?.push(message);
        Ok(())
    }
}

/// Shared in-process server acting on behalf of one signed-in user.
#[derive(Clone)]
pub struct InMemoryTransport {
    user_id: String,
    state: Arc<RwLock<ServerState>>,
    push: Option<mpsc::Sender<PushEvent>>,
}

impl InMemoryTransport {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            state: Arc::new(RwLock::new(ServerState::default())),
            push: None,
        }
    }

    /// Deliver server-side changes to `push` as they happen.
    pub fn with_push(mut self, push: mpsc::Sender<PushEvent>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn add_conversation(&self, summary: ConversationSummary) -> Result<(), ChatError> {
        let mut state = self.write()?;
        state.messages.entry(summary.id.clone()).or_default();
        state.conversations.insert(summary.id.clone(), summary);
        Ok(())
    }

    /// Append `count` history messages from `sender_id` without pushing them.
    pub fn seed_messages(
        &self,
        conversation_id: &str,
        sender_id: &str,
        count: usize,
    ) -> Result<Vec<String>, ChatError> {
        let mut state = self.write()?;
        state.timeline(conversation_id)?;

        let mut ids = Vec::with_capacity(count);
        for n in 0..count {
            let id = state.allocate_id();
            let at = state.tick();
            state.append(Message::confirmed(
                &id,
                conversation_id,
                sender_id,
                at,
                format!("history #{n}"),
            ))?;
            ids.push(id);
        }
        debug!(%conversation_id, count, "seeded history");
        Ok(ids)
    }

    /// Post a message as another participant and push it to the client.
    pub fn post_from(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<Message, ChatError> {
        let message = {
            let mut state = self.write()?;
            let id = state.allocate_id();
            let at = state.tick();
            let message = Message::confirmed(id, conversation_id, sender_id, at, text);
            state.append(message.clone())?;
            message
        };
        self.publish(PushEvent::MessageCreated {
            message: message.clone(),
        });
        Ok(message)
    }

    /// Record that `participant_id` has read the conversation and push the receipt.
    pub fn read_by(&self, conversation_id: &str, participant_id: &str) -> Result<SeenAck, ChatError> {
        let (seen_at_ms, up_to) = {
            let mut state = self.write()?;
            let seen_at_ms = state.tick();
            let timeline = state.timeline_mut(conversation_id)?;
            for message in timeline.iter_mut() {
                message.seen_by.record(participant_id, seen_at_ms);
            }
            let up_to = timeline.last().and_then(Message::id).map(str::to_owned);
            (seen_at_ms, up_to)
        };

        self.publish(PushEvent::MessageSeen {
            conversation_id: conversation_id.to_owned(),
            participant_id: participant_id.to_owned(),
            seen_at_ms,
            up_to,
        });
        Ok(SeenAck { seen_at_ms })
    }

    /// Push a typing indicator for `participant_id`.
    pub fn set_typing(&self, conversation_id: &str, participant_id: &str, typing: bool) {
        let conversation_id = conversation_id.to_owned();
        let participant_id = participant_id.to_owned();
        self.publish(if typing {
            PushEvent::TypingStarted {
                conversation_id,
                participant_id,
            }
        } else {
            PushEvent::TypingStopped {
                conversation_id,
                participant_id,
            }
        });
    }

    /// Make the next transport call fail with `err`.
    pub fn fail_next(&self, err: ChatError) -> Result<(), ChatError> {
        self.write()?.fail_next = Some(err);
        Ok(())
    }

    /// Server-side copy of a conversation's messages, oldest first.
    pub fn snapshot(&self, conversation_id: &str) -> Result<Vec<Message>, ChatError> {
        Ok(self.read()?.timeline(conversation_id)?.clone())
    }

    fn publish(&self, event: PushEvent) {
        let Some(push) = &self.push else {
            return;
        };
        if let Err(err) = push.try_send(event) {
            warn!(error = %err, "dropping push event");
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, ServerState>, ChatError> {
        self.state.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, ServerState>, ChatError> {
        self.state.write().map_err(|_| poisoned())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn fetch_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationSummary, ChatError> {
        let mut state = self.write()?;
        state.take_failure()?;
        state
            .conversations
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| not_found("conversation", conversation_id))
    }

    async fn fetch_message_page(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        page_size: u16,
    ) -> Result<MessagePage, ChatError> {
        let mut state = self.write()?;
        state.take_failure()?;
        let timeline = state.timeline(conversation_id)?;

        let end = match cursor {
            None => timeline.len(),
            Some(cursor) => {
                let before = cursor.strip_prefix(CURSOR_PREFIX).ok_or_else(|| {
                    ChatError::new(
                        ErrorCategory::Config,
                        "invalid_cursor",
                        format!("unrecognized cursor '{cursor}'"),
                    )
                })?;
                timeline
                    .iter()
                    .position(|m| m.id() == Some(before))
                    .ok_or_else(|| not_found("cursor", cursor))?
            }
        };
        let start = end.saturating_sub(usize::from(page_size));

        let messages: Vec<Message> = timeline[start..end].iter().rev().cloned().collect();
        let next_cursor = (start > 0)
            .then(|| timeline[start].id().map(|id| format!("{CURSOR_PREFIX}{id}")))
            .flatten();
        debug!(%conversation_id, ?cursor, returned = messages.len(), has_more = start > 0, "served page");

        Ok(MessagePage {
            messages,
            has_more: start > 0,
            next_cursor,
        })
    }

    async fn send_message(&self, request: &SendRequest) -> Result<Message, ChatError> {
        let message = {
            let mut state = self.write()?;
            state.take_failure()?;
            state.timeline(&request.conversation_id)?;

            let id = state.allocate_id();
            let at = state.tick();
            let mut message = Message::confirmed(
                id,
                &request.conversation_id,
                &self.user_id,
                at,
                &request.text,
            )
            .with_local_id(&request.local_id);
            message.attachment = request.attachment.clone();
            message.reply_to_id = request.reply_to_id.clone();
            state.append(message.clone())?;
            message
        };

        self.publish(PushEvent::MessageCreated {
            message: message.clone(),
        });
        Ok(message)
    }

    async fn edit_message(&self, message_id: &str, text: &str) -> Result<Message, ChatError> {
        let edited = {
            let mut state = self.write()?;
            state.take_failure()?;
            let at = state.tick();
            let message = state.find_mut(message_id)?;
            if message.is_deleted() {
                return Err(ChatError::new(
                    ErrorCategory::Config,
                    "message_deleted",
                    format!("message '{message_id}' was deleted"),
                ));
            }
            message.apply_patch(&MessagePatch::edit(text, at));
            message.clone()
        };

        self.publish(PushEvent::MessageEdited {
            conversation_id: edited.conversation_id.clone(),
            message_id: message_id.to_owned(),
            text: edited.text.clone(),
            edited_at_ms: edited.edited_at_ms.unwrap_or_default(),
        });
        Ok(edited)
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), ChatError> {
        let (conversation_id, deleted_at_ms) = {
            let mut state = self.write()?;
            state.take_failure()?;
            let at = state.tick();
            let message = state.find_mut(message_id)?;
            message.apply_patch(&MessagePatch::delete(at));
            (
                message.conversation_id.clone(),
                message.deleted_at_ms.unwrap_or(at),
            )
        };

        self.publish(PushEvent::MessageDeleted {
            conversation_id,
            message_id: message_id.to_owned(),
            deleted_at_ms,
        });
        Ok(())
    }

    async fn mark_seen(&self, conversation_id: &str) -> Result<SeenAck, ChatError> {
        self.write()?.take_failure()?;
        self.read_by(conversation_id, &self.user_id)
    }
}

fn not_found(what: &str, id: &str) -> ChatError {
    ChatError::from_http_status(404, format!("{what} '{id}' not found"))
}

fn poisoned() -> ChatError {
    ChatError::new(ErrorCategory::Internal, "poisoned_lock", "server state lock poisoned")
}
