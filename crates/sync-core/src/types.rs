use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

const MAX_PAGE_SIZE: u16 = 100;
const DEFAULT_PAGE_SIZE: u16 = 30;

/// Whether a conversation is a one-to-one thread or a group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConversationKind {
    Direct,
    Group,
}

/// Conversation metadata fetched when a conversation is selected.
///
/// Display fields are owned by the social-graph collaborator and only carried
/// through; the engine itself reads `id` and `participants`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: String,
    pub kind: ConversationKind,
    pub participants: Vec<String>,
    pub name: Option<String>,
    pub image_url: Option<String>,
}

/// Message flavour as reported by the server.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageKind {
    #[default]
    Normal,
    Announcement,
    Invite,
}

/// Optional file/media reference attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub content_type: Option<String>,
    pub name: Option<String>,
}

/// Delivery state of a message that has not been confirmed by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LocalDelivery {
    Pending,
    Failed,
}

/// Delivery state exposed to the UI layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Confirmed,
    Failed,
}

/// Identity of a message: either a local optimistic entry or a server-confirmed one.
///
/// A confirmed message keeps the `local_id` it was sent with so a late echo
/// or a repeated confirmation still collapses onto the same entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageIdentity {
    Local {
        local_id: String,
        state: LocalDelivery,
    },
    Confirmed {
        id: String,
        local_id: Option<String>,
    },
}

impl MessageIdentity {
    pub fn pending(local_id: impl Into<String>) -> Self {
        Self::Local {
            local_id: local_id.into(),
            state: LocalDelivery::Pending,
        }
    }

    pub fn confirmed(id: impl Into<String>) -> Self {
        Self::Confirmed {
            id: id.into(),
            local_id: None,
        }
    }

    /// Server identifier, present only once confirmed.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Confirmed { id, .. } => Some(id),
            Self::Local { .. } => None,
        }
    }

    /// Client correlation identifier, present for locally originated messages.
    pub fn local_id(&self) -> Option<&str> {
        match self {
            Self::Local { local_id, .. } => Some(local_id),
            Self::Confirmed { local_id, .. } => local_id.as_deref(),
        }
    }

    pub fn delivery_state(&self) -> DeliveryState {
        match self {
            Self::Local {
                state: LocalDelivery::Pending,
                ..
            } => DeliveryState::Pending,
            Self::Local {
                state: LocalDelivery::Failed,
                ..
            } => DeliveryState::Failed,
            Self::Confirmed { .. } => DeliveryState::Confirmed,
        }
    }
}

/// Append-only set of `(participant, seen_at_ms)` annotations on one message.
///
/// The first recorded time for a participant wins; entries are never removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SeenBy(BTreeMap<String, u64>);

impl SeenBy {
    /// Record a participant as having seen the message. Returns `true` when new.
    pub fn record(&mut self, participant: impl Into<String>, seen_at_ms: u64) -> bool {
        let participant = participant.into();
        if self.0.contains_key(&participant) {
            return false;
        }
        self.0.insert(participant, seen_at_ms);
        true
    }

    /// Union `other` into `self`, returning the number of entries added.
    pub fn merge(&mut self, other: &SeenBy) -> usize {
        other
            .0
            .iter()
            .filter(|(participant, seen_at)| self.record(participant.as_str(), **seen_at))
            .count()
    }

    pub fn contains(&self, participant: &str) -> bool {
        self.0.contains_key(participant)
    }

    pub fn seen_at(&self, participant: &str) -> Option<u64> {
        self.0.get(participant).copied()
    }

    pub fn participants(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Total ordering key for messages within a conversation.
///
/// Confirmed messages sort before local ones at the same timestamp; the final
/// tiebreak is the server id (confirmed) or the local id (local).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderKey {
    pub created_at_ms: u64,
    rank: u8,
    tiebreak: String,
}

/// Reference to a message by server id or by local correlation id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageRef {
    Id(String),
    Local(String),
}

/// One chat message in the active conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub identity: MessageIdentity,
    pub conversation_id: String,
    pub sender_id: String,
    /// Logical ordering timestamp in milliseconds since Unix epoch.
    pub created_at_ms: u64,
    pub text: String,
    pub attachment: Option<Attachment>,
    pub reply_to_id: Option<String>,
    pub kind: MessageKind,
    pub edited_at_ms: Option<u64>,
    /// Tombstone marker. Deleted messages keep their position and identity.
    pub deleted_at_ms: Option<u64>,
    pub seen_by: SeenBy,
}

impl Message {
    /// Build a confirmed text message as it would arrive from the server.
    pub fn confirmed(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        sender_id: impl Into<String>,
        created_at_ms: u64,
        text: impl Into<String>,
    ) -> Self {
        Self {
            identity: MessageIdentity::confirmed(id),
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            created_at_ms,
            text: text.into(),
            attachment: None,
            reply_to_id: None,
            kind: MessageKind::Normal,
            edited_at_ms: None,
            deleted_at_ms: None,
            seen_by: SeenBy::default(),
        }
    }

    /// Build an optimistic local message from a draft.
    pub fn pending(
        local_id: impl Into<String>,
        conversation_id: impl Into<String>,
        sender_id: impl Into<String>,
        created_at_ms: u64,
        draft: MessageDraft,
    ) -> Self {
        Self {
            identity: MessageIdentity::pending(local_id),
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            created_at_ms,
            text: draft.text,
            attachment: draft.attachment,
            reply_to_id: draft.reply_to_id,
            kind: MessageKind::Normal,
            edited_at_ms: None,
            deleted_at_ms: None,
            seen_by: SeenBy::default(),
        }
    }

    /// Attach the client correlation id to a confirmed message.
    pub fn with_local_id(mut self, local_id: impl Into<String>) -> Self {
        match &mut self.identity {
            MessageIdentity::Confirmed { local_id: slot, .. } => *slot = Some(local_id.into()),
            MessageIdentity::Local { local_id: slot, .. } => *slot = local_id.into(),
        }
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.identity.id()
    }

    pub fn local_id(&self) -> Option<&str> {
        self.identity.local_id()
    }

    pub fn delivery_state(&self) -> DeliveryState {
        self.identity.delivery_state()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at_ms.is_some()
    }

    pub fn order_key(&self) -> OrderKey {
        let (rank, tiebreak) = match &self.identity {
            MessageIdentity::Confirmed { id, .. } => (0, id.clone()),
            MessageIdentity::Local { local_id, .. } => (1, local_id.clone()),
        };
        OrderKey {
            created_at_ms: self.created_at_ms,
            rank,
            tiebreak,
        }
    }

    /// Whether this message is the one `target` refers to.
    pub fn matches(&self, target: &MessageRef) -> bool {
        match target {
            MessageRef::Id(id) => self.id() == Some(id.as_str()),
            MessageRef::Local(local_id) => self.local_id() == Some(local_id.as_str()),
        }
    }

    /// Whether `other` is another representation of the same logical message.
    pub fn same_logical(&self, other: &Message) -> bool {
        let same_id = matches!((self.id(), other.id()), (Some(a), Some(b)) if a == b);
        let same_local =
            matches!((self.local_id(), other.local_id()), (Some(a), Some(b)) if a == b);
        same_id || same_local
    }

    /// Merge the server's view of this message into the local entry.
    ///
    /// The result is confirmed when `incoming` is, keeps the local correlation
    /// id, unions `seen_by`, never clears a tombstone and keeps the newer edit.
    /// Returns `true` when anything changed.
    pub fn merge_confirmed(&mut self, incoming: Message) -> bool {
        let before = self.clone();
        let Message {
            identity,
            conversation_id,
            sender_id,
            created_at_ms,
            text,
            attachment,
            reply_to_id,
            kind,
            edited_at_ms,
            deleted_at_ms,
            seen_by,
        } = incoming;

        self.seen_by.merge(&seen_by);

        let MessageIdentity::Confirmed {
            id,
            local_id: incoming_local_id,
        } = identity
        else {
            return *self != before;
        };

        let local_id = self
            .identity
            .local_id()
            .map(str::to_owned)
            .or(incoming_local_id);
        self.identity = MessageIdentity::Confirmed { id, local_id };
        self.conversation_id = conversation_id;
        self.sender_id = sender_id;
        self.created_at_ms = created_at_ms;
        self.reply_to_id = reply_to_id.or(self.reply_to_id.take());
        self.kind = kind;

        let keep_local_edit = match (self.edited_at_ms, edited_at_ms) {
            (Some(local), Some(remote)) => local > remote,
            (Some(_), None) => true,
            _ => false,
        };
        if !keep_local_edit {
            self.text = text;
            self.attachment = attachment;
            self.edited_at_ms = edited_at_ms;
        }

        self.deleted_at_ms = match (self.deleted_at_ms, deleted_at_ms) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if self.is_deleted() {
            self.clear_content();
        }

        *self != before
    }

    /// Apply a shallow field patch. Returns `true` when anything changed.
    pub fn apply_patch(&mut self, patch: &MessagePatch) -> bool {
        let mut changed = false;

        if patch.text.is_some() && !self.is_deleted() {
            let newer = match (self.edited_at_ms, patch.edited_at_ms) {
                (Some(current), Some(next)) => next > current,
                (None, _) => true,
                (Some(_), None) => false,
            };
            if newer && let Some(text) = &patch.text {
                changed |= self.text != *text || self.edited_at_ms != patch.edited_at_ms;
                self.text = text.clone();
                if patch.edited_at_ms.is_some() {
                    self.edited_at_ms = patch.edited_at_ms;
                }
            }
        }

        if let Some(deleted_at) = patch.deleted_at_ms
            && !self.is_deleted()
        {
            self.deleted_at_ms = Some(deleted_at);
            self.clear_content();
            changed = true;
        }

        for (participant, seen_at) in &patch.seen {
            changed |= self.seen_by.record(participant.as_str(), *seen_at);
        }

        if let Some(next) = patch.delivery
            && let MessageIdentity::Local { state, .. } = &mut self.identity
            && *state != next
        {
            *state = next;
            changed = true;
        }

        changed
    }

    fn clear_content(&mut self) {
        self.text.clear();
        self.attachment = None;
    }
}

/// User input for a new outgoing message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageDraft {
    pub text: String,
    pub attachment: Option<Attachment>,
    pub reply_to_id: Option<String>,
}

impl MessageDraft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Shallow field update applied by `MessageStore::patch`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePatch {
    pub text: Option<String>,
    pub edited_at_ms: Option<u64>,
    pub deleted_at_ms: Option<u64>,
    pub seen: Vec<(String, u64)>,
    pub delivery: Option<LocalDelivery>,
}

impl MessagePatch {
    pub fn edit(text: impl Into<String>, edited_at_ms: u64) -> Self {
        Self {
            text: Some(text.into()),
            edited_at_ms: Some(edited_at_ms),
            ..Self::default()
        }
    }

    pub fn delete(deleted_at_ms: u64) -> Self {
        Self {
            deleted_at_ms: Some(deleted_at_ms),
            ..Self::default()
        }
    }

    pub fn seen(participant: impl Into<String>, seen_at_ms: u64) -> Self {
        Self {
            seen: vec![(participant.into(), seen_at_ms)],
            ..Self::default()
        }
    }

    pub fn delivery(state: LocalDelivery) -> Self {
        Self {
            delivery: Some(state),
            ..Self::default()
        }
    }
}

/// One page of history as returned by the transport, ordered newest to oldest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    /// Opaque cursor for the next older page.
    pub next_cursor: Option<String>,
}

/// Outgoing send request handed to the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendRequest {
    pub conversation_id: String,
    /// Client correlation id; the server echoes it on the confirmed message.
    pub local_id: String,
    pub text: String,
    pub attachment: Option<Attachment>,
    pub reply_to_id: Option<String>,
}

/// Transport acknowledgement for `mark_seen`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeenAck {
    pub seen_at_ms: u64,
}

/// Push notification from the server. Delivery is at-least-once and unordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PushEvent {
    MessageCreated {
        message: Message,
    },
    MessageSeen {
        conversation_id: String,
        participant_id: String,
        seen_at_ms: u64,
        /// Newest message covered by this receipt, when the server names one.
        up_to: Option<String>,
    },
    MessageEdited {
        conversation_id: String,
        message_id: String,
        text: String,
        edited_at_ms: u64,
    },
    MessageDeleted {
        conversation_id: String,
        message_id: String,
        deleted_at_ms: u64,
    },
    TypingStarted {
        conversation_id: String,
        participant_id: String,
    },
    TypingStopped {
        conversation_id: String,
        participant_id: String,
    },
}

impl PushEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            Self::MessageCreated { message } => &message.conversation_id,
            Self::MessageSeen {
                conversation_id, ..
            }
            | Self::MessageEdited {
                conversation_id, ..
            }
            | Self::MessageDeleted {
                conversation_id, ..
            }
            | Self::TypingStarted {
                conversation_id, ..
            }
            | Self::TypingStopped {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Outbound notification emitted by the session to UI and collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionEvent {
    /// Initial page applied for the selected conversation.
    ConversationLoaded {
        conversation_id: String,
        message_count: usize,
    },
    /// Timeline content changed.
    TimelineChanged {
        conversation_id: String,
        /// `true` when the change was a true append at the tail (scroll-follow).
        follow_tail: bool,
    },
    /// An older page was prepended.
    OlderPageLoaded {
        conversation_id: String,
        message_count: usize,
        has_older: bool,
    },
    /// Typing participants changed.
    TypingChanged {
        conversation_id: String,
        participants: Vec<String>,
    },
    /// A message from another participant arrived (notification side effect).
    IncomingMessage { message: Message },
    /// A push event for a conversation other than the active one.
    ForeignActivity {
        conversation_id: String,
        event: PushEvent,
    },
    /// A local send failed; the message stays in the store as `Failed`.
    SendFailed { local_id: String, error_code: String },
    /// Non-fatal data anomaly (ordering violation and similar).
    Diagnostic { code: String, message: String },
}

/// Runtime tuning for the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Requested history page size.
    pub page_size: u16,
    /// Hard cap applied on top of `page_size`.
    pub page_size_cap: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_size_cap: MAX_PAGE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Page size actually requested from the transport, always in `1..=100`.
    pub fn effective_page_size(&self) -> u16 {
        let requested = self.page_size.max(1);
        let cap = self.page_size_cap.max(1);
        requested.min(cap).min(MAX_PAGE_SIZE)
    }
}
