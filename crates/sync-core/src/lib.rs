//! Conversation synchronization engine for a messaging client.
//!
//! This crate keeps one conversation's message list consistent while history
//! pages, optimistic sends, server confirmations and push events arrive in
//! any order. Transports plug in through the [`Transport`] trait.

/// Push and session event channel primitives.
pub mod channel;
/// Stable engine error types and HTTP classification helpers.
pub mod error;
/// Session lifecycle phases and transition checks.
pub mod lifecycle;
/// Page fetching and normalization.
pub mod loader;
/// Derived read-receipt pointers and unread counts.
pub mod receipts;
/// Idempotent push event application.
pub mod reconciler;
/// Conversation session controller.
pub mod session;
/// Ordered, deduplicated message store.
pub mod store;
/// Transport seam for the server.
pub mod transport;
/// Messages, events and configuration types.
pub mod types;

pub use channel::{ChannelError, SessionChannels, SessionEventStream};
pub use error::{ChatError, ErrorCategory, StoreError, classify_http_status};
pub use lifecycle::{SessionAction, SessionLifecycle, SessionPhase};
pub use loader::{LoadedPage, load_page, normalize_page};
pub use receipts::ReadReceiptTracker;
pub use reconciler::{EventReconciler, Reconciled};
pub use session::{ChatSession, Completion, LoadTicket, PageOutcome, PageTicket, SendTicket};
pub use store::{AppendOutcome, MessageStore, PatchOutcome, UpsertOutcome};
pub use transport::Transport;
pub use types::{
    Attachment, ConversationKind, ConversationSummary, DeliveryState, EngineConfig, LocalDelivery,
    Message, MessageDraft, MessageIdentity, MessageKind, MessagePage, MessagePatch, MessageRef,
    OrderKey, PushEvent, SeenAck, SeenBy, SendRequest, SessionEvent,
};
