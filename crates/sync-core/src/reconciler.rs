//! Idempotent application of push events to the active conversation.
//!
//! Every event kind is safe to replay and to receive out of order: creation
//! merges by identity, seen marks only add entries, edits compare
//! timestamps, deletes keep the first tombstone, and typing is set-based.

use std::collections::BTreeSet;

use tracing::{debug, trace};

use crate::{
    error::StoreError,
    receipts::ReadReceiptTracker,
    store::{AppendOutcome, MessageStore, PatchOutcome},
    types::{MessagePatch, MessageRef, PushEvent},
};

/// What applying one push event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// A message was added or merged into the timeline.
    Timeline {
        /// True tail append; the UI may keep following the bottom.
        follow_tail: bool,
        /// Newly seen message authored by someone else.
        notify: bool,
    },
    /// Seen marks were added to this many messages.
    Receipts { marked: usize },
    /// An edit or tombstone was applied.
    Content,
    /// The typing set changed.
    Typing,
    /// Replay, unknown message, or otherwise nothing to do.
    Unchanged,
    /// Event belongs to another conversation.
    Foreign,
    /// The store refused the mutation; it is unchanged.
    Rejected(StoreError),
}

/// Translates push events into store and receipt-tracker operations.
#[derive(Debug, Clone)]
pub struct EventReconciler {
    local_user_id: String,
    typing: BTreeSet<String>,
}

impl EventReconciler {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            typing: BTreeSet::new(),
        }
    }

    /// Participants currently typing, sorted.
    pub fn typing(&self) -> Vec<&str> {
        self.typing.iter().map(String::as_str).collect()
    }

    pub fn apply(
        &mut self,
        store: &mut MessageStore,
        receipts: &mut ReadReceiptTracker,
        event: &PushEvent,
    ) -> Reconciled {
        if event.conversation_id() != store.conversation_id() {
            trace!(
                conversation_id = %event.conversation_id(),
                active = %store.conversation_id(),
                "push event for inactive conversation"
            );
            return Reconciled::Foreign;
        }

        let outcome = match event {
            PushEvent::MessageCreated { message } => {
                match store.append_new(message.clone()) {
                    Ok(appended) if appended.changed() => Reconciled::Timeline {
                        follow_tail: appended.is_tail_append(),
                        notify: appended != AppendOutcome::Merged
                            && message.sender_id != self.local_user_id,
                    },
                    Ok(_) => Reconciled::Unchanged,
                    Err(err) => Reconciled::Rejected(err),
                }
            }
            PushEvent::MessageSeen {
                participant_id,
                seen_at_ms,
                up_to,
                ..
            } => match store.record_seen(participant_id, *seen_at_ms, up_to.as_deref()) {
                0 => Reconciled::Unchanged,
                marked => Reconciled::Receipts { marked },
            },
            PushEvent::MessageEdited {
                message_id,
                text,
                edited_at_ms,
                ..
            } => patch_outcome(store.patch(
                &MessageRef::Id(message_id.clone()),
                &MessagePatch::edit(text.clone(), *edited_at_ms),
            )),
            PushEvent::MessageDeleted {
                message_id,
                deleted_at_ms,
                ..
            } => patch_outcome(store.patch(
                &MessageRef::Id(message_id.clone()),
                &MessagePatch::delete(*deleted_at_ms),
            )),
            PushEvent::TypingStarted { participant_id, .. } => {
                if *participant_id != self.local_user_id
                    && self.typing.insert(participant_id.clone())
                {
                    Reconciled::Typing
                } else {
                    Reconciled::Unchanged
                }
            }
            PushEvent::TypingStopped { participant_id, .. } => {
                if self.typing.remove(participant_id) {
                    Reconciled::Typing
                } else {
                    Reconciled::Unchanged
                }
            }
        };

        if matches!(
            outcome,
            Reconciled::Timeline { .. } | Reconciled::Receipts { .. } | Reconciled::Content
        ) {
            receipts.recompute(store.messages());
        }
        debug!(conversation_id = %store.conversation_id(), ?outcome, "push event reconciled");
        outcome
    }
}

fn patch_outcome(outcome: PatchOutcome) -> Reconciled {
    match outcome {
        PatchOutcome::Applied => Reconciled::Content,
        PatchOutcome::Unchanged | PatchOutcome::NotLoaded => Reconciled::Unchanged,
    }
}
