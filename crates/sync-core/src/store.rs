use tracing::{trace, warn};

use crate::{
    error::StoreError,
    types::{Message, MessagePatch, MessageRef, OrderKey},
};

/// Result of `MessageStore::append_new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Inserted at the tail; the UI may follow the bottom of the list.
    Appended,
    /// Inserted before the tail because it arrived out of order.
    Inserted,
    /// Merged into an existing representation of the same message.
    Merged,
    /// Already present with identical content (replayed event).
    Unchanged,
    /// Older than the loaded head while older history is still unloaded.
    OutsideWindow,
}

impl AppendOutcome {
    /// Whether this was a true tail append (scroll-follow decision).
    pub fn is_tail_append(self) -> bool {
        self == Self::Appended
    }

    pub fn changed(self) -> bool {
        matches!(self, Self::Appended | Self::Inserted | Self::Merged)
    }
}

/// Result of `MessageStore::upsert_by_local_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The local entry was confirmed at its existing position.
    ReplacedInPlace,
    /// The confirmed data moved the entry to keep the list ordered.
    Moved,
    /// A pending entry and a separate server echo were collapsed into one.
    Collapsed,
    /// No local entry existed; inserted by ordering key.
    Inserted,
    /// Already confirmed with identical content.
    Unchanged,
    /// Sorts before the loaded head while older history is unloaded; the
    /// entry is left for its page.
    OutsideWindow,
}

impl UpsertOutcome {
    pub fn changed(self) -> bool {
        self != Self::Unchanged
    }
}

/// Result of `MessageStore::patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    Unchanged,
    /// Target is outside the loaded window.
    NotLoaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    InPlace,
    Moved,
    Dropped,
}

/// Canonical ordered message list for the active conversation.
///
/// Messages are kept sorted by `Message::order_key` after every mutation. A
/// failed mutation leaves the store untouched.
#[derive(Debug, Clone)]
pub struct MessageStore {
    conversation_id: String,
    messages: Vec<Message>,
    has_older: bool,
    older_cursor: Option<String>,
    loading_older: bool,
}

impl MessageStore {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            messages: Vec::new(),
            has_older: false,
            older_cursor: None,
            loading_older: false,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Loaded messages, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_older(&self) -> bool {
        self.has_older
    }

    /// Cursor for the next older page, if the server supplied one.
    pub fn older_cursor(&self) -> Option<&str> {
        self.older_cursor.as_deref()
    }

    pub fn newest_loaded_at_ms(&self) -> Option<u64> {
        self.messages.last().map(|m| m.created_at_ms)
    }

    pub fn is_loading_older(&self) -> bool {
        self.loading_older
    }

    /// Mark an older-page request in flight. Returns `false` when one already is.
    pub fn begin_loading_older(&mut self) -> bool {
        if self.loading_older {
            return false;
        }
        self.loading_older = true;
        true
    }

    pub fn end_loading_older(&mut self) {
        self.loading_older = false;
    }

    pub fn get(&self, target: &MessageRef) -> Option<&Message> {
        self.messages.iter().find(|m| m.matches(target))
    }

    pub fn position(&self, target: &MessageRef) -> Option<usize> {
        self.messages.iter().position(|m| m.matches(target))
    }

    /// Replace the whole list with the initial page (oldest first) and reset cursors.
    pub fn replace_all(
        &mut self,
        messages: Vec<Message>,
        has_older: bool,
        older_cursor: Option<String>,
    ) -> Result<(), StoreError> {
        for message in &messages {
            self.check_conversation(message)?;
        }

        self.messages = sorted_unique(messages);
        self.has_older = has_older;
        self.older_cursor = older_cursor;
        self.loading_older = false;
        trace!(
            conversation_id = %self.conversation_id,
            message_count = self.messages.len(),
            "store replaced"
        );
        Ok(())
    }

    /// Insert a page of strictly older messages at the head.
    ///
    /// Rejects the whole page when any message is not older than the current
    /// head. Cursors only move when the page is accepted.
    pub fn prepend_older(
        &mut self,
        messages: Vec<Message>,
        has_older: bool,
        older_cursor: Option<String>,
    ) -> Result<usize, StoreError> {
        for message in &messages {
            self.check_conversation(message)?;
        }

        let page = sorted_unique(messages);
        if let Some(head) = self.messages.first() {
            let head_key = head.order_key();
            if let Some(offender) = page.iter().rev().find(|m| m.order_key() >= head_key) {
                let err = StoreError::NotOlderThanHead {
                    incoming: offender.id().map(str::to_owned),
                    incoming_at_ms: offender.created_at_ms,
                    head: head.id().map(str::to_owned),
                    head_at_ms: head.created_at_ms,
                };
                warn!(conversation_id = %self.conversation_id, error = %err, "older page rejected");
                return Err(err);
            }
        }

        let count = page.len();
        self.messages.splice(0..0, page);
        self.has_older = has_older;
        self.older_cursor = older_cursor;
        trace!(
            conversation_id = %self.conversation_id,
            prepended = count,
            has_older,
            "older page prepended"
        );
        Ok(count)
    }

    /// Insert a newly created message, tolerating out-of-order and repeated delivery.
    pub fn append_new(&mut self, message: Message) -> Result<AppendOutcome, StoreError> {
        self.check_conversation(&message)?;

        if let Some(idx) = self.messages.iter().position(|m| m.same_logical(&message)) {
            return Ok(match self.merge_at(idx, message) {
                Some(Placement::Dropped) => AppendOutcome::OutsideWindow,
                Some(_) => AppendOutcome::Merged,
                None => AppendOutcome::Unchanged,
            });
        }

        let key = message.order_key();
        let after_tail = self.messages.last().is_none_or(|tail| tail.order_key() < key);
        if after_tail {
            self.messages.push(message);
            return Ok(AppendOutcome::Appended);
        }

        if self.outside_window(&key) {
            trace!(
                conversation_id = %self.conversation_id,
                created_at_ms = key.created_at_ms,
                "message older than loaded window ignored"
            );
            return Ok(AppendOutcome::OutsideWindow);
        }

        self.insert_ordered(message);
        Ok(AppendOutcome::Inserted)
    }

    /// Resolve a local message with its server-confirmed version.
    ///
    /// Idempotent: repeating the call with the same message leaves the store as is.
    pub fn upsert_by_local_id(
        &mut self,
        local_id: &str,
        server_message: Message,
    ) -> Result<UpsertOutcome, StoreError> {
        self.check_conversation(&server_message)?;
        let server_message = server_message.with_local_id(local_id);

        let by_local = self.position(&MessageRef::Local(local_id.to_owned()));
        let by_id = server_message
            .id()
            .and_then(|id| self.position(&MessageRef::Id(id.to_owned())));

        let outcome = match (by_local, by_id) {
            (Some(local_idx), Some(echo_idx)) if local_idx != echo_idx => {
                let echo = self.messages.remove(echo_idx);
                let local_idx = if echo_idx < local_idx {
                    local_idx - 1
                } else {
                    local_idx
                };
                let mut merged = self.messages[local_idx].clone();
                merged.merge_confirmed(echo);
                merged.merge_confirmed(server_message);
                match self.place(local_idx, merged) {
                    Placement::Dropped => UpsertOutcome::OutsideWindow,
                    _ => UpsertOutcome::Collapsed,
                }
            }
            (Some(idx), _) | (None, Some(idx)) => match self.merge_at(idx, server_message) {
                Some(Placement::InPlace) => UpsertOutcome::ReplacedInPlace,
                Some(Placement::Moved) => UpsertOutcome::Moved,
                Some(Placement::Dropped) => UpsertOutcome::OutsideWindow,
                None => UpsertOutcome::Unchanged,
            },
            (None, None) if self.outside_window(&server_message.order_key()) => {
                UpsertOutcome::OutsideWindow
            }
            (None, None) => {
                self.insert_ordered(server_message);
                UpsertOutcome::Inserted
            }
        };

        trace!(conversation_id = %self.conversation_id, %local_id, ?outcome, "local message upserted");
        Ok(outcome)
    }

    /// Shallow-merge fields into a loaded message. No-op when the target is not loaded.
    pub fn patch(&mut self, target: &MessageRef, patch: &MessagePatch) -> PatchOutcome {
        let Some(message) = self.messages.iter_mut().find(|m| m.matches(target)) else {
            return PatchOutcome::NotLoaded;
        };

        if message.apply_patch(patch) {
            PatchOutcome::Applied
        } else {
            PatchOutcome::Unchanged
        }
    }

    /// Record `participant` as having seen every loaded message up to a point.
    ///
    /// Messages created after `seen_at_ms` are never marked. When `up_to`
    /// names a loaded message, marks stop at that message. Existing entries
    /// are left untouched. Returns the number of messages newly marked.
    pub fn record_seen(&mut self, participant: &str, seen_at_ms: u64, up_to: Option<&str>) -> usize {
        let bound: Option<OrderKey> = up_to
            .and_then(|id| self.get(&MessageRef::Id(id.to_owned())))
            .map(Message::order_key);

        self.messages
            .iter_mut()
            .filter(|m| m.created_at_ms <= seen_at_ms)
            .filter(|m| bound.as_ref().is_none_or(|b| m.order_key() <= *b))
            .filter_map(|m| m.seen_by.record(participant, seen_at_ms).then_some(()))
            .count()
    }

    /// Drain all messages, leaving an empty store for the same conversation.
    pub(crate) fn take_messages(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.messages)
    }

    fn check_conversation(&self, message: &Message) -> Result<(), StoreError> {
        if message.conversation_id == self.conversation_id {
            Ok(())
        } else {
            Err(StoreError::ConversationMismatch {
                expected: self.conversation_id.clone(),
                found: message.conversation_id.clone(),
            })
        }
    }

    /// Merge `incoming` into the entry at `idx`. Returns `None` when nothing changed.
    fn merge_at(&mut self, idx: usize, incoming: Message) -> Option<Placement> {
        let mut merged = self.messages[idx].clone();
        if !merged.merge_confirmed(incoming) {
            return None;
        }
        Some(self.place(idx, merged))
    }

    /// Write `message` at `idx` if it still sorts between its neighbours, else move it.
    ///
    /// A move that would land before the head of a partial window drops the entry.
    fn place(&mut self, idx: usize, message: Message) -> Placement {
        let key = message.order_key();
        let fits_prev = match idx.checked_sub(1) {
            Some(prev) => self.messages[prev].order_key() < key,
            None => !(self.has_older && key < self.messages[0].order_key()),
        };
        let fits_next = self
            .messages
            .get(idx + 1)
            .is_none_or(|next| key < next.order_key());

        if fits_prev && fits_next {
            self.messages[idx] = message;
            Placement::InPlace
        } else {
            self.messages.remove(idx);
            if self.outside_window(&key) {
                trace!(
                    conversation_id = %self.conversation_id,
                    created_at_ms = key.created_at_ms,
                    "moved message left the loaded window"
                );
                return Placement::Dropped;
            }
            self.insert_ordered(message);
            Placement::Moved
        }
    }

    /// Whether `key` sorts before the head while older history is still unloaded.
    fn outside_window(&self, key: &OrderKey) -> bool {
        self.has_older
            && self
                .messages
                .first()
                .is_some_and(|head| *key < head.order_key())
    }

    fn insert_ordered(&mut self, message: Message) -> usize {
        let key = message.order_key();
        let idx = self.messages.partition_point(|m| m.order_key() < key);
        self.messages.insert(idx, message);
        idx
    }
}

/// Sort by ordering key and collapse duplicate representations of one message.
fn sorted_unique(messages: Vec<Message>) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        if let Some(existing) = out.iter_mut().find(|m| m.same_logical(&message)) {
            existing.merge_confirmed(message);
        } else {
            out.push(message);
        }
    }
    out.sort_by_key(Message::order_key);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeliveryState, LocalDelivery, MessageDraft};

    const MIN: u64 = 60_000;
    const TEN_AM: u64 = 10 * 60 * MIN;

    fn msg(id: &str, at: u64) -> Message {
        Message::confirmed(id, "c1", "@bob", at, format!("body {id}"))
    }

    fn pending(local_id: &str, at: u64) -> Message {
        Message::pending(local_id, "c1", "@alice", at, MessageDraft::text("hi"))
    }

    fn ids(store: &MessageStore) -> Vec<String> {
        store
            .messages()
            .iter()
            .map(|m| {
                m.id()
                    .or(m.local_id())
                    .map(str::to_owned)
                    .unwrap_or_default()
            })
            .collect()
    }

    fn assert_sorted(store: &MessageStore) {
        let keys: Vec<_> = store.messages().iter().map(Message::order_key).collect();
        assert!(
            keys.windows(2).all(|w| w[0] < w[1]),
            "store out of order: {:?}",
            ids(store)
        );
    }

    #[test]
    fn prepend_rejects_pages_not_older_than_head() {
        let mut store = MessageStore::new("c1");
        store
            .replace_all(vec![msg("m1", TEN_AM), msg("m3", TEN_AM + 5 * MIN)], true, Some("cur-1".into()))
            .expect("initial page");

        let err = store
            .prepend_older(vec![msg("m2", TEN_AM + 2 * MIN)], true, Some("cur-2".into()))
            .expect_err("m2 is newer than head");
        assert!(matches!(err, StoreError::NotOlderThanHead { .. }));
        assert_eq!(ids(&store), ["m1", "m3"]);
        assert_eq!(store.older_cursor(), Some("cur-1"), "cursor unchanged on rejection");

        let added = store
            .prepend_older(vec![msg("m0", TEN_AM - 2 * MIN)], false, None)
            .expect("m0 is older than head");
        assert_eq!(added, 1);
        assert_eq!(ids(&store), ["m0", "m1", "m3"]);
        assert!(!store.has_older());
        assert_eq!(store.older_cursor(), None);
    }

    #[test]
    fn prepend_on_empty_store_sorts_page() {
        let mut store = MessageStore::new("c1");
        store
            .prepend_older(vec![msg("b", 2), msg("a", 1)], true, Some("next".into()))
            .expect("any page fits an empty store");
        assert_eq!(ids(&store), ["a", "b"]);
        assert_eq!(store.older_cursor(), Some("next"));
    }

    #[test]
    fn append_reports_tail_vs_out_of_order_insert() {
        let mut store = MessageStore::new("c1");
        store
            .replace_all(vec![msg("m1", 10), msg("m3", 30)], false, None)
            .expect("initial page");

        let outcome = store.append_new(msg("m4", 40)).expect("append");
        assert!(outcome.is_tail_append());

        let outcome = store.append_new(msg("m2", 20)).expect("ordered insert");
        assert_eq!(outcome, AppendOutcome::Inserted);
        assert!(!outcome.is_tail_append());
        assert_eq!(ids(&store), ["m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn append_is_idempotent_for_replayed_messages() {
        let mut store = MessageStore::new("c1");
        assert_eq!(store.append_new(msg("m1", 10)), Ok(AppendOutcome::Appended));
        assert_eq!(store.append_new(msg("m1", 10)), Ok(AppendOutcome::Unchanged));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn append_ignores_messages_older_than_loaded_window() {
        let mut store = MessageStore::new("c1");
        store
            .replace_all(vec![msg("m5", 50)], true, Some("cur".into()))
            .expect("initial page");

        assert_eq!(store.append_new(msg("m1", 10)), Ok(AppendOutcome::OutsideWindow));
        assert_eq!(ids(&store), ["m5"]);
    }

    #[test]
    fn append_rejects_other_conversations() {
        let mut store = MessageStore::new("c1");
        let mut foreign = msg("x", 1);
        foreign.conversation_id = "c2".into();
        let err = store.append_new(foreign).expect_err("wrong conversation");
        assert!(matches!(err, StoreError::ConversationMismatch { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn upsert_confirms_pending_once() {
        let mut store = MessageStore::new("c1");
        store.replace_all(vec![msg("m1", 10)], false, None).expect("page");
        store.append_new(pending("abc", 20)).expect("optimistic insert");

        let confirmed = Message::confirmed("501", "c1", "@alice", 20, "hi");
        assert_eq!(
            store.upsert_by_local_id("abc", confirmed.clone()),
            Ok(UpsertOutcome::ReplacedInPlace)
        );
        assert_eq!(
            store.upsert_by_local_id("abc", confirmed),
            Ok(UpsertOutcome::Unchanged)
        );

        assert_eq!(store.len(), 2);
        let entry = &store.messages()[1];
        assert_eq!(entry.id(), Some("501"));
        assert_eq!(entry.local_id(), Some("abc"));
        assert_eq!(entry.delivery_state(), DeliveryState::Confirmed);
    }

    #[test]
    fn upsert_moves_entry_when_server_timestamp_changes_order() {
        let mut store = MessageStore::new("c1");
        store.append_new(pending("abc", 50)).expect("optimistic");
        store.append_new(msg("m2", 40)).expect("insert");
        assert_eq!(ids(&store), ["m2", "abc"]);

        let confirmed = Message::confirmed("501", "c1", "@alice", 30, "hi");
        assert_eq!(store.upsert_by_local_id("abc", confirmed), Ok(UpsertOutcome::Moved));
        assert_eq!(ids(&store), ["501", "m2"]);
        assert_sorted(&store);
    }

    #[test]
    fn upsert_leaves_confirmations_older_than_partial_window_for_their_page() {
        let mut store = MessageStore::new("c1");
        store
            .replace_all(vec![msg("m5", 50)], true, Some("cur".into()))
            .expect("initial page");

        assert_eq!(
            store.upsert_by_local_id("other", msg("m1", 10)),
            Ok(UpsertOutcome::OutsideWindow)
        );
        assert_eq!(ids(&store), ["m5"]);

        store
            .prepend_older(vec![msg("m4", 40)], true, Some("cur-2".into()))
            .expect("older page still fits below the head");
        assert_eq!(ids(&store), ["m4", "m5"]);
        assert_eq!(store.older_cursor(), Some("cur-2"));
    }

    #[test]
    fn upsert_drops_entry_moved_before_partial_window() {
        let mut store = MessageStore::new("c1");
        store
            .replace_all(vec![msg("m5", 50)], true, Some("cur".into()))
            .expect("initial page");
        store.append_new(pending("abc", 60)).expect("optimistic");

        let confirmed = Message::confirmed("501", "c1", "@alice", 10, "hi");
        assert_eq!(
            store.upsert_by_local_id("abc", confirmed),
            Ok(UpsertOutcome::OutsideWindow)
        );
        assert_eq!(ids(&store), ["m5"]);

        store
            .prepend_older(vec![msg("m4", 40)], false, None)
            .expect("pagination keeps moving");
        assert_eq!(ids(&store), ["m4", "m5"]);
    }

    #[test]
    fn upsert_moves_head_freely_once_history_is_complete() {
        let mut store = MessageStore::new("c1");
        store.replace_all(vec![msg("m5", 50)], false, None).expect("page");
        store.append_new(pending("abc", 60)).expect("optimistic");

        let confirmed = Message::confirmed("501", "c1", "@alice", 10, "hi");
        assert_eq!(store.upsert_by_local_id("abc", confirmed), Ok(UpsertOutcome::Moved));
        assert_eq!(ids(&store), ["501", "m5"]);
    }

    #[test]
    fn pending_entries_with_equal_timestamps_order_by_local_id() {
        let mut store = MessageStore::new("c1");
        assert_eq!(store.append_new(pending("b", 20)), Ok(AppendOutcome::Appended));
        assert_eq!(store.append_new(pending("a", 20)), Ok(AppendOutcome::Inserted));
        assert_eq!(ids(&store), ["a", "b"]);

        assert_eq!(store.append_new(pending("c", 21)), Ok(AppendOutcome::Appended));
        assert_eq!(ids(&store), ["a", "b", "c"]);
    }

    #[test]
    fn upsert_collapses_echo_without_local_id() {
        let mut store = MessageStore::new("c1");
        store.append_new(pending("abc", 20)).expect("optimistic");
        store
            .append_new(Message::confirmed("501", "c1", "@alice", 19, "hi"))
            .expect("echo lacking local id lands separately");
        assert_eq!(store.len(), 2);

        let outcome = store
            .upsert_by_local_id("abc", Message::confirmed("501", "c1", "@alice", 19, "hi"))
            .expect("upsert");
        assert_eq!(outcome, UpsertOutcome::Collapsed);
        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].id(), Some("501"));
        assert_eq!(store.messages()[0].local_id(), Some("abc"));
    }

    #[test]
    fn upsert_inserts_when_no_local_entry_exists() {
        let mut store = MessageStore::new("c1");
        store
            .replace_all(vec![msg("m1", 10), msg("m3", 30)], false, None)
            .expect("page");
        let outcome = store
            .upsert_by_local_id("other-session", Message::confirmed("m2", "c1", "@alice", 20, "x"))
            .expect("upsert");
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert_eq!(ids(&store), ["m1", "m2", "m3"]);
    }

    #[test]
    fn ordering_holds_across_mixed_mutation_sequences() {
        let timestamps = [70_u64, 20, 90, 20, 55, 10, 85, 40, 40, 65];
        for rotation in 0..timestamps.len() {
            let mut store = MessageStore::new("c1");
            store
                .replace_all(vec![msg("base-a", 50), msg("base-b", 60)], true, Some("c".into()))
                .expect("page");

            for (step, offset) in (0..timestamps.len()).enumerate() {
                let at = timestamps[(rotation + offset) % timestamps.len()];
                let id = format!("r{rotation}-s{step}");
                match step % 3 {
                    0 => {
                        let _ = store.append_new(msg(&id, at));
                    }
                    1 => {
                        let _ = store.prepend_older(vec![msg(&id, at)], true, Some(id.clone()));
                    }
                    _ => {
                        let local = format!("l-{id}");
                        let _ = store.append_new(pending(&local, at));
                        let _ = store.upsert_by_local_id(&local, msg(&id, at.saturating_sub(3)));
                    }
                }
                assert_sorted(&store);
            }
        }
    }

    #[test]
    fn delete_preserves_position_and_id() {
        let mut store = MessageStore::new("c1");
        store
            .replace_all(vec![msg("m1", 10), msg("m2", 20), msg("m3", 30)], false, None)
            .expect("page");

        let outcome = store.patch(&MessageRef::Id("m2".into()), &MessagePatch::delete(99));
        assert_eq!(outcome, PatchOutcome::Applied);
        assert_eq!(ids(&store), ["m1", "m2", "m3"]);
        let deleted = &store.messages()[1];
        assert_eq!(deleted.deleted_at_ms, Some(99));
        assert!(deleted.text.is_empty());
        assert_eq!(deleted.created_at_ms, 20);

        let again = store.patch(&MessageRef::Id("m2".into()), &MessagePatch::delete(120));
        assert_eq!(again, PatchOutcome::Unchanged);
    }

    #[test]
    fn patch_tolerates_unknown_messages() {
        let mut store = MessageStore::new("c1");
        assert_eq!(
            store.patch(&MessageRef::Id("404".into()), &MessagePatch::edit("x", 1)),
            PatchOutcome::NotLoaded
        );
    }

    #[test]
    fn failed_delivery_is_patched_by_local_id() {
        let mut store = MessageStore::new("c1");
        store.append_new(pending("abc", 10)).expect("optimistic");
        let outcome = store.patch(
            &MessageRef::Local("abc".into()),
            &MessagePatch::delivery(LocalDelivery::Failed),
        );
        assert_eq!(outcome, PatchOutcome::Applied);
        assert_eq!(store.messages()[0].delivery_state(), DeliveryState::Failed);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn record_seen_is_bounded_and_monotonic() {
        let mut store = MessageStore::new("c1");
        store
            .replace_all(
                (1..=6).map(|n| msg(&format!("m{n}"), n * 10)).collect(),
                false,
                None,
            )
            .expect("page");

        assert_eq!(store.record_seen("@carol", 55, Some("m5")), 5);
        assert_eq!(store.record_seen("@carol", 35, Some("m3")), 0);
        assert!(store.messages()[4].seen_by.contains("@carol"));
        assert!(!store.messages()[5].seen_by.contains("@carol"));
        assert_eq!(store.messages()[0].seen_by.seen_at("@carol"), Some(55));

        assert_eq!(store.record_seen("@dave", 25, None), 2);
    }

    #[test]
    fn loading_guard_rejects_duplicate_requests() {
        let mut store = MessageStore::new("c1");
        assert!(store.begin_loading_older());
        assert!(!store.begin_loading_older());
        store.end_loading_older();
        assert!(store.begin_loading_older());
    }
}
