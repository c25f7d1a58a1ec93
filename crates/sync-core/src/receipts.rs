//! Read-receipt derivation from per-message `seen_by` annotations.

use std::collections::BTreeMap;

use crate::types::Message;

/// Derived "latest message seen" pointer per remote participant.
///
/// State is recomputed from the loaded messages rather than updated in place;
/// because `seen_by` only grows, the derived pointers never move backwards.
#[derive(Debug, Clone, Default)]
pub struct ReadReceiptTracker {
    local_user_id: String,
    last_seen: BTreeMap<String, String>,
    unread: usize,
}

impl ReadReceiptTracker {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            last_seen: BTreeMap::new(),
            unread: 0,
        }
    }

    /// Rescan `messages` (oldest first) and rebuild every pointer.
    pub fn recompute(&mut self, messages: &[Message]) {
        self.last_seen.clear();
        let mut local_read_idx = None;

        for (idx, message) in messages.iter().enumerate() {
            if message.sender_id == self.local_user_id
                || message.seen_by.contains(&self.local_user_id)
            {
                local_read_idx = Some(idx);
            }

            let Some(id) = message.id() else {
                continue;
            };
            for participant in message.seen_by.participants() {
                if participant == message.sender_id || participant == self.local_user_id {
                    continue;
                }
                self.last_seen.insert(participant.to_owned(), id.to_owned());
            }
        }

        let first_unread = local_read_idx.map_or(0, |idx| idx + 1);
        self.unread = messages[first_unread..]
            .iter()
            .filter(|m| m.sender_id != self.local_user_id && !m.is_deleted())
            .count();
    }

    /// Newest message `participant` is known to have seen.
    pub fn last_seen(&self, participant: &str) -> Option<&str> {
        self.last_seen.get(participant).map(String::as_str)
    }

    /// Participants whose newest seen message is `message_id`.
    ///
    /// This is where a read-receipt avatar is rendered; older messages that
    /// the same participant has also seen do not list them.
    pub fn seen_by_for(&self, message_id: &str) -> Vec<&str> {
        self.last_seen
            .iter()
            .filter(|(_, id)| id.as_str() == message_id)
            .map(|(participant, _)| participant.as_str())
            .collect()
    }

    /// Messages from other participants newer than the local user's read position.
    pub fn unread_count(&self) -> usize {
        self.unread
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, sender: &str, at: u64, seen: &[&str]) -> Message {
        let mut message = Message::confirmed(id, "c1", sender, at, "x");
        for participant in seen {
            message.seen_by.record(*participant, at + 1);
        }
        message
    }

    #[test]
    fn latest_seen_message_wins() {
        let mut tracker = ReadReceiptTracker::new("@me");
        tracker.recompute(&[
            msg("m1", "@me", 10, &["@bob", "@carol"]),
            msg("m2", "@me", 20, &["@bob"]),
            msg("m3", "@me", 30, &[]),
        ]);

        assert_eq!(tracker.last_seen("@bob"), Some("m2"));
        assert_eq!(tracker.last_seen("@carol"), Some("m1"));
        assert_eq!(tracker.seen_by_for("m1"), vec!["@carol"]);
        assert_eq!(tracker.seen_by_for("m2"), vec!["@bob"]);
        assert!(tracker.seen_by_for("m3").is_empty());
    }

    #[test]
    fn ignores_sender_and_local_user_entries() {
        let mut tracker = ReadReceiptTracker::new("@me");
        tracker.recompute(&[msg("m1", "@bob", 10, &["@bob", "@me"])]);

        assert_eq!(tracker.last_seen("@bob"), None);
        assert_eq!(tracker.last_seen("@me"), None);
    }

    #[test]
    fn counts_unread_after_local_read_position() {
        let mut tracker = ReadReceiptTracker::new("@me");
        tracker.recompute(&[
            msg("m1", "@bob", 10, &["@me"]),
            msg("m2", "@bob", 20, &[]),
            msg("m3", "@carol", 30, &[]),
        ]);
        assert_eq!(tracker.unread_count(), 2);

        tracker.recompute(&[
            msg("m1", "@bob", 10, &[]),
            msg("m2", "@me", 20, &[]),
            msg("m3", "@carol", 30, &[]),
        ]);
        assert_eq!(tracker.unread_count(), 1, "own message implies read");
    }

    #[test]
    fn pending_messages_do_not_carry_receipts() {
        use crate::types::MessageDraft;

        let mut pending = Message::pending("l1", "c1", "@me", 10, MessageDraft::text("x"));
        pending.seen_by.record("@bob", 11);

        let mut tracker = ReadReceiptTracker::new("@me");
        tracker.recompute(&[msg("m0", "@me", 5, &["@bob"]), pending]);
        assert_eq!(tracker.last_seen("@bob"), Some("m0"));
    }
}
