use tracing::{debug, warn};

use crate::{
    error::ChatError,
    transport::Transport,
    types::{EngineConfig, Message, MessagePage},
};

/// History page normalized for `MessageStore`: oldest first, single conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedPage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

/// Fetch one page through the transport and normalize it.
///
/// Transport failures come back as `Err` so callers can retry without having
/// touched any cursor.
pub async fn load_page<T>(
    transport: &T,
    config: &EngineConfig,
    conversation_id: &str,
    cursor: Option<&str>,
) -> Result<LoadedPage, ChatError>
where
    T: Transport + ?Sized,
{
    let page_size = config.effective_page_size();
    debug!(%conversation_id, ?cursor, page_size, "fetching message page");
    let page = transport
        .fetch_message_page(conversation_id, cursor, page_size)
        .await?;
    Ok(normalize_page(conversation_id, page))
}

/// Convert a transport page (newest first) to store order (oldest first).
///
/// Messages for other conversations are dropped. A page that claims more
/// history but supplies no cursor is treated as the end of history, since
/// re-requesting without a cursor would return the newest page again.
pub fn normalize_page(conversation_id: &str, page: MessagePage) -> LoadedPage {
    let MessagePage {
        messages,
        has_more,
        next_cursor,
    } = page;

    let total = messages.len();
    let mut messages: Vec<Message> = messages
        .into_iter()
        .filter(|m| m.conversation_id == conversation_id)
        .collect();
    if messages.len() != total {
        warn!(
            %conversation_id,
            dropped = total - messages.len(),
            "page contained messages for another conversation"
        );
    }

    messages.reverse();
    messages.sort_by_key(Message::order_key);

    let has_more = has_more && next_cursor.is_some();
    LoadedPage {
        messages,
        has_more,
        next_cursor: if has_more { next_cursor } else { None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, conversation_id: &str, at: u64) -> Message {
        Message::confirmed(id, conversation_id, "@bob", at, "x")
    }

    fn ids(page: &LoadedPage) -> Vec<&str> {
        page.messages.iter().filter_map(Message::id).collect()
    }

    #[test]
    fn reverses_newest_first_pages() {
        let page = normalize_page(
            "c1",
            MessagePage {
                messages: vec![msg("m3", "c1", 30), msg("m2", "c1", 20), msg("m1", "c1", 10)],
                has_more: true,
                next_cursor: Some("cur".into()),
            },
        );
        assert_eq!(ids(&page), ["m1", "m2", "m3"]);
        assert!(page.has_more);
        assert_eq!(page.next_cursor.as_deref(), Some("cur"));
    }

    #[test]
    fn sorts_pages_that_arrive_slightly_out_of_order() {
        let page = normalize_page(
            "c1",
            MessagePage {
                messages: vec![msg("m2", "c1", 20), msg("m3", "c1", 30), msg("m1", "c1", 10)],
                has_more: false,
                next_cursor: None,
            },
        );
        assert_eq!(ids(&page), ["m1", "m2", "m3"]);
    }

    #[test]
    fn drops_messages_for_other_conversations() {
        let page = normalize_page(
            "c1",
            MessagePage {
                messages: vec![msg("m2", "c2", 20), msg("m1", "c1", 10)],
                has_more: false,
                next_cursor: None,
            },
        );
        assert_eq!(ids(&page), ["m1"]);
    }

    #[test]
    fn treats_missing_cursor_as_end_of_history() {
        let page = normalize_page(
            "c1",
            MessagePage {
                messages: vec![msg("m1", "c1", 10)],
                has_more: true,
                next_cursor: None,
            },
        );
        assert!(!page.has_more);
        assert_eq!(page.next_cursor, None);
    }
}
