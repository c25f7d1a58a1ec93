use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{PushEvent, SessionEvent};

/// Receiver half handed to each observer of a `ChatSession`.
pub type SessionEventStream = broadcast::Receiver<SessionEvent>;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// The session dropped its push receiver.
    #[error("push channel is closed")]
    PushChannelClosed,
}

/// Wiring between a transport's push feed and a session's observers.
///
/// Push events queue in a bounded mpsc that the session drains with
/// `ChatSession::drain_push`. Session events are broadcast; a subscriber only
/// sees events emitted after it subscribed.
#[derive(Clone, Debug)]
pub struct SessionChannels {
    push_tx: mpsc::Sender<PushEvent>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionChannels {
    /// Buffers are clamped to at least one slot.
    pub fn new(push_buffer: usize, event_buffer: usize) -> (Self, mpsc::Receiver<PushEvent>) {
        let (push_tx, push_rx) = mpsc::channel(push_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (Self { push_tx, event_tx }, push_rx)
    }

    /// Sender a transport uses to feed server push events.
    pub fn push_sender(&self) -> mpsc::Sender<PushEvent> {
        self.push_tx.clone()
    }

    /// Sender passed to `ChatSession::new`.
    pub fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.event_tx.clone()
    }

    pub fn subscribe(&self) -> SessionEventStream {
        self.event_tx.subscribe()
    }

    /// Queue one push event, waiting while the buffer is full.
    pub async fn push(&self, event: PushEvent) -> Result<(), ChannelError> {
        self.push_tx
            .send(event)
            .await
            .map_err(|_| ChannelError::PushChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn typing(conversation_id: &str, started: bool) -> PushEvent {
        let conversation_id = conversation_id.to_owned();
        let participant_id = "@bob".to_owned();
        if started {
            PushEvent::TypingStarted {
                conversation_id,
                participant_id,
            }
        } else {
            PushEvent::TypingStopped {
                conversation_id,
                participant_id,
            }
        }
    }

    #[tokio::test]
    async fn push_events_queue_in_arrival_order() {
        let (channels, mut rx) = SessionChannels::new(4, 4);
        channels.push(typing("c1", true)).await.expect("typing start");
        channels
            .push(PushEvent::MessageCreated {
                message: Message::confirmed("m1", "c2", "@bob", 10, "hey"),
            })
            .await
            .expect("message");
        channels.push(typing("c1", false)).await.expect("typing stop");

        let first = rx.recv().await.expect("first event");
        assert!(matches!(first, PushEvent::TypingStarted { .. }));
        let second = rx.recv().await.expect("second event");
        assert_eq!(second.conversation_id(), "c2");
        let third = rx.recv().await.expect("third event");
        assert!(matches!(third, PushEvent::TypingStopped { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn push_reports_closed_once_session_input_is_gone() {
        let (channels, rx) = SessionChannels::new(0, 0);
        let transport_side = channels.push_sender();
        drop(rx);

        let err = channels
            .push(typing("c1", true))
            .await
            .expect_err("nobody is draining pushes");
        assert!(matches!(err, ChannelError::PushChannelClosed));
        assert!(transport_side.is_closed());
    }

    #[tokio::test]
    async fn late_subscribers_miss_earlier_session_events() {
        let (channels, _) = SessionChannels::new(4, 16);
        let mut early = channels.subscribe();
        let events = channels.event_sender();

        let _ = events.send(SessionEvent::TimelineChanged {
            conversation_id: "c1".into(),
            follow_tail: true,
        });
        let mut late = channels.subscribe();
        let _ = events.send(SessionEvent::TypingChanged {
            conversation_id: "c1".into(),
            participants: vec!["@bob".into()],
        });

        assert!(matches!(
            early.recv().await.expect("early sees the timeline change"),
            SessionEvent::TimelineChanged { .. }
        ));
        let typing = SessionEvent::TypingChanged {
            conversation_id: "c1".into(),
            participants: vec!["@bob".into()],
        };
        assert_eq!(early.recv().await.expect("early sees typing"), typing);
        assert_eq!(late.recv().await.expect("late sees typing only"), typing);
    }
}
