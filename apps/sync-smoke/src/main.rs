mod config;
mod logging;

use std::{error::Error, sync::Arc};

use sync_core::{
    ChatError, ChatSession, ConversationKind, ConversationSummary, DeliveryState, MessageDraft,
    SessionChannels, SessionEvent, SessionEventStream,
};
use sync_memory::InMemoryTransport;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{error, info, warn};

use crate::config::SmokeConfig;

const TAIL_PREVIEW: usize = 5;

#[tokio::main]
async fn main() {
    logging::init();

    if let Err(err) = run().await {
        error!(error = %err, "smoke run failed");
        eprintln!("sync-smoke failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let config = SmokeConfig::from_env()?;
    let user = config.local_user_id.as_str();
    let conversation_id = config.conversation_id.as_str();

    let (channels, mut push_rx) = SessionChannels::new(256, 1024);
    let server = Arc::new(InMemoryTransport::new(user).with_push(channels.push_sender()));
    server.add_conversation(ConversationSummary {
        id: conversation_id.to_owned(),
        kind: ConversationKind::Group,
        participants: vec![user.to_owned(), "@bob".to_owned(), "@carol".to_owned()],
        name: Some("Smoke test".to_owned()),
        image_url: None,
    })?;
    let half = config.seed_messages / 2;
    server.seed_messages(conversation_id, "@bob", half)?;
    server.seed_messages(conversation_id, "@carol", config.seed_messages - half)?;

    let mut session = ChatSession::new(
        Arc::clone(&server),
        config.engine,
        user,
        channels.event_sender(),
    );
    let mut events = session.subscribe();

    session.select_conversation(conversation_id).await?;
    while session.has_older() {
        session.load_older().await?;
    }
    info!(
        %conversation_id,
        loaded = session.messages().len(),
        unread = session.unread_count(),
        "history fully loaded"
    );

    server.set_typing(conversation_id, "@bob", true);
    server.post_from(conversation_id, "@bob", "anyone around?")?;
    server.set_typing(conversation_id, "@bob", false);
    session.send_message(MessageDraft::text("hello from the smoke test")).await?;
    server.read_by(conversation_id, "@carol")?;

    server.fail_next(ChatError::from_http_status(503, "simulated outage"))?;
    if let Err(err) = session.send_message(MessageDraft::text("this one fails first")).await {
        warn!(error = %err, "send failed, retrying");
        let failed = session
            .messages()
            .iter()
            .find(|m| m.delivery_state() == DeliveryState::Failed)
            .and_then(|m| m.local_id())
            .map(str::to_owned);
        if let Some(local_id) = failed {
            session.retry_send(&local_id).await?;
        }
    }

    let applied = session.drain_push(&mut push_rx);
    session.mark_seen().await?;
    let applied = applied + session.drain_push(&mut push_rx);
    info!(applied, "push events applied");

    log_timeline(&session);
    log_event_summary(&mut events);
    Ok(())
}

fn log_timeline(session: &ChatSession<InMemoryTransport>) {
    let messages = session.messages();
    for message in &messages[messages.len().saturating_sub(TAIL_PREVIEW)..] {
        info!(
            id = message.id().unwrap_or("-"),
            sender = %message.sender_id,
            created_at_ms = message.created_at_ms,
            state = ?message.delivery_state(),
            seen_by = message.seen_by.len(),
            text = %message.text,
            "timeline tail"
        );
    }
    info!(
        total = messages.len(),
        unread = session.unread_count(),
        carol_last_seen = session.last_seen("@carol").unwrap_or("-"),
        "timeline summary"
    );
}

fn log_event_summary(events: &mut SessionEventStream) {
    let (mut timeline, mut incoming, mut other) = (0_usize, 0_usize, 0_usize);
    loop {
        match events.try_recv() {
            Ok(SessionEvent::TimelineChanged { .. }) => timeline += 1,
            Ok(SessionEvent::IncomingMessage { message }) => {
                info!(sender = %message.sender_id, text = %message.text, "notification");
                incoming += 1;
            }
            Ok(SessionEvent::SendFailed { local_id, error_code }) => {
                warn!(%local_id, %error_code, "send failure reported");
                other += 1;
            }
            Ok(_) => other += 1,
            Err(TryRecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
            Err(_) => break,
        }
    }
    info!(timeline, incoming, other, "session events observed");
}
