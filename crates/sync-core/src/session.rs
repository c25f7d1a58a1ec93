//! Top-level controller for the active conversation.
//!
//! Long-latency operations come in two halves: a synchronous `begin_*` that
//! updates local state and returns a ticket, and a `finish_*` that applies the
//! transport result. Tickets carry the selection generation so results that
//! arrive after a conversation switch are dropped. The `async` wrappers run
//! both halves around the transport call.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    channel::SessionEventStream,
    error::{ChatError, StoreError},
    lifecycle::{SessionAction, SessionLifecycle, SessionPhase},
    loader::{LoadedPage, load_page},
    receipts::ReadReceiptTracker,
    reconciler::{EventReconciler, Reconciled},
    store::{MessageStore, PatchOutcome},
    transport::Transport,
    types::{
        ConversationSummary, DeliveryState, EngineConfig, LocalDelivery, Message, MessageDraft,
        MessagePatch, MessageRef, PushEvent, SendRequest, SessionEvent,
    },
};

/// Ticket for an initial conversation load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub conversation_id: String,
    generation: u64,
}

/// Ticket for an older-page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTicket {
    pub conversation_id: String,
    pub cursor: Option<String>,
    generation: u64,
}

/// Ticket for an outgoing message whose optimistic entry is already in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTicket {
    pub request: SendRequest,
    generation: u64,
}

impl SendTicket {
    pub fn local_id(&self) -> &str {
        &self.request.local_id
    }
}

/// Whether a finished operation still applied to the active conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied,
    /// The conversation changed while the request was in flight.
    Stale,
}

/// Result of an older-page load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Applied { count: usize, has_older: bool },
    /// Nothing older to load, or a request is already in flight.
    Skipped,
    Stale,
}

#[derive(Debug)]
struct ActiveConversation {
    summary: Option<ConversationSummary>,
    store: MessageStore,
    receipts: ReadReceiptTracker,
    reconciler: EventReconciler,
}

impl ActiveConversation {
    fn new(conversation_id: &str, local_user_id: &str) -> Self {
        Self {
            summary: None,
            store: MessageStore::new(conversation_id),
            receipts: ReadReceiptTracker::new(local_user_id),
            reconciler: EventReconciler::new(local_user_id),
        }
    }

    fn refresh_receipts(&mut self) {
        self.receipts.recompute(self.store.messages());
    }
}

/// Owns the synchronization state of one active conversation at a time.
pub struct ChatSession<T: Transport + ?Sized> {
    transport: Arc<T>,
    config: EngineConfig,
    local_user_id: String,
    lifecycle: SessionLifecycle,
    generation: u64,
    active: Option<ActiveConversation>,
    events: broadcast::Sender<SessionEvent>,
    clock: fn() -> u64,
}

impl<T: Transport + ?Sized> ChatSession<T> {
    pub fn new(
        transport: Arc<T>,
        config: EngineConfig,
        local_user_id: impl Into<String>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            transport,
            config,
            local_user_id: local_user_id.into(),
            lifecycle: SessionLifecycle::default(),
            generation: 0,
            active: None,
            events,
            clock: unix_now_ms,
        }
    }

    /// Replace the wall clock used to stamp optimistic messages and local tombstones.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn subscribe(&self) -> SessionEventStream {
        self.events.subscribe()
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.lifecycle.phase()
    }

    pub fn active_conversation_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.store.conversation_id())
    }

    pub fn conversation(&self) -> Option<&ConversationSummary> {
        self.active.as_ref().and_then(|a| a.summary.as_ref())
    }

    pub fn store(&self) -> Option<&MessageStore> {
        self.active.as_ref().map(|a| &a.store)
    }

    /// Loaded messages of the active conversation, oldest first.
    pub fn messages(&self) -> &[Message] {
        self.active.as_ref().map_or(&[], |a| a.store.messages())
    }

    pub fn has_older(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.store.has_older())
    }

    pub fn is_loading_older(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.store.is_loading_older())
    }

    pub fn typing(&self) -> Vec<&str> {
        self.active
            .as_ref()
            .map(|a| a.reconciler.typing())
            .unwrap_or_default()
    }

    pub fn last_seen(&self, participant: &str) -> Option<&str> {
        self.active
            .as_ref()
            .and_then(|a| a.receipts.last_seen(participant))
    }

    /// Participants whose newest seen message is `message_id`.
    pub fn seen_by_for(&self, message_id: &str) -> Vec<&str> {
        self.active
            .as_ref()
            .map(|a| a.receipts.seen_by_for(message_id))
            .unwrap_or_default()
    }

    pub fn unread_count(&self) -> usize {
        self.active
            .as_ref()
            .map_or(0, |a| a.receipts.unread_count())
    }

    /// Discard all conversation state. In-flight results become stale.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.active = None;
        let _ = self.lifecycle.apply(SessionAction::Reset);
        debug!(generation = self.generation, "session reset");
    }

    /// Start selecting `conversation_id`, discarding the previous conversation.
    pub fn begin_select(&mut self, conversation_id: impl Into<String>) -> LoadTicket {
        let conversation_id = conversation_id.into();
        self.generation += 1;
        let _ = self.lifecycle.apply(SessionAction::Select);
        self.active = Some(ActiveConversation::new(
            &conversation_id,
            &self.local_user_id,
        ));
        info!(%conversation_id, generation = self.generation, "conversation selected");

        LoadTicket {
            conversation_id,
            generation: self.generation,
        }
    }

    /// Apply the initial conversation load.
    ///
    /// Messages pushed while the load was in flight are merged into the page.
    pub fn finish_select(
        &mut self,
        ticket: LoadTicket,
        result: Result<(ConversationSummary, LoadedPage), ChatError>,
    ) -> Result<Completion, ChatError> {
        if !self.is_current(ticket.generation, &ticket.conversation_id) {
            debug!(conversation_id = %ticket.conversation_id, "stale initial load discarded");
            return Ok(Completion::Stale);
        }

        let (summary, page) = match result {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(conversation_id = %ticket.conversation_id, error = %err, "initial load failed");
                let _ = self.lifecycle.on_initial_load(false);
                return Err(err);
            }
        };

        let Some(active) = self.active.as_mut() else {
            return Ok(Completion::Stale);
        };
        let carried = active.store.take_messages();
        if let Err(err) = active
            .store
            .replace_all(page.messages, page.has_more, page.next_cursor)
        {
            warn!(conversation_id = %ticket.conversation_id, error = %err, "initial page rejected");
            let _ = self.lifecycle.on_initial_load(false);
            return Err(err.into());
        }
        for message in carried {
            let _ = active.store.append_new(message);
        }
        active.summary = Some(summary);
        active.refresh_receipts();
        let message_count = active.store.len();

        self.lifecycle.on_initial_load(true)?;
        info!(conversation_id = %ticket.conversation_id, message_count, "conversation loaded");
        self.emit(SessionEvent::ConversationLoaded {
            conversation_id: ticket.conversation_id,
            message_count,
        });
        Ok(Completion::Applied)
    }

    /// Select a conversation and load its metadata and newest page.
    pub async fn select_conversation(
        &mut self,
        conversation_id: impl Into<String>,
    ) -> Result<Completion, ChatError> {
        let ticket = self.begin_select(conversation_id);
        let transport = Arc::clone(&self.transport);
        let config = self.config;
        let result = async {
            let summary = transport
                .fetch_conversation(&ticket.conversation_id)
                .await?;
            let page = load_page(transport.as_ref(), &config, &ticket.conversation_id, None).await?;
            Ok::<_, ChatError>((summary, page))
        }
        .await;
        self.finish_select(ticket, result)
    }

    /// Reserve an older-page request. `None` when there is nothing to load or
    /// a request is already in flight.
    pub fn begin_load_older(&mut self) -> Result<Option<PageTicket>, ChatError> {
        self.lifecycle.apply(SessionAction::LoadOlder)?;
        let generation = self.generation;
        let active = self.active_mut("load_older")?;

        if !active.store.has_older() || !active.store.begin_loading_older() {
            return Ok(None);
        }

        Ok(Some(PageTicket {
            conversation_id: active.store.conversation_id().to_owned(),
            cursor: active.store.older_cursor().map(str::to_owned),
            generation,
        }))
    }

    /// Apply an older page. Failures leave cursors untouched so the caller can retry.
    pub fn finish_load_older(
        &mut self,
        ticket: PageTicket,
        result: Result<LoadedPage, ChatError>,
    ) -> Result<PageOutcome, ChatError> {
        if !self.is_current(ticket.generation, &ticket.conversation_id) {
            debug!(conversation_id = %ticket.conversation_id, "stale older page discarded");
            return Ok(PageOutcome::Stale);
        }
        let active = self.active_mut("load_older")?;
        active.store.end_loading_older();

        let page = match result {
            Ok(page) => page,
            Err(err) => {
                warn!(conversation_id = %ticket.conversation_id, error = %err, "older page fetch failed");
                return Err(err);
            }
        };

        match active
            .store
            .prepend_older(page.messages, page.has_more, page.next_cursor)
        {
            Ok(count) => {
                active.refresh_receipts();
                let has_older = active.store.has_older();
                self.emit(SessionEvent::OlderPageLoaded {
                    conversation_id: ticket.conversation_id,
                    message_count: count,
                    has_older,
                });
                Ok(PageOutcome::Applied { count, has_older })
            }
            Err(err) => Err(self.diagnose(err)),
        }
    }

    /// Load the next older page of history.
    pub async fn load_older(&mut self) -> Result<PageOutcome, ChatError> {
        let Some(ticket) = self.begin_load_older()? else {
            return Ok(PageOutcome::Skipped);
        };
        let result = load_page(
            self.transport.as_ref(),
            &self.config,
            &ticket.conversation_id,
            ticket.cursor.as_deref(),
        )
        .await;
        self.finish_load_older(ticket, result)
    }

    /// Insert an optimistic message and return the request to send.
    pub fn begin_send(&mut self, draft: MessageDraft) -> Result<SendTicket, ChatError> {
        self.lifecycle.apply(SessionAction::Send)?;
        let generation = self.generation;
        let now = (self.clock)();
        let local_user_id = self.local_user_id.clone();
        let active = self.active_mut("send_message")?;

        let local_id = Uuid::new_v4().to_string();
        let conversation_id = active.store.conversation_id().to_owned();
        // Strictly after the tail so back-to-back sends keep their order.
        let created_at_ms = active
            .store
            .newest_loaded_at_ms()
            .map_or(now, |tail| now.max(tail.saturating_add(1)));
        let request = SendRequest {
            conversation_id: conversation_id.clone(),
            local_id: local_id.clone(),
            text: draft.text.clone(),
            attachment: draft.attachment.clone(),
            reply_to_id: draft.reply_to_id.clone(),
        };
        let pending = Message::pending(
            &local_id,
            &conversation_id,
            local_user_id,
            created_at_ms,
            draft,
        );

        let outcome = active.store.append_new(pending)?;
        active.refresh_receipts();
        debug!(%conversation_id, %local_id, ?outcome, "optimistic message inserted");
        self.emit(SessionEvent::TimelineChanged {
            conversation_id,
            follow_tail: outcome.is_tail_append(),
        });

        Ok(SendTicket {
            request,
            generation,
        })
    }

    /// Reconcile the transport's answer to a send.
    ///
    /// On failure, including a reply the store rejects, the message stays in
    /// the store marked `Failed`.
    pub fn finish_send(
        &mut self,
        ticket: SendTicket,
        result: Result<Message, ChatError>,
    ) -> Result<Completion, ChatError> {
        let SendTicket {
            request,
            generation,
        } = ticket;
        if !self.is_current(generation, &request.conversation_id) {
            debug!(local_id = %request.local_id, "send completed for inactive conversation");
            return result.map(|_| Completion::Stale);
        }
        let active = self.active_mut("send_message")?;

        match result {
            Ok(confirmed) => match active.store.upsert_by_local_id(&request.local_id, confirmed) {
                Ok(outcome) => {
                    if outcome.changed() {
                        active.refresh_receipts();
                        self.emit(SessionEvent::TimelineChanged {
                            conversation_id: request.conversation_id,
                            follow_tail: false,
                        });
                    }
                    debug!(local_id = %request.local_id, ?outcome, "send confirmed");
                    Ok(Completion::Applied)
                }
                Err(err) => {
                    let err = self.diagnose(err);
                    self.fail_send(request, &err);
                    Err(err)
                }
            },
            Err(err) => {
                self.fail_send(request, &err);
                Err(err)
            }
        }
    }

    fn fail_send(&mut self, request: SendRequest, err: &ChatError) {
        if let Some(active) = self.active.as_mut() {
            active.store.patch(
                &MessageRef::Local(request.local_id.clone()),
                &MessagePatch::delivery(LocalDelivery::Failed),
            );
        }
        warn!(local_id = %request.local_id, error = %err, "send failed");
        self.emit(SessionEvent::TimelineChanged {
            conversation_id: request.conversation_id,
            follow_tail: false,
        });
        self.emit(SessionEvent::SendFailed {
            local_id: request.local_id,
            error_code: err.code.clone(),
        });
    }

    /// Send a message optimistically. Returns the local correlation id.
    pub async fn send_message(&mut self, draft: MessageDraft) -> Result<String, ChatError> {
        let ticket = self.begin_send(draft)?;
        let local_id = ticket.local_id().to_owned();
        let result = self.transport.send_message(&ticket.request).await;
        self.finish_send(ticket, result)?;
        Ok(local_id)
    }

    /// Move a failed message back to pending and return the request to re-send.
    pub fn begin_retry(&mut self, local_id: &str) -> Result<SendTicket, ChatError> {
        self.lifecycle.apply(SessionAction::Send)?;
        let generation = self.generation;
        let active = self.active_mut("retry_send")?;
        let target = MessageRef::Local(local_id.to_owned());

        let message = active
            .store
            .get(&target)
            .filter(|m| m.delivery_state() == DeliveryState::Failed)
            .ok_or_else(|| ChatError::message_not_loaded(local_id))?;
        let request = SendRequest {
            conversation_id: message.conversation_id.clone(),
            local_id: local_id.to_owned(),
            text: message.text.clone(),
            attachment: message.attachment.clone(),
            reply_to_id: message.reply_to_id.clone(),
        };
        active
            .store
            .patch(&target, &MessagePatch::delivery(LocalDelivery::Pending));
        debug!(%local_id, "retrying failed send");
        self.emit(SessionEvent::TimelineChanged {
            conversation_id: request.conversation_id.clone(),
            follow_tail: false,
        });

        Ok(SendTicket {
            request,
            generation,
        })
    }

    /// Re-send a message previously marked `Failed`.
    pub async fn retry_send(&mut self, local_id: &str) -> Result<(), ChatError> {
        let ticket = self.begin_retry(local_id)?;
        let result = self.transport.send_message(&ticket.request).await;
        self.finish_send(ticket, result).map(|_| ())
    }

    /// Edit a loaded message through the transport and merge the result.
    pub async fn edit_message(
        &mut self,
        message_id: &str,
        text: &str,
    ) -> Result<Completion, ChatError> {
        let generation = self.begin_remote_mutation(SessionAction::Edit, message_id)?;
        let edited = self.transport.edit_message(message_id, text).await?;
        if generation != self.generation {
            return Ok(Completion::Stale);
        }

        let active = self.active_mut("edit_message")?;
        match active.store.append_new(edited) {
            Ok(outcome) => {
                if outcome.changed() {
                    active.refresh_receipts();
                    let conversation_id = active.store.conversation_id().to_owned();
                    self.emit(SessionEvent::TimelineChanged {
                        conversation_id,
                        follow_tail: false,
                    });
                }
                Ok(Completion::Applied)
            }
            Err(err) => Err(self.diagnose(err)),
        }
    }

    /// Delete a loaded message through the transport and tombstone it locally.
    pub async fn delete_message(&mut self, message_id: &str) -> Result<Completion, ChatError> {
        let generation = self.begin_remote_mutation(SessionAction::Delete, message_id)?;
        self.transport.delete_message(message_id).await?;
        if generation != self.generation {
            return Ok(Completion::Stale);
        }

        let deleted_at_ms = (self.clock)();
        let active = self.active_mut("delete_message")?;
        let outcome = active.store.patch(
            &MessageRef::Id(message_id.to_owned()),
            &MessagePatch::delete(deleted_at_ms),
        );
        if outcome == PatchOutcome::Applied {
            active.refresh_receipts();
            let conversation_id = active.store.conversation_id().to_owned();
            self.emit(SessionEvent::TimelineChanged {
                conversation_id,
                follow_tail: false,
            });
        }
        debug!(%message_id, ?outcome, "message deleted");
        Ok(Completion::Applied)
    }

    /// Tell the server the local user has seen the conversation and record it locally.
    pub async fn mark_seen(&mut self) -> Result<Completion, ChatError> {
        self.lifecycle.apply(SessionAction::MarkSeen)?;
        let generation = self.generation;
        let conversation_id = self
            .active_conversation_id()
            .ok_or_else(|| ChatError::no_active_conversation("mark_seen"))?
            .to_owned();

        let ack = self.transport.mark_seen(&conversation_id).await?;
        if generation != self.generation {
            return Ok(Completion::Stale);
        }

        let local_user_id = self.local_user_id.clone();
        let active = self.active_mut("mark_seen")?;
        let marked = active.store.record_seen(&local_user_id, ack.seen_at_ms, None);
        active.refresh_receipts();
        debug!(%conversation_id, marked, "marked conversation seen");
        if marked > 0 {
            self.emit(SessionEvent::TimelineChanged {
                conversation_id,
                follow_tail: false,
            });
        }
        Ok(Completion::Applied)
    }

    /// Apply one push event and emit the resulting session events.
    pub fn handle_push(&mut self, event: PushEvent) -> Reconciled {
        let outcome = match self.active.as_mut() {
            Some(active) => {
                active
                    .reconciler
                    .apply(&mut active.store, &mut active.receipts, &event)
            }
            None => Reconciled::Foreign,
        };

        match &outcome {
            Reconciled::Foreign => self.emit(SessionEvent::ForeignActivity {
                conversation_id: event.conversation_id().to_owned(),
                event,
            }),
            Reconciled::Timeline {
                follow_tail,
                notify,
            } => {
                self.emit(SessionEvent::TimelineChanged {
                    conversation_id: event.conversation_id().to_owned(),
                    follow_tail: *follow_tail,
                });
                if *notify && let PushEvent::MessageCreated { message } = event {
                    self.emit(SessionEvent::IncomingMessage { message });
                }
            }
            Reconciled::Receipts { .. } | Reconciled::Content => {
                self.emit(SessionEvent::TimelineChanged {
                    conversation_id: event.conversation_id().to_owned(),
                    follow_tail: false,
                });
            }
            Reconciled::Typing => {
                let participants = self.typing().into_iter().map(str::to_owned).collect();
                self.emit(SessionEvent::TypingChanged {
                    conversation_id: event.conversation_id().to_owned(),
                    participants,
                });
            }
            Reconciled::Rejected(err) => {
                let _ = self.diagnose(err.clone());
            }
            Reconciled::Unchanged => {}
        }

        outcome
    }

    /// Apply every push event currently queued on `rx`. Returns how many were applied.
    pub fn drain_push(&mut self, rx: &mut mpsc::Receiver<PushEvent>) -> usize {
        let mut applied = 0;
        while let Ok(event) = rx.try_recv() {
            self.handle_push(event);
            applied += 1;
        }
        applied
    }

    fn begin_remote_mutation(
        &mut self,
        action: SessionAction,
        message_id: &str,
    ) -> Result<u64, ChatError> {
        self.lifecycle.apply(action)?;
        let loaded = self
            .store()
            .and_then(|store| store.get(&MessageRef::Id(message_id.to_owned())))
            .is_some();
        if !loaded {
            return Err(ChatError::message_not_loaded(message_id));
        }
        Ok(self.generation)
    }

    fn is_current(&self, generation: u64, conversation_id: &str) -> bool {
        generation == self.generation && self.active_conversation_id() == Some(conversation_id)
    }

    fn active_mut(&mut self, action: &str) -> Result<&mut ActiveConversation, ChatError> {
        self.active
            .as_mut()
            .ok_or_else(|| ChatError::no_active_conversation(action))
    }

    fn diagnose(&self, err: StoreError) -> ChatError {
        warn!(code = err.code(), error = %err, "store rejected mutation");
        self.emit(SessionEvent::Diagnostic {
            code: err.code().to_owned(),
            message: err.to_string(),
        });
        err.into()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
