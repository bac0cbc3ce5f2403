//! Chat service: the connection lifecycle manager and its wiring.
//!
//! Owns one [`Connection`], one [`MessageCache`] and one [`Notifier`], and
//! executes their actions against the transport and collaborators. Transport
//! callbacks never touch state directly: they enqueue onto a channel tagged
//! with the subscription generation, and the service applies them one at a
//! time from [`ChatService::poll`]. Every handler therefore runs to
//! completion before the next event is seen, and callbacks from a detached
//! subscription are dropped.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::Arc,
};

use serde_json::Value;
use souk_core::{
    ChatMessage, Connection, ConnectionAction, ConnectionState, Environment, InboundEvent,
    InboundKind, MessageCache, MessageNotice, NotificationData, NotificationId,
    NotificationRecord, NotificationRequest, NotificationSource, Notifier, NotifierAction,
    OutboundCall, Session, ShowContext, ShowOutcome, SyncConfig, SyncError, Timepoint, UserId,
};
use tokio::sync::mpsc;

use crate::{
    collaborators::{HistorySource, Presenter, ScreenTracker},
    transport::{
        Detach, InboundHandler, LifecycleEvent, LifecycleHandler, Transport, TransportState,
    },
};

/// Title used when a new-message notice carries no sender name.
const DEFAULT_NOTICE_TITLE: &str = "New message";

/// Host-side collaborators.
#[derive(Clone)]
pub struct Collaborators {
    /// Shows transient notifications
    pub presenter: Arc<dyn Presenter>,
    /// Paged message history
    pub history: Arc<dyn HistorySource>,
    /// Conversation currently on screen
    pub screen: Arc<dyn ScreenTracker>,
}

/// A send that failed and can be retried as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSend {
    /// Intended recipient
    pub partner: UserId,
    /// Message text
    pub content: String,
    /// Why it failed
    pub error: SyncError,
}

/// Events for the host application, drained with
/// [`ChatService::take_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// Connection state changed.
    ConnectionStateChanged(ConnectionState),
    /// A conversation's cached messages changed.
    ConversationUpdated {
        /// Partner whose conversation changed
        partner: UserId,
    },
    /// Total unread count changed.
    UnreadChanged {
        /// New total
        total: usize,
    },
    /// A partner went online or offline.
    PresenceChanged {
        /// Partner
        user: UserId,
        /// New status
        online: bool,
    },
    /// A partner started or stopped typing.
    TypingChanged {
        /// Partner
        user: UserId,
        /// Typing now
        typing: bool,
    },
    /// Presence and typing sets were cleared.
    EphemeralReset,
    /// A notification was shown or updated.
    NotificationShown(NotificationRecord),
    /// A notification was removed.
    NotificationDismissed(NotificationId),
    /// The server says the partner list changed; refetch it.
    PartnerListStale,
    /// An optimistic send failed and was rolled back.
    SendFailed(FailedSend),
    /// Every per-identity cache was cleared.
    IdentityCleared {
        /// Identity whose state was cleared
        identity: UserId,
    },
}

/// A queued transport callback.
#[derive(Debug)]
pub struct Inbound {
    generation: u64,
    signal: Signal,
}

#[derive(Debug)]
enum Signal {
    Event { kind: InboundKind, args: Vec<Value> },
    Lifecycle(LifecycleEvent),
}

/// What woke the service up.
#[derive(Debug)]
pub enum Wakeup {
    /// A transport callback is ready.
    Inbound(Inbound),
    /// A timer deadline passed.
    Timer,
}

/// Chat service.
///
/// # Type Parameters
///
/// - `T`: Real-time transport
/// - `E`: Environment providing time and randomness
pub struct ChatService<T, E: Environment> {
    transport: T,
    env: E,
    collaborators: Collaborators,
    config: SyncConfig,
    session: Option<Session>,
    connection: Connection<E::Instant>,
    cache: MessageCache,
    notifier: Notifier<E::Instant>,
    presence: BTreeSet<UserId>,
    typing: BTreeSet<UserId>,
    detachers: Vec<Detach>,
    generation: u64,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    presented: Option<(NotificationId, String)>,
    next_local_id: u64,
    last_unread: usize,
    events: Vec<ServiceEvent>,
}

impl<T: Transport, E: Environment> ChatService<T, E> {
    /// Create a stopped service with no session.
    ///
    /// # Errors
    ///
    /// - `SyncError::Configuration` if `config` fails validation
    pub fn new(
        transport: T,
        env: E,
        collaborators: Collaborators,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        // Random base so ids from an earlier instance never alias
        let next_local_id = env.random_u64() >> 16;

        Ok(Self {
            connection: Connection::new(config.connection.clone()),
            notifier: Notifier::new(config.notifier.clone()),
            transport,
            env,
            collaborators,
            config,
            session: None,
            cache: MessageCache::new(),
            presence: BTreeSet::new(),
            typing: BTreeSet::new(),
            detachers: Vec::new(),
            generation: 0,
            inbound_tx,
            inbound_rx,
            presented: None,
            next_local_id,
            last_unread: 0,
            events: Vec::new(),
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Active session.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Active identity.
    pub fn identity(&self) -> Option<&UserId> {
        self.session.as_ref().map(Session::identity)
    }

    /// Connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Retries scheduled since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.connection.attempts()
    }

    /// Instant of the last heartbeat response.
    pub fn last_heartbeat_ack(&self) -> Option<E::Instant> {
        self.connection.last_heartbeat_ack()
    }

    /// Message cache and derived views.
    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    /// Partners currently online.
    pub fn presence(&self) -> &BTreeSet<UserId> {
        &self.presence
    }

    /// Partners currently typing.
    pub fn typing(&self) -> &BTreeSet<UserId> {
        &self.typing
    }

    /// The visible notification.
    pub fn visible_notification(&self) -> Option<&NotificationRecord> {
        self.notifier.visible()
    }

    /// Live dedup entries.
    pub fn dedup_entries(&self) -> usize {
        self.notifier.dedup_entries()
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Drain accumulated events.
    pub fn take_events(&mut self) -> Vec<ServiceEvent> {
        std::mem::take(&mut self.events)
    }

    /// Adopt `session` and start the connection for it.
    ///
    /// A different identity first tears down everything held for the
    /// current one, so the new identity connects on a fresh channel. The
    /// same identity with a new credential only replaces the credential.
    ///
    /// # Errors
    ///
    /// See [`ChatService::start`].
    pub async fn begin_session(&mut self, session: Session) -> Result<(), SyncError> {
        if let Some(current) = &self.session
            && current.identity() != session.identity()
        {
            tracing::info!(from = %current.identity(), to = %session.identity(), "identity change");
            self.teardown().await;
        }
        self.cache.bind(session.identity());
        self.session = Some(session);
        self.start().await
    }

    /// Use a new credential for subsequent connects. Ignored if the identity
    /// differs from the active one.
    pub fn refresh_credential(&mut self, session: Session) {
        match &self.session {
            Some(current) if current.identity() == session.identity() => {
                self.session = Some(session);
            },
            _ => {
                tracing::warn!(identity = %session.identity(), "credential refresh ignored");
            },
        }
    }

    /// Open the channel. Guarded no-op while already active.
    ///
    /// # Errors
    ///
    /// - `SyncError::Configuration` if no session is set
    /// - `SyncError::ReconnectExhausted` if the connection is Failed
    pub async fn start(&mut self) -> Result<(), SyncError> {
        let actions = self.connection.start(self.session.as_ref())?;
        if let Some(session) = &self.session {
            self.cache.bind(session.identity());
        }
        self.execute(actions).await;
        Ok(())
    }

    /// Tear the channel down. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        let actions = self.connection.stop();
        self.execute(actions).await;
    }

    /// Full stop then start, resetting the retry budget.
    ///
    /// # Errors
    ///
    /// - `SyncError::Configuration` if no session is set
    pub async fn reconnect(&mut self) -> Result<(), SyncError> {
        let actions = self.connection.reconnect(self.session.as_ref())?;
        self.execute(actions).await;
        Ok(())
    }

    /// Stop and clear every per-identity cache and the on-screen
    /// conversation, then forget the session.
    pub async fn teardown(&mut self) {
        self.stop().await;

        let dismissals = self.notifier.clear();
        self.present(dismissals);
        self.cache.clear();
        self.presence.clear();
        self.typing.clear();
        self.collaborators.screen.set_active_conversation(None);
        self.unread_changed();

        if let Some(session) = self.session.take() {
            tracing::info!(identity = %session.identity(), "identity state cleared");
            let identity = session.identity().clone();
            self.events.push(ServiceEvent::IdentityCleared { identity });
        }
    }

    /// Send a message. Does not touch the cache.
    ///
    /// # Errors
    ///
    /// - `SyncError::EmptyContent` if `content` is blank
    /// - `SyncError::Configuration` if no identity is active
    /// - `SyncError::ConnectionUnavailable` unless Connected
    /// - `SyncError::Transport` if the server rejects the send
    pub async fn send_message(&self, receiver: &UserId, content: &str) -> Result<(), SyncError> {
        if content.trim().is_empty() {
            return Err(SyncError::EmptyContent);
        }
        if self.session.is_none() {
            return Err(SyncError::Configuration("no active identity".to_string()));
        }

        let call = OutboundCall::SendMessage {
            receiver_id: receiver.clone(),
            content: content.to_string(),
        };
        self.invoke(call).await.inspect_err(|err| {
            tracing::warn!(partner = %receiver, error = %err, "send rejected");
        })
    }

    /// Send with an optimistic cache entry.
    ///
    /// The provisional entry is appended before the send. On success the
    /// conversation is refetched (page 1) so canonical data replaces it; on
    /// failure exactly that entry is removed, `SendFailed` is emitted and
    /// the error is returned.
    ///
    /// # Errors
    ///
    /// Same as [`ChatService::send_message`].
    pub async fn send_message_optimistic(
        &mut self,
        receiver: &UserId,
        content: &str,
    ) -> Result<(), SyncError> {
        if content.trim().is_empty() {
            return Err(SyncError::EmptyContent);
        }
        let Some(me) = self.identity().cloned() else {
            return Err(SyncError::Configuration("no active identity".to_string()));
        };

        let local_id = self.next_local_id;
        self.next_local_id = self.next_local_id.wrapping_add(1);
        let sent_at = self.env.wall_clock();
        let provisional =
            ChatMessage::provisional(local_id, me, receiver.clone(), content, sent_at);
        if let Some(partner) = self.cache.append_optimistic(provisional) {
            self.conversation_changed(partner);
        }

        match self.send_message(receiver, content).await {
            Ok(()) => {
                if let Err(err) = self.load_history(receiver, 1).await {
                    tracing::warn!(partner = %receiver, error = %err, "refetch after send failed");
                }
                Ok(())
            },
            Err(err) => {
                if self.cache.rollback(receiver, local_id) {
                    self.conversation_changed(receiver.clone());
                }
                self.events.push(ServiceEvent::SendFailed(FailedSend {
                    partner: receiver.clone(),
                    content: content.to_string(),
                    error: err.clone(),
                }));
                Err(err)
            },
        }
    }

    /// Re-send a failed message.
    ///
    /// # Errors
    ///
    /// Same as [`ChatService::send_message_optimistic`].
    pub async fn retry_send(&mut self, failed: &FailedSend) -> Result<(), SyncError> {
        self.send_message_optimistic(&failed.partner, &failed.content).await
    }

    /// Announce typing. Best-effort.
    pub async fn start_typing(&self, receiver: &UserId) {
        self.best_effort(OutboundCall::StartTyping { receiver_id: receiver.clone() }).await;
    }

    /// Announce typing stopped. Best-effort.
    pub async fn stop_typing(&self, receiver: &UserId) {
        self.best_effort(OutboundCall::StopTyping { receiver_id: receiver.clone() }).await;
    }

    /// Mark `sender`'s messages read locally, then tell the server.
    /// Best-effort.
    pub async fn mark_messages_as_read(&mut self, sender: &UserId) {
        if self.cache.mark_conversation_read(sender) {
            self.conversation_changed(sender.clone());
        }
        self.best_effort(OutboundCall::MarkMessagesAsRead { sender_id: sender.clone() }).await;
    }

    /// Ask for `user`'s presence. The answer arrives as an inbound event.
    pub async fn check_presence(&self, user: &UserId) {
        self.best_effort(OutboundCall::CheckOnlineStatus { user_id: user.clone() }).await;
    }

    /// Ask for the unread summary. The answer arrives as an inbound event.
    pub async fn request_unread_summary(&self) {
        self.best_effort(OutboundCall::GetUnreadSummary).await;
    }

    /// Ask for the unread count. The answer arrives as an inbound event.
    pub async fn request_unread_count(&self) {
        self.best_effort(OutboundCall::GetUnreadCount).await;
    }

    /// Fetch and merge one history page for `partner`.
    ///
    /// # Errors
    ///
    /// - `SyncError::Configuration` if no identity is active
    /// - `SyncError::History` if the history source fails
    pub async fn load_history(&mut self, partner: &UserId, page: u32) -> Result<(), SyncError> {
        let Some(owner) = self.identity().cloned() else {
            return Err(SyncError::Configuration("no active identity".to_string()));
        };
        let messages = self
            .collaborators
            .history
            .fetch_messages(&owner, partner, page)
            .await
            .map_err(|err| SyncError::History(err.to_string()))?;

        tracing::debug!(%partner, page, count = messages.len(), "history page merged");
        self.cache.merge_page(partner, page, messages);
        self.conversation_changed(partner.clone());
        Ok(())
    }

    /// Register a notification request with the facade.
    pub fn show_notification(
        &mut self,
        request: NotificationRequest,
        source: NotificationSource,
    ) -> ShowOutcome {
        let active = self.collaborators.screen.active_conversation();
        let ctx = ShowContext {
            source,
            active_conversation: active.as_deref(),
            now: self.env.now(),
            wall: self.env.wall_clock(),
        };
        let (outcome, actions) = self.notifier.show(request, ctx);
        self.present(actions);
        outcome
    }

    /// Dismiss the visible notification early.
    pub fn dismiss_notification(&mut self, id: NotificationId) {
        let actions = self.notifier.dismiss(id);
        self.present(actions);
    }

    /// Set or clear the conversation on screen.
    pub fn set_active_conversation(&self, conversation: Option<String>) {
        self.collaborators.screen.set_active_conversation(conversation);
    }

    /// Earliest timer deadline across connection and notifier.
    pub fn next_deadline(&self) -> Option<E::Instant> {
        match (self.connection.next_deadline(), self.notifier.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Wait for the next callback or timer. Cancel-safe.
    pub async fn next_wakeup(&mut self) -> Wakeup {
        let deadline = self.next_deadline();
        let env = self.env.clone();
        let timer = async move {
            match deadline {
                Some(at) => env.sleep(env.now().until(at)).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            Some(inbound) = self.inbound_rx.recv() => Wakeup::Inbound(inbound),
            () = timer => Wakeup::Timer,
        }
    }

    /// Apply one wakeup.
    pub async fn handle_wakeup(&mut self, wakeup: Wakeup) {
        match wakeup {
            Wakeup::Inbound(inbound) => self.handle_inbound(inbound).await,
            Wakeup::Timer => self.fire_timers().await,
        }
    }

    /// Wait for and apply the next wakeup.
    pub async fn poll(&mut self) {
        let wakeup = self.next_wakeup().await;
        self.handle_wakeup(wakeup).await;
    }

    /// Apply every queued callback and every due timer without waiting.
    pub async fn process_pending(&mut self) {
        while let Ok(inbound) = self.inbound_rx.try_recv() {
            self.handle_inbound(inbound).await;
        }
        self.fire_timers().await;
    }

    async fn execute(&mut self, actions: Vec<ConnectionAction>) {
        let mut pending: VecDeque<ConnectionAction> = actions.into();

        while let Some(action) = pending.pop_front() {
            match action {
                ConnectionAction::AttachHandlers => self.attach_handlers(),
                ConnectionAction::Connect { attempt } => {
                    let follow_up = self.connect(attempt).await;
                    pending.extend(follow_up);
                },
                ConnectionAction::SendHeartbeat => self.best_effort(OutboundCall::Heartbeat).await,
                ConnectionAction::RequestUnreadSummary => {
                    self.best_effort(OutboundCall::GetUnreadSummary).await;
                },
                ConnectionAction::ResetEphemeral => self.reset_ephemeral(),
                ConnectionAction::RetryScheduled { attempt, delay } => {
                    tracing::debug!(attempt, ?delay, "waiting to retry");
                },
                ConnectionAction::DetachHandlers => self.detach_handlers(),
                ConnectionAction::CloseTransport => {
                    if let Err(err) = self.transport.close().await {
                        tracing::debug!(error = %err, "transport close failed");
                    }
                },
                ConnectionAction::StateChanged(state) => {
                    self.events.push(ServiceEvent::ConnectionStateChanged(state));
                },
            }
        }
    }

    async fn connect(&mut self, attempt: u32) -> Vec<ConnectionAction> {
        let Some(credential) = self.session.as_ref().map(|s| s.credential().clone()) else {
            return self.connection.connection_lost(self.env.now());
        };

        match self.transport.connect(&credential).await {
            Ok(()) => {
                tracing::info!(attempt, "connected");
                self.connection.connect_succeeded(self.env.now())
            },
            Err(err) => {
                tracing::warn!(attempt, error = %err, "connect failed");
                self.connection.connection_lost(self.env.now())
            },
        }
    }

    fn attach_handlers(&mut self) {
        let generation = self.generation;

        for kind in InboundKind::ALL {
            let tx = self.inbound_tx.clone();
            let handler: InboundHandler = Arc::new(move |args| {
                let inbound = Inbound { generation, signal: Signal::Event { kind, args } };
                if tx.send(inbound).is_err() {
                    tracing::trace!(event = kind.event_name(), "service gone, event dropped");
                }
            });
            self.detachers.push(self.transport.on(kind.event_name(), handler));
        }

        let tx = self.inbound_tx.clone();
        let lifecycle: LifecycleHandler = Arc::new(move |event| {
            if tx.send(Inbound { generation, signal: Signal::Lifecycle(event) }).is_err() {
                tracing::trace!("service gone, lifecycle event dropped");
            }
        });
        self.detachers.push(self.transport.on_lifecycle(lifecycle));

        tracing::debug!(handlers = self.detachers.len(), generation, "handlers attached");
    }

    fn detach_handlers(&mut self) {
        let count = self.detachers.len();
        for detach in self.detachers.drain(..) {
            detach.detach();
        }
        self.generation += 1;

        // Anything still queued belongs to the old subscription
        while self.inbound_rx.try_recv().is_ok() {}
        tracing::debug!(handlers = count, "handlers detached");
    }

    fn gate(&self, operation: &'static str) -> Result<(), SyncError> {
        self.connection.ensure_connected(operation)?;
        let state = match self.transport.state() {
            TransportState::Connected => return Ok(()),
            TransportState::Disconnected => ConnectionState::Disconnected,
            TransportState::Connecting => ConnectionState::Connecting,
            TransportState::Reconnecting => ConnectionState::Reconnecting,
        };
        Err(SyncError::ConnectionUnavailable { state, operation })
    }

    /// Gate and invoke `call`. Failures of best-effort calls are logged and
    /// reported as success; the rest propagate.
    async fn invoke(&self, call: OutboundCall) -> Result<(), SyncError> {
        let method = call.method();
        let outcome = match self.gate(method) {
            Ok(()) => self.transport.invoke(method, call.args()).await.map(drop).map_err(SyncError::from),
            Err(err) => Err(err),
        };

        match outcome {
            Err(err @ SyncError::ConnectionUnavailable { .. }) if call.is_best_effort() => {
                tracing::debug!(method, error = %err, "best-effort call skipped");
                Ok(())
            },
            Err(err) if call.is_best_effort() => {
                tracing::warn!(method, error = %err, "best-effort call failed");
                Ok(())
            },
            outcome => outcome,
        }
    }

    async fn best_effort(&self, call: OutboundCall) {
        if let Err(err) = self.invoke(call).await {
            tracing::warn!(error = %err, "call failed");
        }
    }

    async fn fire_timers(&mut self) {
        let now = self.env.now();
        let actions = self.connection.tick(now);
        self.execute(actions).await;
        let notifications = self.notifier.tick(now);
        self.present(notifications);
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        if inbound.generation != self.generation {
            tracing::debug!(generation = inbound.generation, "stale callback dropped");
            return;
        }

        match inbound.signal {
            Signal::Lifecycle(event) => self.handle_lifecycle(event).await,
            Signal::Event { kind, args } => {
                match InboundEvent::parse(kind, &args, self.env.wall_clock()) {
                    Ok(event) => self.dispatch(event),
                    Err(err) => {
                        tracing::warn!(event = kind.event_name(), error = %err, "payload dropped");
                    },
                }
            },
        }
    }

    async fn handle_lifecycle(&mut self, event: LifecycleEvent) {
        let now = self.env.now();
        let actions = match event {
            LifecycleEvent::Closed { error } => {
                tracing::warn!(error = error.as_deref().unwrap_or("none"), "transport closed");
                self.connection.connection_lost(now)
            },
            LifecycleEvent::Reconnecting => self.connection.transport_reconnecting(),
            LifecycleEvent::Reconnected => self.connection.transport_reconnected(now),
        };
        self.execute(actions).await;
    }

    fn dispatch(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::MessageReceived(message) | InboundEvent::MessageSent(message) => {
                if let Some(partner) = self.cache.apply_inbound(message) {
                    tracing::debug!(%partner, "message applied");
                    self.conversation_changed(partner);
                }
            },
            InboundEvent::MessagesRead { reader_id } => {
                if !self.is_self(&reader_id) && self.cache.mark_read_by(&reader_id) {
                    self.conversation_changed(reader_id);
                }
            },
            InboundEvent::UnreadChanged => {
                self.cache.recompute();
                self.unread_changed();
            },
            InboundEvent::PartnersUpdated => self.events.push(ServiceEvent::PartnerListStale),
            InboundEvent::NewMessageNotification(notice) => self.handle_notice(notice),
            InboundEvent::UserStatusChanged { user_id, online } => {
                if self.is_self(&user_id) {
                    return;
                }
                let changed = if online {
                    self.presence.insert(user_id.clone())
                } else {
                    self.presence.remove(&user_id)
                };
                if changed {
                    self.events.push(ServiceEvent::PresenceChanged { user: user_id, online });
                }
            },
            InboundEvent::TypingStarted { user_id } => self.set_typing(user_id, true),
            InboundEvent::TypingStopped { user_id } => self.set_typing(user_id, false),
            InboundEvent::HeartbeatResponse => {
                self.connection.heartbeat_acknowledged(self.env.now());
            },
            InboundEvent::ConnectionEstablished { connection_id } => {
                let connection_id = connection_id.as_deref().unwrap_or("-");
                tracing::info!(connection_id, "server greeting");
            },
        }
    }

    fn handle_notice(&mut self, notice: MessageNotice) {
        let message = self.identity().and_then(|me| notice.to_message(me));
        if let Some(message) = message
            && let Some(partner) = self.cache.apply_inbound(message)
        {
            self.conversation_changed(partner);
        }

        let request = NotificationRequest {
            title: notice.sender_name.unwrap_or_else(|| DEFAULT_NOTICE_TITLE.to_string()),
            message: notice.content,
            data: NotificationData {
                message_id: notice.message_id,
                counterpart_id: Some(notice.sender_id),
                conversation_key: notice.conversation_key,
                extra: BTreeMap::new(),
            },
            duration: None,
        };
        self.show_notification(request, NotificationSource::Realtime);
    }

    fn set_typing(&mut self, user: UserId, typing: bool) {
        if self.is_self(&user) {
            return;
        }
        let changed =
            if typing { self.typing.insert(user.clone()) } else { self.typing.remove(&user) };
        if changed {
            self.events.push(ServiceEvent::TypingChanged { user, typing });
        }
    }

    fn reset_ephemeral(&mut self) {
        if self.presence.is_empty() && self.typing.is_empty() {
            return;
        }
        self.presence.clear();
        self.typing.clear();
        self.events.push(ServiceEvent::EphemeralReset);
    }

    fn present(&mut self, actions: Vec<NotifierAction>) {
        for action in actions {
            match action {
                NotifierAction::Present(record) => {
                    let handle = self.collaborators.presenter.present(&record);
                    self.presented = Some((record.id, handle));
                    self.events.push(ServiceEvent::NotificationShown(record));
                },
                NotifierAction::Dismiss(id) => {
                    match self.presented.take() {
                        Some((shown, handle)) if shown == id => {
                            self.collaborators.presenter.dismiss(&handle);
                        },
                        other => self.presented = other,
                    }
                    self.events.push(ServiceEvent::NotificationDismissed(id));
                },
            }
        }
    }

    fn conversation_changed(&mut self, partner: UserId) {
        self.events.push(ServiceEvent::ConversationUpdated { partner });
        self.unread_changed();
    }

    fn unread_changed(&mut self) {
        let total = self.cache.unread().total;
        if total != self.last_unread {
            self.last_unread = total;
            self.events.push(ServiceEvent::UnreadChanged { total });
        }
    }

    fn is_self(&self, user: &UserId) -> bool {
        self.identity() == Some(user)
    }
}
