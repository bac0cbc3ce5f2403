//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture what a host could observe of a service at one point in
//! time. Invariants run against snapshots rather than live state, so every
//! check sees one consistent view.

use std::collections::BTreeMap;

use souk_client::ChatService;
use souk_core::{ChatMessage, ConnectionState, Environment, NotificationRecord, UserId};

use crate::{fake_transport::FakeTransport, fakes::RecordingPresenter};

/// Snapshot of every simulated client.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-client snapshots.
    pub clients: Vec<ClientSnapshot>,
}

impl SystemSnapshot {
    /// No clients.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A single client.
    pub fn single(client: ClientSnapshot) -> Self {
        Self { clients: vec![client] }
    }

    /// Add a client snapshot.
    pub fn add_client(&mut self, client: ClientSnapshot) {
        self.clients.push(client);
    }
}

/// Observable state of one service and its fakes.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    /// Label used in violation messages.
    pub label: String,
    /// Active identity.
    pub identity: Option<UserId>,
    /// Identity the message cache is bound to.
    pub cache_owner: Option<UserId>,
    /// Cached conversations, keyed by partner.
    pub conversations: BTreeMap<UserId, Vec<ChatMessage>>,
    /// Unread total as reported by the cache.
    pub unread_total: usize,
    /// Partner summary count.
    pub partner_count: usize,
    /// Online partners.
    pub presence: usize,
    /// Typing partners.
    pub typing: usize,
    /// Notification the service considers visible.
    pub visible: Option<NotificationRecord>,
    /// Records the presenter has on screen.
    pub presenter_on_screen: usize,
    /// Live dedup entries.
    pub dedup_entries: usize,
    /// Connection state.
    pub state: ConnectionState,
    /// Retries scheduled since the last successful connect.
    pub reconnect_attempts: u32,
    /// Configured retry budget.
    pub max_reconnect_attempts: u32,
    /// Live transport subscriptions.
    pub subscriptions: usize,
}

impl ClientSnapshot {
    /// Capture `service` together with the presenter it reports to.
    pub fn capture<E: Environment>(
        label: impl Into<String>,
        service: &ChatService<FakeTransport, E>,
        presenter: &RecordingPresenter,
    ) -> Self {
        let cache = service.cache();
        Self {
            label: label.into(),
            identity: service.identity().cloned(),
            cache_owner: cache.owner().cloned(),
            conversations: cache
                .conversations()
                .map(|(partner, messages)| (partner.clone(), messages.to_vec()))
                .collect(),
            unread_total: cache.unread().total,
            partner_count: cache.partners().len(),
            presence: service.presence().len(),
            typing: service.typing().len(),
            visible: service.visible_notification().cloned(),
            presenter_on_screen: presenter.on_screen().len(),
            dedup_entries: service.dedup_entries(),
            state: service.state(),
            reconnect_attempts: service.reconnect_attempts(),
            max_reconnect_attempts: service.config().connection.max_reconnect_attempts,
            subscriptions: service.transport().handler_count(),
        }
    }
}
