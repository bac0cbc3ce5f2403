//! Collaborator seams: presenter, history source, persisted store, screen
//! context.
//!
//! The core renders nothing and persists nothing. These traits are the only
//! way it reaches the host application.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use souk_core::{ChatMessage, NotificationRecord, UserId};
use thiserror::Error;

/// Shows and removes transient notifications.
pub trait Presenter: Send + Sync {
    /// Show `record`, or update it in place if its id is already shown.
    /// Returns the presenter's own handle.
    fn present(&self, record: &NotificationRecord) -> String;

    /// Remove the notification behind `handle`.
    fn dismiss(&self, handle: &str);
}

/// History fetch failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("history unavailable: {0}")]
pub struct HistoryError(pub String);

/// Paged message history, newest page first.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch page `page` (1 = newest) of the conversation between `owner`
    /// and `partner`.
    async fn fetch_messages(
        &self,
        owner: &UserId,
        partner: &UserId,
        page: u32,
    ) -> Result<Vec<ChatMessage>, HistoryError>;
}

/// Persisted store failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

/// Opaque persisted key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a key.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a key.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Delete every key starting with `prefix`.
    async fn clear_prefix(&self, prefix: &str) -> Result<(), StoreError>;
}

/// Conversation currently on screen.
pub trait ScreenTracker: Send + Sync {
    /// Active conversation key, if one is on screen.
    fn active_conversation(&self) -> Option<String>;

    /// Set or clear the active conversation.
    fn set_active_conversation(&self, conversation: Option<String>);
}

/// In-process screen tracker shared between the UI and the service.
#[derive(Debug, Clone, Default)]
pub struct SharedScreen {
    active: Arc<Mutex<Option<String>>>,
}

impl SharedScreen {
    /// Nothing on screen.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScreenTracker for SharedScreen {
    fn active_conversation(&self) -> Option<String> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_active_conversation(&self, conversation: Option<String>) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = conversation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_screen_clones_see_the_same_value() {
        let ui = SharedScreen::new();
        let service_view = ui.clone();

        ui.set_active_conversation(Some("listing-9_seller-2".into()));
        assert_eq!(service_view.active_conversation().as_deref(), Some("listing-9_seller-2"));

        service_view.set_active_conversation(None);
        assert_eq!(ui.active_conversation(), None);
    }
}
