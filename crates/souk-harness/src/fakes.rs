//! In-memory collaborators: presenter, persisted store, history source.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use souk_client::{HistoryError, HistorySource, KeyValueStore, Presenter, StoreError};
use souk_core::{ChatMessage, NotificationRecord, UserId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct PresenterLog {
    shown: BTreeMap<String, NotificationRecord>,
    presented: Vec<NotificationRecord>,
    dismissed: Vec<String>,
}

/// Presenter that records what it was asked to show.
#[derive(Debug, Clone, Default)]
pub struct RecordingPresenter {
    log: Arc<Mutex<PresenterLog>>,
}

impl RecordingPresenter {
    /// Nothing shown yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records currently on screen.
    pub fn on_screen(&self) -> Vec<NotificationRecord> {
        lock(&self.log).shown.values().cloned().collect()
    }

    /// Every `present` call, including in-place updates.
    pub fn presented(&self) -> Vec<NotificationRecord> {
        lock(&self.log).presented.clone()
    }

    /// Handles dismissed so far.
    pub fn dismissed(&self) -> Vec<String> {
        lock(&self.log).dismissed.clone()
    }
}

impl Presenter for RecordingPresenter {
    fn present(&self, record: &NotificationRecord) -> String {
        let handle = format!("toast-{}", record.id.0);
        let mut log = lock(&self.log);
        log.shown.insert(handle.clone(), record.clone());
        log.presented.push(record.clone());
        handle
    }

    fn dismiss(&self, handle: &str) {
        let mut log = lock(&self.log);
        log.shown.remove(handle);
        log.dismissed.push(handle.to_string());
    }
}

/// Key-value store backed by a map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every key currently stored.
    pub fn keys(&self) -> Vec<String> {
        lock(&self.entries).keys().cloned().collect()
    }

    /// Write a key directly, bypassing the async interface.
    pub fn seed(&self, key: &str, value: &str) {
        lock(&self.entries).insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.seed(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        lock(&self.entries).retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct HistoryLog {
    conversations: BTreeMap<(UserId, UserId), Vec<ChatMessage>>,
    failing_fetches: u32,
    fetches: u32,
}

/// Server-side message history with fixed-size pages, newest page first.
#[derive(Debug, Clone)]
pub struct FakeHistory {
    log: Arc<Mutex<HistoryLog>>,
    page_size: usize,
}

impl FakeHistory {
    /// Empty history paged by `page_size`.
    pub fn new(page_size: usize) -> Self {
        Self { log: Arc::default(), page_size: page_size.max(1) }
    }

    fn key(a: &UserId, b: &UserId) -> (UserId, UserId) {
        if a <= b { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) }
    }

    /// Store a message as the server would after accepting it.
    pub fn record(&self, message: ChatMessage) {
        let key = Self::key(&message.sender_id, &message.receiver_id);
        let mut log = lock(&self.log);
        let conversation = log.conversations.entry(key).or_default();
        conversation.push(message);
        conversation.sort_by_key(|m| m.sent_at);
    }

    /// Make the next `count` fetches fail.
    pub fn fail_next_fetches(&self, count: u32) {
        lock(&self.log).failing_fetches = count;
    }

    /// Fetches served or failed so far.
    pub fn fetch_count(&self) -> u32 {
        lock(&self.log).fetches
    }
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn fetch_messages(
        &self,
        owner: &UserId,
        partner: &UserId,
        page: u32,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        let mut log = lock(&self.log);
        log.fetches += 1;
        if log.failing_fetches > 0 {
            log.failing_fetches -= 1;
            return Err(HistoryError("scripted history failure".to_string()));
        }

        let Some(all) = log.conversations.get(&Self::key(owner, partner)) else {
            return Ok(Vec::new());
        };
        let skip = (page.max(1) as usize - 1) * self.page_size;
        let end = all.len().saturating_sub(skip);
        let start = end.saturating_sub(self.page_size);
        Ok(all[start..end].to_vec())
    }
}
