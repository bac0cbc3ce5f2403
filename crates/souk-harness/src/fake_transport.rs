//! Scriptable in-process transport.
//!
//! Records every connect, invocation and subscription, and lets a test play
//! the server: emit named events, drive the lifecycle callbacks, fail
//! connects and reject methods.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use serde_json::Value;
use souk_client::{
    Detach, InboundHandler, LifecycleEvent, LifecycleHandler, Transport, TransportError,
    TransportState,
};
use souk_core::Credential;

/// One recorded hub invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Hub method
    pub method: String,
    /// Arguments as sent
    pub args: Vec<Value>,
}

struct Inner {
    state: TransportState,
    next_subscription: u64,
    handlers: BTreeMap<u64, (String, InboundHandler)>,
    lifecycle: BTreeMap<u64, LifecycleHandler>,
    failing_connects: u32,
    credentials: Vec<String>,
    rejections: BTreeMap<String, String>,
    invocations: Vec<Invocation>,
    closes: u32,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: TransportState::Disconnected,
            next_subscription: 0,
            handlers: BTreeMap::new(),
            lifecycle: BTreeMap::new(),
            failing_connects: 0,
            credentials: Vec::new(),
            rejections: BTreeMap::new(),
            invocations: Vec::new(),
            closes: 0,
        }
    }
}

/// In-process transport driven by the test.
///
/// Clones share state, so a test keeps one handle while the service owns
/// another.
#[derive(Clone, Default)]
pub struct FakeTransport {
    inner: Arc<Mutex<Inner>>,
}

impl FakeTransport {
    /// Disconnected transport with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().failing_connects = count;
    }

    /// Reject every invocation of `method` with `reason`.
    pub fn reject(&self, method: &str, reason: &str) {
        self.lock().rejections.insert(method.to_string(), reason.to_string());
    }

    /// Stop rejecting `method`.
    pub fn accept(&self, method: &str) {
        self.lock().rejections.remove(method);
    }

    /// Override the reported state without firing callbacks.
    pub fn set_state(&self, state: TransportState) {
        self.lock().state = state;
    }

    /// Deliver a server event to every handler registered for `event`
    /// (matched case-insensitively). Returns how many handlers ran.
    pub fn emit(&self, event: &str, args: Vec<Value>) -> usize {
        let handlers: Vec<InboundHandler> = self
            .lock()
            .handlers
            .values()
            .filter(|(name, _)| name.eq_ignore_ascii_case(event))
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in &handlers {
            handler(args.clone());
        }
        handlers.len()
    }

    /// Deliver a lifecycle callback to every lifecycle subscriber.
    pub fn emit_lifecycle(&self, event: &LifecycleEvent) -> usize {
        let handlers: Vec<LifecycleHandler> = self.lock().lifecycle.values().cloned().collect();
        for handler in &handlers {
            handler(event.clone());
        }
        handlers.len()
    }

    /// The channel closes and will not come back on its own.
    pub fn drop_connection(&self, error: &str) {
        self.set_state(TransportState::Disconnected);
        self.emit_lifecycle(&LifecycleEvent::Closed { error: Some(error.to_string()) });
    }

    /// The transport starts its own reconnect.
    pub fn begin_reconnect(&self) {
        self.set_state(TransportState::Reconnecting);
        self.emit_lifecycle(&LifecycleEvent::Reconnecting);
    }

    /// The transport's own reconnect succeeds.
    pub fn finish_reconnect(&self) {
        self.set_state(TransportState::Connected);
        self.emit_lifecycle(&LifecycleEvent::Reconnected);
    }

    /// Live subscriptions, inbound and lifecycle.
    pub fn handler_count(&self) -> usize {
        let inner = self.lock();
        inner.handlers.len() + inner.lifecycle.len()
    }

    /// Live subscriptions for `event`.
    pub fn handlers_for(&self, event: &str) -> usize {
        self.lock().handlers.values().filter(|(name, _)| name.eq_ignore_ascii_case(event)).count()
    }

    /// Every invocation so far.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.lock().invocations.clone()
    }

    /// Invocations of `method` so far.
    pub fn invocations_of(&self, method: &str) -> Vec<Invocation> {
        self.lock().invocations.iter().filter(|call| call.method == method).cloned().collect()
    }

    /// Forget recorded invocations.
    pub fn clear_invocations(&self) {
        self.lock().invocations.clear();
    }

    /// Connect attempts so far.
    pub fn connect_count(&self) -> usize {
        self.lock().credentials.len()
    }

    /// Credential used by the latest connect attempt.
    pub fn last_credential(&self) -> Option<String> {
        self.lock().credentials.last().cloned()
    }

    /// `close` calls so far.
    pub fn close_count(&self) -> u32 {
        self.lock().closes
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, credential: &Credential) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.credentials.push(credential.expose().to_string());

        if inner.failing_connects > 0 {
            inner.failing_connects -= 1;
            inner.state = TransportState::Disconnected;
            return Err(TransportError::Connection("scripted connect failure".to_string()));
        }
        inner.state = TransportState::Connected;
        Ok(())
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, TransportError> {
        let mut inner = self.lock();
        inner.invocations.push(Invocation { method: method.to_string(), args });

        if inner.state != TransportState::Connected {
            return Err(TransportError::Closed);
        }
        match inner.rejections.get(method) {
            Some(reason) => {
                Err(TransportError::Rejected { method: method.to_string(), reason: reason.clone() })
            },
            None => Ok(Value::Null),
        }
    }

    fn on(&self, event: &str, handler: InboundHandler) -> Detach {
        let mut inner = self.lock();
        let id = inner.next_subscription;
        inner.next_subscription += 1;
        inner.handlers.insert(id, (event.to_string(), handler));

        let shared = Arc::clone(&self.inner);
        Detach::new(move || {
            shared.lock().unwrap_or_else(PoisonError::into_inner).handlers.remove(&id);
        })
    }

    fn on_lifecycle(&self, handler: LifecycleHandler) -> Detach {
        let mut inner = self.lock();
        let id = inner.next_subscription;
        inner.next_subscription += 1;
        inner.lifecycle.insert(id, handler);

        let shared = Arc::clone(&self.inner);
        Detach::new(move || {
            shared.lock().unwrap_or_else(PoisonError::into_inner).lifecycle.remove(&id);
        })
    }

    fn state(&self) -> TransportState {
        self.lock().state
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.closes += 1;
        inner.state = TransportState::Disconnected;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn detach_removes_only_its_subscription() {
        let transport = FakeTransport::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let first = transport.on(
            "ReceiveMessage",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let _second = transport.on("receivemessage", Arc::new(|_| {}));
        assert_eq!(transport.emit("ReceiveMessage", Vec::new()), 2);

        first.detach();
        assert_eq!(transport.emit("ReceiveMessage", Vec::new()), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(transport.handler_count(), 1);
    }

    #[tokio::test]
    async fn scripted_connect_failures_are_consumed() {
        let transport = FakeTransport::new();
        transport.fail_next_connects(1);

        assert!(transport.connect(&Credential::new("t")).await.is_err());
        assert!(transport.connect(&Credential::new("t")).await.is_ok());
        assert_eq!(transport.state(), TransportState::Connected);
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test]
    async fn rejected_methods_fail_until_accepted() {
        let transport = FakeTransport::new();
        transport.connect(&Credential::new("t")).await.unwrap();
        transport.reject("SendMessage", "blocked");

        assert!(matches!(
            transport.invoke("SendMessage", Vec::new()).await,
            Err(TransportError::Rejected { .. })
        ));
        transport.accept("SendMessage");
        assert!(transport.invoke("SendMessage", Vec::new()).await.is_ok());
        assert_eq!(transport.invocations_of("SendMessage").len(), 2);
    }
}
