//! Real-time transport seam.
//!
//! The transport library itself is external. The service only needs the
//! capabilities below: connect, invoke a hub method, subscribe to a named
//! event (getting back a detach function), read the current state, and
//! receive lifecycle callbacks.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use souk_core::{Credential, SyncError};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Opening the channel failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The server rejected an invocation.
    #[error("invocation of {method} rejected: {reason}")]
    Rejected {
        /// Hub method that was invoked
        method: String,
        /// Server or transport message
        reason: String,
    },

    /// The channel is closed.
    #[error("transport closed")]
    Closed,
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        SyncError::Transport(err.to_string())
    }
}

/// Connection state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Not connected.
    Disconnected,
    /// Connect in progress.
    Connecting,
    /// Connected.
    Connected,
    /// Transport-driven reconnect in progress.
    Reconnecting,
}

/// Lifecycle callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The channel closed and the transport will not reconnect on its own.
    Closed {
        /// Close reason, if any
        error: Option<String>,
    },
    /// The transport started reconnecting on its own.
    Reconnecting,
    /// The transport reconnected on its own.
    Reconnected,
}

/// Callback for a named inbound event.
pub type InboundHandler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Callback for lifecycle events.
pub type LifecycleHandler = Arc<dyn Fn(LifecycleEvent) + Send + Sync>;

/// Detach function returned by a subscription. Call it exactly once.
pub struct Detach(Box<dyn FnOnce() + Send + Sync>);

impl Detach {
    /// Wrap a detach closure.
    pub fn new(f: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Remove the subscription.
    pub fn detach(self) {
        (self.0)();
    }
}

impl fmt::Debug for Detach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Detach")
    }
}

/// Real-time transport capability.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the channel with `credential`.
    async fn connect(&self, credential: &Credential) -> Result<(), TransportError>;

    /// Invoke a hub method.
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, TransportError>;

    /// Subscribe to a named inbound event.
    fn on(&self, event: &str, handler: InboundHandler) -> Detach;

    /// Subscribe to lifecycle callbacks.
    fn on_lifecycle(&self, handler: LifecycleHandler) -> Detach;

    /// Current state.
    fn state(&self) -> TransportState;

    /// Close the channel.
    async fn close(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[test]
    fn detach_runs_its_closure() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        Detach::new(move || flag.store(true, Ordering::SeqCst)).detach();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn transport_error_converts_to_sync_error() {
        let err: SyncError =
            TransportError::Rejected { method: "SendMessage".into(), reason: "blocked".into() }
                .into();
        assert!(matches!(err, SyncError::Transport(ref msg) if msg.contains("SendMessage")));
        assert!(err.is_retryable());
    }
}
