//! Error types for the Souk sync core.
//!
//! One taxonomy for every layer: configuration problems surface immediately,
//! connection gating and transport rejections surface to user-initiated
//! operations, and an exhausted reconnect budget is a persistent state that
//! only an explicit reconnect clears.

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors produced by the sync core and its runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Missing or invalid credential, identity, or configuration value.
    ///
    /// Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation attempted while the channel is not connected.
    #[error("connection unavailable: cannot {operation} while {state:?}")]
    ConnectionUnavailable {
        /// State when the operation was attempted
        state: ConnectionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// The transport rejected a remote invocation or failed to connect.
    #[error("transport error: {0}")]
    Transport(String),

    /// Backoff ceiling reached; the channel stays failed until reconnected.
    #[error("reconnect attempts exhausted after {attempts} retries")]
    ReconnectExhausted {
        /// Number of retries that were made
        attempts: u32,
    },

    /// Send attempted with empty content.
    #[error("message content is empty")]
    EmptyContent,

    /// Inbound payload could not be normalized.
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// History collaborator failed to return a page.
    #[error("history fetch failed: {0}")]
    History(String),
}

impl SyncError {
    /// Returns true if the user may retry the operation as-is.
    ///
    /// Connection gating and transport failures clear up on their own.
    /// Configuration, exhausted reconnects and malformed payloads do not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionUnavailable { .. } | Self::Transport(_) | Self::History(_)
        )
    }
}

/// Errors from normalizing inbound wire payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Event carried no arguments but one was required.
    #[error("{event}: missing argument")]
    MissingArgument {
        /// Wire event name
        event: &'static str,
    },

    /// Payload did not match any accepted shape.
    #[error("{event}: malformed payload: {reason}")]
    Malformed {
        /// Wire event name
        event: &'static str,
        /// Deserializer message
        reason: String,
    },

    /// Timestamp string was not epoch millis, RFC 3339, or naive ISO-8601.
    #[error("unparseable timestamp: {0}")]
    Timestamp(String),
}
