//! Domain types shared by every state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Opaque user identity as assigned by the server.
///
/// Numeric and string ids from the wire are normalized to their decimal or
/// literal string form before they reach this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Wrap a raw id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` if the id is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Bearer credential used to open the real-time channel.
///
/// `Debug` is redacted so credentials never end up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for handing to the transport.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// The signed-in account: who we are and how we authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    identity: UserId,
    credential: Credential,
}

impl Session {
    /// Build a session, rejecting blank identities or credentials.
    ///
    /// # Errors
    ///
    /// - `SyncError::Configuration` if either part is blank
    pub fn new(identity: UserId, credential: Credential) -> Result<Self, SyncError> {
        if identity.is_blank() {
            return Err(SyncError::Configuration("session identity is empty".to_string()));
        }
        if credential.expose().trim().is_empty() {
            return Err(SyncError::Configuration("session credential is empty".to_string()));
        }
        Ok(Self { identity, credential })
    }

    /// Current identity.
    pub fn identity(&self) -> &UserId {
        &self.identity
    }

    /// Current credential.
    pub fn credential(&self) -> &Credential {
        &self.credential
    }
}

/// Message identity.
///
/// Confirmed messages carry the server id. Optimistic entries carry a local
/// id that is unique within one service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Id assigned by the server.
    Server(String),
    /// Provisional id assigned locally on optimistic send.
    Local(u64),
}

impl MessageId {
    /// Server id, if confirmed.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            Self::Server(id) => Some(id),
            Self::Local(_) => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => f.write_str(id),
            Self::Local(id) => write!(f, "local-{id}"),
        }
    }
}

/// A single chat message between two users.
///
/// Immutable once created except for `is_read`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Server or local id.
    pub id: MessageId,
    /// Author.
    pub sender_id: UserId,
    /// Recipient.
    pub receiver_id: UserId,
    /// Message text.
    pub content: String,
    /// Time the message was sent; caches are ordered by this.
    pub sent_at: DateTime<Utc>,
    /// Receiver has read the message.
    pub is_read: bool,
    /// Locally created and not yet confirmed by the server.
    pub is_optimistic: bool,
}

impl ChatMessage {
    /// Create a confirmed message.
    pub fn confirmed(
        id: impl Into<String>,
        sender_id: UserId,
        receiver_id: UserId,
        content: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::Server(id.into()),
            sender_id,
            receiver_id,
            content: content.into(),
            sent_at,
            is_read: false,
            is_optimistic: false,
        }
    }

    /// Create a provisional entry for an optimistic send.
    pub fn provisional(
        local_id: u64,
        sender_id: UserId,
        receiver_id: UserId,
        content: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::Local(local_id),
            sender_id,
            receiver_id,
            content: content.into(),
            sent_at,
            is_read: false,
            is_optimistic: true,
        }
    }

    /// Mark as read (builder form).
    #[must_use]
    pub fn read(mut self) -> Self {
        self.is_read = true;
        self
    }

    /// The other participant relative to `me`.
    ///
    /// `None` if `me` is neither sender nor receiver.
    pub fn partner_of(&self, me: &UserId) -> Option<&UserId> {
        if &self.receiver_id == me {
            Some(&self.sender_id)
        } else if &self.sender_id == me {
            Some(&self.receiver_id)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_is_redacted() {
        let credential = Credential::new("secret-token");
        assert!(!format!("{credential:?}").contains("secret"));
    }

    #[test]
    fn session_rejects_blank_parts() {
        assert!(matches!(
            Session::new(UserId::new("  "), Credential::new("t")),
            Err(SyncError::Configuration(_))
        ));
        assert!(matches!(
            Session::new(UserId::new("u1"), Credential::new("")),
            Err(SyncError::Configuration(_))
        ));
        assert!(Session::new(UserId::new("u1"), Credential::new("t")).is_ok());
    }

    #[test]
    fn partner_is_relative_to_me() {
        let msg = ChatMessage::confirmed(
            "1",
            UserId::new("a"),
            UserId::new("b"),
            "hi",
            DateTime::<Utc>::UNIX_EPOCH,
        );

        assert_eq!(msg.partner_of(&UserId::new("b")), Some(&UserId::new("a")));
        assert_eq!(msg.partner_of(&UserId::new("a")), Some(&UserId::new("b")));
        assert_eq!(msg.partner_of(&UserId::new("c")), None);
    }
}
