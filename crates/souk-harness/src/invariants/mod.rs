//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties that must hold after every step of a scenario.
//! Unlike example-based assertions they say nothing about which step ran;
//! they describe what must be true whatever happened.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = world.snapshot(&service);
//! registry.assert_all(&snapshot, "after logout");
//! ```

mod checks;
mod snapshot;

pub use checks::{
    BoundedReconnectAttempts, ChronologicalConversations, NoResidualStateWithoutIdentity,
    OwnerScopedConversations, SingleVisibleNotification, UniqueServerIds, UnreadMatchesCache,
};
pub use snapshot::{ClientSnapshot, SystemSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against system state.
pub trait Invariant: Send + Sync {
    /// Name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against a snapshot.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Every standard invariant.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(UniqueServerIds);
        registry.add(OwnerScopedConversations);
        registry.add(ChronologicalConversations);
        registry.add(UnreadMatchesCache);
        registry.add(SingleVisibleNotification);
        registry.add(BoundedReconnectAttempts);
        registry.add(NoResidualStateWithoutIdentity);
        registry
    }

    /// Add an invariant.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check every invariant, collecting all violations.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check every invariant, panicking with all violations.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::DateTime;
    use souk_core::{ChatMessage, ConnectionState, UserId};

    use super::*;

    fn client(identity: Option<&str>) -> ClientSnapshot {
        ClientSnapshot {
            label: "c".to_string(),
            identity: identity.map(UserId::new),
            cache_owner: identity.map(UserId::new),
            conversations: BTreeMap::new(),
            unread_total: 0,
            partner_count: 0,
            presence: 0,
            typing: 0,
            visible: None,
            presenter_on_screen: 0,
            dedup_entries: 0,
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            max_reconnect_attempts: 5,
            subscriptions: 0,
        }
    }

    fn message(id: &str, from: &str, to: &str) -> ChatMessage {
        ChatMessage::confirmed(id, UserId::new(from), UserId::new(to), "x", DateTime::UNIX_EPOCH)
    }

    #[test]
    fn standard_registry_passes_empty_state() {
        let registry = InvariantRegistry::standard();
        assert_eq!(registry.len(), 7);
        assert!(registry.check_all(&SystemSnapshot::empty()).is_ok());
        assert!(registry.check_all(&SystemSnapshot::single(client(None))).is_ok());
    }

    #[test]
    fn residue_after_logout_is_reported() {
        let mut snapshot = client(None);
        snapshot.presence = 2;

        let violations =
            InvariantRegistry::standard().check_all(&SystemSnapshot::single(snapshot)).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].invariant, "no_residual_state_without_identity");
    }

    #[test]
    fn foreign_message_is_reported() {
        let mut snapshot = client(Some("me"));
        snapshot.conversations.insert(UserId::new("p"), vec![message("1", "x", "y")]);

        let violations =
            InvariantRegistry::standard().check_all(&SystemSnapshot::single(snapshot)).unwrap_err();
        assert!(violations.iter().any(|v| v.invariant == "owner_scoped_conversations"));
    }

    #[test]
    fn duplicate_ids_are_reported() {
        let mut snapshot = client(Some("me"));
        snapshot.conversations.insert(
            UserId::new("p"),
            vec![message("1", "p", "me").read(), message("1", "p", "me").read()],
        );

        let violations =
            InvariantRegistry::standard().check_all(&SystemSnapshot::single(snapshot)).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].invariant, "unique_server_ids");
    }
}
