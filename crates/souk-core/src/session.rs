//! Identity-switch tracking.
//!
//! Observes the active session and decides what an identity change requires:
//! nothing, a credential refresh, a fresh start, a teardown, or an ordered
//! teardown, settle and restart. The coordinator in the client crate executes
//! the returned actions.

use std::time::Duration;

use crate::types::{Session, UserId};

/// Default pause between teardown and restart on an identity switch.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Default namespace for persisted keys.
pub const DEFAULT_PERSISTED_PREFIX: &str = "souk.chat.";

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Pause between teardown and restart when switching identities; must be
    /// longer than the first reconnect delay
    pub settle_delay: Duration,
    /// Prefix of every persisted key the core clears on logout
    pub persisted_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            persisted_prefix: DEFAULT_PERSISTED_PREFIX.to_string(),
        }
    }
}

impl SessionConfig {
    /// Namespace holding `identity`'s persisted keys.
    pub fn identity_namespace(&self, identity: &UserId) -> String {
        format!("{}{}.", self.persisted_prefix, identity)
    }

    /// Key holding the conversation last on screen.
    pub fn active_conversation_key(&self) -> String {
        format!("{}active_conversation", self.persisted_prefix)
    }
}

/// Actions returned by the identity tracker, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Stop the connection and clear every per-identity cache.
    Teardown {
        /// Identity being torn down
        identity: UserId,
    },
    /// Clear `identity`'s persisted keys.
    ClearPersisted {
        /// Identity that logged out
        identity: UserId,
    },
    /// Wait before restarting. Abandoned if the session changes meanwhile.
    Settle(Duration),
    /// Start the connection for this session.
    Start(Session),
    /// Same identity, new credential: use it for subsequent connects.
    RefreshCredential(Session),
}

/// Tracks the active session across changes.
#[derive(Debug, Clone)]
pub struct IdentityTracker {
    current: Option<Session>,
    settle_delay: Duration,
    /// Identity whose switch was abandoned during its settle delay.
    interrupted: Option<UserId>,
}

impl IdentityTracker {
    /// Create with no active session.
    pub fn new(settle_delay: Duration) -> Self {
        Self { current: None, settle_delay, interrupted: None }
    }

    /// Active session, if any.
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// The pending switch to the current session was abandoned before it
    /// started. The previous identity is already torn down, so the next
    /// observation starts from nothing but still settles first.
    pub fn interrupt(&mut self) {
        if let Some(session) = self.current.take() {
            tracing::debug!(identity = %session.identity(), "pending switch abandoned");
            self.interrupted = Some(session.identity().clone());
        }
    }

    /// Observe the latest session value.
    pub fn observe(&mut self, next: Option<Session>) -> Vec<SessionAction> {
        let previous = self.current.take();
        let interrupted = self.interrupted.take();
        self.current.clone_from(&next);

        match (previous, next) {
            (None, None) => interrupted
                .map(|identity| vec![SessionAction::ClearPersisted { identity }])
                .unwrap_or_default(),
            (None, Some(session)) if interrupted.is_some() => {
                tracing::info!(identity = %session.identity(), "identity switch resumed");
                vec![SessionAction::Settle(self.settle_delay), SessionAction::Start(session)]
            },
            (None, Some(session)) => {
                tracing::info!(identity = %session.identity(), "login");
                vec![SessionAction::Start(session)]
            },
            (Some(old), None) => {
                tracing::info!(identity = %old.identity(), "logout");
                let identity = old.identity().clone();
                vec![
                    SessionAction::Teardown { identity: identity.clone() },
                    SessionAction::ClearPersisted { identity },
                ]
            },
            (Some(old), Some(new)) if old.identity() == new.identity() => {
                if old.credential() == new.credential() {
                    Vec::new()
                } else {
                    tracing::debug!(identity = %new.identity(), "credential refreshed");
                    vec![SessionAction::RefreshCredential(new)]
                }
            },
            (Some(old), Some(new)) => {
                tracing::info!(from = %old.identity(), to = %new.identity(), "identity switch");
                vec![
                    SessionAction::Teardown { identity: old.identity().clone() },
                    SessionAction::Settle(self.settle_delay),
                    SessionAction::Start(new),
                ]
            },
        }
    }
}
