//! Standard invariant checks.
//!
//! These capture behavioral properties that must hold after every step,
//! whatever sequence of events led there.

use std::collections::BTreeSet;

use souk_core::ConnectionState;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// No conversation holds two confirmed messages with the same server id.
pub struct UniqueServerIds;

impl Invariant for UniqueServerIds {
    fn name(&self) -> &'static str {
        "unique_server_ids"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for (partner, messages) in &client.conversations {
                let mut seen = BTreeSet::new();
                for id in messages.iter().filter_map(|m| m.id.server_id()) {
                    if !seen.insert(id) {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "{}: message {id} cached twice for partner {partner}",
                                client.label
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Every cached message involves the cache owner, sits under the other
/// participant's conversation, and the owner is the active identity.
pub struct OwnerScopedConversations;

impl Invariant for OwnerScopedConversations {
    fn name(&self) -> &'static str {
        "owner_scoped_conversations"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if client.identity.is_some() && client.cache_owner != client.identity {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "{}: cache bound to {:?} while {:?} is active",
                        client.label, client.cache_owner, client.identity
                    ),
                });
            }
            let Some(owner) = &client.cache_owner else {
                continue;
            };
            for (partner, messages) in &client.conversations {
                if let Some(stray) = messages.iter().find(|m| m.partner_of(owner) != Some(partner))
                {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "{}: message {} ({} -> {}) filed under {partner}",
                            client.label, stray.id, stray.sender_id, stray.receiver_id
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Conversations are ordered by send time.
pub struct ChronologicalConversations;

impl Invariant for ChronologicalConversations {
    fn name(&self) -> &'static str {
        "chronological_conversations"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for (partner, messages) in &client.conversations {
                if let Some(pair) = messages.windows(2).find(|w| w[1].sent_at < w[0].sent_at) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "{}: {partner} conversation out of order at {} then {}",
                            client.label, pair[0].id, pair[1].id
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// The unread total equals the unread messages addressed to the owner.
pub struct UnreadMatchesCache;

impl Invariant for UnreadMatchesCache {
    fn name(&self) -> &'static str {
        "unread_matches_cache"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let expected = client.cache_owner.as_ref().map_or(0, |owner| {
                client
                    .conversations
                    .values()
                    .flatten()
                    .filter(|m| &m.receiver_id == owner && !m.is_read)
                    .count()
            });
            if client.unread_total != expected {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "{}: unread total {} but cache holds {expected}",
                        client.label, client.unread_total
                    ),
                });
            }
        }
        Ok(())
    }
}

/// At most one notification is visible, and the presenter agrees.
pub struct SingleVisibleNotification;

impl Invariant for SingleVisibleNotification {
    fn name(&self) -> &'static str {
        "single_visible_notification"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let expected = usize::from(client.visible.is_some());
            if client.presenter_on_screen != expected {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "{}: presenter shows {} records, service expects {expected}",
                        client.label, client.presenter_on_screen
                    ),
                });
            }
        }
        Ok(())
    }
}

/// The retry counter never exceeds its budget.
pub struct BoundedReconnectAttempts;

impl Invariant for BoundedReconnectAttempts {
    fn name(&self) -> &'static str {
        "bounded_reconnect_attempts"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if client.reconnect_attempts > client.max_reconnect_attempts {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "{}: {} reconnect attempts, budget {}",
                        client.label, client.reconnect_attempts, client.max_reconnect_attempts
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Without an identity nothing per-identity survives: no cache, no
/// presence or typing, no notification, no dedup entries, no subscriptions,
/// and the connection is down.
pub struct NoResidualStateWithoutIdentity;

impl Invariant for NoResidualStateWithoutIdentity {
    fn name(&self) -> &'static str {
        "no_residual_state_without_identity"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if client.identity.is_some() {
                continue;
            }
            let residue = [
                ("cache owner", usize::from(client.cache_owner.is_some())),
                ("conversations", client.conversations.len()),
                ("partners", client.partner_count),
                ("unread", client.unread_total),
                ("presence", client.presence),
                ("typing", client.typing),
                ("visible notification", usize::from(client.visible.is_some())),
                ("dedup entries", client.dedup_entries),
                ("subscriptions", client.subscriptions),
            ];
            if let Some((what, count)) = residue.iter().find(|(_, count)| *count > 0) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("{}: {count} {what} without an identity", client.label),
                });
            }
            if client.state != ConnectionState::Disconnected {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("{}: {:?} without an identity", client.label, client.state),
                });
            }
        }
        Ok(())
    }
}
