//! Per-partner message cache and its derived views.
//!
//! The cache is bound to one owner identity. Every message is routed to the
//! conversation of the *other* participant, kept in sent-time order, and
//! mutated only through the merge operations below. Partner summaries and
//! unread counters are derived: they are recomputed after every mutation and
//! never edited directly.

use std::collections::BTreeMap;

use crate::types::{ChatMessage, MessageId, UserId};

/// Latest-message summary for one conversation partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerSummary {
    /// The other participant.
    pub partner_id: UserId,
    /// Most recent message in the conversation.
    pub last_message: ChatMessage,
    /// Messages from the partner we have not read.
    pub unread_count: usize,
}

/// Unread totals, overall and per partner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadCounter {
    /// Sum over all partners.
    pub total: usize,
    /// Only partners with a non-zero count are present.
    pub by_partner: BTreeMap<UserId, usize>,
}

/// Normalized per-partner message cache.
#[derive(Debug, Clone, Default)]
pub struct MessageCache {
    owner: Option<UserId>,
    conversations: BTreeMap<UserId, Vec<ChatMessage>>,
    partners: Vec<PartnerSummary>,
    unread: UnreadCounter,
}

impl MessageCache {
    /// Empty, unbound cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to `owner`. Binding to a different owner drops everything first.
    pub fn bind(&mut self, owner: &UserId) {
        if self.owner.as_ref() != Some(owner) {
            if self.owner.is_some() {
                tracing::debug!(identity = %owner, "cache rebound, dropping previous owner");
            }
            self.clear();
            self.owner = Some(owner.clone());
        }
    }

    /// Identity the cache belongs to.
    pub fn owner(&self) -> Option<&UserId> {
        self.owner.as_ref()
    }

    /// Drop every conversation and derived view, and unbind.
    pub fn clear(&mut self) {
        self.owner = None;
        self.conversations.clear();
        self.partners.clear();
        self.unread = UnreadCounter::default();
    }

    /// Apply an inbound confirmed message (received, or echo of our own).
    ///
    /// Returns the partner whose conversation changed. `None` when unbound,
    /// when the message does not involve the owner, or when a confirmed
    /// message with the same server id is already cached.
    pub fn apply_inbound(&mut self, message: ChatMessage) -> Option<UserId> {
        let partner = self.route(&message)?;
        let conversation = self.conversations.entry(partner.clone()).or_default();

        if let Some(id) = message.id.server_id()
            && conversation.iter().any(|m| m.id.server_id() == Some(id))
        {
            tracing::debug!(%partner, message_id = id, "duplicate message ignored");
            return None;
        }

        insert_ordered(conversation, message);
        self.recompute();
        Some(partner)
    }

    /// Append a provisional entry for an optimistic send.
    pub fn append_optimistic(&mut self, message: ChatMessage) -> Option<UserId> {
        let partner = self.route(&message)?;
        insert_ordered(self.conversations.entry(partner.clone()).or_default(), message);
        self.recompute();
        Some(partner)
    }

    /// Remove exactly the provisional entry `local_id` from `partner`'s
    /// conversation. Returns `false` if it is no longer there.
    pub fn rollback(&mut self, partner: &UserId, local_id: u64) -> bool {
        let Some(conversation) = self.conversations.get_mut(partner) else {
            return false;
        };
        let before = conversation.len();
        conversation.retain(|m| m.id != MessageId::Local(local_id));
        let removed = conversation.len() != before;
        if conversation.is_empty() {
            self.conversations.remove(partner);
        }
        if removed {
            self.recompute();
        }
        removed
    }

    /// Merge one history page for `partner`.
    ///
    /// Page 1 (or 0) replaces the conversation wholesale. Later pages hold
    /// older messages and are prepended, leaving current entries in place.
    /// Callers request strictly increasing pages; overlapping pages are not
    /// deduplicated.
    pub fn merge_page(&mut self, partner: &UserId, page: u32, mut messages: Vec<ChatMessage>) {
        if self.owner.is_none() {
            return;
        }
        messages.sort_by_key(|m| m.sent_at);

        if page <= 1 {
            if messages.is_empty() {
                self.conversations.remove(partner);
            } else {
                self.conversations.insert(partner.clone(), messages);
            }
        } else if !messages.is_empty() {
            let conversation = self.conversations.entry(partner.clone()).or_default();
            messages.append(conversation);
            *conversation = messages;
        }
        self.recompute();
    }

    /// `reader` read what the owner sent them. Returns `true` if anything
    /// changed.
    pub fn mark_read_by(&mut self, reader: &UserId) -> bool {
        let Some(owner) = self.owner.clone() else {
            return false;
        };
        if reader == &owner {
            return false;
        }
        self.mark_where(reader, |m| m.sender_id == owner && &m.receiver_id == reader)
    }

    /// The owner read everything `partner` sent them. Returns `true` if
    /// anything changed.
    pub fn mark_conversation_read(&mut self, partner: &UserId) -> bool {
        let Some(owner) = self.owner.clone() else {
            return false;
        };
        self.mark_where(partner, |m| &m.sender_id == partner && m.receiver_id == owner)
    }

    /// Rebuild partner summaries and unread counters from the cache.
    pub fn recompute(&mut self) {
        let Some(owner) = self.owner.as_ref() else {
            self.partners.clear();
            self.unread = UnreadCounter::default();
            return;
        };

        let mut partners = Vec::with_capacity(self.conversations.len());
        let mut unread = UnreadCounter::default();

        for (partner, conversation) in &self.conversations {
            let Some(last) = conversation.last() else {
                continue;
            };
            let count =
                conversation.iter().filter(|m| &m.receiver_id == owner && !m.is_read).count();
            if count > 0 {
                unread.by_partner.insert(partner.clone(), count);
                unread.total += count;
            }
            partners.push(PartnerSummary {
                partner_id: partner.clone(),
                last_message: last.clone(),
                unread_count: count,
            });
        }

        partners.sort_by(|a, b| b.last_message.sent_at.cmp(&a.last_message.sent_at));
        self.partners = partners;
        self.unread = unread;
    }

    /// Messages with `partner`, oldest first.
    pub fn messages(&self, partner: &UserId) -> &[ChatMessage] {
        self.conversations.get(partner).map_or(&[], Vec::as_slice)
    }

    /// Every conversation, keyed by partner.
    pub fn conversations(&self) -> impl Iterator<Item = (&UserId, &[ChatMessage])> {
        self.conversations.iter().map(|(partner, messages)| (partner, messages.as_slice()))
    }

    /// Partner summaries, most recent first.
    pub fn partners(&self) -> &[PartnerSummary] {
        &self.partners
    }

    /// Unread totals.
    pub fn unread(&self) -> &UnreadCounter {
        &self.unread
    }

    /// `true` if no conversation is cached.
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    fn route(&self, message: &ChatMessage) -> Option<UserId> {
        let owner = self.owner.as_ref()?;
        let partner = message.partner_of(owner);
        if partner.is_none() {
            tracing::debug!(
                sender = %message.sender_id,
                receiver = %message.receiver_id,
                "message does not involve current identity"
            );
        }
        partner.cloned()
    }

    fn mark_where(&mut self, partner: &UserId, predicate: impl Fn(&ChatMessage) -> bool) -> bool {
        let Some(conversation) = self.conversations.get_mut(partner) else {
            return false;
        };
        let mut changed = false;
        for message in conversation.iter_mut().filter(|m| !m.is_read && predicate(m)) {
            message.is_read = true;
            changed = true;
        }
        if changed {
            self.recompute();
        }
        changed
    }
}

/// Insert after every entry sent at or before `message`, so equal timestamps
/// keep arrival order.
fn insert_ordered(conversation: &mut Vec<ChatMessage>, message: ChatMessage) {
    let at = conversation.partition_point(|m| m.sent_at <= message.sent_at);
    conversation.insert(at, message);
}
