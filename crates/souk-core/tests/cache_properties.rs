//! Property-based tests for the message cache.
//!
//! Tests verify that routing, ordering and uniqueness hold under arbitrary
//! interleavings of inbound messages, optimistic sends, rollbacks and page
//! merges.

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use souk_core::{ChatMessage, MessageCache, MessageId, UserId};

const ME: &str = "me";
const PARTNERS: [&str; 3] = ["alice", "bob", "carol"];

#[derive(Debug, Clone)]
enum Op {
    Inbound { id: u16, partner: usize, outgoing: bool, at: i64 },
    Optimistic { partner: usize, at: i64 },
    Rollback { partner: usize, local: u64 },
    Page { partner: usize, page: u32, count: usize },
    ReadBy { partner: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0u16..50, 0..PARTNERS.len(), any::<bool>(), 0i64..1_000)
            .prop_map(|(id, partner, outgoing, at)| Op::Inbound { id, partner, outgoing, at }),
        2 => (0..PARTNERS.len(), 0i64..1_000)
            .prop_map(|(partner, at)| Op::Optimistic { partner, at }),
        1 => (0..PARTNERS.len(), 0u64..10)
            .prop_map(|(partner, local)| Op::Rollback { partner, local }),
        1 => (0..PARTNERS.len(), 1u32..3, 0usize..5)
            .prop_map(|(partner, page, count)| Op::Page { partner, page, count }),
        1 => (0..PARTNERS.len()).prop_map(|partner| Op::ReadBy { partner }),
    ]
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

fn me() -> UserId {
    UserId::new(ME)
}

fn partner(index: usize) -> UserId {
    UserId::new(PARTNERS[index])
}

fn message(id: u16, partner_index: usize, outgoing: bool, secs: i64) -> ChatMessage {
    let (from, to) =
        if outgoing { (me(), partner(partner_index)) } else { (partner(partner_index), me()) };
    ChatMessage::confirmed(id.to_string(), from, to, "text", at(secs))
}

proptest! {
    /// Every cached message involves the owner and sits in its partner's
    /// conversation, conversations are sent-time ordered, and confirmed ids
    /// are unique per conversation.
    #[test]
    fn prop_cache_invariants(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let mut cache = MessageCache::new();
        cache.bind(&me());
        let mut next_local = 0u64;
        let mut next_page_id = 1000u16;

        for op in ops {
            match op {
                Op::Inbound { id, partner: p, outgoing, at: secs } => {
                    cache.apply_inbound(message(id, p, outgoing, secs));
                },
                Op::Optimistic { partner: p, at: secs } => {
                    cache.append_optimistic(ChatMessage::provisional(
                        next_local, me(), partner(p), "draft", at(secs),
                    ));
                    next_local += 1;
                },
                Op::Rollback { partner: p, local } => {
                    cache.rollback(&partner(p), local);
                },
                Op::Page { partner: p, page, count } => {
                    // Page ids never collide with inbound ids. Later pages are
                    // strictly older than anything already cached.
                    let messages = (0..count)
                        .map(|_| {
                            next_page_id += 1;
                            let secs = i64::from(next_page_id);
                            message(next_page_id, p, false, if page > 1 { -secs } else { secs })
                        })
                        .collect();
                    cache.merge_page(&partner(p), page, messages);
                },
                Op::ReadBy { partner: p } => {
                    cache.mark_read_by(&partner(p));
                },
            }

            let mut unread_total = 0;
            for (partner_id, conversation) in cache.conversations() {
                let mut seen = std::collections::HashSet::new();
                for message in conversation {
                    prop_assert_eq!(message.partner_of(&me()), Some(partner_id));
                    if let MessageId::Server(id) = &message.id {
                        prop_assert!(seen.insert(id.clone()), "duplicate id {}", id);
                    }
                    if message.receiver_id == me() && !message.is_read {
                        unread_total += 1;
                    }
                }
                prop_assert!(conversation.windows(2).all(|w| w[0].sent_at <= w[1].sent_at));
            }
            prop_assert_eq!(cache.unread().total, unread_total);
            prop_assert!(cache
                .partners()
                .windows(2)
                .all(|w| w[0].last_message.sent_at >= w[1].last_message.sent_at));
        }
    }

    /// A rollback removes exactly one entry: its own.
    #[test]
    fn prop_rollback_is_exact(
        confirmed in prop::collection::vec((0u16..100, any::<bool>(), 0i64..500), 0..20),
        drafts in 1usize..5,
        victim in 0usize..5,
    ) {
        let mut cache = MessageCache::new();
        cache.bind(&me());
        let bob = partner(1);

        for (id, outgoing, secs) in confirmed {
            cache.apply_inbound(message(id, 1, outgoing, secs));
        }
        for local in 0..drafts {
            cache.append_optimistic(ChatMessage::provisional(
                local as u64, me(), bob.clone(), "draft", at(250),
            ));
        }

        let victim = (victim % drafts) as u64;
        let before: Vec<ChatMessage> = cache.messages(&bob).to_vec();
        prop_assert!(cache.rollback(&bob, victim));

        let expected: Vec<ChatMessage> =
            before.into_iter().filter(|m| m.id != MessageId::Local(victim)).collect();
        prop_assert_eq!(cache.messages(&bob), expected.as_slice());
    }
}

/// Page 1 after cached page 2 data replaces wholesale; page 2 after page 1
/// prepends without reordering page-1 entries.
#[test]
fn paged_merge_replaces_then_prepends() {
    let mut cache = MessageCache::new();
    cache.bind(&me());
    let alice = partner(0);

    cache.merge_page(&alice, 2, vec![message(1, 0, false, 1), message(2, 0, true, 2)]);
    cache.merge_page(&alice, 1, vec![message(10, 0, false, 10), message(11, 0, true, 11)]);
    let page_one: Vec<ChatMessage> = cache.messages(&alice).to_vec();
    assert_eq!(page_one.len(), 2);

    cache.merge_page(&alice, 2, vec![message(5, 0, false, 5), message(6, 0, true, 6)]);
    let merged = cache.messages(&alice);
    assert_eq!(merged.len(), 4);
    assert_eq!(&merged[2..], page_one.as_slice());
}
