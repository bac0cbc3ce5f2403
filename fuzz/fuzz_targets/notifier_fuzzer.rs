//! Fuzz target for the notification facade
//!
//! # Strategy
//!
//! - Requests from every source with colliding message ids and content
//! - Early dismissals of live and stale ids
//! - Clock advances across the dedup window and visible duration
//!
//! # Invariants
//!
//! - At most one record is visible, and its id never changes while visible
//! - Duplicate and Suppressed outcomes emit no presenter actions
//! - A record is never presented after its dismissal without a new Created

#![no_main]

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use arbitrary::Arbitrary;
use chrono::DateTime;
use libfuzzer_sys::fuzz_target;
use souk_core::{
    NotificationData, NotificationId, NotificationRequest, NotificationSource, Notifier,
    NotifierAction, NotifierConfig, ShowContext, ShowOutcome, UserId,
};

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Show { source: u8, message_id: Option<u8>, sender: u8, content: u8, active: Option<u8> },
    Dismiss(u64),
    Advance(u16),
    Clear,
}

fuzz_target!(|ops: Vec<Op>| {
    let mut notifier = Notifier::new(NotifierConfig::default());
    let mut now = Instant::now();
    let mut visible: Option<NotificationId> = None;

    for op in ops {
        let actions = match op {
            Op::Show { source, message_id, sender, content, active } => {
                let source = match source % 3 {
                    0 => NotificationSource::Realtime,
                    1 => NotificationSource::Push,
                    _ => NotificationSource::InApp,
                };
                let request = NotificationRequest {
                    title: format!("seller-{sender}"),
                    message: format!("offer {}", content % 4),
                    data: NotificationData {
                        message_id: message_id.map(|id| id.to_string()),
                        counterpart_id: Some(UserId::new(format!("seller-{}", sender % 5))),
                        conversation_key: None,
                        extra: BTreeMap::new(),
                    },
                    duration: None,
                };
                let active = active.map(|n| format!("listing-{n}_seller-{}", n % 5));
                let ctx = ShowContext {
                    source,
                    active_conversation: active.as_deref(),
                    now,
                    wall: DateTime::UNIX_EPOCH,
                };

                let (outcome, actions) = notifier.show(request, ctx);
                match outcome {
                    ShowOutcome::Suppressed | ShowOutcome::Duplicate => assert!(actions.is_empty()),
                    ShowOutcome::Replaced(id) => assert_eq!(Some(id), visible),
                    ShowOutcome::Created(id) => {
                        assert!(visible.is_none());
                        visible = Some(id);
                    },
                }
                actions
            },
            Op::Dismiss(id) => notifier.dismiss(NotificationId(id % 4)),
            Op::Advance(millis) => {
                now += Duration::from_millis(u64::from(millis));
                notifier.tick(now)
            },
            Op::Clear => notifier.clear(),
        };

        for action in actions {
            match action {
                NotifierAction::Present(record) => assert_eq!(Some(record.id), visible),
                NotifierAction::Dismiss(id) => {
                    assert_eq!(Some(id), visible);
                    visible = None;
                },
            }
        }

        assert_eq!(notifier.visible().map(|record| record.id), visible);
    }
});
