//! Property-based tests for the notification facade.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use souk_core::{
    NotificationData, NotificationRequest, NotificationSource, Notifier, NotifierAction,
    NotifierConfig, ShowContext, ShowOutcome, UserId,
};

fn request(message_id: u8, body: &str) -> NotificationRequest {
    NotificationRequest {
        title: "New message".to_string(),
        message: body.to_string(),
        data: NotificationData {
            message_id: Some(format!("m{message_id}")),
            counterpart_id: Some(UserId::new("partner")),
            ..NotificationData::default()
        },
        duration: None,
    }
}

fn ctx(now: Instant) -> ShowContext<'static, Instant> {
    ShowContext {
        source: NotificationSource::Realtime,
        active_conversation: None,
        now,
        wall: DateTime::<Utc>::UNIX_EPOCH,
    }
}

proptest! {
    /// N rapid `show()` calls while one is visible yield exactly one visible
    /// record reflecting the latest non-duplicate call.
    #[test]
    fn prop_at_most_one_visible(
        calls in prop::collection::vec((any::<u8>(), "[a-z]{1,12}"), 1..30),
    ) {
        let now = Instant::now();
        let mut notifier = Notifier::new(NotifierConfig::default());
        let mut first_id = None;
        let mut latest_shown = None;

        for (id, body) in &calls {
            let (outcome, actions) = notifier.show(request(*id, body), ctx(now));
            prop_assert!(actions.len() <= 1);
            if let Some(shown) = outcome.id() {
                let first = *first_id.get_or_insert(shown);
                prop_assert_eq!(shown, first, "a second record was created");
                latest_shown = Some(body.clone());
            }
        }

        let visible = notifier.visible();
        prop_assert!(visible.is_some());
        prop_assert_eq!(visible.map(|r| r.message.clone()), latest_shown);
    }

    /// Presented and dismissed ids always pair up: at most one record is
    /// outstanding at the presenter at any time.
    #[test]
    fn prop_presenter_sees_one_record(
        steps in prop::collection::vec((any::<u8>(), 0u64..6_000), 1..40),
    ) {
        let mut now = Instant::now();
        let mut notifier = Notifier::new(NotifierConfig::default());
        let mut outstanding = None;

        for (id, gap_ms) in steps {
            now += Duration::from_millis(gap_ms);
            let mut actions = notifier.tick(now);
            actions.extend(notifier.show(request(id, "body"), ctx(now)).1);

            for action in actions {
                match action {
                    NotifierAction::Present(record) => {
                        if let Some(current) = outstanding {
                            prop_assert_eq!(current, record.id);
                        }
                        outstanding = Some(record.id);
                    },
                    NotifierAction::Dismiss(id) => {
                        prop_assert_eq!(outstanding, Some(id));
                        outstanding = None;
                    },
                }
            }
            prop_assert_eq!(outstanding, notifier.visible().map(|r| r.id));
        }
    }
}

/// Two `show()` calls with identical message id inside the window yield one
/// display; spaced beyond 3x the window, both display.
#[test]
fn identical_ids_display_once_per_window() {
    let t0 = Instant::now();
    let config = NotifierConfig::default();
    let window = config.dedup_window;
    let mut notifier = Notifier::new(config);

    let (first, _) = notifier.show(request(1, "hello"), ctx(t0));
    let (second, _) = notifier.show(request(1, "hello"), ctx(t0 + window / 2));
    assert!(matches!(first, ShowOutcome::Created(_)));
    assert_eq!(second, ShowOutcome::Duplicate);

    let later = t0 + window * 3 + Duration::from_millis(1);
    let (third, _) = notifier.show(request(1, "hello"), ctx(later));
    assert!(third.id().is_some());
}
