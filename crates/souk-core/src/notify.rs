//! Notification dispatch facade.
//!
//! Single entry point for every notification request. A request passes the
//! screen-context filter, then the deduplicator, and then either replaces the
//! visible record in place or becomes the visible record. At most one record
//! is ever visible.
//!
//! # Flow
//!
//! ```text
//! show(request) ──> viewing that conversation? ──yes──> Suppressed
//!                          │ no
//!                          v
//!                   duplicate key in window? ──yes──> Duplicate
//!                          │ no
//!                          v
//!                   one already visible? ──yes──> Replaced(existing id)
//!                          │ no
//!                          v
//!                      Created(fresh id)
//! ```

use std::{collections::BTreeMap, fmt, time::Duration};

use chrono::{DateTime, Utc};

use crate::{
    dedup::{DedupKey, Deduplicator, fingerprint},
    env::Timepoint,
    types::UserId,
};

/// Default suppression window.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(3);

/// Default visible duration.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(4);

/// How long `is_updating` stays set after an in-place replace.
pub const UPDATE_REFRESH: Duration = Duration::from_millis(300);

/// Characters kept in a content fingerprint.
pub const DEFAULT_FINGERPRINT_CHARS: usize = 50;

/// Delimiters splitting a composite conversation key into segments.
///
/// `-` is not one: user ids such as `seller-7` contain it.
const KEY_DELIMITERS: [char; 3] = ['_', ':', '|'];

/// Identifier of a notification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotificationId(pub u64);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "notification-{}", self.0)
    }
}

/// Where a notification request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationSource {
    /// Real-time channel event.
    Realtime,
    /// Push notification delivered while the app is foregrounded.
    Push,
    /// Raised by the app itself.
    InApp,
}

impl NotificationSource {
    /// Stable label used in dedup keys.
    pub fn label(self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Push => "push",
            Self::InApp => "in_app",
        }
    }
}

/// Routing data attached to a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationData {
    /// Server id of the message this notification is about.
    pub message_id: Option<String>,
    /// The other participant of the conversation.
    pub counterpart_id: Option<UserId>,
    /// Composite conversation key, if the source provides one.
    pub conversation_key: Option<String>,
    /// Free-form extras, passed through to the presenter.
    pub extra: BTreeMap<String, String>,
}

impl NotificationData {
    /// `true` if this notification concerns the conversation `active`.
    ///
    /// Matches on counterpart id or conversation key equality, or on the
    /// counterpart id appearing in a composite `active` key as whole
    /// delimiter-bounded segments.
    pub fn concerns(&self, active: &str) -> bool {
        if self.conversation_key.as_deref() == Some(active) {
            return true;
        }
        let Some(counterpart) = self.counterpart_id.as_ref().map(UserId::as_str) else {
            return false;
        };
        counterpart == active || contains_segment(active, counterpart)
    }
}

/// `needle` occurs in `haystack` bounded by delimiters or the string ends.
fn contains_segment(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let is_delimiter = |c: char| KEY_DELIMITERS.contains(&c);
    haystack.match_indices(needle).any(|(at, _)| {
        let before = haystack[..at].chars().next_back();
        let after = haystack[at + needle.len()..].chars().next();
        before.is_none_or(is_delimiter) && after.is_none_or(is_delimiter)
    })
}

/// A request to show a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    /// Headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Routing data.
    pub data: NotificationData,
    /// Visible duration; the configured default when `None`.
    pub duration: Option<Duration>,
}

/// The visible notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    /// Stable across in-place replaces.
    pub id: NotificationId,
    /// Headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Routing data.
    pub data: NotificationData,
    /// Wall-clock time of the latest create or replace.
    pub timestamp: DateTime<Utc>,
    /// Set for one refresh cycle after an in-place replace.
    pub is_updating: bool,
}

/// Duplicate-suppression policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupPolicy {
    /// Treat identical content within the window as a duplicate even when
    /// message ids differ.
    pub suppress_identical_content: bool,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self { suppress_identical_content: true }
    }
}

/// Notifier configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierConfig {
    /// Suppression window
    pub dedup_window: Duration,
    /// Visible duration when a request does not set one
    pub default_duration: Duration,
    /// Which keys suppress
    pub dedup_policy: DedupPolicy,
    /// Characters kept in a content fingerprint
    pub fingerprint_chars: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            dedup_window: DEFAULT_DEDUP_WINDOW,
            default_duration: DEFAULT_DURATION,
            dedup_policy: DedupPolicy::default(),
            fingerprint_chars: DEFAULT_FINGERPRINT_CHARS,
        }
    }
}

/// Ambient inputs for one `show` call.
#[derive(Debug, Clone, Copy)]
pub struct ShowContext<'a, I> {
    /// Delivery source.
    pub source: NotificationSource,
    /// Conversation currently on screen.
    pub active_conversation: Option<&'a str>,
    /// Monotonic now.
    pub now: I,
    /// Wall-clock now, for the record timestamp.
    pub wall: DateTime<Utc>,
}

/// What `show` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowOutcome {
    /// Dropped: the user is viewing that conversation.
    Suppressed,
    /// Dropped: a matching key was seen within the window.
    Duplicate,
    /// Visible record updated in place.
    Replaced(NotificationId),
    /// New visible record.
    Created(NotificationId),
}

impl ShowOutcome {
    /// Id of the visible record, if the request was displayed.
    pub fn id(self) -> Option<NotificationId> {
        match self {
            Self::Replaced(id) | Self::Created(id) => Some(id),
            Self::Suppressed | Self::Duplicate => None,
        }
    }
}

/// Actions for the presenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierAction {
    /// Show or update this record (keyed by its id).
    Present(NotificationRecord),
    /// Remove this record.
    Dismiss(NotificationId),
}

#[derive(Debug, Clone)]
struct Visible<I> {
    record: NotificationRecord,
    expires_at: I,
    refresh_at: Option<I>,
}

/// Notification dispatch facade.
#[derive(Debug, Clone)]
pub struct Notifier<I> {
    config: NotifierConfig,
    dedup: Deduplicator<I>,
    visible: Option<Visible<I>>,
    next_id: u64,
}

impl<I: Timepoint> Notifier<I> {
    /// Create with the given configuration.
    pub fn new(config: NotifierConfig) -> Self {
        let dedup = Deduplicator::new(config.dedup_window);
        Self { config, dedup, visible: None, next_id: 1 }
    }

    /// Register a notification request.
    pub fn show(
        &mut self,
        request: NotificationRequest,
        ctx: ShowContext<'_, I>,
    ) -> (ShowOutcome, Vec<NotifierAction>) {
        if let Some(active) = ctx.active_conversation
            && request.data.concerns(active)
        {
            tracing::debug!(active, "notification suppressed, conversation on screen");
            return (ShowOutcome::Suppressed, Vec::new());
        }

        let keys = self.keys_for(&request, ctx.source);
        if self.dedup.check(&keys, ctx.now) {
            tracing::debug!(source = ctx.source.label(), "duplicate notification dropped");
            return (ShowOutcome::Duplicate, Vec::new());
        }

        let duration = request.duration.unwrap_or(self.config.default_duration);
        let expires_at = ctx.now + duration;

        if let Some(visible) = self.visible.as_mut() {
            let record = &mut visible.record;
            record.title = request.title;
            record.message = request.message;
            record.data = request.data;
            record.timestamp = ctx.wall;
            record.is_updating = true;
            visible.expires_at = expires_at;
            visible.refresh_at = Some(ctx.now + UPDATE_REFRESH);

            let id = record.id;
            tracing::debug!(%id, "visible notification replaced");
            return (ShowOutcome::Replaced(id), vec![NotifierAction::Present(record.clone())]);
        }

        let id = NotificationId(self.next_id);
        self.next_id += 1;
        let record = NotificationRecord {
            id,
            title: request.title,
            message: request.message,
            data: request.data,
            timestamp: ctx.wall,
            is_updating: false,
        };
        self.visible = Some(Visible { record: record.clone(), expires_at, refresh_at: None });
        tracing::debug!(%id, ?duration, "notification created");
        (ShowOutcome::Created(id), vec![NotifierAction::Present(record)])
    }

    /// Fire due timers: end the update flag, auto-dismiss on expiry.
    pub fn tick(&mut self, now: I) -> Vec<NotifierAction> {
        let Some(visible) = self.visible.as_mut() else {
            return Vec::new();
        };

        if now >= visible.expires_at {
            let id = visible.record.id;
            self.visible = None;
            return vec![NotifierAction::Dismiss(id)];
        }

        if let Some(at) = visible.refresh_at
            && now >= at
        {
            visible.refresh_at = None;
            visible.record.is_updating = false;
            return vec![NotifierAction::Present(visible.record.clone())];
        }

        Vec::new()
    }

    /// Dismiss early. No-op unless `id` is the visible record.
    pub fn dismiss(&mut self, id: NotificationId) -> Vec<NotifierAction> {
        match &self.visible {
            Some(visible) if visible.record.id == id => {
                self.visible = None;
                vec![NotifierAction::Dismiss(id)]
            },
            _ => Vec::new(),
        }
    }

    /// Drop the visible record and every dedup entry.
    pub fn clear(&mut self) -> Vec<NotifierAction> {
        self.dedup.clear();
        self.visible.take().map(|v| NotifierAction::Dismiss(v.record.id)).into_iter().collect()
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<I> {
        self.visible.as_ref().map(|v| match v.refresh_at {
            Some(refresh) => refresh.min(v.expires_at),
            None => v.expires_at,
        })
    }

    /// The visible record.
    pub fn visible(&self) -> Option<&NotificationRecord> {
        self.visible.as_ref().map(|v| &v.record)
    }

    /// Live dedup entries.
    pub fn dedup_entries(&self) -> usize {
        self.dedup.len()
    }

    fn keys_for(&self, request: &NotificationRequest, source: NotificationSource) -> Vec<DedupKey> {
        let mut keys = Vec::with_capacity(3);
        if let Some(id) = &request.data.message_id {
            keys.push(DedupKey::Message(id.clone()));
            keys.push(DedupKey::Source { message_id: id.clone(), source: source.label() });
        }
        if self.config.dedup_policy.suppress_identical_content {
            let print = fingerprint(&request.message, self.config.fingerprint_chars);
            if !print.is_empty() {
                keys.push(DedupKey::Content(print));
            }
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn request(message_id: &str, body: &str) -> NotificationRequest {
        NotificationRequest {
            title: "New message".to_string(),
            message: body.to_string(),
            data: NotificationData {
                message_id: Some(message_id.to_string()),
                counterpart_id: Some(UserId::new("seller-7")),
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

    #[test]
    fn second_show_replaces_in_place() {
        let t0 = Instant::now();
        let mut notifier = Notifier::new(NotifierConfig::default());

        let (first, _) = notifier.show(request("m1", "one"), ctx(t0));
        let (second, actions) = notifier.show(request("m2", "two"), ctx(t0));

        let ShowOutcome::Created(id) = first else { panic!("expected Created") };
        assert_eq!(second, ShowOutcome::Replaced(id));
        let visible = notifier.visible().unwrap();
        assert_eq!(visible.message, "two");
        assert!(visible.is_updating);
        assert_eq!(actions, vec![NotifierAction::Present(visible.clone())]);
    }

    #[test]
    fn update_flag_clears_after_refresh() {
        let t0 = Instant::now();
        let mut notifier = Notifier::new(NotifierConfig::default());
        notifier.show(request("m1", "one"), ctx(t0));
        notifier.show(request("m2", "two"), ctx(t0));

        let actions = notifier.tick(t0 + UPDATE_REFRESH);
        assert_eq!(actions.len(), 1);
        assert!(!notifier.visible().unwrap().is_updating);
    }

    #[test]
    fn auto_dismisses_after_duration() {
        let t0 = Instant::now();
        let mut notifier = Notifier::new(NotifierConfig::default());
        let (outcome, _) = notifier.show(request("m1", "one"), ctx(t0));

        assert_eq!(notifier.next_deadline(), Some(t0 + DEFAULT_DURATION));
        assert!(notifier.tick(t0 + Duration::from_secs(3)).is_empty());
        assert_eq!(
            notifier.tick(t0 + DEFAULT_DURATION),
            vec![NotifierAction::Dismiss(outcome.id().unwrap())]
        );
        assert!(notifier.visible().is_none());
    }

    #[test]
    fn replace_restarts_duration() {
        let t0 = Instant::now();
        let mut notifier = Notifier::new(NotifierConfig::default());
        notifier.show(request("m1", "one"), ctx(t0));
        notifier.show(request("m2", "two"), ctx(t0 + Duration::from_secs(3)));

        notifier.tick(t0 + DEFAULT_DURATION);
        assert!(notifier.visible().is_some());
    }

    #[test]
    fn same_message_id_is_duplicate_within_window() {
        let t0 = Instant::now();
        let mut notifier = Notifier::new(NotifierConfig::default());
        notifier.show(request("m1", "one"), ctx(t0));

        let (outcome, actions) = notifier.show(request("m1", "one again"), ctx(t0));
        assert_eq!(outcome, ShowOutcome::Duplicate);
        assert!(actions.is_empty());

        let later = t0 + DEFAULT_DEDUP_WINDOW * 3 + Duration::from_millis(1);
        let (outcome, _) = notifier.show(request("m1", "one again"), ctx(later));
        assert!(outcome.id().is_some());
    }

    #[test]
    fn identical_content_policy_is_configurable() {
        let t0 = Instant::now();

        let mut strict = Notifier::new(NotifierConfig::default());
        strict.show(request("m1", "Same text"), ctx(t0));
        assert_eq!(strict.show(request("m2", "same   TEXT"), ctx(t0)).0, ShowOutcome::Duplicate);

        let config = NotifierConfig {
            dedup_policy: DedupPolicy { suppress_identical_content: false },
            ..NotifierConfig::default()
        };
        let mut lenient = Notifier::new(config);
        lenient.show(request("m1", "Same text"), ctx(t0));
        assert!(lenient.show(request("m2", "Same text"), ctx(t0)).0.id().is_some());
    }

    #[test]
    fn viewing_the_conversation_suppresses() {
        let t0 = Instant::now();
        let mut notifier = Notifier::new(NotifierConfig::default());

        let on_screen = ShowContext { active_conversation: Some("seller-7"), ..ctx(t0) };
        assert_eq!(notifier.show(request("m1", "x"), on_screen).0, ShowOutcome::Suppressed);

        let composite = ShowContext { active_conversation: Some("listing42_seller-7"), ..ctx(t0) };
        assert_eq!(notifier.show(request("m2", "y"), composite).0, ShowOutcome::Suppressed);
        assert_eq!(notifier.dedup_entries(), 0);

        let elsewhere = ShowContext { active_conversation: Some("listing42_buyer-3"), ..ctx(t0) };
        let (outcome, _) = notifier.show(request("m3", "z"), elsewhere);
        assert_eq!(outcome, ShowOutcome::Created(NotificationId(1)));
        assert_eq!(notifier.dedup_entries(), 3);
    }

    #[test]
    fn composite_key_matches_whole_segments_only() {
        let data = NotificationData {
            counterpart_id: Some(UserId::new("42")),
            ..NotificationData::default()
        };
        assert!(data.concerns("42"));
        assert!(data.concerns("listing9_42"));
        assert!(data.concerns("7|42|listing"));
        assert!(!data.concerns("listing9_420"));
        assert!(!data.concerns("listing9_seller-42"));
        assert!(!data.concerns("42-listing9"));

        let hyphenated = NotificationData {
            counterpart_id: Some(UserId::new("seller-7")),
            ..NotificationData::default()
        };
        assert!(hyphenated.concerns("listing42_seller-7"));
        assert!(!hyphenated.concerns("listing42_seller-70"));

        let keyed = NotificationData {
            conversation_key: Some("conv-1".to_string()),
            ..NotificationData::default()
        };
        assert!(keyed.concerns("conv-1"));
        assert!(!keyed.concerns("conv-2"));
    }

    #[test]
    fn clear_dismisses_and_forgets() {
        let t0 = Instant::now();
        let mut notifier = Notifier::new(NotifierConfig::default());
        notifier.show(request("m1", "one"), ctx(t0));

        assert_eq!(notifier.clear(), vec![NotifierAction::Dismiss(NotificationId(1))]);
        assert_eq!(notifier.dedup_entries(), 0);
        assert!(notifier.show(request("m1", "one"), ctx(t0)).0.id().is_some());
    }

    #[test]
    fn dismiss_ignores_stale_ids() {
        let t0 = Instant::now();
        let mut notifier = Notifier::new(NotifierConfig::default());
        notifier.show(request("m1", "one"), ctx(t0));

        assert!(notifier.dismiss(NotificationId(99)).is_empty());
        assert_eq!(notifier.dismiss(NotificationId(1)).len(), 1);
        assert!(notifier.visible().is_none());
    }
}
