//! Wire protocol: inbound event kinds, payload normalization, outbound calls.
//!
//! The server speaks a method-name based hub protocol: inbound events arrive
//! as `(event_name, args)` pairs with JSON arguments, and outbound operations
//! are `invoke(method, args)` calls. This module is the ingestion boundary.
//! Every accepted spelling of a field (camelCase, PascalCase, snake_case,
//! numeric or string ids, epoch-millis or ISO-8601 timestamps) is mapped
//! onto one canonical typed representation here, so nothing past this module
//! ever looks at raw JSON.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::{
    error::PayloadError,
    types::{ChatMessage, UserId},
};

/// Closed set of inbound event kinds the core subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundKind {
    /// A message addressed to us, or the echo of one we sent.
    MessageReceived,
    /// Server confirmation of a message we sent.
    MessageSent,
    /// A partner read messages we sent them.
    MessagesRead,
    /// Unread summary changed server-side.
    UnreadSummary,
    /// Unread count changed server-side.
    UnreadCount,
    /// Partner list changed server-side.
    PartnersUpdated,
    /// Notification-shaped announcement of a new message.
    NewMessageNotification,
    /// A user went online or offline.
    UserStatusChanged,
    /// A partner started typing to us.
    TypingStarted,
    /// A partner stopped typing to us.
    TypingStopped,
    /// Reply to our keepalive.
    HeartbeatResponse,
    /// Server greeting after the channel opens.
    ConnectionEstablished,
}

impl InboundKind {
    /// Every kind, in registration order.
    pub const ALL: [Self; 12] = [
        Self::MessageReceived,
        Self::MessageSent,
        Self::MessagesRead,
        Self::UnreadSummary,
        Self::UnreadCount,
        Self::PartnersUpdated,
        Self::NewMessageNotification,
        Self::UserStatusChanged,
        Self::TypingStarted,
        Self::TypingStopped,
        Self::HeartbeatResponse,
        Self::ConnectionEstablished,
    ];

    /// Event name on the wire.
    pub fn event_name(self) -> &'static str {
        match self {
            Self::MessageReceived => "ReceiveMessage",
            Self::MessageSent => "MessageSent",
            Self::MessagesRead => "MessagesRead",
            Self::UnreadSummary => "UnreadSummary",
            Self::UnreadCount => "UnreadCountUpdate",
            Self::PartnersUpdated => "ConversationsUpdated",
            Self::NewMessageNotification => "NewMessageNotification",
            Self::UserStatusChanged => "UserStatusChanged",
            Self::TypingStarted => "UserStartedTyping",
            Self::TypingStopped => "UserStoppedTyping",
            Self::HeartbeatResponse => "HeartbeatResponse",
            Self::ConnectionEstablished => "Connected",
        }
    }

    /// Look up a kind by wire name. Hub method names are case-insensitive.
    pub fn from_event_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.event_name().eq_ignore_ascii_case(name))
    }
}

/// Canonical inbound event after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A message addressed to us, or the echo of one we sent.
    MessageReceived(ChatMessage),
    /// Server confirmation of a message we sent.
    MessageSent(ChatMessage),
    /// `reader_id` read the messages we sent them.
    MessagesRead {
        /// User who read the messages
        reader_id: UserId,
    },
    /// Server-side unread state changed; recount.
    UnreadChanged,
    /// Server-side partner list changed.
    PartnersUpdated,
    /// Notification-shaped announcement of a new message.
    NewMessageNotification(MessageNotice),
    /// Presence change.
    UserStatusChanged {
        /// User whose status changed
        user_id: UserId,
        /// New status
        online: bool,
    },
    /// `user_id` started typing.
    TypingStarted {
        /// Typing user
        user_id: UserId,
    },
    /// `user_id` stopped typing.
    TypingStopped {
        /// Typing user
        user_id: UserId,
    },
    /// Keepalive acknowledged.
    HeartbeatResponse,
    /// Server greeting.
    ConnectionEstablished {
        /// Server-assigned connection id, if sent
        connection_id: Option<String>,
    },
}

/// New-message announcement, addressed to the current identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageNotice {
    /// Server id of the announced message, if present.
    pub message_id: Option<String>,
    /// Author.
    pub sender_id: UserId,
    /// Author's display name, if present.
    pub sender_name: Option<String>,
    /// Message text or preview.
    pub content: String,
    /// Send time.
    pub sent_at: DateTime<Utc>,
    /// Composite conversation key, if the server sends one.
    pub conversation_key: Option<String>,
}

impl MessageNotice {
    /// Synthesize the chat message this notice announces, addressed to `me`.
    ///
    /// `None` when the notice carries no server id: without one the entry
    /// could never be reconciled with the canonical history.
    pub fn to_message(&self, me: &UserId) -> Option<ChatMessage> {
        let id = self.message_id.as_ref()?;
        Some(ChatMessage::confirmed(
            id.clone(),
            self.sender_id.clone(),
            me.clone(),
            self.content.clone(),
            self.sent_at,
        ))
    }
}

impl InboundEvent {
    /// Normalize a raw `(kind, args)` pair into a typed event.
    ///
    /// `received_at` stamps messages whose payload omits a send time.
    ///
    /// # Errors
    ///
    /// - `PayloadError::MissingArgument` if a required argument is absent
    /// - `PayloadError::Malformed` if no accepted shape matches
    /// - `PayloadError::Timestamp` if a timestamp string cannot be parsed
    pub fn parse(
        kind: InboundKind,
        args: &[Value],
        received_at: DateTime<Utc>,
    ) -> Result<Self, PayloadError> {
        let event = kind.event_name();

        match kind {
            InboundKind::MessageReceived => {
                Ok(Self::MessageReceived(message(event, first(event, args)?, received_at)?))
            },
            InboundKind::MessageSent => {
                Ok(Self::MessageSent(message(event, first(event, args)?, received_at)?))
            },
            InboundKind::MessagesRead => {
                let reader_id = user_ref(event, first(event, args)?, READER_ID)?;
                Ok(Self::MessagesRead { reader_id })
            },
            InboundKind::UnreadSummary | InboundKind::UnreadCount => Ok(Self::UnreadChanged),
            InboundKind::PartnersUpdated => Ok(Self::PartnersUpdated),
            InboundKind::NewMessageNotification => {
                Ok(Self::NewMessageNotification(notice(event, first(event, args)?, received_at)?))
            },
            InboundKind::UserStatusChanged => parse_status(event, args),
            InboundKind::TypingStarted => {
                let user_id = user_ref(event, first(event, args)?, TYPIST_ID)?;
                Ok(Self::TypingStarted { user_id })
            },
            InboundKind::TypingStopped => {
                let user_id = user_ref(event, first(event, args)?, TYPIST_ID)?;
                Ok(Self::TypingStopped { user_id })
            },
            InboundKind::HeartbeatResponse => Ok(Self::HeartbeatResponse),
            InboundKind::ConnectionEstablished => {
                let connection_id = args.first().and_then(|value| match value {
                    Value::String(id) => Some(id.clone()),
                    Value::Object(map) => CONNECTION_ID
                        .iter()
                        .find_map(|key| map.get(*key))
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    _ => None,
                });
                Ok(Self::ConnectionEstablished { connection_id })
            },
        }
    }
}

/// Outbound hub invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCall {
    /// Send a chat message.
    SendMessage {
        /// Recipient
        receiver_id: UserId,
        /// Message text
        content: String,
    },
    /// Announce that we started typing.
    StartTyping {
        /// Partner we are typing to
        receiver_id: UserId,
    },
    /// Announce that we stopped typing.
    StopTyping {
        /// Partner we were typing to
        receiver_id: UserId,
    },
    /// Mark everything `sender_id` sent us as read.
    MarkMessagesAsRead {
        /// Partner whose messages were read
        sender_id: UserId,
    },
    /// Ask for a user's presence; answered by `UserStatusChanged`.
    CheckOnlineStatus {
        /// User to query
        user_id: UserId,
    },
    /// Ask for the unread summary; answered by `UnreadSummary`.
    GetUnreadSummary,
    /// Ask for the unread count; answered by `UnreadCountUpdate`.
    GetUnreadCount,
    /// Keepalive.
    Heartbeat,
}

impl OutboundCall {
    /// Hub method name.
    pub fn method(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "SendMessage",
            Self::StartTyping { .. } => "StartTyping",
            Self::StopTyping { .. } => "StopTyping",
            Self::MarkMessagesAsRead { .. } => "MarkMessagesAsRead",
            Self::CheckOnlineStatus { .. } => "CheckOnlineStatus",
            Self::GetUnreadSummary => "GetUnreadSummary",
            Self::GetUnreadCount => "GetUnreadCount",
            Self::Heartbeat => "Heartbeat",
        }
    }

    /// Positional arguments.
    pub fn args(&self) -> Vec<Value> {
        match self {
            Self::SendMessage { receiver_id, content } => {
                vec![json!(receiver_id.as_str()), json!(content)]
            },
            Self::StartTyping { receiver_id } | Self::StopTyping { receiver_id } => {
                vec![json!(receiver_id.as_str())]
            },
            Self::MarkMessagesAsRead { sender_id } => vec![json!(sender_id.as_str())],
            Self::CheckOnlineStatus { user_id } => vec![json!(user_id.as_str())],
            Self::GetUnreadSummary | Self::GetUnreadCount | Self::Heartbeat => Vec::new(),
        }
    }

    /// Only sends propagate failures; everything else is logged and dropped.
    pub fn is_best_effort(&self) -> bool {
        !matches!(self, Self::SendMessage { .. })
    }
}

fn first<'a>(event: &'static str, args: &'a [Value]) -> Result<&'a Value, PayloadError> {
    args.first().filter(|value| !value.is_null()).ok_or(PayloadError::MissingArgument { event })
}

fn decode<'a, T: Deserialize<'a>>(
    event: &'static str,
    value: &'a Value,
) -> Result<T, PayloadError> {
    T::deserialize(value).map_err(|e| PayloadError::Malformed { event, reason: e.to_string() })
}

fn parse_status(event: &'static str, args: &[Value]) -> Result<InboundEvent, PayloadError> {
    // Two-argument form: (userId, isOnline)
    if let [user, Value::Bool(online), ..] = args {
        let wire: WireId = decode(event, user)?;
        return Ok(InboundEvent::UserStatusChanged {
            user_id: UserId::new(wire.into_string()),
            online: *online,
        });
    }

    let fields = Fields::new(event, first(event, args)?)?;
    Ok(InboundEvent::UserStatusChanged {
        user_id: UserId::new(fields.required::<WireId>(USER_ID)?.into_string()),
        online: fields.required(IS_ONLINE)?,
    })
}

/// Parse a wire timestamp.
///
/// Accepts epoch milliseconds, RFC 3339, and naive ISO-8601 (assumed UTC).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, PayloadError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Ok(millis) = raw.parse::<i64>() {
        return millis_to_time(millis);
    }
    Err(PayloadError::Timestamp(raw.to_string()))
}

fn millis_to_time(millis: i64) -> Result<DateTime<Utc>, PayloadError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| PayloadError::Timestamp(millis.to_string()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(i64),
    Text(String),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireTime {
    Millis(i64),
    Text(String),
}

impl WireTime {
    fn resolve(self) -> Result<DateTime<Utc>, PayloadError> {
        match self {
            Self::Millis(millis) => millis_to_time(millis),
            Self::Text(raw) => parse_timestamp(&raw),
        }
    }
}

// Accepted spellings per field, in lookup order.
const MESSAGE_ID: &[&str] = &["id", "Id", "messageId", "MessageId", "message_id"];
const NOTICE_ID: &[&str] = &["messageId", "MessageId", "message_id", "id", "Id"];
const SENDER_ID: &[&str] = &["senderId", "SenderId", "sender_id"];
const SENDER_NAME: &[&str] = &["senderName", "SenderName", "sender_name"];
const RECEIVER_ID: &[&str] =
    &["receiverId", "ReceiverId", "receiver_id", "recipientId", "RecipientId"];
const MESSAGE_CONTENT: &[&str] = &["content", "Content", "message", "Message", "text"];
const NOTICE_CONTENT: &[&str] = &["content", "Content", "message", "Message", "preview", "body"];
const SENT_AT: &[&str] =
    &["sentAt", "SentAt", "sent_at", "timestamp", "Timestamp", "createdAt", "CreatedAt"];
const IS_READ: &[&str] = &["isRead", "IsRead", "is_read"];
const CONVERSATION_KEY: &[&str] =
    &["conversationKey", "ConversationKey", "conversation_key", "conversationId", "ConversationId"];
const USER_ID: &[&str] = &["userId", "UserId", "user_id"];
const TYPIST_ID: &[&str] = &["userId", "UserId", "user_id", "senderId"];
const READER_ID: &[&str] = &["readerId", "ReaderId", "reader_id", "readBy", "ReadBy"];
const IS_ONLINE: &[&str] = &["isOnline", "IsOnline", "is_online", "online", "Online"];
const CONNECTION_ID: &[&str] = &["connectionId", "ConnectionId", "connection_id"];

/// A payload object read field by field.
///
/// Each field comes from the first of its spellings that is present and not
/// null. Payloads repeating a field under several spellings still parse.
struct Fields<'a> {
    event: &'static str,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn new(event: &'static str, value: &'a Value) -> Result<Self, PayloadError> {
        match value {
            Value::Object(map) => Ok(Self { event, map }),
            _ => Err(PayloadError::Malformed { event, reason: "expected an object".to_string() }),
        }
    }

    fn optional<T>(&self, spellings: &[&str]) -> Result<Option<T>, PayloadError>
    where
        T: Deserialize<'a>,
    {
        spellings
            .iter()
            .find_map(|key| self.map.get(*key).filter(|value| !value.is_null()))
            .map(|value| decode(self.event, value))
            .transpose()
    }

    fn required<T: Deserialize<'a>>(&self, spellings: &[&str]) -> Result<T, PayloadError> {
        self.optional(spellings)?.ok_or_else(|| PayloadError::Malformed {
            event: self.event,
            reason: format!("missing field, expected one of {spellings:?}"),
        })
    }
}

fn resolve_sent_at(
    time: Option<WireTime>,
    received_at: DateTime<Utc>,
) -> Result<DateTime<Utc>, PayloadError> {
    time.map_or(Ok(received_at), WireTime::resolve)
}

fn message(
    event: &'static str,
    value: &Value,
    received_at: DateTime<Utc>,
) -> Result<ChatMessage, PayloadError> {
    let fields = Fields::new(event, value)?;
    let id: WireId = fields.required(MESSAGE_ID)?;
    let sender: WireId = fields.required(SENDER_ID)?;
    let receiver: WireId = fields.required(RECEIVER_ID)?;
    let content: String = fields.required(MESSAGE_CONTENT)?;
    let sent_at = resolve_sent_at(fields.optional(SENT_AT)?, received_at)?;

    let mut message = ChatMessage::confirmed(
        id.into_string(),
        UserId::new(sender.into_string()),
        UserId::new(receiver.into_string()),
        content,
        sent_at,
    );
    message.is_read = fields.optional(IS_READ)?.unwrap_or(false);
    Ok(message)
}

fn notice(
    event: &'static str,
    value: &Value,
    received_at: DateTime<Utc>,
) -> Result<MessageNotice, PayloadError> {
    let fields = Fields::new(event, value)?;
    Ok(MessageNotice {
        message_id: fields.optional(NOTICE_ID)?.map(WireId::into_string),
        sender_id: UserId::new(fields.required::<WireId>(SENDER_ID)?.into_string()),
        sender_name: fields.optional(SENDER_NAME)?,
        content: fields.required(NOTICE_CONTENT)?,
        sent_at: resolve_sent_at(fields.optional(SENT_AT)?, received_at)?,
        conversation_key: fields.optional(CONVERSATION_KEY)?.map(WireId::into_string),
    })
}

/// A bare id, or an object carrying one under any of `spellings`.
fn user_ref(
    event: &'static str,
    value: &Value,
    spellings: &[&str],
) -> Result<UserId, PayloadError> {
    let id: WireId = match value {
        Value::Object(_) => Fields::new(event, value)?.required(spellings)?,
        other => decode(event, other)?,
    };
    Ok(UserId::new(id.into_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[test]
    fn event_names_round_trip_case_insensitively() {
        for kind in InboundKind::ALL {
            assert_eq!(InboundKind::from_event_name(kind.event_name()), Some(kind));
        }
        assert_eq!(
            InboundKind::from_event_name("receivemessage"),
            Some(InboundKind::MessageReceived)
        );
        assert_eq!(InboundKind::from_event_name("NoSuchEvent"), None);
    }

    #[test]
    fn camel_and_pascal_spellings_normalize_identically() {
        let camel = json!({
            "id": 7, "senderId": 1, "receiverId": "2", "content": "hi",
            "sentAt": "2024-05-01T10:00:00Z", "isRead": true
        });
        let pascal = json!({
            "Id": "7", "SenderId": "1", "ReceiverId": 2, "Content": "hi",
            "SentAt": "2024-05-01T10:00:00", "IsRead": true
        });

        let a = InboundEvent::parse(InboundKind::MessageReceived, &[camel], epoch()).unwrap();
        let b = InboundEvent::parse(InboundKind::MessageReceived, &[pascal], epoch()).unwrap();
        assert_eq!(a, b);

        let InboundEvent::MessageReceived(message) = a else {
            panic!("expected MessageReceived");
        };
        assert_eq!(message.sender_id, UserId::new("1"));
        assert_eq!(message.receiver_id, UserId::new("2"));
        assert!(message.is_read);
        assert!(!message.is_optimistic);
    }

    #[test]
    fn repeated_spellings_of_a_field_collapse_to_the_first() {
        let payload = json!({
            "id": 5, "messageId": 5, "senderId": 1, "SenderId": 1, "receiverId": 2,
            "content": "hi", "message": "hi", "sentAt": null, "timestamp": 1000
        });
        let event = InboundEvent::parse(InboundKind::MessageReceived, &[payload], epoch()).unwrap();
        let InboundEvent::MessageReceived(message) = event else {
            panic!("expected MessageReceived");
        };
        assert_eq!(message.content, "hi");
        assert_eq!(message.sent_at.timestamp_millis(), 1000);

        let payload = json!({
            "messageId": "9", "id": "ignored", "senderId": 3,
            "content": "offer", "message": "stale preview"
        });
        let event =
            InboundEvent::parse(InboundKind::NewMessageNotification, &[payload], epoch()).unwrap();
        let InboundEvent::NewMessageNotification(notice) = event else {
            panic!("expected NewMessageNotification");
        };
        assert_eq!(notice.message_id.as_deref(), Some("9"));
        assert_eq!(notice.content, "offer");

        let status = json!({"userId": 4, "user_id": 4, "isOnline": true, "online": true});
        assert!(InboundEvent::parse(InboundKind::UserStatusChanged, &[status], epoch()).is_ok());
    }

    #[test]
    fn missing_timestamp_uses_receive_time() {
        let payload = json!({"id": 1, "sender_id": 1, "receiver_id": 2, "message": "x"});
        let received_at = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();

        let event =
            InboundEvent::parse(InboundKind::MessageSent, &[payload], received_at).unwrap();
        let InboundEvent::MessageSent(message) = event else {
            panic!("expected MessageSent");
        };
        assert_eq!(message.sent_at, received_at);
    }

    #[test]
    fn epoch_millis_timestamps_are_accepted() {
        let payload =
            json!({"id": 1, "senderId": 1, "receiverId": 2, "content": "x", "timestamp": 1000});
        let event = InboundEvent::parse(InboundKind::MessageReceived, &[payload], epoch()).unwrap();
        let InboundEvent::MessageReceived(message) = event else {
            panic!("expected MessageReceived");
        };
        assert_eq!(message.sent_at.timestamp_millis(), 1000);
    }

    #[test]
    fn typing_accepts_scalar_or_object() {
        let scalar =
            InboundEvent::parse(InboundKind::TypingStarted, &[json!(42)], epoch()).unwrap();
        let object =
            InboundEvent::parse(InboundKind::TypingStarted, &[json!({"UserId": "42"})], epoch())
                .unwrap();
        assert_eq!(scalar, object);
    }

    #[test]
    fn status_accepts_two_argument_form() {
        let pair =
            InboundEvent::parse(InboundKind::UserStatusChanged, &[json!("9"), json!(true)], epoch())
                .unwrap();
        let object = InboundEvent::parse(
            InboundKind::UserStatusChanged,
            &[json!({"userId": 9, "isOnline": true})],
            epoch(),
        )
        .unwrap();
        assert_eq!(pair, object);
    }

    #[test]
    fn missing_argument_is_an_error() {
        let result = InboundEvent::parse(InboundKind::MessagesRead, &[], epoch());
        assert_eq!(result, Err(PayloadError::MissingArgument { event: "MessagesRead" }));

        let result = InboundEvent::parse(InboundKind::MessagesRead, &[Value::Null], epoch());
        assert!(matches!(result, Err(PayloadError::MissingArgument { .. })));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let result =
            InboundEvent::parse(InboundKind::MessageReceived, &[json!({"id": 1})], epoch());
        assert!(matches!(result, Err(PayloadError::Malformed { event: "ReceiveMessage", .. })));
    }

    #[test]
    fn bad_timestamp_is_an_error() {
        let payload =
            json!({"id": 1, "senderId": 1, "receiverId": 2, "content": "x", "sentAt": "yesterday"});
        let result = InboundEvent::parse(InboundKind::MessageReceived, &[payload], epoch());
        assert_eq!(result, Err(PayloadError::Timestamp("yesterday".to_string())));
    }

    #[test]
    fn notice_without_id_synthesizes_nothing() {
        let payload = json!({"senderId": 3, "preview": "hello"});
        let event =
            InboundEvent::parse(InboundKind::NewMessageNotification, &[payload], epoch()).unwrap();
        let InboundEvent::NewMessageNotification(notice) = event else {
            panic!("expected NewMessageNotification");
        };
        assert_eq!(notice.content, "hello");
        assert!(notice.to_message(&UserId::new("me")).is_none());
    }

    #[test]
    fn outbound_calls_carry_string_ids() {
        let call = OutboundCall::SendMessage {
            receiver_id: UserId::new("17"),
            content: "hello".to_string(),
        };
        assert_eq!(call.method(), "SendMessage");
        assert_eq!(call.args(), vec![json!("17"), json!("hello")]);
        assert!(!call.is_best_effort());
        assert!(OutboundCall::Heartbeat.is_best_effort());
        assert!(OutboundCall::Heartbeat.args().is_empty());
    }
}
