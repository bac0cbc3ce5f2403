//! Server payload builders for scripted inbound events.
//!
//! Field spellings deliberately vary between builders, the way they do
//! between server versions.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

/// A `ReceiveMessage`/`MessageSent` payload in camelCase with a numeric id
/// and an RFC 3339 timestamp.
pub fn message(id: u64, sender: &str, receiver: &str, content: &str, at: DateTime<Utc>) -> Value {
    json!({
        "id": id,
        "senderId": sender,
        "receiverId": receiver,
        "content": content,
        "sentAt": at.to_rfc3339(),
        "isRead": false,
    })
}

/// The same message in PascalCase with epoch-millisecond time.
pub fn message_pascal(
    id: u64,
    sender: &str,
    receiver: &str,
    content: &str,
    at: DateTime<Utc>,
) -> Value {
    json!({
        "Id": id.to_string(),
        "SenderId": sender,
        "ReceiverId": receiver,
        "Content": content,
        "SentAt": at.timestamp_millis(),
    })
}

/// A `NewMessageNotification` payload.
pub fn notice(
    message_id: Option<u64>,
    sender: &str,
    sender_name: &str,
    content: &str,
    conversation_key: Option<&str>,
) -> Value {
    let mut payload = json!({
        "senderId": sender,
        "senderName": sender_name,
        "content": content,
    });
    if let Some(map) = payload.as_object_mut() {
        if let Some(id) = message_id {
            map.insert("messageId".to_string(), json!(id));
        }
        if let Some(key) = conversation_key {
            map.insert("conversationKey".to_string(), json!(key));
        }
    }
    payload
}

/// A `MessagesRead` payload.
pub fn read_by(reader: &str) -> Value {
    json!({ "readerId": reader })
}

/// A `UserStatusChanged` payload.
pub fn status(user: &str, online: bool) -> Value {
    json!({ "userId": user, "isOnline": online })
}

/// A bare user id, as typing events carry it.
pub fn user(id: &str) -> Value {
    Value::String(id.to_string())
}
