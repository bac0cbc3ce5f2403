//! Fuzz target for inbound payload normalization
//!
//! Feeds arbitrary JSON (and arbitrary bytes that fail to be JSON) to every
//! inbound event kind. Server payloads come in several field spellings and
//! timestamp formats; none of them may crash the parser.
//!
//! # Invariants
//!
//! - `InboundEvent::parse` never panics, only returns `PayloadError`
//! - `parse_timestamp` never panics on arbitrary strings
//! - A parsed message is always confirmed: server id, not optimistic

#![no_main]

use arbitrary::Arbitrary;
use chrono::DateTime;
use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use souk_core::{InboundEvent, InboundKind, protocol::parse_timestamp};

#[derive(Debug, Arbitrary)]
struct Input {
    kind: u8,
    /// Raw payload text, parsed as JSON when possible
    payload: String,
    extra_args: u8,
    timestamp: String,
}

fuzz_target!(|input: Input| {
    let kind = InboundKind::ALL[usize::from(input.kind) % InboundKind::ALL.len()];
    let payload = serde_json::from_str::<Value>(&input.payload)
        .unwrap_or_else(|_| Value::String(input.payload.clone()));

    let mut args = vec![payload];
    for _ in 0..(input.extra_args % 3) {
        args.push(Value::Null);
    }

    if let Ok(InboundEvent::MessageReceived(message) | InboundEvent::MessageSent(message)) =
        InboundEvent::parse(kind, &args, DateTime::UNIX_EPOCH)
    {
        assert!(message.id.server_id().is_some());
        assert!(!message.is_optimistic);
    }

    let _ = InboundEvent::parse(kind, &[], DateTime::UNIX_EPOCH);
    let _ = parse_timestamp(&input.timestamp);
});
