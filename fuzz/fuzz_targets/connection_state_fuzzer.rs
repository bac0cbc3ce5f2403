//! Fuzz target for the connection lifecycle state machine
//!
//! # Strategy
//!
//! - Arbitrary interleavings of start, stop, reconnect, connect outcomes,
//!   transport-driven reconnects and clock advances
//! - Small retry budgets so Failed is reached often
//!
//! # Invariants
//!
//! - Retry attempts never exceed the configured budget
//! - Failed and Disconnected hold no timers
//! - AttachHandlers and DetachHandlers strictly alternate
//! - Every scheduled delay is within the backoff cap

#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use souk_core::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionState, Credential, Session, UserId,
};

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Start,
    StartWithoutSession,
    Stop,
    Reconnect,
    ConnectOk,
    Lost,
    TransportReconnecting,
    TransportReconnected,
    HeartbeatAck,
    Advance(u16),
}

#[derive(Debug, Arbitrary)]
struct Input {
    max_attempts: u8,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let Ok(session) = Session::new(UserId::new("u1"), Credential::new("token")) else {
        return;
    };
    let config = ConnectionConfig {
        max_reconnect_attempts: u32::from(input.max_attempts % 8),
        ..ConnectionConfig::default()
    };
    let cap = config.backoff.max_delay;
    let budget = config.max_reconnect_attempts;

    let mut conn = Connection::new(config);
    let mut now = Instant::now();
    let mut attached = false;

    for op in input.ops {
        let actions = match op {
            Op::Start => conn.start(Some(&session)).unwrap_or_default(),
            Op::StartWithoutSession => {
                let before = conn.state();
                assert!(conn.start(None).is_err() || before != ConnectionState::Disconnected);
                Vec::new()
            },
            Op::Stop => conn.stop(),
            Op::Reconnect => conn.reconnect(Some(&session)).unwrap_or_default(),
            Op::ConnectOk => conn.connect_succeeded(now),
            Op::Lost => conn.connection_lost(now),
            Op::TransportReconnecting => conn.transport_reconnecting(),
            Op::TransportReconnected => conn.transport_reconnected(now),
            Op::HeartbeatAck => {
                conn.heartbeat_acknowledged(now);
                Vec::new()
            },
            Op::Advance(millis) => {
                now += Duration::from_millis(u64::from(millis) * 10);
                conn.tick(now)
            },
        };

        for action in &actions {
            match action {
                ConnectionAction::AttachHandlers => {
                    assert!(!attached, "handlers attached twice");
                    attached = true;
                },
                ConnectionAction::DetachHandlers => {
                    assert!(attached, "detach without attach");
                    attached = false;
                },
                ConnectionAction::RetryScheduled { attempt, delay } => {
                    assert!(*attempt <= budget);
                    assert!(*delay <= cap);
                },
                _ => {},
            }
        }

        assert!(conn.attempts() <= budget);
        assert_eq!(conn.handlers_attached(), attached);
        if matches!(conn.state(), ConnectionState::Failed | ConnectionState::Disconnected) {
            assert!(conn.next_deadline().is_none(), "timer armed in {:?}", conn.state());
        }
    }
});
