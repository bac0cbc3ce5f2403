//! Connection lifecycle state machine.
//!
//! Owns the real-time channel's state, the reconnect backoff, and the
//! heartbeat schedule. Uses the action pattern: methods take time as input and
//! return actions for the driver to execute. The driver performs the actual
//! transport calls and reports their outcome back (`connect_succeeded`,
//! `connection_lost`, ...).
//!
//! # State Machine
//!
//! ```text
//!                 start                connect ok
//! ┌──────────────┐─────>┌────────────┐──────────>┌───────────┐
//! │ Disconnected │      │ Connecting │           │ Connected │<──┐
//! └──────────────┘      └────────────┘           └───────────┘   │
//!        ^                 ^      │ lost               │ lost /  │ reconnected
//!        │ stop            │      │                    │ transport reconnecting
//!        │       retry due │      v                    v         │
//!        │              ┌──────────────┐<─────────────────────────┘
//!        └──────────────│ Reconnecting │
//!                       └──────────────┘
//!                              │ attempts exhausted
//!                              v
//!                         ┌────────┐   reconnect (stop + start)
//!                         │ Failed │──────────────────────────────> Connecting
//!                         └────────┘
//! ```
//!
//! Any state goes to `Disconnected` on `stop()`.

use std::time::Duration;

use crate::{env::Timepoint, error::SyncError, types::Session};

/// Default keepalive period while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Default first retry delay.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Default retry delay ceiling.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Default number of retries before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Connection state. Gates every outward operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel, not trying to open one.
    Disconnected,
    /// Channel open in progress.
    Connecting,
    /// Channel open; outward operations allowed.
    Connected,
    /// Channel lost; a retry is pending or the transport is reconnecting.
    Reconnecting,
    /// Retry budget exhausted; only an explicit reconnect leaves this state.
    Failed,
}

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Growth factor between consecutive retries.
    pub multiplier: u32,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    ///
    /// Non-decreasing in `attempt` and never above `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.multiplier
            .checked_pow(exponent)
            .map_or(self.max_delay, |factor| self.initial.saturating_mul(factor))
            .min(self.max_delay)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self { initial: DEFAULT_INITIAL_BACKOFF, multiplier: 2, max_delay: DEFAULT_MAX_BACKOFF }
    }
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Keepalive period while connected
    pub heartbeat_interval: Duration,
    /// Retry schedule after an unexpected close
    pub backoff: Backoff,
    /// Retries before entering [`ConnectionState::Failed`]
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            backoff: Backoff::default(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Actions returned by the connection state machine.
///
/// The driver executes these in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Register one handler per inbound event kind plus lifecycle callbacks,
    /// keeping every detach function.
    AttachHandlers,
    /// Open the transport with the current credential. Report the outcome
    /// through `connect_succeeded` or `connection_lost`.
    Connect {
        /// 0 for the initial connect, otherwise the retry number
        attempt: u32,
    },
    /// Invoke the keepalive. Failures are logged only.
    SendHeartbeat,
    /// Ask the server for the unread summary so derived views converge.
    RequestUnreadSummary,
    /// Clear presence and typing sets.
    ResetEphemeral,
    /// A retry was scheduled.
    RetryScheduled {
        /// Retry number (1-based)
        attempt: u32,
        /// Delay before the retry fires
        delay: Duration,
    },
    /// Call every stored detach function exactly once.
    DetachHandlers,
    /// Best-effort transport close.
    CloseTransport,
    /// State changed; surface to observers.
    StateChanged(ConnectionState),
}

/// Scheduled deadlines owned by the connection. Cancelled as a unit.
#[derive(Debug, Clone, Copy)]
struct Timers<I> {
    heartbeat_at: Option<I>,
    reconnect_at: Option<I>,
}

impl<I: Timepoint> Timers<I> {
    fn clear(&mut self) {
        self.heartbeat_at = None;
        self.reconnect_at = None;
    }

    fn next(&self) -> Option<I> {
        match (self.heartbeat_at, self.reconnect_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Connection lifecycle state machine.
///
/// Pure: no I/O, no clock. Generic over the instant type so the harness can
/// drive it on virtual time.
#[derive(Debug, Clone)]
pub struct Connection<I> {
    state: ConnectionState,
    config: ConnectionConfig,
    /// Retries scheduled since the last successful connect.
    attempts: u32,
    handlers_attached: bool,
    timers: Timers<I>,
    last_heartbeat_ack: Option<I>,
}

impl<I: Timepoint> Connection<I> {
    /// Create a connection in [`ConnectionState::Disconnected`].
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            config,
            attempts: 0,
            handlers_attached: false,
            timers: Timers { heartbeat_at: None, reconnect_at: None },
            last_heartbeat_ack: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Retries scheduled since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// `true` while inbound handlers are registered with the transport.
    pub fn handlers_attached(&self) -> bool {
        self.handlers_attached
    }

    /// Instant of the last heartbeat response.
    pub fn last_heartbeat_ack(&self) -> Option<I> {
        self.last_heartbeat_ack
    }

    /// Configuration in use.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Earliest pending deadline, if any. The driver should call `tick` then.
    pub fn next_deadline(&self) -> Option<I> {
        self.timers.next()
    }

    /// Open the channel.
    ///
    /// Guarded no-op while Connecting, Connected or Reconnecting: no second
    /// channel and no second handler registration.
    ///
    /// # Errors
    ///
    /// - `SyncError::Configuration` if there is no session
    /// - `SyncError::ReconnectExhausted` if in Failed; use `reconnect`
    pub fn start(
        &mut self,
        session: Option<&Session>,
    ) -> Result<Vec<ConnectionAction>, SyncError> {
        match self.state {
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Reconnecting => {
                tracing::debug!(state = ?self.state, "start ignored, already active");
                return Ok(Vec::new());
            },
            ConnectionState::Failed => {
                return Err(SyncError::ReconnectExhausted { attempts: self.attempts });
            },
            ConnectionState::Disconnected => {},
        }

        if session.is_none() {
            return Err(SyncError::Configuration(
                "cannot start without an identity and credential".to_string(),
            ));
        }

        let mut actions = Vec::new();
        if !self.handlers_attached {
            self.handlers_attached = true;
            actions.push(ConnectionAction::AttachHandlers);
        }
        actions.push(self.transition(ConnectionState::Connecting));
        actions.push(ConnectionAction::Connect { attempt: 0 });
        Ok(actions)
    }

    /// The transport reported a successful connect.
    pub fn connect_succeeded(&mut self, now: I) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Connecting {
            tracing::debug!(state = ?self.state, "stale connect result ignored");
            return Vec::new();
        }
        self.enter_connected(now)
    }

    /// The channel closed unexpectedly, or a connect attempt failed.
    ///
    /// Schedules the next retry, or enters Failed once the retry budget is
    /// spent.
    pub fn connection_lost(&mut self, now: I) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Failed => {
                return Vec::new();
            },
            ConnectionState::Reconnecting if self.timers.reconnect_at.is_some() => {
                return Vec::new();
            },
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Reconnecting => {},
        }

        self.timers.clear();
        let mut actions = vec![ConnectionAction::ResetEphemeral];

        if self.attempts >= self.config.max_reconnect_attempts {
            tracing::warn!(attempts = self.attempts, "reconnect attempts exhausted");
            actions.push(self.transition(ConnectionState::Failed));
            return actions;
        }

        self.attempts += 1;
        let delay = self.config.backoff.delay(self.attempts);
        self.timers.reconnect_at = Some(now + delay);
        tracing::warn!(attempt = self.attempts, ?delay, "connection lost, retry scheduled");

        actions.push(self.transition(ConnectionState::Reconnecting));
        actions.push(ConnectionAction::RetryScheduled { attempt: self.attempts, delay });
        actions
    }

    /// The transport started its own reconnect.
    pub fn transport_reconnecting(&mut self) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }
        self.timers.heartbeat_at = None;
        vec![self.transition(ConnectionState::Reconnecting), ConnectionAction::ResetEphemeral]
    }

    /// The transport finished its own reconnect.
    pub fn transport_reconnected(&mut self, now: I) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Reconnecting || self.timers.reconnect_at.is_some() {
            return Vec::new();
        }
        self.enter_connected(now)
    }

    /// Record a heartbeat response.
    pub fn heartbeat_acknowledged(&mut self, now: I) {
        self.last_heartbeat_ack = Some(now);
    }

    /// Fire due timers.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if let Some(at) = self.timers.reconnect_at
            && now >= at
        {
            self.timers.reconnect_at = None;
            tracing::info!(attempt = self.attempts, "retrying connect");
            actions.push(self.transition(ConnectionState::Connecting));
            actions.push(ConnectionAction::Connect { attempt: self.attempts });
        }

        if let Some(at) = self.timers.heartbeat_at
            && now >= at
            && self.state == ConnectionState::Connected
        {
            self.timers.heartbeat_at = Some(now + self.config.heartbeat_interval);
            actions.push(ConnectionAction::SendHeartbeat);
        }

        actions
    }

    /// Tear down. Safe to call repeatedly and from error paths.
    ///
    /// Always cancels timers, detaches handlers that are attached, closes the
    /// transport, and resets ephemeral state.
    pub fn stop(&mut self) -> Vec<ConnectionAction> {
        self.timers.clear();
        self.attempts = 0;
        self.last_heartbeat_ack = None;

        let mut actions = Vec::new();
        if self.handlers_attached {
            self.handlers_attached = false;
            actions.push(ConnectionAction::DetachHandlers);
        }
        actions.push(ConnectionAction::CloseTransport);
        actions.push(ConnectionAction::ResetEphemeral);
        if self.state != ConnectionState::Disconnected {
            actions.push(self.transition(ConnectionState::Disconnected));
        }
        actions
    }

    /// Full stop then start with the attempt counter reset. The only way out
    /// of Failed.
    ///
    /// # Errors
    ///
    /// - `SyncError::Configuration` if there is no session
    pub fn reconnect(
        &mut self,
        session: Option<&Session>,
    ) -> Result<Vec<ConnectionAction>, SyncError> {
        if session.is_none() {
            return Err(SyncError::Configuration("no session to reconnect".to_string()));
        }
        let mut actions = self.stop();
        actions.extend(self.start(session)?);
        Ok(actions)
    }

    /// Fail fast unless Connected.
    ///
    /// # Errors
    ///
    /// - `SyncError::ConnectionUnavailable` in any other state
    pub fn ensure_connected(&self, operation: &'static str) -> Result<(), SyncError> {
        if self.state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(SyncError::ConnectionUnavailable { state: self.state, operation })
        }
    }

    fn enter_connected(&mut self, now: I) -> Vec<ConnectionAction> {
        self.attempts = 0;
        self.timers.reconnect_at = None;
        self.timers.heartbeat_at = Some(now + self.config.heartbeat_interval);
        vec![
            self.transition(ConnectionState::Connected),
            ConnectionAction::ResetEphemeral,
            ConnectionAction::RequestUnreadSummary,
        ]
    }

    fn transition(&mut self, to: ConnectionState) -> ConnectionAction {
        tracing::info!(from = ?self.state, to = ?to, "connection state");
        self.state = to;
        ConnectionAction::StateChanged(to)
    }
}
