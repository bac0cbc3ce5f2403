//! Aggregate configuration.

use crate::{
    connection::ConnectionConfig, error::SyncError, notify::NotifierConfig, session::SessionConfig,
};

/// Every tunable of the sync core, with documented defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncConfig {
    /// Connection lifecycle: heartbeat and backoff
    pub connection: ConnectionConfig,
    /// Notification facade: dedup window and durations
    pub notifier: NotifierConfig,
    /// Identity switching: settle delay and persisted prefix
    pub session: SessionConfig,
}

impl SyncConfig {
    /// Reject configurations the state machines cannot honor.
    ///
    /// # Errors
    ///
    /// - `SyncError::Configuration` if the settle delay is not longer than
    ///   the first reconnect delay, the retry budget is zero, or the
    ///   heartbeat interval is zero
    pub fn validate(&self) -> Result<(), SyncError> {
        let backoff = &self.connection.backoff;

        if self.session.settle_delay <= backoff.initial {
            return Err(SyncError::Configuration(format!(
                "settle delay {:?} must exceed initial reconnect delay {:?}",
                self.session.settle_delay, backoff.initial
            )));
        }
        if self.connection.max_reconnect_attempts == 0 {
            return Err(SyncError::Configuration(
                "max_reconnect_attempts must be at least 1".to_string(),
            ));
        }
        if self.connection.heartbeat_interval.is_zero() {
            return Err(SyncError::Configuration("heartbeat interval must be non-zero".to_string()));
        }
        Ok(())
    }
}
