//! Production Environment implementation using system time and RNG.
//!
//! `SystemEnv` uses real monotonic and wall-clock time, tokio sleeps, and the
//! OS RNG. Behavior is non-deterministic; use the harness `SimEnv` in tests.

use std::time::Duration;

use chrono::{DateTime, Utc};
use souk_core::Environment;

/// Production environment using system time and OS randomness.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails. That indicates an OS-level
/// fault the process cannot recover from.
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}
