//! Simulated environment for deterministic testing.
//!
//! Monotonic time is tokio's clock, so tests running with a paused runtime
//! (`#[tokio::test(start_paused = true)]`) advance it virtually. The wall
//! clock is a fixed epoch plus elapsed virtual time, and randomness comes
//! from a seeded `ChaCha20Rng`. The same seed and the same script give the
//! same run.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use souk_core::Environment;
use tokio::time::Instant;

/// Wall-clock origin of every simulation: 2026-01-01T00:00:00Z.
const SIM_EPOCH_SECS: i64 = 1_767_225_600;

/// Deterministic environment on tokio's (pausable) clock.
#[derive(Debug, Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    origin: Instant,
    epoch: DateTime<Utc>,
}

impl SimEnv {
    /// Create an environment seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            origin: Instant::now(),
            epoch: DateTime::from_timestamp(SIM_EPOCH_SECS, 0).unwrap_or(DateTime::UNIX_EPOCH),
        }
    }

    /// Virtual time since creation.
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Wall-clock time at simulation start.
    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }
}

impl Environment for SimEnv {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.elapsed()).unwrap_or(TimeDelta::MAX);
        self.epoch.checked_add_signed(elapsed).unwrap_or(self.epoch)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
