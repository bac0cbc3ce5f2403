//! Environment abstraction for deterministic testing.
//!
//! Decouples sync logic from system resources (monotonic time, wall-clock
//! time, randomness). Enables deterministic simulation with a virtual clock
//! and seeded RNG, and production use with real system resources.

use std::{
    fmt::Debug,
    ops::{Add, Sub},
    time::Duration,
};

use chrono::{DateTime, Utc};

/// Monotonic instant usable by the state machines.
///
/// Blanket-implemented for any type with the required arithmetic, which
/// covers both `std::time::Instant` and `tokio::time::Instant`.
pub trait Timepoint:
    Copy + Ord + Debug + Send + Sync + Add<Duration, Output = Self> + Sub<Output = Duration>
{
    /// Time remaining until `deadline`, zero if it already passed.
    fn until(self, deadline: Self) -> Duration {
        if deadline > self { deadline - self } else { Duration::ZERO }
    }
}

impl<T> Timepoint for T where
    T: Copy + Ord + Debug + Send + Sync + Add<Duration, Output = T> + Sub<Output = Duration>
{
}

/// Abstract environment providing time, randomness, and async sleeping.
///
/// # Invariants
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `wall_clock()` is only used for display timestamps, never for ordering
///   timers
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while simulation
    /// environments use virtual time (`tokio::time::Instant` with a paused
    /// clock).
    type Instant: Timepoint;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time, used to stamp locally created messages and
    /// notification records.
    fn wall_clock(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code sleeps. The state machines never do.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// Given the same RNG seed, this produces the same sequence of bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
