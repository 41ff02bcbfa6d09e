//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples protocol logic from system resources
//! (time and randomness). Every identifier the protocol mints (connection ids,
//! client secrets, mutation ids) is drawn from it, so a simulation seeded the
//! same way replays the same ids.
//!
//! The environment is implemented twice:
//!
//! 1. `SimEnv` (karman-harness): Turmoil's virtual time and a seeded RNG
//! 2. `SystemEnv` (karman-runtime): real system clock and OS entropy
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence

use std::time::Duration;

use uuid::Uuid;

/// Abstract environment providing time, randomness, and sleeping.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Type representing a point in time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Returns the current time. Never decreases.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code awaits this; state machines never sleep.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// Production implementations use OS entropy; simulations use a seeded
    /// RNG whose seed is logged for reproducibility.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a random version-4 UUID.
    ///
    /// Never nil, since the version and variant bits are always set.
    fn new_uuid(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}
