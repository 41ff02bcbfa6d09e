//! Turmoil-based Environment implementation for deterministic testing.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use karman_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Simulation environment using Turmoil's virtual time and a seeded RNG.
///
/// - **Virtual time**: `now()` and `sleep()` follow the simulation clock, so
///   reconnect backoffs and timeouts cost no wall-clock time.
/// - **Seeded RNG**: every id the protocol mints (connection ids, client
///   secrets, mutation ids) comes from `ChaCha20Rng`, so a seed replays the
///   same run.
///
/// Clones share one RNG stream.
///
/// # Usage
///
/// Time operations must run inside a Turmoil host or client.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SimEnv {
    /// Environment seeded with 0
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with a specific seed
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, dest: &mut [u8]) {
        // Turmoil is single-threaded; a poisoned lock still holds a valid RNG
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(dest);
    }
}
