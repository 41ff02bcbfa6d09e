//! Production environment: system clock and OS entropy.

use std::time::{Duration, Instant};

use karman_core::Environment;

/// Environment backed by the real clock and the OS RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create the system environment
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        // Identities and secrets come from here; running without entropy is
        // not an option.
        getrandom::fill(buffer).expect("OS entropy source unavailable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_are_random_v4() {
        let env = SystemEnv::new();
        let a = env.new_uuid();
        let b = env.new_uuid();
        assert_ne!(a, b);
        assert_eq!(a.get_version_num(), 4);
    }
}
