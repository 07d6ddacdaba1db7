use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

/// Trait for abstracting time, enabling deterministic testing.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real clock backed by system time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fake clock for deterministic testing. Time only advances when told to.
#[derive(Clone)]
pub struct FakeClock {
    time: Arc<RwLock<DateTime<Utc>>>,
}

impl FakeClock {
    /// Create a FakeClock pinned to the given instant.
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: Arc::new(RwLock::new(time)),
        }
    }

    /// Set the clock to a specific instant.
    pub fn set(&self, time: DateTime<Utc>) {
        *self.time.write().unwrap_or_else(|e| e.into_inner()) = time;
    }

    /// Advance the clock by a chrono::Duration.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut t = self.time.write().unwrap_or_else(|e| e.into_inner());
        *t += duration;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.read().unwrap_or_else(|e| e.into_inner())
    }
}
