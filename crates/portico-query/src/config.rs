//! Query cache configuration.

use std::time::Duration;

/// What happens to an entry once its last subscriber goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Remove the entry as soon as the subscriber count reaches zero.
    Immediate,
    /// Remove the entry if it stays unsubscribed for the given duration.
    GracePeriod(Duration),
    /// Never remove the entry automatically.
    Pinned,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::GracePeriod(Duration::from_secs(300))
    }
}

/// Configuration for a [`QueryCache`](crate::QueryCache).
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Eviction policy for unsubscribed entries.
    pub retention: RetentionPolicy,

    /// How long a settled result is served before the next invocation
    /// refetches it. `None` keeps results until they are invalidated.
    pub stale_time: Option<Duration>,
}

impl CacheConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retention policy.
    #[must_use]
    pub const fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Sets the stale time.
    #[must_use]
    pub const fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }
}
