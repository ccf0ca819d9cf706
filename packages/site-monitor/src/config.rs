use std::time::Duration;

/// Runtime configuration for the scheduler and the check procedure
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Period between scheduler ticks
    pub tick_interval: Duration,
    /// Deadline for a single extractor fetch
    pub fetch_timeout: Duration,
    /// Deadline for delivering one notification
    pub notify_timeout: Duration,
    /// Upper bound on concurrent checks (and so outbound requests)
    pub max_concurrent_checks: usize,
    /// Notify when a hash-mode site gets its first hash.
    /// Defaults to `false`: a first hash only establishes state.
    pub notify_on_first_seen: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(10),
            notify_timeout: Duration::from_secs(10),
            max_concurrent_checks: 4,
            notify_on_first_seen: false,
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_checks(mut self, max: usize) -> Self {
        self.max_concurrent_checks = max.max(1);
        self
    }

    pub fn with_notify_on_first_seen(mut self, notify: bool) -> Self {
        self.notify_on_first_seen = notify;
        self
    }
}
