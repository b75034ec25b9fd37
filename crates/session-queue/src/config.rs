//! Configuration for the turn orchestrator and its background loops.

use std::time::Duration;

/// Timing configuration for session turn processing.
///
/// All values are plain durations with documented defaults; there is no
/// other externally observable protocol.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// How long a caller waits to acquire the session mutex.
    pub mutex_wait_timeout: Duration,
    /// Interval between mutex acquisition attempts while waiting.
    pub mutex_retry_interval: Duration,
    /// How long a lease on a session survives without being released.
    /// Must comfortably exceed `execution_timeout + reclaim_safety_margin`
    /// so a healthy turn never loses its lease mid-execution.
    pub lease_ttl: Duration,
    /// Upper bound on one invocation of the execution collaborator.
    pub execution_timeout: Duration,
    /// Extra slack beyond `execution_timeout` before a processing item is
    /// considered stuck.
    pub reclaim_safety_margin: Duration,
    /// Interval between heartbeat upserts.
    pub heartbeat_interval: Duration,
    /// How old a heartbeat may be before its worker counts as dead.
    pub heartbeat_grace_period: Duration,
    /// How long a caller waits for a peer to finish its request.
    pub completion_wait_timeout: Duration,
    /// Interval between completion waiter ledger polls.
    pub completion_poll_interval: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        let execution_timeout = Duration::from_secs(60);
        let reclaim_safety_margin = Duration::from_secs(30);

        Self {
            mutex_wait_timeout: Duration::from_secs(30),
            mutex_retry_interval: Duration::from_millis(100),
            lease_ttl: execution_timeout + reclaim_safety_margin + Duration::from_secs(30),
            execution_timeout,
            reclaim_safety_margin,
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_grace_period: Duration::from_secs(45),
            completion_wait_timeout: Duration::from_secs(120),
            completion_poll_interval: Duration::from_millis(500),
        }
    }
}

impl TurnConfig {
    /// Create a config for testing with short intervals.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            mutex_wait_timeout: Duration::from_secs(5),
            mutex_retry_interval: Duration::from_millis(10),
            lease_ttl: Duration::from_secs(10),
            execution_timeout: Duration::from_secs(2),
            reclaim_safety_margin: Duration::from_millis(500),
            heartbeat_interval: Duration::from_millis(100),
            heartbeat_grace_period: Duration::from_millis(400),
            completion_wait_timeout: Duration::from_secs(5),
            completion_poll_interval: Duration::from_millis(25),
        }
    }

    /// The cutoff after which a processing item counts as stuck.
    #[must_use]
    pub fn stuck_cutoff(&self) -> Duration {
        self.execution_timeout + self.reclaim_safety_margin
    }

    /// Set the mutex wait timeout.
    #[must_use]
    pub const fn with_mutex_wait_timeout(mut self, timeout: Duration) -> Self {
        self.mutex_wait_timeout = timeout;
        self
    }

    /// Set the mutex retry interval.
    #[must_use]
    pub const fn with_mutex_retry_interval(mut self, interval: Duration) -> Self {
        self.mutex_retry_interval = interval;
        self
    }

    /// Set the lease time-to-live.
    #[must_use]
    pub const fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Set the execution timeout.
    #[must_use]
    pub const fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Set the reclaim safety margin.
    #[must_use]
    pub const fn with_reclaim_safety_margin(mut self, margin: Duration) -> Self {
        self.reclaim_safety_margin = margin;
        self
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the heartbeat grace period.
    #[must_use]
    pub const fn with_heartbeat_grace_period(mut self, grace: Duration) -> Self {
        self.heartbeat_grace_period = grace;
        self
    }

    /// Set the completion wait timeout.
    #[must_use]
    pub const fn with_completion_wait_timeout(mut self, timeout: Duration) -> Self {
        self.completion_wait_timeout = timeout;
        self
    }

    /// Set the completion poll interval.
    #[must_use]
    pub const fn with_completion_poll_interval(mut self, interval: Duration) -> Self {
        self.completion_poll_interval = interval;
        self
    }
}
