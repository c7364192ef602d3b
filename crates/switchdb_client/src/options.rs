//! Client configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::transport::TlsConnector;

/// Which monitor notification dialect a session asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorDialect {
    /// `update` notifications with full `{old, new}` rows.
    Classic,
    /// `update2` notifications carrying per-column differences.
    #[default]
    Differential,
}

/// Session options.
#[derive(Clone)]
pub struct Options {
    /// The database to monitor and transact against.
    pub database: String,
    /// Notification dialect requested from the server.
    pub dialect: MonitorDialect,
    /// Refuse servers that are not the raft leader for the database.
    pub leader_only: bool,
    /// Reconnect automatically when the connection drops.
    pub reconnect: bool,
    /// Idle interval after which an echo probe is sent.
    pub inactivity_probe: Duration,
    /// Deadline applied to every call.
    pub request_timeout: Duration,
    /// Backoff applied between connection attempts.
    pub backoff: Backoff,
    /// Capacity of the cache event queue.
    pub event_queue: usize,
    /// TLS connector for `ssl:` endpoints.
    pub tls: Option<Arc<dyn TlsConnector>>,
}

impl Options {
    /// Options for `database` with the defaults above.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            dialect: MonitorDialect::default(),
            leader_only: false,
            reconnect: true,
            inactivity_probe: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            backoff: Backoff::default(),
            event_queue: 4096,
            tls: None,
        }
    }

    /// Sets the notification dialect.
    pub fn with_dialect(mut self, dialect: MonitorDialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Requires the server to be the raft leader for the database.
    pub fn with_leader_only(mut self, leader_only: bool) -> Self {
        self.leader_only = leader_only;
        self
    }

    /// Enables or disables automatic reconnection.
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the idle interval before an echo probe.
    pub fn with_inactivity_probe(mut self, interval: Duration) -> Self {
        self.inactivity_probe = interval;
        self
    }

    /// Sets the per-call deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the connection backoff.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the cache event queue capacity.
    pub fn with_event_queue(mut self, capacity: usize) -> Self {
        self.event_queue = capacity;
        self
    }

    /// Installs the TLS connector used for `ssl:` endpoints.
    pub fn with_tls(mut self, tls: Arc<dyn TlsConnector>) -> Self {
        self.tls = Some(tls);
        self
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("database", &self.database)
            .field("dialect", &self.dialect)
            .field("leader_only", &self.leader_only)
            .field("reconnect", &self.reconnect)
            .field("inactivity_probe", &self.inactivity_probe)
            .field("request_timeout", &self.request_timeout)
            .field("backoff", &self.backoff)
            .field("event_queue", &self.event_queue)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Exponential backoff between connection attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Attempts before [`crate::ClientError::ReconnectFailed`] is raised.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Ceiling for the growing delay.
    pub max_delay: Duration,
    /// Growth factor applied per failure.
    pub multiplier: f64,
}

impl Backoff {
    /// A single attempt with no delay.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// The delay before attempt number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let grown = self.initial_delay.as_secs_f64()
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(grown.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_builder() {
        let options = Options::new("Open_vSwitch")
            .with_dialect(MonitorDialect::Classic)
            .with_leader_only(true)
            .with_request_timeout(Duration::from_secs(3));
        assert_eq!(options.database, "Open_vSwitch");
        assert_eq!(options.dialect, MonitorDialect::Classic);
        assert!(options.leader_only);
        assert_eq!(options.request_timeout, Duration::from_secs(3));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = Backoff {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(5), Duration::from_millis(500));
    }
}
