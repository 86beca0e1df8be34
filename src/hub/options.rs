use super::error::HubError;
use std::time::Duration;

/// Client id the daemon listens on unless configured otherwise
pub const DEFAULT_DAEMON_ID: &str = "daemon";
/// Number of concurrent method executions per client
pub const DEFAULT_WORKERS: usize = 8;
/// Timeout for service publishing and lookup
pub const DEFAULT_DIRECTORY_TIMEOUT: Duration = Duration::from_millis(2000);
/// Pause between two pings of a client
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(10000);
/// Timeout for a single ping
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(3000);
/// Consecutive failed pings after which a client is evicted
pub const DEFAULT_MAX_MISSED_PINGS: u32 = 3;

/// Configuration of a [`Hub`](super::Hub)
#[derive(Debug, Clone, PartialEq)]
pub struct HubOptions {
    /// Identity of this process on the broker
    pub client_id: String,
    /// Identity of the daemon
    pub daemon_id: String,
    /// Whether this process is the daemon
    pub daemon: bool,
    /// Size of the method execution pool, unused by the daemon
    pub workers: usize,
    /// Timeout for service publishing and lookup
    pub directory_timeout: Duration,
    /// Pause between two pings of a client, daemon only
    pub ping_interval: Duration,
    /// Timeout for a single ping, daemon only
    pub ping_timeout: Duration,
    /// Consecutive failed pings after which a client is evicted, daemon only
    pub max_missed_pings: u32,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            client_id: uuid::Uuid::new_v4().to_hyphenated().to_string(),
            daemon_id: DEFAULT_DAEMON_ID.to_owned(),
            daemon: false,
            workers: DEFAULT_WORKERS,
            directory_timeout: DEFAULT_DIRECTORY_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            max_missed_pings: DEFAULT_MAX_MISSED_PINGS,
        }
    }
}

impl HubOptions {
    /// Options for a regular client with the given identity
    pub fn client(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_owned(),
            ..Default::default()
        }
    }

    /// Options for the daemon, which uses the daemon id as its own identity
    pub fn daemon() -> Self {
        Self {
            client_id: DEFAULT_DAEMON_ID.to_owned(),
            daemon: true,
            ..Default::default()
        }
    }

    /// Changes the identity of the daemon. For the daemon itself this changes its own identity too.
    pub fn with_daemon_id(mut self, daemon_id: &str) -> Self {
        self.daemon_id = daemon_id.to_owned();
        if self.daemon {
            self.client_id = daemon_id.to_owned();
        }
        self
    }

    /// Changes the size of the method execution pool
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Changes the timeout for service publishing and lookup
    pub fn with_directory_timeout(mut self, timeout: Duration) -> Self {
        self.directory_timeout = timeout;
        self
    }

    /// Changes how clients are pinged
    pub fn with_liveness(mut self, interval: Duration, timeout: Duration, max_missed: u32) -> Self {
        self.ping_interval = interval;
        self.ping_timeout = timeout;
        self.max_missed_pings = max_missed;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), HubError> {
        let valid_id = |id: &str| !id.is_empty() && !id.contains(|c| c == '/' || c == '*');

        if !valid_id(&self.client_id) {
            return Err(HubError::InvalidOptions(format!(
                "client id {:?} must be non-empty and free of '/' and '*'",
                self.client_id
            )));
        }

        if !valid_id(&self.daemon_id) {
            return Err(HubError::InvalidOptions(format!(
                "daemon id {:?} must be non-empty and free of '/' and '*'",
                self.daemon_id
            )));
        }

        if self.daemon && self.client_id != self.daemon_id {
            return Err(HubError::InvalidOptions(
                "the daemon has to use the daemon id as its client id".into(),
            ));
        }

        if !self.daemon && self.client_id == self.daemon_id {
            return Err(HubError::InvalidOptions(
                "a client may not use the daemon id".into(),
            ));
        }

        if !self.daemon && self.workers == 0 {
            return Err(HubError::InvalidOptions(
                "at least one worker is required".into(),
            ));
        }

        if self.daemon && self.max_missed_pings == 0 {
            return Err(HubError::InvalidOptions(
                "the missed ping threshold has to be positive".into(),
            ));
        }

        Ok(())
    }
}
