use std::time::Duration;

use envconfig::Envconfig;

/// Operator settings read from the environment
#[derive(Debug, Envconfig)]
pub(crate) struct OperatorConfig {
    /// Namespace to watch, all namespaces if unset
    #[envconfig(from = "FUNKTION_NAMESPACE")]
    pub namespace: Option<String>,

    /// Interval of full re-lists of every watched kind
    #[envconfig(from = "FUNKTION_RESYNC_PERIOD_SECS", default = "30")]
    pub resync_period_secs: u64,

    /// Delay before a failed key is processed again
    #[envconfig(from = "FUNKTION_RETRY_DELAY_SECS", default = "3")]
    pub retry_delay_secs: u64,

    /// Interval of Deployment status checks while scaling down
    #[envconfig(from = "FUNKTION_TEARDOWN_POLL_MILLIS", default = "1000")]
    pub teardown_poll_millis: u64,

    /// Give up waiting for a Deployment to scale down after this many
    /// seconds. Waits forever if unset
    #[envconfig(from = "FUNKTION_TEARDOWN_TIMEOUT_SECS")]
    pub teardown_timeout_secs: Option<u64>,

    /// Time running tasks get to finish after a stop signal
    #[envconfig(from = "FUNKTION_SHUTDOWN_GRACE_SECS", default = "10")]
    pub shutdown_grace_secs: u64,
}

impl OperatorConfig {
    #[inline]
    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    #[inline]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    #[inline]
    pub fn teardown_poll_interval(&self) -> Duration {
        Duration::from_millis(self.teardown_poll_millis)
    }

    pub fn teardown_timeout(&self) -> Option<Duration> {
        self.teardown_timeout_secs.map(Duration::from_secs)
    }

    #[inline]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
