//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Auto-completion worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often the scanner looks for eligible tasks.
    pub scan_interval: Duration,
    /// Minimum task age before it qualifies for auto-completion.
    pub complete_after: Duration,
    /// Completion queue capacity.
    pub queue_capacity: usize,
    /// How long the scanner waits on a full queue before deferring a task.
    pub enqueue_timeout: Duration,
    /// How long `submit` waits on a full queue before failing.
    pub submit_timeout: Duration,
    /// Upper bound on any single store call, so shutdown cannot wedge
    /// behind a hung store.
    pub store_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60),
            complete_after: Duration::from_secs(30 * 60), // 30 minutes
            queue_capacity: 100,
            enqueue_timeout: Duration::from_millis(100),
            submit_timeout: Duration::from_secs(5),
            store_timeout: Duration::from_secs(10),
        }
    }
}

impl WorkerConfig {
    /// Build a config from `TASKWARDEN_*` environment variables.
    ///
    /// Unset variables use the defaults; a variable that is set but
    /// unparsable is a hard error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            scan_interval: Duration::from_secs(env_u64(
                "TASKWARDEN_SCAN_INTERVAL_SECS",
                defaults.scan_interval.as_secs(),
            )?),
            complete_after: Duration::from_secs(
                60 * env_u64("TASKWARDEN_AUTO_COMPLETE_MINUTES", 30)?,
            ),
            queue_capacity: env_u64("TASKWARDEN_QUEUE_CAPACITY", defaults.queue_capacity as u64)?
                as usize,
            enqueue_timeout: defaults.enqueue_timeout,
            submit_timeout: defaults.submit_timeout,
            store_timeout: defaults.store_timeout,
        })
    }
}

/// Read an integer environment variable, falling back to `default` when unset.
fn env_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected an integer, got {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}
