//! Manager Configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use aio_executor::config::AioConfig;
//!
//! // Defaults with env overrides
//! let config = AioConfig::from_env();
//!
//! // Or customize programmatically
//! let config = AioConfig::new()
//!     .max_workers(8)
//!     .worker_lifetime(Duration::from_secs(5));
//! ```

use aio_core::env::{env_get, env_get_ms};
use std::time::Duration;
use thiserror::Error;

/// Library defaults.
pub mod defaults {
    /// Upper bound on worker threads.
    pub const MAX_WORKERS: usize = 32;
    /// Idle workers are kept down to this count.
    pub const TARGET_WORKERS: usize = 4;
    /// Outstanding requests across all callers.
    pub const MAX_QUEUED: usize = 1024;
    /// Direct-path transfers in flight across all callers.
    pub const MAX_BUFFERS: usize = 16;
    pub const CALLER_MAX_ACTIVE: usize = 32;
    pub const CALLER_MAX_QUEUED: usize = 256;
    pub const CALLER_MAX_BUFFERS: usize = 16;
    /// Largest direct-path transfer (128 KiB).
    pub const MAX_TRANSFER: usize = 128 * 1024;
    /// Largest batch, and bound on a suspend list.
    pub const LISTIO_MAX: usize = 16;
    pub const WORKER_LIFETIME_MS: u64 = 30_000;
    pub const WORKER_START_TIMEOUT_MS: u64 = 10_000;
    pub const RUNDOWN_WAIT_MS: u64 = 10_000;
}

/// Global tunables.
#[derive(Debug, Clone)]
pub struct AioConfig {
    pub max_workers: usize,
    pub target_workers: usize,
    pub max_queued: usize,
    pub max_buffers: usize,
    /// Per-caller defaults, see `CallerLimits`.
    pub caller_max_active: usize,
    pub caller_max_queued: usize,
    pub caller_max_buffers: usize,
    pub max_transfer: usize,
    pub listio_max: usize,
    /// Idle time after which a worker above the target count exits.
    pub worker_lifetime: Duration,
    /// How long worker creation waits for the new worker to report ready.
    pub worker_start_timeout: Duration,
    /// One slice of the rundown wait; the wait is retried after each.
    pub rundown_wait: Duration,
}

impl Default for AioConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl AioConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `AIO_MAX_WORKERS`, `AIO_TARGET_WORKERS`
    /// - `AIO_MAX_QUEUED`, `AIO_MAX_BUFFERS`
    /// - `AIO_CALLER_MAX_ACTIVE`, `AIO_CALLER_MAX_QUEUED`, `AIO_CALLER_MAX_BUFFERS`
    /// - `AIO_MAX_TRANSFER`, `AIO_LISTIO_MAX`
    /// - `AIO_WORKER_LIFETIME_MS`, `AIO_WORKER_START_TIMEOUT_MS`, `AIO_RUNDOWN_WAIT_MS`
    pub fn from_env() -> Self {
        Self {
            max_workers: env_get("AIO_MAX_WORKERS", defaults::MAX_WORKERS),
            target_workers: env_get("AIO_TARGET_WORKERS", defaults::TARGET_WORKERS),
            max_queued: env_get("AIO_MAX_QUEUED", defaults::MAX_QUEUED),
            max_buffers: env_get("AIO_MAX_BUFFERS", defaults::MAX_BUFFERS),
            caller_max_active: env_get("AIO_CALLER_MAX_ACTIVE", defaults::CALLER_MAX_ACTIVE),
            caller_max_queued: env_get("AIO_CALLER_MAX_QUEUED", defaults::CALLER_MAX_QUEUED),
            caller_max_buffers: env_get("AIO_CALLER_MAX_BUFFERS", defaults::CALLER_MAX_BUFFERS),
            max_transfer: env_get("AIO_MAX_TRANSFER", defaults::MAX_TRANSFER),
            listio_max: env_get("AIO_LISTIO_MAX", defaults::LISTIO_MAX),
            worker_lifetime: env_get_ms(
                "AIO_WORKER_LIFETIME_MS",
                Duration::from_millis(defaults::WORKER_LIFETIME_MS),
            ),
            worker_start_timeout: env_get_ms(
                "AIO_WORKER_START_TIMEOUT_MS",
                Duration::from_millis(defaults::WORKER_START_TIMEOUT_MS),
            ),
            rundown_wait: env_get_ms(
                "AIO_RUNDOWN_WAIT_MS",
                Duration::from_millis(defaults::RUNDOWN_WAIT_MS),
            ),
        }
    }

    /// Library defaults, no environment lookup.
    pub fn new() -> Self {
        Self {
            max_workers: defaults::MAX_WORKERS,
            target_workers: defaults::TARGET_WORKERS,
            max_queued: defaults::MAX_QUEUED,
            max_buffers: defaults::MAX_BUFFERS,
            caller_max_active: defaults::CALLER_MAX_ACTIVE,
            caller_max_queued: defaults::CALLER_MAX_QUEUED,
            caller_max_buffers: defaults::CALLER_MAX_BUFFERS,
            max_transfer: defaults::MAX_TRANSFER,
            listio_max: defaults::LISTIO_MAX,
            worker_lifetime: Duration::from_millis(defaults::WORKER_LIFETIME_MS),
            worker_start_timeout: Duration::from_millis(defaults::WORKER_START_TIMEOUT_MS),
            rundown_wait: Duration::from_millis(defaults::RUNDOWN_WAIT_MS),
        }
    }

    // Builder methods

    /// Also lowers `target_workers` to `n` if needed.
    pub fn max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self.target_workers = self.target_workers.min(n);
        self
    }

    pub fn target_workers(mut self, n: usize) -> Self {
        self.target_workers = n;
        self
    }

    pub fn max_queued(mut self, n: usize) -> Self {
        self.max_queued = n;
        self
    }

    pub fn max_buffers(mut self, n: usize) -> Self {
        self.max_buffers = n;
        self
    }

    pub fn caller_max_active(mut self, n: usize) -> Self {
        self.caller_max_active = n;
        self
    }

    pub fn caller_max_queued(mut self, n: usize) -> Self {
        self.caller_max_queued = n;
        self
    }

    pub fn caller_max_buffers(mut self, n: usize) -> Self {
        self.caller_max_buffers = n;
        self
    }

    pub fn max_transfer(mut self, bytes: usize) -> Self {
        self.max_transfer = bytes;
        self
    }

    pub fn listio_max(mut self, n: usize) -> Self {
        self.listio_max = n;
        self
    }

    pub fn worker_lifetime(mut self, d: Duration) -> Self {
        self.worker_lifetime = d;
        self
    }

    pub fn worker_start_timeout(mut self, d: Duration) -> Self {
        self.worker_start_timeout = d;
        self
    }

    pub fn rundown_wait(mut self, d: Duration) -> Self {
        self.rundown_wait = d;
        self
    }

    /// Per-caller limits derived from the global defaults.
    pub fn caller_limits(&self) -> CallerLimits {
        CallerLimits {
            max_active: self.caller_max_active,
            max_queued: self.caller_max_queued,
            max_buffers: self.caller_max_buffers,
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidValue("max_workers must be > 0"));
        }
        if self.target_workers > self.max_workers {
            return Err(ConfigError::InvalidValue("target_workers must be <= max_workers"));
        }
        if self.max_queued == 0 {
            return Err(ConfigError::InvalidValue("max_queued must be > 0"));
        }
        if self.caller_max_active == 0 {
            return Err(ConfigError::InvalidValue("caller_max_active must be > 0"));
        }
        if self.listio_max == 0 {
            return Err(ConfigError::InvalidValue("listio_max must be > 0"));
        }
        if self.rundown_wait.is_zero() {
            return Err(ConfigError::InvalidValue("rundown_wait must be > 0"));
        }
        Ok(())
    }
}

/// Quotas of one caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerLimits {
    /// Requests running on workers at once.
    pub max_active: usize,
    /// Outstanding (not yet reclaimed) requests.
    pub max_queued: usize,
    /// Outstanding direct-path requests.
    pub max_buffers: usize,
}

impl Default for CallerLimits {
    fn default() -> Self {
        AioConfig::new().caller_limits()
    }
}

impl CallerLimits {
    pub fn max_active(mut self, n: usize) -> Self {
        self.max_active = n;
        self
    }

    pub fn max_queued(mut self, n: usize) -> Self {
        self.max_queued = n;
        self
    }

    pub fn max_buffers(mut self, n: usize) -> Self {
        self.max_buffers = n;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    InvalidValue(&'static str),
}
