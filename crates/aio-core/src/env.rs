//! Environment variable utilities
//!
//! Parse environment variables with a fallback default.
//!
//! # Usage
//!
//! ```ignore
//! use aio_core::env::{env_get, env_get_ms};
//!
//! let workers: usize = env_get("AIO_MAX_WORKERS", 32);
//! let lifetime = env_get_ms("AIO_WORKER_LIFETIME_MS", Duration::from_secs(30));
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get environment variable parsed as type T, or return default
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Get environment variable as a millisecond duration
#[inline]
pub fn env_get_ms(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
