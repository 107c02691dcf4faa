//! Configuration errors, fatal at startup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to load configuration: {0}")]
    Load(
        #[source]
        #[from]
        config::ConfigError,
    ),
    #[error("Invalid time of day for {field}: {value:?} (expected HH:MM or HH:MM:SS)")]
    InvalidTime { field: &'static str, value: String },
    #[error("limiter.max_requests must be greater than zero")]
    ZeroMaxRequests,
    #[error("limiter.time_window must be greater than zero")]
    ZeroTimeWindow,
    #[error("limiter.time_window of {0:?} is too large")]
    TimeWindowTooLarge(std::time::Duration),
    #[error("limiter.gc_interval must be greater than zero")]
    ZeroGcInterval,
    #[error("limiter.protected_path_prefixes must not be empty")]
    NoProtectedPaths,
}
