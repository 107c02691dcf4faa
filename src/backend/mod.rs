mod input_builder;

#[cfg(feature = "dashmap")]
#[cfg_attr(docsrs, doc(cfg(feature = "dashmap")))]
pub mod sliding_window;

pub use input_builder::{ClientKeyFunctionBuilder, ClientKeyFuture};
use std::fmt::{Display, Formatter};
use std::future::Future;

use crate::error::ConfigError;
use actix_web::rt::time::Instant;
use std::time::Duration;

/// Key substituted when the client's origin can not be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Self::Allowed
        } else {
            Self::Denied
        }
    }

    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn is_denied(self) -> bool {
        matches!(self, Self::Denied)
    }
}

/// Describes an implementation of a rate limiting store and algorithm.
///
/// A Backend is required to implement [Clone], usually this means wrapping your data store within
/// an [Arc](std::sync::Arc), so that every worker shares the same state.
pub trait Backend<I: 'static = ClientKey>: Clone {
    type Output;
    type Error;

    /// Process an incoming request.
    ///
    /// Returns whether to allow or deny the request, and arbitrary output that can be used
    /// to transform the allowed and denied responses.
    fn request(&self, input: I) -> impl Future<Output = Result<(Decision, Self::Output), Self::Error>>;
}

/// Identifies the origin of a request, partitioning the rate limit state.
///
/// Not guaranteed to be unique per physical client (clients behind a shared NAT, or
/// requests without any address information, share a key).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The sentinel key used when no address is available.
    pub fn unknown() -> Self {
        Self(UNKNOWN_CLIENT.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_CLIENT
    }
}

impl Display for ClientKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Limits shared by every key of a backend.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LimiterConfig {
    /// The total requests to be allowed within the window.
    pub max_requests: u64,
    /// Length of the trailing window.
    pub time_window: Duration,
}

impl LimiterConfig {
    /// Validated constructor, both parameters must be non-zero and the window must fit the
    /// monotonic clock.
    pub fn new(max_requests: u64, time_window: Duration) -> Result<Self, ConfigError> {
        if max_requests == 0 {
            return Err(ConfigError::ZeroMaxRequests);
        }
        if time_window.is_zero() {
            return Err(ConfigError::ZeroTimeWindow);
        }
        if Instant::now().checked_add(time_window).is_none() {
            return Err(ConfigError::TimeWindowTooLarge(time_window));
        }
        Ok(Self {
            max_requests,
            time_window,
        })
    }
}

/// Rounds a duration up to whole seconds, so that waiting that many seconds is always enough.
pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}
