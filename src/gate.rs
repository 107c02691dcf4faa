use crate::backend::Decision;
use chrono::{NaiveTime, Timelike};

/// The interval of the day during which requests are admitted.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct GateConfig {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl GateConfig {
    /// Windows crossing midnight (`start_time > end_time`) are not supported; such a gate never
    /// admits a request.
    pub fn new(start_time: NaiveTime, end_time: NaiveTime) -> Self {
        if start_time > end_time {
            log::warn!(
                "Access window {start_time} - {end_time} crosses midnight, no request will be admitted"
            );
        }
        Self {
            start_time,
            end_time,
        }
    }
}

/// Admits requests based solely on the time of day.
///
/// Holds no state besides its configuration, a single instance can be shared by every request.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindowGate {
    config: GateConfig,
}

impl TimeWindowGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> GateConfig {
        self.config
    }

    /// Allowed iff `start_time <= now <= end_time`, both bounds inclusive.
    ///
    /// Compared at whole second resolution, any fraction of a second in `now` is ignored.
    pub fn admit(&self, now: NaiveTime) -> Decision {
        let now = now.with_nanosecond(0).unwrap_or(now);
        Decision::from_allowed(self.config.start_time <= now && now <= self.config.end_time)
    }
}
