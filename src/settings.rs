//! Admission control settings, read from an optional file layered under `ADMISSION__*`
//! environment variables.

use crate::backend::LimiterConfig;
use crate::classifier::EndpointClassifier;
use crate::error::ConfigError;
use crate::gate::GateConfig;
use chrono::NaiveTime;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

pub const ENV_PREFIX: &str = "ADMISSION";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdmissionSettings {
    #[serde(default)]
    pub gate: GateSettings,
    #[serde(default)]
    pub limiter: LimiterSettings,
}

/// Time of day access hours, as `HH:MM` or `HH:MM:SS`.
#[derive(Debug, Clone, Deserialize)]
pub struct GateSettings {
    #[serde(default = "default_start_time")]
    pub start_time: String,
    #[serde(default = "default_end_time")]
    pub end_time: String,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            start_time: default_start_time(),
            end_time: default_end_time(),
        }
    }
}

fn default_start_time() -> String {
    "09:00:00".to_owned()
}

fn default_end_time() -> String {
    "18:00:00".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimiterSettings {
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
    /// Window length in seconds.
    #[serde(default = "default_time_window")]
    pub time_window: u64,
    #[serde(default = "default_protected_path_prefixes")]
    pub protected_path_prefixes: Vec<String>,
    /// Garbage collection interval in seconds, unset disables collection.
    #[serde(default)]
    pub gc_interval: Option<u64>,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            time_window: default_time_window(),
            protected_path_prefixes: default_protected_path_prefixes(),
            gc_interval: None,
        }
    }
}

fn default_max_requests() -> u64 {
    5
}

fn default_time_window() -> u64 {
    60
}

fn default_protected_path_prefixes() -> Vec<String> {
    vec!["/api/messages".to_owned()]
}

impl AdmissionSettings {
    /// Load settings from an optional file, overridden by environment variables such as
    /// `ADMISSION__LIMITER__MAX_REQUESTS=10`. Lists are comma separated.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("limiter.protected_path_prefixes"),
            )
            .build()?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        Ok(config.try_deserialize()?)
    }

    pub fn gate_config(&self) -> Result<GateConfig, ConfigError> {
        let start_time = parse_time("gate.start_time", &self.gate.start_time)?;
        let end_time = parse_time("gate.end_time", &self.gate.end_time)?;
        Ok(GateConfig::new(start_time, end_time))
    }

    pub fn limiter_config(&self) -> Result<LimiterConfig, ConfigError> {
        LimiterConfig::new(
            self.limiter.max_requests,
            Duration::from_secs(self.limiter.time_window),
        )
    }

    pub fn endpoint_classifier(&self) -> Result<EndpointClassifier, ConfigError> {
        if self.limiter.protected_path_prefixes.is_empty() {
            return Err(ConfigError::NoProtectedPaths);
        }
        Ok(EndpointClassifier::new(
            self.limiter.protected_path_prefixes.iter().cloned(),
        ))
    }

    pub fn gc_interval(&self) -> Result<Option<Duration>, ConfigError> {
        match self.limiter.gc_interval {
            Some(0) => Err(ConfigError::ZeroGcInterval),
            Some(secs) => Ok(Some(Duration::from_secs(secs))),
            None => Ok(None),
        }
    }

    /// Check every setting at once, so that a bad configuration fails at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gate_config()?;
        self.limiter_config()?;
        self.endpoint_classifier()?;
        self.gc_interval()?;
        Ok(())
    }

    /// Build the in-memory sliding window backend.
    ///
    /// Must be called within an actix runtime when garbage collection is enabled.
    #[cfg(feature = "dashmap")]
    pub fn sliding_window_backend(
        &self,
    ) -> Result<crate::backend::sliding_window::SlidingWindowBackend, ConfigError> {
        Ok(
            crate::backend::sliding_window::SlidingWindowBackend::builder(self.limiter_config()?)
                .with_gc_interval(self.gc_interval()?)
                .build(),
        )
    }
}

fn parse_time(field: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| ConfigError::InvalidTime {
            field,
            value: value.to_owned(),
        })
}
