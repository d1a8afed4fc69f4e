use std::{collections::HashMap, fs, time::Duration};

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::core::{FetchError, FetchResult};

#[derive(Default, Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    #[serde(default)]
    #[validate(nested)]
    pub cache: Cache,

    #[serde(default)]
    #[validate(nested)]
    pub batch: Batch,

    #[serde(default)]
    #[validate(nested)]
    pub metrics: Metrics,

    #[serde(default)]
    #[validate(nested)]
    pub transport: Transport,

    pub log: Option<Log>,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> FetchResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path).map_err(|e| {
            crate::config_error!("Unable to read conf file from {path}: {e}")
        })?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> FetchResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str)
            .map_err(|e| crate::config_error!("Unable to parse yaml conf: {e}"))?;

        trace!("Loaded conf: {conf:?}");

        // use validator to validate conf file
        conf.validate()
            .map_err(|e| FetchError::Configuration(format!("Conf file valid failed: {e}")))?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> FetchResult<String> {
        serde_yaml::to_string(self).map_err(|e| crate::internal_error!(e))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Cache {
    /// Default time-to-live in milliseconds.
    #[serde(default = "Cache::default_ttl_ms")]
    pub default_ttl: u64,
    /// Background sweep interval in milliseconds, 0 disables the sweeper.
    #[serde(default = "Cache::default_sweep_interval")]
    pub sweep_interval: u64,
}

impl Cache {
    fn default_ttl_ms() -> u64 {
        300_000
    }

    fn default_sweep_interval() -> u64 {
        60_000
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval > 0).then(|| Duration::from_millis(self.sweep_interval))
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            default_ttl: Self::default_ttl_ms(),
            sweep_interval: Self::default_sweep_interval(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Batch {
    /// Debounce window in milliseconds.
    #[serde(default = "Batch::default_delay")]
    #[validate(range(min = 1))]
    pub delay: u64,
}

impl Batch {
    fn default_delay() -> u64 {
        50
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay)
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self {
            delay: Self::default_delay(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Metrics::validate_recent_window"))]
pub struct Metrics {
    #[serde(default = "Metrics::default_max_samples")]
    #[validate(range(min = 1))]
    pub max_samples: usize,
    #[serde(default = "Metrics::default_recent_window")]
    #[validate(range(min = 1))]
    pub recent_window: usize,
}

impl Metrics {
    fn default_max_samples() -> usize {
        100
    }

    fn default_recent_window() -> usize {
        10
    }

    fn validate_recent_window(&self) -> Result<(), ValidationError> {
        if self.recent_window > self.max_samples {
            Err(ValidationError::new("recent_window_exceeds_max_samples"))
        } else {
            Ok(())
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            max_samples: Self::default_max_samples(),
            recent_window: Self::default_recent_window(),
        }
    }
}

#[derive(Clone, Default, Debug, Serialize, Deserialize, Validate)]
pub struct Transport {
    /// Request timeout in milliseconds, applied by the HTTP transport only.
    #[validate(range(min = 1))]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Log {
    pub path: String,
}
