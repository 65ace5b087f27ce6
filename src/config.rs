use std::env;
use std::path::Path;
use std::str::FromStr;

use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::services::events::{EventError, EventResult};

const BUFFER_SIZE: &str = "EVENT_BUS_BUFFER_SIZE";
const ENABLE_AGGREGATION: &str = "EVENT_BUS_ENABLE_AGGREGATION";
const ENABLE_POOLING: &str = "EVENT_BUS_ENABLE_POOLING";
const MAX_POOL_SIZE: &str = "EVENT_BUS_MAX_POOL_SIZE";
const AGGREGATION_WINDOW_MS: &str = "EVENT_BUS_AGGREGATION_WINDOW_MS";
const RATE_WINDOW_MS: &str = "EVENT_BUS_RATE_WINDOW_MS";

pub const DEFAULT_BUFFER_SIZE: usize = 1024;
pub const DEFAULT_MAX_POOL_SIZE: usize = 256;
pub const DEFAULT_AGGREGATION_WINDOW_MS: u64 = 100;
pub const DEFAULT_RATE_WINDOW_MS: u64 = 1000;

/// Construction-time options of an `EventBus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BusConfig {
    /// Ring buffer capacity
    pub buffer_size: usize,
    pub enable_aggregation: bool,
    pub enable_pooling: bool,
    pub max_pool_size: usize,
    pub aggregation_window_ms: u64,
    /// Length of the window `events_per_second` is measured over
    pub rate_window_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            enable_aggregation: false,
            enable_pooling: false,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            aggregation_window_ms: DEFAULT_AGGREGATION_WINDOW_MS,
            rate_window_ms: DEFAULT_RATE_WINDOW_MS,
        }
    }
}

impl BusConfig {
    /// Loads the configuration from the environment (and `.env`), falling back
    /// to the defaults when a variable is malformed.
    pub fn from_env() -> BusConfig {
        match Self::try_from_env() {
            Ok(config) => config,
            Err(err) => {
                warn!("{}; using default event bus configuration", err);
                BusConfig::default()
            }
        }
    }

    pub fn try_from_env() -> EventResult<BusConfig> {
        // Load .env file
        dotenv().ok();
        Self::try_from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from `lookup`; missing keys keep their default.
    pub fn try_from_lookup<F>(lookup: F) -> EventResult<BusConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = BusConfig::default();

        let config = BusConfig {
            buffer_size: parse_var(&lookup, BUFFER_SIZE)?.unwrap_or(defaults.buffer_size),
            enable_aggregation: parse_flag(&lookup, ENABLE_AGGREGATION)?
                .unwrap_or(defaults.enable_aggregation),
            enable_pooling: parse_flag(&lookup, ENABLE_POOLING)?.unwrap_or(defaults.enable_pooling),
            max_pool_size: parse_var(&lookup, MAX_POOL_SIZE)?.unwrap_or(defaults.max_pool_size),
            aggregation_window_ms: parse_var(&lookup, AGGREGATION_WINDOW_MS)?
                .unwrap_or(defaults.aggregation_window_ms),
            rate_window_ms: parse_var(&lookup, RATE_WINDOW_MS)?.unwrap_or(defaults.rate_window_ms),
        };

        config.validate()?;
        info!(
            "Loaded event bus config: buffer_size={}, aggregation={}, pooling={}",
            config.buffer_size, config.enable_aggregation, config.enable_pooling
        );
        Ok(config)
    }

    /// Reads a JSON configuration file. Absent fields keep their default.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> EventResult<BusConfig> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EventError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: BusConfig = serde_json::from_str(&raw).map_err(|e| {
            EventError::InvalidConfig(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EventResult<()> {
        if self.buffer_size == 0 {
            return Err(EventError::InvalidConfig(
                "buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.enable_aggregation && self.aggregation_window_ms == 0 {
            return Err(EventError::InvalidConfig(
                "aggregation_window_ms must be greater than zero".to_string(),
            ));
        }
        if self.rate_window_ms == 0 {
            return Err(EventError::InvalidConfig(
                "rate_window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_aggregation(mut self, window_ms: u64) -> Self {
        self.enable_aggregation = true;
        self.aggregation_window_ms = window_ms;
        self
    }

    pub fn with_pooling(mut self, max_pool_size: usize) -> Self {
        self.enable_pooling = true;
        self.max_pool_size = max_pool_size;
        self
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> EventResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EventError::InvalidConfig(format!("failed to parse {}: '{}'", key, raw))),
    }
}

fn parse_flag<F>(lookup: &F, key: &str) -> EventResult<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(EventError::InvalidConfig(format!(
                "failed to parse {}: '{}'",
                key, raw
            ))),
        },
    }
}
