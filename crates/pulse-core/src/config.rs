use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::counter::{slots_for_span, MAX_SLOTS};
use crate::hub::HubOptions;
use crate::window::WindowSpec;

/// Upper bound on `synthetic.events_per_sec`.
pub const MAX_SYNTHETIC_EPS: u64 = 1_000_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config does not match schema: {0}")]
    Schema(String),
    #[error("at least one window must be configured")]
    NoWindows,
    #[error("window id must not be empty")]
    EmptyWindowId,
    #[error("duplicate window id {0}")]
    DuplicateWindow(String),
    #[error("window {0} has a zero span")]
    ZeroSpan(String),
    #[error("tick_ms must be greater than zero")]
    ZeroTick,
    #[error("window {id} needs {slots} slots at this tick_ms; at most {max} are kept")]
    WindowTooLong { id: String, slots: usize, max: usize },
    #[error("synthetic.events_per_sec {0} exceeds {max}", max = MAX_SYNTHETIC_EPS)]
    SyntheticRate(u64),
    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),
    #[error("invalid {key}: {value}")]
    InvalidEnv { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WindowConfig {
    /// Identifier used in payload keys (`eps<id>`).
    pub id: String,
    pub span_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
    /// SSE keep-alive comment interval.
    pub keep_alive_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 4000,
            keep_alive_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct SyntheticConfig {
    /// Generated events per second; 0 disables the generator.
    pub events_per_sec: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub tick_ms: u64,
    pub windows: Vec<WindowConfig>,
    /// Records retained per window for replay.
    pub store_capacity: usize,
    /// Pending deliveries per subscriber before it is dropped.
    pub queue_capacity: usize,
    pub watermark_skew_ms: u64,
    pub http: HttpConfig,
    pub synthetic: SyntheticConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            windows: vec![
                WindowConfig {
                    id: "1s".into(),
                    span_secs: 1,
                },
                WindowConfig {
                    id: "5s".into(),
                    span_secs: 5,
                },
                WindowConfig {
                    id: "60s".into(),
                    span_secs: 60,
                },
            ],
            store_capacity: 300,
            queue_capacity: 64,
            watermark_skew_ms: 5_000,
            http: HttpConfig::default(),
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.windows.is_empty() {
            return Err(ConfigError::NoWindows);
        }
        let mut seen = HashSet::new();
        for window in &self.windows {
            if window.id.trim().is_empty() {
                return Err(ConfigError::EmptyWindowId);
            }
            if !seen.insert(window.id.as_str()) {
                return Err(ConfigError::DuplicateWindow(window.id.clone()));
            }
            if window.span_secs == 0 {
                return Err(ConfigError::ZeroSpan(window.id.clone()));
            }
        }
        if self.tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        let tick = self.tick_period();
        for window in &self.windows {
            let slots = slots_for_span(Duration::from_secs(window.span_secs), tick);
            if slots > MAX_SLOTS {
                return Err(ConfigError::WindowTooLong {
                    id: window.id.clone(),
                    slots,
                    max: MAX_SLOTS,
                });
            }
        }
        if self.store_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("store_capacity"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("queue_capacity"));
        }
        if self.synthetic.events_per_sec > MAX_SYNTHETIC_EPS {
            return Err(ConfigError::SyntheticRate(self.synthetic.events_per_sec));
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn window_specs(&self) -> Vec<WindowSpec> {
        self.windows
            .iter()
            .map(|w| WindowSpec::from_secs(&w.id, w.span_secs))
            .collect()
    }

    pub fn hub_options(&self) -> HubOptions {
        HubOptions {
            store_capacity: self.store_capacity,
            queue_capacity: self.queue_capacity,
            watermark_skew_ms: i64::try_from(self.watermark_skew_ms).unwrap_or(i64::MAX),
        }
    }
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(Config);
    let schema_value = serde_json::to_value(&schema).expect("schema value");
    validator_for(&schema_value).expect("valid schema")
});

/// Returns the JSON schema describing the configuration structure.
///
/// # Panics
///
/// Panics if schema generation fails; this indicates a programming error.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(Config);
    serde_json::to_value(&schema).expect("schema json")
}

pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let raw: toml::Value = toml::from_str(content)?;
    let json_value =
        serde_json::to_value(&raw).map_err(|err| ConfigError::Schema(err.to_string()))?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(ConfigError::Schema(validation_errors.join(", ")));
    }
    let cfg: Config = toml::from_str(content)?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}
