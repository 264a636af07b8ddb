use std::path::{Path, PathBuf};
use std::str::FromStr;

use pulse_core::{Config, ConfigError};
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "configs/pulse.toml";

/// Resolve the config file, load it, then apply `PULSE_*` env overrides.
pub fn load_runtime_config() -> Result<Config, ConfigError> {
    let mut cfg = match discovered_config_path() {
        (Some(path), source) => {
            let cfg = pulse_core::load_config(&path)?;
            info!(path = %path.display(), source, "loaded runtime config");
            cfg
        }
        (None, _) => {
            info!("no config file discovered; using defaults");
            Config::default()
        }
    };
    apply_env_overrides(&mut cfg)?;
    cfg.validate()?;
    Ok(cfg)
}

fn discovered_config_path() -> (Option<PathBuf>, &'static str) {
    if let Ok(explicit) = std::env::var("PULSE_CONFIG") {
        if !explicit.trim().is_empty() {
            return (Some(PathBuf::from(explicit)), "env");
        }
    }
    let fallback = Path::new(DEFAULT_CONFIG_PATH);
    if fallback.exists() {
        return (Some(fallback.to_path_buf()), "search");
    }
    (None, "defaults")
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidEnv {
                    key: key.to_string(),
                    value: raw,
                })
        }
        _ => Ok(None),
    }
}

pub fn apply_env_overrides(cfg: &mut Config) -> Result<(), ConfigError> {
    if let Ok(bind) = std::env::var("PULSE_BIND") {
        if !bind.trim().is_empty() {
            cfg.http.bind = bind.trim().to_string();
        }
    }
    if let Some(port) = env_parse::<u16>("PULSE_PORT")? {
        cfg.http.port = port;
    }
    if let Some(tick_ms) = env_parse::<u64>("PULSE_TICK_MS")? {
        cfg.tick_ms = tick_ms;
    }
    if let Some(capacity) = env_parse::<usize>("PULSE_STORE_CAPACITY")? {
        cfg.store_capacity = capacity;
    }
    if let Some(capacity) = env_parse::<usize>("PULSE_QUEUE_CAPACITY")? {
        cfg.queue_capacity = capacity;
    }
    if let Some(eps) = env_parse::<u64>("PULSE_SYNTHETIC_EPS")? {
        cfg.synthetic.events_per_sec = eps;
    }
    if cfg.http.bind != "127.0.0.1" && cfg.http.bind != "localhost" && cfg.http.bind != "::1" {
        warn!(bind = %cfg.http.bind, "listening on a non-loopback address");
    }
    Ok(())
}
