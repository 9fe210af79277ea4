//! Service settings, read from the environment.
//!
//! | Variable         | Meaning                                      | Default                 |
//! |------------------|----------------------------------------------|-------------------------|
//! | `DEFAULT_MODEL`  | Model used when a request doesn't name one   | `birefnet-general-lite` |
//! | `MAX_SESSIONS`   | Sessions kept alive at once                  | `1`                     |
//! | `PRELOAD_MODELS` | Create every model's session before serving  | `false`                 |
use std::str::FromStr;

use crate::*;

pub const DEFAULT_MODEL_VAR: &str = "DEFAULT_MODEL";
pub const MAX_SESSIONS_VAR: &str = "MAX_SESSIONS";
pub const PRELOAD_MODELS_VAR: &str = "PRELOAD_MODELS";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidCount { var: &'static str, value: String },
    #[error("{var} must be a boolean (1/0, true/false, yes/no, on/off), got '{value}'")]
    InvalidFlag { var: &'static str, value: String },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub default_model: String,
    pub max_sessions: usize,
    pub preload_models: bool,
}

impl Default for ServiceConfig {
    fn default() -> ServiceConfig {
        ServiceConfig {
            default_model: DEFAULT_REMBG_MODEL.to_string(),
            max_sessions: 1,
            preload_models: false,
        }
    }
}

fn parse_count(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match usize::from_str(raw.trim()) {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidCount {
            var,
            value: raw.to_string(),
        }),
    }
}

fn parse_flag(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            var,
            value: raw.to_string(),
        }),
    }
}

impl ServiceConfig {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<ServiceConfig, ConfigError> {
        ServiceConfig::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings from an arbitrary source; unset keys take their defaults.
    ///
    /// The default model is checked against the rembg catalog here, so a typo fails at startup rather than on the
    /// first request.
    pub fn from_lookup<L>(lookup: L) -> Result<ServiceConfig, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = ServiceConfig::default();
        if let Some(v) = lookup(DEFAULT_MODEL_VAR) {
            config.default_model = v.trim().to_string();
        }
        if let Some(v) = lookup(MAX_SESSIONS_VAR) {
            config.max_sessions = parse_count(MAX_SESSIONS_VAR, &v)?;
        }
        if let Some(v) = lookup(PRELOAD_MODELS_VAR) {
            config.preload_models = parse_flag(PRELOAD_MODELS_VAR, &v)?;
        }
        config.catalog()?;
        Ok(config)
    }

    /// The rembg catalog, with the configured default.
    pub fn catalog(&self) -> Result<Catalog, CatalogError> {
        Catalog::rembg(&self.default_model)
    }

    pub fn cache_config(&self) -> SessionCacheConfig {
        SessionCacheConfig {
            max_sessions: self.max_sessions,
        }
    }
}
