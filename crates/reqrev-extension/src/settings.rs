#![forbid(unsafe_code)]

//! Embedded configuration and log level selection.

use reqrev_core::{ConfigError, InjectConfig};
use tracing::level_filters::LevelFilter;

/// `reqrev.toml` as shipped with the content script.
pub const EMBEDDED_CONFIG: &str = include_str!("../reqrev.toml");

/// A usable config plus whatever was wrong with the source it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: InjectConfig,
    /// Empty when `source` was used as is.
    pub problems: Vec<String>,
}

impl LoadedConfig {
    pub fn used_defaults(&self) -> bool {
        !self.problems.is_empty()
    }
}

/// Parse and validate `source`, falling back to defaults on any problem.
///
/// Logging is not up yet when this runs, so problems are returned rather
/// than logged.
#[must_use]
pub fn load_config(source: &str) -> LoadedConfig {
    match InjectConfig::from_toml_validated(source) {
        Ok(config) => LoadedConfig {
            config,
            problems: Vec::new(),
        },
        Err(ConfigError::Validation(problems)) => LoadedConfig {
            config: InjectConfig::default(),
            problems,
        },
        Err(err) => LoadedConfig {
            config: InjectConfig::default(),
            problems: vec![err.to_string()],
        },
    }
}

/// Tracing filter for a configured level name; unknown names mean `INFO`.
#[must_use]
pub fn level_filter(level: &str) -> LevelFilter {
    level.trim().parse().unwrap_or(LevelFilter::INFO)
}
