//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - fluidml.toml (default configuration)
//! - fluidml.local.toml (git-ignored local overrides)
//! - Environment variables (FLUIDML_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # fluidml.toml
//! time = 100
//! worker_num = 8
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! FLUIDML_TIME=200
//! FLUIDML_WORKER_NUM=4
//! FLUIDML_CHECK_PERIOD=2.5
//! FLUIDML_PROFILE_CACHE=/tmp/fluidml-cache
//! FLUIDML_DEBUG=1
//! FLUIDML_LOGGING__LEVEL=trace
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Samples per benchmark measurement
    #[serde(default = "default_time")]
    pub time: usize,

    /// Number of profiler workers (defaults to the host CPU count)
    #[serde(default = "default_worker_num")]
    pub worker_num: usize,

    /// Driver poll period in seconds
    #[serde(default = "default_check_period")]
    pub check_period: f64,

    /// Directory for emitted benchmark modules and worker logs
    #[serde(default)]
    pub profile_cache: Option<PathBuf>,

    /// Skip real measurement and report zero time ("1" or "true")
    #[serde(default, deserialize_with = "flag")]
    pub debug: bool,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_time() -> usize {
    50
}
fn default_worker_num() -> usize {
    num_cpus::get()
}
fn default_check_period() -> f64 {
    5.0
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

/// Accept `true`/`false`, any integer (nonzero = true), or the strings
/// `"1"`/`"true"` for boolean flags arriving from the environment.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct FlagVisitor;

    impl serde::de::Visitor<'_> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a boolean, an integer, or \"1\"/\"true\"")
        }

        fn visit_bool<E>(self, value: bool) -> Result<bool, E> {
            Ok(value)
        }

        fn visit_i64<E>(self, value: i64) -> Result<bool, E> {
            Ok(value != 0)
        }

        fn visit_u64<E>(self, value: u64) -> Result<bool, E> {
            Ok(value != 0)
        }

        fn visit_str<E>(self, value: &str) -> Result<bool, E> {
            Ok(value == "1" || value.eq_ignore_ascii_case("true"))
        }
    }

    deserializer.deserialize_any(FlagVisitor)
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. fluidml.toml (base configuration)
    /// 2. fluidml.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (FLUIDML_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("fluidml.toml"))
            .merge(Toml::file("fluidml.local.toml"))
            .merge(Env::prefixed("FLUIDML_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("FLUIDML_").split("__"))
            .extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            time: default_time(),
            worker_num: default_worker_num(),
            check_period: default_check_period(),
            profile_cache: None,
            debug: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
