use std::fs;

use log::{debug, trace, LevelFilter};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::{Validate, ValidationError};

use crate::core::error::{ErrorContext, OrchestratorResult};

const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

#[derive(Default, Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    #[serde(default)]
    pub log: Log,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[validate(nested)]
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

// Config file load and validation
impl Config {
    // Does not have to be async until we want runtime reload
    pub fn load_from_yaml<P>(path: P) -> OrchestratorResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path)
            .with_context(&format!("Unable to read conf file from {path}"))?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> OrchestratorResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config =
            serde_yaml::from_str(conf_str).with_context("Unable to parse yaml conf")?;

        trace!("Loaded conf: {conf:?}");

        // use validator to validate conf file
        conf.validate().with_context("Conf file validation failed")?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> OrchestratorResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Logging output settings
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Log::validate_level"))]
pub struct Log {
    #[serde(default = "Log::default_level")]
    pub level: String,

    /// Log file; stderr when unset
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            path: None,
        }
    }
}

impl Log {
    fn default_level() -> String {
        "info".to_string()
    }

    fn validate_level(&self) -> Result<(), ValidationError> {
        if LOG_LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            Ok(())
        } else {
            Err(ValidationError::new("unknown_log_level"))
        }
    }

    pub fn level_filter(&self) -> LevelFilter {
        self.level.parse().unwrap_or(LevelFilter::Info)
    }
}

/// Failure policy of the application runner
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Keep going when some libraries fail to initialize
    #[serde(default)]
    pub allow_partial_library_failure: bool,

    /// Keep going when some plugins fail to initialize
    #[serde(default = "LifecycleConfig::default_allow_partial_plugin_failure")]
    pub allow_partial_plugin_failure: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            allow_partial_library_failure: false,
            allow_partial_plugin_failure: Self::default_allow_partial_plugin_failure(),
        }
    }
}

impl LifecycleConfig {
    fn default_allow_partial_plugin_failure() -> bool {
        true
    }
}

/// A plugin to build through its factory
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct PluginEntry {
    #[validate(length(min = 1))]
    pub name: String,

    #[serde(default)]
    pub config: JsonValue,
}
