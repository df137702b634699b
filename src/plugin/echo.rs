use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::core::{
    error::{BoxError, ErrorContext, OrchestratorResult},
    metadata::Metadata,
    traits::{Component, ComponentRef, InitOutcome},
};

pub const PLUGIN_NAME: &str = "echo";

/// Creates an Echo plugin instance with the given configuration.
pub fn create_echo_plugin(cfg: JsonValue) -> OrchestratorResult<ComponentRef> {
    let config: PluginConfig = if cfg.is_null() {
        PluginConfig::default()
    } else {
        serde_json::from_value(cfg).with_context("Invalid echo plugin config")?
    };

    Ok(Arc::new(PluginEcho::new(config)))
}

/// Configuration for the Echo plugin.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
struct PluginConfig {
    /// Registered plugin name, defaults to `echo`
    #[serde(default)]
    name: Option<String>,

    /// Message logged on every lifecycle step
    #[serde(default)]
    message: String,
}

/// Logs its configured message whenever it starts or stops.
pub struct PluginEcho {
    metadata: Metadata,
    message: String,
}

impl PluginEcho {
    fn new(config: PluginConfig) -> Self {
        let name = config.name.unwrap_or_else(|| PLUGIN_NAME.to_string());
        Self {
            metadata: Metadata::new(name, env!("CARGO_PKG_VERSION"))
                .description("Logs a message on each lifecycle step")
                .without_wiring(),
            message: config.message,
        }
    }
}

#[async_trait]
impl Component for PluginEcho {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    async fn initialize(&self) -> Result<InitOutcome, BoxError> {
        log::info!("[{}] up: {}", self.metadata.name, self.message);
        Ok(InitOutcome::Ready)
    }

    async fn shutdown(&self) -> Result<(), BoxError> {
        log::info!("[{}] down: {}", self.metadata.name, self.message);
        Ok(())
    }
}
