//! Serializable per-component diagnostics
//!
//! Used by dashboards and other observability tooling; produced by
//! [`Container::snapshot`](super::container::Container::snapshot).

use serde::Serialize;

use super::metadata::{ComponentId, ComponentKind, LifecycleState, RegistrationInfo};

#[derive(Debug, Clone, Serialize)]
pub struct ComponentSnapshot {
    pub id: ComponentId,
    /// Registry key: plugin name, library key or app name
    pub key: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub kind: ComponentKind,
    pub state: LifecycleState,
    pub is_initialized: bool,
    pub is_initializing: bool,
    pub is_shutting_down: bool,
    /// Names of declared dependencies
    pub requires: Vec<String>,
    /// Names of registered dependents
    pub required_by: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<RegistrationInfo>,
}

impl ComponentSnapshot {
    /// `"<name> v<version>"`
    pub fn identity(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }
}
