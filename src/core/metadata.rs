//! Component descriptors and per-registration bookkeeping
//!
//! [`Metadata`] is attached to a component when it is constructed and is
//! read-mostly afterwards. [`Internals`] is created by the container when the
//! component is registered and dropped again on deregistration.

use std::{
    collections::BTreeSet,
    fmt,
    panic::Location,
    time::SystemTime,
};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::traits::ComponentRef;

/// Role of a component inside the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    App,
    Plugin,
    Library,
    /// Attached implicitly because another component requires it
    Generic,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::App => "app",
            ComponentKind::Plugin => "plugin",
            ComponentKind::Library => "library",
            ComponentKind::Generic => "generic",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configuration section a component expects to be resolved externally.
///
/// The orchestrator carries these descriptors without interpreting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRequirement {
    pub section: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<JsonValue>,
}

impl ConfigRequirement {
    pub fn new(section: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            description: String::new(),
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: JsonValue) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// Identity and declared dependencies of a component
#[derive(Clone)]
pub struct Metadata {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Whether the component participates in dependency wiring
    pub wire: bool,
    /// Module-wiring targets
    pub wirings: BTreeSet<String>,
    /// Components that must be registered (and initialized) before this one
    pub requires: Vec<ComponentRef>,
    pub config: Vec<ConfigRequirement>,
}

impl Metadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            wire: true,
            wirings: BTreeSet::new(),
            requires: Vec::new(),
            config: Vec::new(),
        }
    }

    /// Fallback metadata derived from a Rust type, for components that were
    /// not given any: unqualified type name, version `0.0.0`, no wiring.
    pub fn for_type<T: ?Sized>() -> Self {
        let full = std::any::type_name::<T>();
        let base = full.split('<').next().unwrap_or(full);
        let name = base.rsplit("::").next().unwrap_or(base);
        let mut meta = Self::new(name, "0.0.0");
        meta.wire = false;
        meta
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn requires(mut self, component: ComponentRef) -> Self {
        self.requires.push(component);
        self
    }

    pub fn wirings<I, S>(mut self, wirings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wirings.extend(wirings.into_iter().map(Into::into));
        self
    }

    pub fn config(mut self, requirement: ConfigRequirement) -> Self {
        self.config.push(requirement);
        self
    }

    pub fn without_wiring(mut self) -> Self {
        self.wire = false;
        self
    }

    /// Merges explicitly set patch fields over this metadata.
    pub fn apply(&mut self, patch: MetadataPatch) {
        let MetadataPatch {
            name,
            version,
            description,
            wire,
            wirings,
            requires,
            config,
        } = patch;

        if let Some(name) = name {
            self.name = name;
        }
        if let Some(version) = version {
            self.version = version;
        }
        if let Some(description) = description {
            self.description = description;
        }
        if let Some(wire) = wire {
            self.wire = wire;
        }
        if let Some(wirings) = wirings {
            self.wirings = wirings;
        }
        if let Some(requires) = requires {
            self.requires = requires;
        }
        if let Some(config) = config {
            self.config = config;
        }
    }

    /// `"<name> v<version>"`
    pub fn identity(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let requires: Vec<String> = self
            .requires
            .iter()
            .map(|c| c.metadata().identity())
            .collect();
        f.debug_struct("Metadata")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("description", &self.description)
            .field("wire", &self.wire)
            .field("wirings", &self.wirings)
            .field("requires", &requires)
            .field("config", &self.config)
            .finish()
    }
}

/// Caller-supplied metadata overrides. Unset fields leave the target alone.
#[derive(Default, Clone)]
pub struct MetadataPatch {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub wire: Option<bool>,
    pub wirings: Option<BTreeSet<String>>,
    pub requires: Option<Vec<ComponentRef>>,
    pub config: Option<Vec<ConfigRequirement>>,
}

/// Stable handle issued by the container at registration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(pub u64);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who registered a component, when, and from where. Diagnostic only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationInfo {
    pub registered_by: String,
    pub registered_at: SystemTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl RegistrationInfo {
    pub fn new(registered_by: impl Into<String>) -> Self {
        Self {
            registered_by: registered_by.into(),
            registered_at: SystemTime::now(),
            file: None,
            line: None,
        }
    }

    /// Provenance from a caller's source location, e.g. `src/app/boot.rs`
    /// is reported as registered by `app::boot`.
    pub fn from_location(location: &Location<'_>) -> Self {
        let file = location.file();
        let module = file
            .trim_start_matches("./")
            .trim_start_matches("src/")
            .trim_end_matches(".rs")
            .trim_end_matches("/mod")
            .replace(['/', '\\'], "::");
        Self {
            registered_by: module,
            registered_at: SystemTime::now(),
            file: Some(file.to_string()),
            line: Some(location.line()),
        }
    }
}

impl fmt::Display for RegistrationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "by '{}'", self.registered_by)?;
        if let Ok(elapsed) = self.registered_at.duration_since(SystemTime::UNIX_EPOCH) {
            write!(f, " at {}s", elapsed.as_secs())?;
        }
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, " from {file}:{line}"),
            (Some(file), None) => write!(f, " from {file}"),
            _ => Ok(()),
        }
    }
}

/// Lifecycle state machine:
/// `Uninitialized -> Initializing -> Initialized -> ShuttingDown -> Uninitialized`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Uninitialized,
    Initializing,
    Initialized,
    ShuttingDown,
}

impl LifecycleState {
    /// Any state other than `Uninitialized` counts as in use.
    pub fn is_active(&self) -> bool {
        !matches!(self, LifecycleState::Uninitialized)
    }
}

/// Mutable per-registration record owned by the container
#[derive(Debug, Clone)]
pub struct Internals {
    /// Components that declared a dependency on this one
    pub required_by: BTreeSet<ComponentId>,
    /// Reserved bookkeeping
    pub initialized_by: BTreeSet<ComponentId>,
    pub state: LifecycleState,
    pub kind: ComponentKind,
    pub registration: Option<RegistrationInfo>,
}

impl Internals {
    pub(crate) fn new(kind: ComponentKind, registration: RegistrationInfo) -> Self {
        Self {
            required_by: BTreeSet::new(),
            initialized_by: BTreeSet::new(),
            state: LifecycleState::Uninitialized,
            kind,
            registration: Some(registration),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state == LifecycleState::Initialized
    }

    pub fn is_initializing(&self) -> bool {
        self.state == LifecycleState::Initializing
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state == LifecycleState::ShuttingDown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SampleWidget;

    #[test]
    fn test_for_type_uses_unqualified_name() {
        let meta = Metadata::for_type::<SampleWidget>();
        assert_eq!(meta.name, "SampleWidget");
        assert_eq!(meta.version, "0.0.0");
        assert!(!meta.wire);
        assert_eq!(meta.identity(), "SampleWidget v0.0.0");
    }

    #[test]
    fn test_apply_only_overrides_set_fields() {
        let mut meta = Metadata::new("cache", "1.2.0")
            .description("in-memory cache")
            .wirings(["handlers"]);

        meta.apply(MetadataPatch {
            version: Some("1.3.0".to_string()),
            wire: Some(false),
            ..Default::default()
        });

        assert_eq!(meta.name, "cache");
        assert_eq!(meta.version, "1.3.0");
        assert_eq!(meta.description, "in-memory cache");
        assert!(!meta.wire);
        assert!(meta.wirings.contains("handlers"));
    }

    #[test]
    fn test_registration_from_location() {
        let info = RegistrationInfo::from_location(Location::caller());
        assert_eq!(info.file.as_deref(), Some(file!()));
        assert!(info.line.is_some());
        assert_eq!(info.registered_by, "core::metadata");
        assert!(info.to_string().starts_with("by 'core::metadata'"));
    }

    #[test]
    fn test_internals_state_flags() {
        let mut internals =
            Internals::new(ComponentKind::Plugin, RegistrationInfo::new("tests"));
        assert!(!internals.is_initialized());
        assert!(!internals.state.is_active());

        internals.state = LifecycleState::ShuttingDown;
        assert!(internals.is_shutting_down());
        assert!(!internals.is_initialized());
        assert!(internals.state.is_active());
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        let json = serde_json::to_string(&ComponentKind::Library).unwrap();
        assert_eq!(json, "\"library\"");
    }
}
