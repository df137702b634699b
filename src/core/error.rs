//! Unified error handling for the orchestrator
//!
//! Graph-integrity violations and lifecycle failures share one error type so
//! the container, the event bus and the orchestrator never depend on each
//! other's error handling.

use std::fmt;

/// Boxed error returned by component lifecycle methods and event handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The lifecycle step during which a component failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    BeforeInitialize,
    Initialize,
    AfterInitialize,
    BeforeShutdown,
    Shutdown,
    AfterShutdown,
    Wait,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::BeforeInitialize => "before_initialize",
            LifecyclePhase::Initialize => "initialize",
            LifecyclePhase::AfterInitialize => "after_initialize",
            LifecyclePhase::BeforeShutdown => "before_shutdown",
            LifecyclePhase::Shutdown => "shutdown",
            LifecyclePhase::AfterShutdown => "after_shutdown",
            LifecyclePhase::Wait => "wait",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Batch operations that aggregate per-component failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOperation {
    Initialize,
    Shutdown,
    Wait,
}

impl fmt::Display for BatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchOperation::Initialize => f.write_str("initialization"),
            BatchOperation::Shutdown => f.write_str("shutdown"),
            BatchOperation::Wait => f.write_str("wait"),
        }
    }
}

/// Error taxonomy of the orchestrator
#[derive(Debug)]
pub enum OrchestratorError {
    /// Internals requested for a component that is not in the container
    NotRegistered(String),

    /// The component (or the app root) is already registered
    AlreadyRegistered(String),

    /// Another plugin or library already uses this registry key
    NameCollision { key: String, existing: String },

    /// No app has been registered yet
    NotSet(String),

    /// Refused because registered or initialized dependents remain
    StillRequired {
        component: String,
        dependents: Vec<String>,
    },

    /// Refused because the component must be shut down first
    StillInitialized(String),

    /// A component method or an event handler failed
    LifecycleFailure {
        component: String,
        phase: LifecyclePhase,
        source: BoxError,
    },

    /// One or more components of a batch failed
    Batch {
        operation: BatchOperation,
        failures: Vec<OrchestratorError>,
    },

    /// The shutdown signal interrupted a wait
    Cancelled,

    /// The event bus no longer accepts handlers
    BusClosed,

    /// No factory is registered for this plugin type
    UnknownPlugin(String),

    /// Configuration loading or validation errors
    Configuration(String),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::NotRegistered(c) => write!(f, "Component not registered: {c}"),
            OrchestratorError::AlreadyRegistered(c) => {
                write!(f, "Component already registered: {c}")
            }
            OrchestratorError::NameCollision { key, existing } => {
                write!(f, "Registry key '{key}' is already used by {existing}")
            }
            OrchestratorError::NotSet(what) => write!(f, "{what} not set"),
            OrchestratorError::StillRequired {
                component,
                dependents,
            } => write!(
                f,
                "Component {component} is still required by: {}",
                dependents.join(", ")
            ),
            OrchestratorError::StillInitialized(c) => {
                write!(f, "Component {c} is still initialized; shut it down first")
            }
            OrchestratorError::LifecycleFailure {
                component,
                phase,
                source,
            } => write!(f, "Component {component} failed during {phase}: {source}"),
            OrchestratorError::Batch {
                operation,
                failures,
            } => {
                write!(
                    f,
                    "{} error(s) occurred during component {operation}",
                    failures.len()
                )?;
                for failure in failures {
                    write!(f, "; {failure}")?;
                }
                Ok(())
            }
            OrchestratorError::Cancelled => write!(f, "Wait cancelled by shutdown signal"),
            OrchestratorError::BusClosed => write!(f, "Event bus is closed"),
            OrchestratorError::UnknownPlugin(name) => write!(f, "Unknown plugin type: {name}"),
            OrchestratorError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrchestratorError::LifecycleFailure { source, .. } => Some(source.as_ref()),
            OrchestratorError::Batch { failures, .. } => failures
                .first()
                .map(|e| e as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl OrchestratorError {
    /// Identity string of the component a lifecycle failure belongs to.
    pub fn component(&self) -> Option<&str> {
        match self {
            OrchestratorError::NotRegistered(c)
            | OrchestratorError::AlreadyRegistered(c)
            | OrchestratorError::StillInitialized(c) => Some(c),
            OrchestratorError::StillRequired { component, .. }
            | OrchestratorError::LifecycleFailure { component, .. } => Some(component),
            _ => None,
        }
    }

    /// Returns true for errors that signal a caller invariant violation
    /// rather than a failing component.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            OrchestratorError::NotRegistered(_)
                | OrchestratorError::AlreadyRegistered(_)
                | OrchestratorError::NameCollision { .. }
                | OrchestratorError::StillRequired { .. }
                | OrchestratorError::StillInitialized(_)
        )
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        OrchestratorError::Configuration(err.to_string())
    }
}

impl From<validator::ValidationErrors> for OrchestratorError {
    fn from(err: validator::ValidationErrors) -> Self {
        OrchestratorError::Configuration(err.to_string())
    }
}

/// Result type alias for orchestrator operations
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> OrchestratorResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> OrchestratorResult<T> {
        self.map_err(|e| OrchestratorError::Configuration(format!("{context}: {e}")))
    }
}
