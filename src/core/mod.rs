//! Core abstractions for componix
//!
//! This module provides the component trait, metadata, the container that
//! owns the dependency graph, and the error taxonomy shared by every layer.

pub mod container;
pub mod error;
pub mod metadata;
pub mod registry;
pub mod snapshot;
pub mod traits;


// Re-export commonly used types
pub use container::Container;
pub use error::{BoxError, ErrorContext, OrchestratorError, OrchestratorResult};
pub use metadata::{
    ComponentId, ComponentKind, ConfigRequirement, Internals, LifecycleState, Metadata,
    MetadataPatch, RegistrationInfo,
};
pub use snapshot::ComponentSnapshot;
pub use traits::*;
