//! Registry primitives
//!
//! Small read helpers over a component's metadata and, through the
//! container, its internals.

use std::collections::HashSet;

use super::{
    container::Container,
    error::OrchestratorResult,
    metadata::{Internals, RegistrationInfo},
    traits::{component_key, ComponentRef},
};

/// Declared dependencies of `component`.
///
/// With `recursive`, dependencies of dependencies are included as well,
/// de-duplicated by identity. Cycles are tolerated.
pub fn dependencies(component: &ComponentRef, recursive: bool) -> Vec<ComponentRef> {
    let mut visited = HashSet::from([component_key(component)]);
    let mut required = Vec::new();
    collect_dependencies(component, recursive, &mut visited, &mut required);
    required
}

fn collect_dependencies(
    component: &ComponentRef,
    recursive: bool,
    visited: &mut HashSet<usize>,
    required: &mut Vec<ComponentRef>,
) {
    for dependency in &component.metadata().requires {
        if !visited.insert(component_key(dependency)) {
            continue;
        }
        required.push(dependency.clone());
        if recursive {
            collect_dependencies(dependency, true, visited, required);
        }
    }
}

/// Components that depend on `component`; fails if it is not registered.
pub fn dependents(
    container: &Container,
    component: &ComponentRef,
) -> OrchestratorResult<Vec<ComponentRef>> {
    container.dependents(component)
}

/// Internals of `component`; fails with `NotRegistered` if absent.
pub fn internals(container: &Container, component: &ComponentRef) -> OrchestratorResult<Internals> {
    container.internals(component)
}

pub fn is_initialized(container: &Container, component: &ComponentRef) -> bool {
    container.is_initialized(component)
}

pub fn registration(container: &Container, component: &ComponentRef) -> Option<RegistrationInfo> {
    container.registration(component)
}

/// `"<name> v<version>"`
pub fn identity_string(component: &ComponentRef) -> String {
    component.metadata().identity()
}
