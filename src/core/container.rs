//! Component container and dependency graph
//!
//! The container is the only owner of registration entries and the only
//! writer of graph edges. Components are keyed by [`ComponentId`] handles;
//! the `required_by` back-edges never extend a component's lifetime beyond
//! its registration.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    panic::Location,
};

use log::{debug, info};
use parking_lot::RwLock;

use super::{
    error::{OrchestratorError, OrchestratorResult},
    metadata::{ComponentId, ComponentKind, Internals, LifecycleState, RegistrationInfo},
    snapshot::ComponentSnapshot,
    traits::{component_key, ComponentRef},
};

/// Result of the synchronous gating check that starts a lifecycle step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Gate {
    /// State moved to the transient state; the caller runs the step
    Proceed,
    /// Already in the target state
    AlreadyDone,
    /// A transient state is in progress
    InProgress,
    /// Blocked by components outside the batch
    Deferred(Vec<String>),
}

struct Entry {
    component: ComponentRef,
    key: String,
    internals: Internals,
}

#[derive(Default)]
struct Graph {
    entries: BTreeMap<ComponentId, Entry>,
    by_address: HashMap<usize, ComponentId>,
    app: Option<ComponentId>,
    libraries: BTreeMap<String, ComponentId>,
    plugins: BTreeMap<String, ComponentId>,
    next_id: u64,
}

impl Graph {
    fn id_of(&self, component: &ComponentRef) -> Option<ComponentId> {
        self.by_address.get(&component_key(component)).copied()
    }

    fn identity(&self, id: ComponentId) -> String {
        self.entries
            .get(&id)
            .map(|entry| entry.component.metadata().identity())
            .unwrap_or_else(|| id.to_string())
    }

    fn entry(&self, component: &ComponentRef) -> OrchestratorResult<(ComponentId, &Entry)> {
        self.id_of(component)
            .and_then(|id| self.entries.get(&id).map(|entry| (id, entry)))
            .ok_or_else(|| OrchestratorError::NotRegistered(component.metadata().identity()))
    }

    /// Registers `component` if needed, attaching every missing dependency
    /// first and linking the reverse edges. An implicitly attached component
    /// is promoted to `kind` when registered explicitly later.
    fn attach(
        &mut self,
        component: &ComponentRef,
        kind: ComponentKind,
        registration: &RegistrationInfo,
    ) -> ComponentId {
        if let Some(id) = self.id_of(component) {
            if let Some(entry) = self.entries.get_mut(&id) {
                if entry.internals.kind == ComponentKind::Generic && kind != ComponentKind::Generic
                {
                    debug!(
                        "Promoting {} from generic to {}",
                        component.metadata().identity(),
                        kind
                    );
                    entry.internals.kind = kind;
                    entry.internals.registration = Some(registration.clone());
                }
            }
            return id;
        }

        let id = ComponentId(self.next_id);
        self.next_id += 1;

        // Insert before walking dependencies so cycles terminate
        self.by_address.insert(component_key(component), id);
        self.entries.insert(
            id,
            Entry {
                component: component.clone(),
                key: component.metadata().name.clone(),
                internals: Internals::new(kind, registration.clone()),
            },
        );
        debug!(
            "Attached {} as {} ({})",
            component.metadata().identity(),
            kind,
            id
        );

        for required in &component.metadata().requires {
            let required_id = self.attach(required, ComponentKind::Generic, registration);
            if let Some(entry) = self.entries.get_mut(&required_id) {
                entry.internals.required_by.insert(id);
            }
        }

        id
    }

    /// Removes the entry and unlinks this component from its dependencies.
    fn detach(&mut self, id: ComponentId) -> Option<ComponentRef> {
        let entry = self.entries.remove(&id)?;
        self.by_address.remove(&component_key(&entry.component));

        for required in &entry.component.metadata().requires {
            if let Some(required_id) = self.id_of(required) {
                if let Some(required_entry) = self.entries.get_mut(&required_id) {
                    required_entry.internals.required_by.remove(&id);
                    required_entry.internals.initialized_by.remove(&id);
                }
            }
        }

        debug!(
            "Detached {} ({})",
            entry.component.metadata().identity(),
            id
        );
        Some(entry.component)
    }

    /// Implicitly attached components left without dependents once `removed`
    /// is gone, found transitively.
    fn orphans(&self, removed: &BTreeSet<ComponentId>) -> Vec<ComponentId> {
        let mut gone = removed.clone();
        let mut orphans = Vec::new();
        let mut pending: Vec<ComponentId> = removed.iter().copied().collect();

        while let Some(id) = pending.pop() {
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            for required in &entry.component.metadata().requires {
                let Some(required_id) = self.id_of(required) else {
                    continue;
                };
                if gone.contains(&required_id) {
                    continue;
                }
                let Some(required_entry) = self.entries.get(&required_id) else {
                    continue;
                };
                if required_entry.internals.kind == ComponentKind::Generic
                    && required_entry.internals.required_by.is_subset(&gone)
                {
                    gone.insert(required_id);
                    orphans.push(required_id);
                    pending.push(required_id);
                }
            }
        }
        orphans
    }

    /// Fails when the component is already registered under an explicit role.
    fn ensure_attachable(&self, component: &ComponentRef) -> OrchestratorResult<()> {
        match self.id_of(component).and_then(|id| self.entries.get(&id)) {
            Some(entry) if entry.internals.kind != ComponentKind::Generic => Err(
                OrchestratorError::AlreadyRegistered(component.metadata().identity()),
            ),
            _ => Ok(()),
        }
    }
}

/// Owner of the registered component set
pub struct Container {
    graph: RwLock<Graph>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    /// Create an empty container
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(Graph::default()),
        }
    }

    /// Register the application root
    #[track_caller]
    pub fn set_app(&self, app: ComponentRef) -> OrchestratorResult<ComponentId> {
        let registration = RegistrationInfo::from_location(Location::caller());
        let mut graph = self.graph.write();

        if let Some(existing) = graph.app {
            return Err(OrchestratorError::AlreadyRegistered(format!(
                "app {} (current app: {})",
                app.metadata().identity(),
                graph.identity(existing)
            )));
        }
        graph.ensure_attachable(&app)?;

        let id = graph.attach(&app, ComponentKind::App, &registration);
        if let Some(entry) = graph.entries.get_mut(&id) {
            entry.key = app.metadata().name.clone();
        }
        graph.app = Some(id);

        info!("Set app component: {}", app.metadata().identity());
        Ok(id)
    }

    /// Register libraries under explicit keys
    #[track_caller]
    pub fn register_libraries(
        &self,
        libraries: Vec<(String, ComponentRef)>,
    ) -> OrchestratorResult<Vec<ComponentId>> {
        let registration = RegistrationInfo::from_location(Location::caller());
        let mut graph = self.graph.write();

        let mut keys = BTreeSet::new();
        let mut members = BTreeSet::new();
        for (key, library) in &libraries {
            graph.ensure_attachable(library)?;
            if !members.insert(component_key(library)) {
                return Err(OrchestratorError::AlreadyRegistered(
                    library.metadata().identity(),
                ));
            }
            if let Some(existing) = graph.libraries.get(key) {
                return Err(OrchestratorError::NameCollision {
                    key: key.clone(),
                    existing: graph.identity(*existing),
                });
            }
            if !keys.insert(key.clone()) {
                return Err(OrchestratorError::NameCollision {
                    key: key.clone(),
                    existing: library.metadata().identity(),
                });
            }
        }

        debug!("Registering {} libraries", libraries.len());
        let mut ids = Vec::with_capacity(libraries.len());
        for (key, library) in libraries {
            let id = graph.attach(&library, ComponentKind::Library, &registration);
            if let Some(entry) = graph.entries.get_mut(&id) {
                entry.key = key.clone();
            }
            graph.libraries.insert(key.clone(), id);
            info!("Registered library {key}: {}", library.metadata().identity());
            ids.push(id);
        }
        Ok(ids)
    }

    /// Register plugins keyed by their display name
    #[track_caller]
    pub fn register_plugins(&self, plugins: &[ComponentRef]) -> OrchestratorResult<Vec<ComponentId>> {
        let registration = RegistrationInfo::from_location(Location::caller());
        self.register_plugins_with(plugins, registration)
    }

    /// Register plugins with provenance supplied by the caller
    pub fn register_plugins_with(
        &self,
        plugins: &[ComponentRef],
        registration: RegistrationInfo,
    ) -> OrchestratorResult<Vec<ComponentId>> {
        let mut graph = self.graph.write();

        let mut names = BTreeSet::new();
        for plugin in plugins {
            graph.ensure_attachable(plugin)?;
            let name = &plugin.metadata().name;
            if let Some(existing) = graph.plugins.get(name) {
                return Err(OrchestratorError::NameCollision {
                    key: name.clone(),
                    existing: graph.identity(*existing),
                });
            }
            if !names.insert(name.as_str()) {
                return Err(OrchestratorError::NameCollision {
                    key: name.clone(),
                    existing: plugin.metadata().identity(),
                });
            }
        }

        debug!("Registering {} plugins", plugins.len());
        let mut ids = Vec::with_capacity(plugins.len());
        for plugin in plugins {
            let name = plugin.metadata().name.clone();
            let id = graph.attach(plugin, ComponentKind::Plugin, &registration);
            graph.plugins.insert(name, id);
            info!(
                "Registered plugin: {} [{}]",
                plugin.metadata().identity(),
                registration
            );
            ids.push(id);
        }
        Ok(ids)
    }

    /// Remove plugins and detach their internals.
    ///
    /// Every plugin must be uninitialized and only required by plugins of the
    /// same call. Components that are not registered plugins are skipped.
    /// Implicitly attached dependencies left without dependents are removed
    /// too, and must be uninitialized as well.
    pub fn unregister_plugins(&self, plugins: &[ComponentRef]) -> OrchestratorResult<()> {
        let mut graph = self.graph.write();

        let mut removable = Vec::new();
        for plugin in plugins {
            let name = &plugin.metadata().name;
            match graph.id_of(plugin) {
                Some(id) if graph.plugins.get(name) == Some(&id) => removable.push((id, name)),
                _ => debug!(
                    "Skipping unregistration of {}: not a registered plugin",
                    plugin.metadata().identity()
                ),
            }
        }

        let batch: BTreeSet<ComponentId> = removable.iter().map(|(id, _)| *id).collect();
        for (id, _) in &removable {
            let Some(entry) = graph.entries.get(id) else {
                continue;
            };
            let outside: Vec<String> = entry
                .internals
                .required_by
                .iter()
                .filter(|dependent| !batch.contains(*dependent))
                .map(|dependent| graph.identity(*dependent))
                .collect();
            if !outside.is_empty() {
                return Err(OrchestratorError::StillRequired {
                    component: entry.component.metadata().identity(),
                    dependents: outside,
                });
            }
            if entry.internals.state.is_active() {
                return Err(OrchestratorError::StillInitialized(
                    entry.component.metadata().identity(),
                ));
            }
        }

        let orphans = graph.orphans(&batch);
        for id in &orphans {
            if let Some(entry) = graph.entries.get(id) {
                if entry.internals.state.is_active() {
                    return Err(OrchestratorError::StillInitialized(
                        entry.component.metadata().identity(),
                    ));
                }
            }
        }

        debug!("Unregistering {} plugins", removable.len());
        for (id, name) in removable {
            graph.plugins.remove(name);
            if let Some(component) = graph.detach(id) {
                info!("Unregistered plugin: {}", component.metadata().identity());
            }
        }
        for id in orphans {
            if let Some(component) = graph.detach(id) {
                debug!(
                    "Removed orphaned dependency {}",
                    component.metadata().identity()
                );
            }
        }
        Ok(())
    }

    /// All registered components in registration order
    pub fn components(&self) -> Vec<ComponentRef> {
        self.graph
            .read()
            .entries
            .values()
            .map(|entry| entry.component.clone())
            .collect()
    }

    pub fn provided_plugins(&self) -> Vec<ComponentRef> {
        let graph = self.graph.read();
        graph
            .plugins
            .values()
            .filter_map(|id| graph.entries.get(id))
            .map(|entry| entry.component.clone())
            .collect()
    }

    /// Libraries with their registry keys
    pub fn provided_libraries(&self) -> Vec<(String, ComponentRef)> {
        let graph = self.graph.read();
        graph
            .libraries
            .iter()
            .filter_map(|(key, id)| {
                graph
                    .entries
                    .get(id)
                    .map(|entry| (key.clone(), entry.component.clone()))
            })
            .collect()
    }

    pub fn provided_app(&self) -> OrchestratorResult<ComponentRef> {
        let graph = self.graph.read();
        graph
            .app
            .and_then(|id| graph.entries.get(&id))
            .map(|entry| entry.component.clone())
            .ok_or_else(|| OrchestratorError::NotSet("App component".to_string()))
    }

    /// Plugin lookup by display name
    pub fn provided_plugin(&self, name: &str) -> Option<ComponentRef> {
        let graph = self.graph.read();
        graph
            .plugins
            .get(name)
            .and_then(|id| graph.entries.get(id))
            .map(|entry| entry.component.clone())
    }

    /// Library lookup by registry key
    pub fn provided_library(&self, key: &str) -> Option<ComponentRef> {
        let graph = self.graph.read();
        graph
            .libraries
            .get(key)
            .and_then(|id| graph.entries.get(id))
            .map(|entry| entry.component.clone())
    }

    /// Lookup of any registered component by its registry key
    pub fn provided_component(&self, key: &str) -> Option<ComponentRef> {
        self.graph
            .read()
            .entries
            .values()
            .find(|entry| entry.key == key)
            .map(|entry| entry.component.clone())
    }

    /// True if this exact component is registered as a plugin
    pub fn contains_plugin(&self, plugin: &ComponentRef) -> bool {
        let graph = self.graph.read();
        graph
            .id_of(plugin)
            .is_some_and(|id| graph.plugins.get(&plugin.metadata().name) == Some(&id))
    }

    pub fn id_of(&self, component: &ComponentRef) -> Option<ComponentId> {
        self.graph.read().id_of(component)
    }

    pub fn component(&self, id: ComponentId) -> Option<ComponentRef> {
        self.graph
            .read()
            .entries
            .get(&id)
            .map(|entry| entry.component.clone())
    }

    /// Copy of the component's internals
    pub fn internals(&self, component: &ComponentRef) -> OrchestratorResult<Internals> {
        let graph = self.graph.read();
        graph.entry(component).map(|(_, entry)| entry.internals.clone())
    }

    /// Components that declared a dependency on this one
    pub fn dependents(&self, component: &ComponentRef) -> OrchestratorResult<Vec<ComponentRef>> {
        let graph = self.graph.read();
        let (_, entry) = graph.entry(component)?;
        Ok(entry
            .internals
            .required_by
            .iter()
            .filter_map(|id| graph.entries.get(id))
            .map(|dependent| dependent.component.clone())
            .collect())
    }

    pub fn state(&self, component: &ComponentRef) -> OrchestratorResult<LifecycleState> {
        let graph = self.graph.read();
        graph.entry(component).map(|(_, entry)| entry.internals.state)
    }

    /// False for unregistered components
    pub fn is_initialized(&self, component: &ComponentRef) -> bool {
        self.state(component)
            .map(|state| state == LifecycleState::Initialized)
            .unwrap_or(false)
    }

    pub fn registration(&self, component: &ComponentRef) -> Option<RegistrationInfo> {
        let graph = self.graph.read();
        graph
            .entry(component)
            .ok()
            .and_then(|(_, entry)| entry.internals.registration.clone())
    }

    pub fn len(&self) -> usize {
        self.graph.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.read().entries.is_empty()
    }

    /// Diagnostic view of every registered component, in registration order
    pub fn snapshot(&self) -> Vec<ComponentSnapshot> {
        let graph = self.graph.read();
        graph
            .entries
            .iter()
            .map(|(id, entry)| {
                let metadata = entry.component.metadata();
                ComponentSnapshot {
                    id: *id,
                    key: entry.key.clone(),
                    name: metadata.name.clone(),
                    version: metadata.version.clone(),
                    description: metadata.description.clone(),
                    kind: entry.internals.kind,
                    state: entry.internals.state,
                    is_initialized: entry.internals.is_initialized(),
                    is_initializing: entry.internals.is_initializing(),
                    is_shutting_down: entry.internals.is_shutting_down(),
                    requires: metadata
                        .requires
                        .iter()
                        .map(|c| c.metadata().name.clone())
                        .collect(),
                    required_by: entry
                        .internals
                        .required_by
                        .iter()
                        .filter_map(|dependent| graph.entries.get(dependent))
                        .map(|dependent| dependent.component.metadata().name.clone())
                        .collect(),
                    registration: entry.internals.registration.clone(),
                }
            })
            .collect()
    }

    /// Resolve a batch to handles, failing on the first unregistered member
    pub(crate) fn resolve_batch(
        &self,
        components: &[ComponentRef],
    ) -> OrchestratorResult<Vec<ComponentId>> {
        let graph = self.graph.read();
        components
            .iter()
            .map(|component| graph.entry(component).map(|(id, _)| id))
            .collect()
    }

    /// Check-and-mark step for initialization
    pub(crate) fn begin_initialize(
        &self,
        id: ComponentId,
        batch: &BTreeSet<ComponentId>,
    ) -> OrchestratorResult<Gate> {
        let mut graph = self.graph.write();
        let entry = graph
            .entries
            .get(&id)
            .ok_or_else(|| OrchestratorError::NotRegistered(id.to_string()))?;

        match entry.internals.state {
            LifecycleState::Initialized => return Ok(Gate::AlreadyDone),
            LifecycleState::Initializing | LifecycleState::ShuttingDown => {
                return Ok(Gate::InProgress)
            }
            LifecycleState::Uninitialized => {}
        }

        let blocking: Vec<String> = entry
            .component
            .metadata()
            .requires
            .iter()
            .filter(|required| {
                match graph.id_of(required) {
                    Some(required_id) if batch.contains(&required_id) => false,
                    Some(required_id) => graph
                        .entries
                        .get(&required_id)
                        .map_or(true, |e| e.internals.state != LifecycleState::Initialized),
                    None => true,
                }
            })
            .map(|required| required.metadata().identity())
            .collect();

        if !blocking.is_empty() {
            return Ok(Gate::Deferred(blocking));
        }

        if let Some(entry) = graph.entries.get_mut(&id) {
            entry.internals.state = LifecycleState::Initializing;
        }
        Ok(Gate::Proceed)
    }

    /// Check-and-mark step for shutdown
    pub(crate) fn begin_shutdown(
        &self,
        id: ComponentId,
        batch: &BTreeSet<ComponentId>,
    ) -> OrchestratorResult<Gate> {
        let mut graph = self.graph.write();
        let entry = graph
            .entries
            .get(&id)
            .ok_or_else(|| OrchestratorError::NotRegistered(id.to_string()))?;

        match entry.internals.state {
            LifecycleState::Uninitialized => return Ok(Gate::AlreadyDone),
            LifecycleState::Initializing | LifecycleState::ShuttingDown => {
                return Ok(Gate::InProgress)
            }
            LifecycleState::Initialized => {}
        }

        let blocking: Vec<String> = entry
            .internals
            .required_by
            .iter()
            .filter(|dependent| !batch.contains(*dependent))
            .filter(|dependent| {
                graph
                    .entries
                    .get(*dependent)
                    .is_some_and(|e| e.internals.state.is_active())
            })
            .map(|dependent| graph.identity(*dependent))
            .collect();

        if !blocking.is_empty() {
            return Ok(Gate::Deferred(blocking));
        }

        if let Some(entry) = graph.entries.get_mut(&id) {
            entry.internals.state = LifecycleState::ShuttingDown;
        }
        Ok(Gate::Proceed)
    }

    pub(crate) fn set_state(&self, id: ComponentId, state: LifecycleState) {
        if let Some(entry) = self.graph.write().entries.get_mut(&id) {
            debug!(
                "{} {:?} -> {:?}",
                entry.component.metadata().identity(),
                entry.internals.state,
                state
            );
            entry.internals.state = state;
        }
    }

    /// Active components that depend on `component`
    pub(crate) fn active_dependents(&self, component: &ComponentRef) -> OrchestratorResult<Vec<String>> {
        let graph = self.graph.read();
        let (_, entry) = graph.entry(component)?;
        Ok(entry
            .internals
            .required_by
            .iter()
            .filter(|id| {
                graph
                    .entries
                    .get(*id)
                    .is_some_and(|e| e.internals.state.is_active())
            })
            .map(|id| graph.identity(*id))
            .collect())
    }

    /// Implicitly attached dependencies that removing `component` would
    /// orphan while they are still active
    pub(crate) fn active_orphans(&self, component: &ComponentRef) -> OrchestratorResult<Vec<String>> {
        let graph = self.graph.read();
        let (id, _) = graph.entry(component)?;
        Ok(graph
            .orphans(&BTreeSet::from([id]))
            .into_iter()
            .filter(|orphan| {
                graph
                    .entries
                    .get(orphan)
                    .is_some_and(|e| e.internals.state.is_active())
            })
            .map(|orphan| graph.identity(orphan))
            .collect())
    }

    /// Handles of initialized components whose dependents are all inactive
    pub(crate) fn shutdown_frontier(&self) -> Vec<ComponentRef> {
        let graph = self.graph.read();
        graph
            .entries
            .values()
            .filter(|entry| entry.internals.state == LifecycleState::Initialized)
            .filter(|entry| {
                entry.internals.required_by.iter().all(|dependent| {
                    graph
                        .entries
                        .get(dependent)
                        .map_or(true, |e| !e.internals.state.is_active())
                })
            })
            .map(|entry| entry.component.clone())
            .collect()
    }

    /// Uninitialized components whose dependencies are all initialized
    pub(crate) fn initialize_frontier(&self) -> Vec<ComponentRef> {
        let graph = self.graph.read();
        graph
            .entries
            .values()
            .filter(|entry| entry.internals.state == LifecycleState::Uninitialized)
            .filter(|entry| {
                entry.component.metadata().requires.iter().all(|required| {
                    graph
                        .id_of(required)
                        .and_then(|id| graph.entries.get(&id))
                        .is_some_and(|e| e.internals.state == LifecycleState::Initialized)
                })
            })
            .map(|entry| entry.component.clone())
            .collect()
    }
}
