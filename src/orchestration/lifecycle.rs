//! Component lifecycle management
//!
//! Drives components through
//! `Uninitialized -> Initializing -> Initialized -> ShuttingDown -> Uninitialized`.
//! Every batch call fans out over its members concurrently; gating checks run
//! synchronously against the container when each member's turn starts.

use std::{collections::BTreeSet, panic::Location, sync::Arc};

use futures::future::join_all;
use log::{debug, error, info, warn};

use crate::{
    core::{
        container::{Container, Gate},
        error::{BatchOperation, BoxError, LifecyclePhase, OrchestratorError, OrchestratorResult},
        metadata::{ComponentId, LifecycleState, RegistrationInfo},
        traits::{wait_for_signal, ComponentRef, InitOutcome, ShutdownWatch},
    },
    event::{EventBus, LifecycleEvent},
};

use super::report::{BatchReport, StepOutcome};

/// Manages the lifecycle of registered components
pub struct ComponentLifecycle {
    container: Arc<Container>,
    events: Arc<EventBus>,
}

impl ComponentLifecycle {
    /// Create a new lifecycle manager
    pub fn new(container: Arc<Container>, events: Arc<EventBus>) -> Self {
        Self { container, events }
    }

    /// Create a lifecycle manager dispatching to the process-wide event bus
    pub fn with_global_bus(container: Arc<Container>) -> Self {
        Self::new(container, EventBus::global())
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Initialize a batch of components concurrently.
    ///
    /// Members already initialized (or initializing) are skipped. A member
    /// whose dependencies outside the batch are not initialized yet is
    /// deferred. Every member is attempted before failures are aggregated.
    pub async fn initialize(
        &self,
        components: &[ComponentRef],
        allow_partial_failure: bool,
    ) -> OrchestratorResult<BatchReport> {
        let ids = self.container.resolve_batch(components)?;
        let batch: BTreeSet<ComponentId> = ids.iter().copied().collect();
        debug!("Initializing batch of {} component(s)", components.len());

        let batch = &batch;
        let steps = components.iter().zip(ids).map(move |(component, id)| async move {
            let result = self.initialize_one(id, component, batch).await;
            (id, component.metadata().identity(), result)
        });

        let mut report = BatchReport::new(BatchOperation::Initialize);
        for (id, identity, result) in join_all(steps).await {
            report.record(id, identity, result);
        }
        report.finish(allow_partial_failure)
    }

    /// Shut down a batch of components concurrently.
    ///
    /// Members not initialized are skipped. A member still in use by an
    /// active component outside the batch is deferred.
    pub async fn shutdown(
        &self,
        components: &[ComponentRef],
        allow_partial_failure: bool,
    ) -> OrchestratorResult<BatchReport> {
        let ids = self.container.resolve_batch(components)?;
        let batch: BTreeSet<ComponentId> = ids.iter().copied().collect();
        debug!("Shutting down batch of {} component(s)", components.len());

        let batch = &batch;
        let steps = components.iter().zip(ids).map(move |(component, id)| async move {
            let result = self.shutdown_one(id, component, batch).await;
            (id, component.metadata().identity(), result)
        });

        let mut report = BatchReport::new(BatchOperation::Shutdown);
        for (id, identity, result) in join_all(steps).await {
            report.record(id, identity, result);
        }
        report.finish(allow_partial_failure)
    }

    /// Wait on every component until each returns or `shutdown` fires.
    ///
    /// Returns `Cancelled` once the signal has fired, after every sub-wait
    /// has observed it.
    pub async fn wait(
        &self,
        components: &[ComponentRef],
        shutdown: ShutdownWatch,
    ) -> OrchestratorResult<()> {
        debug!("Waiting on {} component(s)", components.len());

        let waits = components.iter().map(|component| {
            let watch = shutdown.clone();
            let mut signal = shutdown.clone();
            async move {
                tokio::select! {
                    biased;
                    result = component.wait(watch) => result
                        .err()
                        .map(|source| lifecycle_failure(component, LifecyclePhase::Wait, source)),
                    _ = wait_for_signal(&mut signal) => None,
                }
            }
        });

        let failures: Vec<OrchestratorError> = join_all(waits).await.into_iter().flatten().collect();

        if *shutdown.borrow() {
            info!("Shutdown signal received, wait cancelled");
            for failure in &failures {
                warn!("Wait failed during cancellation: {failure}");
            }
            return Err(OrchestratorError::Cancelled);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::Batch {
                operation: BatchOperation::Wait,
                failures,
            })
        }
    }

    /// Register a plugin at runtime.
    ///
    /// Returns `false` if the plugin is already registered. The caller's
    /// source location is kept as registration provenance.
    #[track_caller]
    pub fn register_plugin(&self, plugin: &ComponentRef) -> OrchestratorResult<bool> {
        let registration = RegistrationInfo::from_location(Location::caller());
        if self.container.contains_plugin(plugin) {
            warn!(
                "Plugin {} is already registered",
                plugin.metadata().identity()
            );
            return Ok(false);
        }

        debug!(
            "Registering plugin {} {registration}",
            plugin.metadata().identity()
        );
        self.container
            .register_plugins_with(std::slice::from_ref(plugin), registration)?;
        Ok(true)
    }

    /// Unregister a plugin, shutting it down first if needed.
    ///
    /// Returns `false` if the plugin is not registered. Refused with
    /// `StillRequired` while any registered component depends on it, and with
    /// `StillInitialized` while a dependency only it holds is still active.
    /// Both checks run before the plugin is shut down.
    pub async fn unregister_plugin(&self, plugin: &ComponentRef) -> OrchestratorResult<bool> {
        if !self.check_unregistrable(plugin)? {
            return Ok(false);
        }

        if self.container.state(plugin)?.is_active() {
            info!(
                "Shutting down plugin {} before unregistration",
                plugin.metadata().identity()
            );
            self.shutdown(std::slice::from_ref(plugin), false).await?;
        }

        self.container.unregister_plugins(std::slice::from_ref(plugin))?;
        Ok(true)
    }

    /// Unregister a plugin that must already be shut down.
    ///
    /// Same as [`unregister_plugin`](Self::unregister_plugin) but refuses an
    /// active plugin with `StillInitialized` instead of stopping it.
    pub fn try_unregister_plugin(&self, plugin: &ComponentRef) -> OrchestratorResult<bool> {
        if !self.check_unregistrable(plugin)? {
            return Ok(false);
        }

        if self.container.state(plugin)?.is_active() {
            return Err(OrchestratorError::StillInitialized(
                plugin.metadata().identity(),
            ));
        }

        self.container.unregister_plugins(std::slice::from_ref(plugin))?;
        Ok(true)
    }

    fn check_unregistrable(&self, plugin: &ComponentRef) -> OrchestratorResult<bool> {
        if !self.container.contains_plugin(plugin) {
            warn!(
                "Plugin {} is not registered",
                plugin.metadata().identity()
            );
            return Ok(false);
        }

        let dependents: Vec<String> = self
            .container
            .dependents(plugin)?
            .iter()
            .map(|dependent| dependent.metadata().identity())
            .collect();
        if !dependents.is_empty() {
            return Err(OrchestratorError::StillRequired {
                component: plugin.metadata().identity(),
                dependents,
            });
        }

        if let Some(orphan) = self.container.active_orphans(plugin)?.into_iter().next() {
            return Err(OrchestratorError::StillInitialized(orphan));
        }
        Ok(true)
    }

    async fn initialize_one(
        &self,
        id: ComponentId,
        component: &ComponentRef,
        batch: &BTreeSet<ComponentId>,
    ) -> OrchestratorResult<StepOutcome> {
        let identity = component.metadata().identity();
        match self.container.begin_initialize(id, batch)? {
            Gate::Proceed => {}
            Gate::AlreadyDone => {
                debug!("{identity} is already initialized");
                return Ok(StepOutcome::AlreadyDone);
            }
            Gate::InProgress => {
                debug!("{identity} is busy, skipping initialization");
                return Ok(StepOutcome::InProgress);
            }
            Gate::Deferred(blocking) => {
                warn!(
                    "Deferring initialization of {identity}: waiting for {}",
                    blocking.join(", ")
                );
                return Ok(StepOutcome::Deferred(blocking));
            }
        }

        debug!("Initializing {identity}");
        if let Err(err) = self.dispatch(component, LifecycleEvent::BeforeInitialize).await {
            self.container.set_state(id, LifecycleState::Uninitialized);
            return Err(err);
        }

        match component.initialize().await {
            Ok(InitOutcome::Ready) => {}
            Ok(InitOutcome::Abort) => {
                self.container.set_state(id, LifecycleState::Uninitialized);
                info!("{identity} aborted its initialization");
                return Ok(StepOutcome::Aborted);
            }
            Err(source) => {
                self.container.set_state(id, LifecycleState::Uninitialized);
                error!("Failed to initialize {identity}: {source}");
                return Err(lifecycle_failure(component, LifecyclePhase::Initialize, source));
            }
        }

        self.container.set_state(id, LifecycleState::Initialized);
        self.dispatch(component, LifecycleEvent::AfterInitialize).await?;

        info!("Initialized {identity}");
        Ok(StepOutcome::Completed)
    }

    async fn shutdown_one(
        &self,
        id: ComponentId,
        component: &ComponentRef,
        batch: &BTreeSet<ComponentId>,
    ) -> OrchestratorResult<StepOutcome> {
        let identity = component.metadata().identity();
        match self.container.begin_shutdown(id, batch)? {
            Gate::Proceed => {}
            Gate::AlreadyDone => {
                debug!("{identity} is not initialized");
                return Ok(StepOutcome::AlreadyDone);
            }
            Gate::InProgress => {
                debug!("{identity} is busy, skipping shutdown");
                return Ok(StepOutcome::InProgress);
            }
            Gate::Deferred(blocking) => {
                warn!(
                    "Deferring shutdown of {identity}: still required by {}",
                    blocking.join(", ")
                );
                return Ok(StepOutcome::Deferred(blocking));
            }
        }

        debug!("Shutting down {identity}");
        if let Err(err) = self.dispatch(component, LifecycleEvent::BeforeShutdown).await {
            self.container.set_state(id, LifecycleState::Initialized);
            return Err(err);
        }

        if let Err(source) = component.shutdown().await {
            self.container.set_state(id, LifecycleState::Initialized);
            error!("Failed to shut down {identity}: {source}");
            return Err(lifecycle_failure(component, LifecyclePhase::Shutdown, source));
        }

        let after = self.dispatch(component, LifecycleEvent::AfterShutdown).await;
        self.container.set_state(id, LifecycleState::Uninitialized);
        after?;

        info!("Shut down {identity}");
        Ok(StepOutcome::Completed)
    }

    /// Component hook first, then the bus handlers for the same event
    async fn dispatch(
        &self,
        component: &ComponentRef,
        event: LifecycleEvent,
    ) -> OrchestratorResult<()> {
        let hook = match event {
            LifecycleEvent::BeforeInitialize => component.on_before_initialize().await,
            LifecycleEvent::AfterInitialize => component.on_after_initialize().await,
            LifecycleEvent::BeforeShutdown => component.on_before_shutdown().await,
            LifecycleEvent::AfterShutdown => component.on_after_shutdown().await,
        };

        if let Err(source) = hook {
            error!(
                "{event} hook of {} failed: {source}",
                component.metadata().identity()
            );
            return Err(lifecycle_failure(component, event.phase(), source));
        }

        self.events.emit(component, event).await
    }
}

fn lifecycle_failure(
    component: &ComponentRef,
    phase: LifecyclePhase,
    source: BoxError,
) -> OrchestratorError {
    OrchestratorError::LifecycleFailure {
        component: component.metadata().identity(),
        phase,
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use tokio::sync::watch;

    use super::*;
    use crate::{core::metadata::Metadata, plugin::adapter::FnComponent};

    #[derive(Default)]
    struct Calls {
        initialize: AtomicUsize,
        shutdown: AtomicUsize,
    }

    impl Calls {
        fn initialized(&self) -> usize {
            self.initialize.load(Ordering::SeqCst)
        }

        fn shut_down(&self) -> usize {
            self.shutdown.load(Ordering::SeqCst)
        }
    }

    fn metadata(name: &str, requires: &[&ComponentRef]) -> Metadata {
        requires
            .iter()
            .fold(Metadata::new(name, "1.0.0"), |meta, required| {
                meta.requires((*required).clone())
            })
    }

    fn counted(name: &str, requires: &[&ComponentRef]) -> (ComponentRef, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let init_calls = calls.clone();
        let shutdown_calls = calls.clone();
        let component = FnComponent::new(metadata(name, requires))
            .on_initialize(move || {
                let calls = init_calls.clone();
                async move {
                    calls.initialize.fetch_add(1, Ordering::SeqCst);
                    Ok(InitOutcome::Ready)
                }
            })
            .on_shutdown(move || {
                let calls = shutdown_calls.clone();
                async move {
                    calls.shutdown.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .build();
        (component, calls)
    }

    fn failing(name: &str) -> ComponentRef {
        FnComponent::new(Metadata::new(name, "1.0.0"))
            .on_initialize(|| async { Err(BoxError::from("boom")) })
            .build()
    }

    fn lifecycle() -> ComponentLifecycle {
        ComponentLifecycle::new(Arc::new(Container::new()), Arc::new(EventBus::new()))
    }

    fn state(lifecycle: &ComponentLifecycle, component: &ComponentRef) -> LifecycleState {
        lifecycle.container().state(component).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let lifecycle = lifecycle();
        let (plugin, calls) = counted("cache", &[]);
        lifecycle.register_plugin(&plugin).unwrap();

        let report = lifecycle.initialize(&[plugin.clone()], false).await.unwrap();
        assert_eq!(report.outcomes[0].outcome, StepOutcome::Completed);

        let report = lifecycle.initialize(&[plugin.clone()], false).await.unwrap();
        assert_eq!(report.outcomes[0].outcome, StepOutcome::AlreadyDone);
        assert_eq!(calls.initialized(), 1);
        assert!(lifecycle.container().is_initialized(&plugin));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_dependents() {
        let lifecycle = lifecycle();
        let (b, b_calls) = counted("b", &[]);
        let (a, _) = counted("a", &[&b]);
        lifecycle.register_plugin(&b).unwrap();
        lifecycle.register_plugin(&a).unwrap();
        lifecycle.initialize(&[b.clone(), a.clone()], false).await.unwrap();

        let report = lifecycle.shutdown(&[b.clone()], false).await.unwrap();
        assert_eq!(
            report.outcomes[0].outcome,
            StepOutcome::Deferred(vec!["a v1.0.0".to_string()])
        );
        assert_eq!(state(&lifecycle, &b), LifecycleState::Initialized);
        assert_eq!(b_calls.shut_down(), 0);

        lifecycle.shutdown(&[a.clone()], false).await.unwrap();
        lifecycle.shutdown(&[b.clone()], false).await.unwrap();
        assert_eq!(state(&lifecycle, &b), LifecycleState::Uninitialized);
        assert_eq!(b_calls.shut_down(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_batch_includes_dependents() {
        let lifecycle = lifecycle();
        let (b, _) = counted("b", &[]);
        let (a, _) = counted("a", &[&b]);
        lifecycle.register_plugin(&b).unwrap();
        lifecycle.register_plugin(&a).unwrap();
        lifecycle.initialize(&[a.clone(), b.clone()], false).await.unwrap();

        let report = lifecycle.shutdown(&[b.clone(), a.clone()], false).await.unwrap();
        assert_eq!(report.completed().len(), 2);
        assert!(!lifecycle.container().is_initialized(&a));
        assert!(!lifecycle.container().is_initialized(&b));
    }

    #[tokio::test]
    async fn test_register_initialize_shutdown_unregister_round_trip() {
        let lifecycle = lifecycle();
        let (plugin, _) = counted("session", &[]);
        assert!(lifecycle.container().is_empty());

        assert!(lifecycle.register_plugin(&plugin).unwrap());
        lifecycle.initialize(&[plugin.clone()], false).await.unwrap();
        lifecycle.shutdown(&[plugin.clone()], false).await.unwrap();
        assert!(lifecycle.unregister_plugin(&plugin).await.unwrap());

        assert!(lifecycle.container().is_empty());
        assert!(lifecycle.container().components().is_empty());
        assert!(matches!(
            lifecycle.container().internals(&plugin),
            Err(OrchestratorError::NotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_component_hook_runs_before_bus_handlers() {
        let lifecycle = lifecycle();
        let order = Arc::new(Mutex::new(Vec::new()));

        let hook_order = order.clone();
        let plugin = FnComponent::new(Metadata::new("ordered", "1.0.0"))
            .hook(LifecycleEvent::AfterInitialize, move || {
                let order = hook_order.clone();
                async move {
                    order.lock().unwrap().push("hook");
                    Ok(())
                }
            })
            .build();

        let handler_order = order.clone();
        lifecycle
            .events()
            .on(LifecycleEvent::AfterInitialize)
            .run_sync(move |_| {
                handler_order.lock().unwrap().push("global");
                Ok(())
            })
            .unwrap();

        lifecycle.register_plugin(&plugin).unwrap();
        lifecycle.initialize(&[plugin], false).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["hook", "global"]);
    }

    #[tokio::test]
    async fn test_partial_failure_leaves_siblings_initialized() {
        let lifecycle = lifecycle();
        let (a, _) = counted("a", &[]);
        let b = failing("b");
        let (c, _) = counted("c", &[]);
        for plugin in [&a, &b, &c] {
            lifecycle.register_plugin(plugin).unwrap();
        }

        let report = lifecycle
            .initialize(&[a.clone(), b.clone(), c.clone()], true)
            .await
            .unwrap();

        assert!(lifecycle.container().is_initialized(&a));
        assert!(lifecycle.container().is_initialized(&c));
        assert_eq!(state(&lifecycle, &b), LifecycleState::Uninitialized);
        assert_eq!(report.failures.len(), 1);
        let (failed_id, failure) = &report.failures[0];
        assert_eq!(Some(*failed_id), lifecycle.container().id_of(&b));
        assert_eq!(failure.component(), Some("b v1.0.0"));
    }

    #[tokio::test]
    async fn test_failures_aggregate_after_whole_batch() {
        let lifecycle = lifecycle();
        let (a, a_calls) = counted("a", &[]);
        let b = failing("b");
        let (c, c_calls) = counted("c", &[]);
        for plugin in [&a, &b, &c] {
            lifecycle.register_plugin(plugin).unwrap();
        }

        let err = lifecycle
            .initialize(&[a.clone(), b, c.clone()], false)
            .await
            .unwrap_err();
        match err {
            OrchestratorError::Batch {
                operation,
                failures,
            } => {
                assert_eq!(operation, BatchOperation::Initialize);
                assert_eq!(failures.len(), 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(a_calls.initialized(), 1);
        assert_eq!(c_calls.initialized(), 1);
    }

    #[tokio::test]
    async fn test_plugin_must_be_shut_down_before_unregistering() {
        let lifecycle = lifecycle();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        lifecycle
            .events()
            .on(LifecycleEvent::AfterInitialize)
            .when(|component| component.metadata().name == "p")
            .run_sync(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let (p, _) = counted("p", &[]);
        lifecycle.register_plugin(&p).unwrap();
        lifecycle.initialize(&[p.clone()], false).await.unwrap();
        assert!(lifecycle.container().is_initialized(&p));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let err = lifecycle.try_unregister_plugin(&p).unwrap_err();
        assert!(matches!(err, OrchestratorError::StillInitialized(_)));
        assert!(lifecycle.container().provided_plugin("p").is_some());

        lifecycle.shutdown(&[p.clone()], false).await.unwrap();
        assert!(lifecycle.try_unregister_plugin(&p).unwrap());
        assert!(lifecycle.container().provided_plugin("p").is_none());
    }

    #[tokio::test]
    async fn test_unregister_shuts_down_initialized_plugin() {
        let lifecycle = lifecycle();
        let (plugin, calls) = counted("hot", &[]);
        lifecycle.register_plugin(&plugin).unwrap();
        lifecycle.initialize(&[plugin.clone()], false).await.unwrap();

        assert!(lifecycle.unregister_plugin(&plugin).await.unwrap());
        assert_eq!(calls.shut_down(), 1);
        assert!(!lifecycle.container().contains_plugin(&plugin));

        // Second call is a no-op
        assert!(!lifecycle.unregister_plugin(&plugin).await.unwrap());
    }

    #[tokio::test]
    async fn test_unregister_refused_while_dependent_active() {
        let lifecycle = lifecycle();
        let (b, _) = counted("b", &[]);
        let (d, _) = counted("d", &[&b]);
        lifecycle.register_plugin(&b).unwrap();
        lifecycle.register_plugin(&d).unwrap();
        lifecycle.initialize(&[b.clone(), d.clone()], false).await.unwrap();

        let err = lifecycle.unregister_plugin(&b).await.unwrap_err();
        match err {
            OrchestratorError::StillRequired { dependents, .. } => {
                assert_eq!(dependents, vec!["d v1.0.0".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(lifecycle.container().is_initialized(&b));
    }

    #[tokio::test]
    async fn test_unregister_refused_while_dependent_registered() {
        let lifecycle = lifecycle();
        let (b, b_calls) = counted("b", &[]);
        let (d, _) = counted("d", &[&b]);
        lifecycle.register_plugin(&b).unwrap();
        lifecycle.register_plugin(&d).unwrap();
        lifecycle.initialize(&[b.clone()], false).await.unwrap();

        let err = lifecycle.unregister_plugin(&b).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::StillRequired { .. }));
        assert!(lifecycle.container().is_initialized(&b));
        assert_eq!(b_calls.shut_down(), 0);
    }

    #[tokio::test]
    async fn test_round_trip_removes_private_dependency() {
        let lifecycle = lifecycle();
        let (d, _) = counted("d", &[]);
        let (p, _) = counted("p", &[&d]);
        assert!(lifecycle.register_plugin(&p).unwrap());

        lifecycle.initialize(&[d.clone(), p.clone()], false).await.unwrap();
        lifecycle.shutdown(&[p.clone(), d.clone()], false).await.unwrap();
        assert!(lifecycle.unregister_plugin(&p).await.unwrap());

        assert!(lifecycle.container().is_empty());
        assert!(matches!(
            lifecycle.container().internals(&d),
            Err(OrchestratorError::NotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_unregister_refused_while_private_dependency_active() {
        let lifecycle = lifecycle();
        let (d, _) = counted("d", &[]);
        let (p, p_calls) = counted("p", &[&d]);
        lifecycle.register_plugin(&p).unwrap();
        lifecycle.initialize(&[d.clone(), p.clone()], false).await.unwrap();

        let err = lifecycle.unregister_plugin(&p).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::StillInitialized(ref id) if id == "d v1.0.0"));
        assert!(lifecycle.container().is_initialized(&p));
        assert_eq!(p_calls.shut_down(), 0);
    }

    #[tokio::test]
    async fn test_out_of_batch_dependency_defers_initialization() {
        let lifecycle = lifecycle();
        let (b, b_calls) = counted("b", &[]);
        let (d, d_calls) = counted("d", &[&b]);
        lifecycle.register_plugin(&b).unwrap();
        lifecycle.register_plugin(&d).unwrap();

        let report = lifecycle.initialize(&[d.clone()], false).await.unwrap();
        assert_eq!(
            report.outcomes[0].outcome,
            StepOutcome::Deferred(vec!["b v1.0.0".to_string()])
        );
        assert_eq!(state(&lifecycle, &d), LifecycleState::Uninitialized);
        assert_eq!(d_calls.initialized(), 0);

        lifecycle.initialize(&[b.clone()], false).await.unwrap();
        lifecycle.initialize(&[d.clone()], false).await.unwrap();
        assert!(lifecycle.container().is_initialized(&d));
        assert_eq!(b_calls.initialized(), 1);
    }

    #[tokio::test]
    async fn test_in_batch_dependency_does_not_defer() {
        let lifecycle = lifecycle();
        let (b, _) = counted("b", &[]);
        let (d, _) = counted("d", &[&b]);
        lifecycle.register_plugin(&b).unwrap();
        lifecycle.register_plugin(&d).unwrap();

        let report = lifecycle.initialize(&[b.clone(), d.clone()], false).await.unwrap();
        assert_eq!(report.completed().len(), 2);
    }

    #[tokio::test]
    async fn test_abort_leaves_component_uninitialized() {
        let lifecycle = lifecycle();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        lifecycle
            .events()
            .on(LifecycleEvent::AfterInitialize)
            .run_sync(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let plugin = FnComponent::new(Metadata::new("shy", "1.0.0"))
            .on_initialize(|| async { Ok(InitOutcome::Abort) })
            .build();
        lifecycle.register_plugin(&plugin).unwrap();

        let report = lifecycle.initialize(&[plugin.clone()], false).await.unwrap();
        assert_eq!(report.outcomes[0].outcome, StepOutcome::Aborted);
        assert!(report.is_success());
        assert_eq!(state(&lifecycle, &plugin), LifecycleState::Uninitialized);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_handler_fails_component() {
        let lifecycle = lifecycle();
        lifecycle
            .events()
            .on(LifecycleEvent::BeforeInitialize)
            .run_sync(|_| Err(BoxError::from("vetoed")))
            .unwrap();

        let (plugin, calls) = counted("guarded", &[]);
        lifecycle.register_plugin(&plugin).unwrap();

        let report = lifecycle.initialize(&[plugin.clone()], true).await.unwrap();
        match &report.failures[0].1 {
            OrchestratorError::LifecycleFailure { phase, .. } => {
                assert_eq!(*phase, LifecyclePhase::BeforeInitialize);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.initialized(), 0);
        assert_eq!(state(&lifecycle, &plugin), LifecycleState::Uninitialized);
    }

    #[tokio::test]
    async fn test_failed_shutdown_keeps_component_initialized() {
        let lifecycle = lifecycle();
        let plugin = FnComponent::new(Metadata::new("sticky", "1.0.0"))
            .on_shutdown(|| async { Err(BoxError::from("busy")) })
            .build();
        lifecycle.register_plugin(&plugin).unwrap();
        lifecycle.initialize(&[plugin.clone()], false).await.unwrap();

        let report = lifecycle.shutdown(&[plugin.clone()], true).await.unwrap();
        assert_eq!(report.outcomes[0].outcome, StepOutcome::Failed);
        assert!(lifecycle.container().is_initialized(&plugin));
    }

    #[tokio::test]
    async fn test_unregistered_member_rejects_whole_batch() {
        let lifecycle = lifecycle();
        let (known, calls) = counted("known", &[]);
        let (stray, _) = counted("stray", &[]);
        lifecycle.register_plugin(&known).unwrap();

        let err = lifecycle.initialize(&[known, stray], true).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotRegistered(ref identity) if identity == "stray v1.0.0"));
        assert_eq!(calls.initialized(), 0);
    }

    #[tokio::test]
    async fn test_register_plugin_twice_is_noop() {
        let lifecycle = lifecycle();
        let (plugin, _) = counted("once", &[]);

        assert!(lifecycle.register_plugin(&plugin).unwrap());
        assert!(!lifecycle.register_plugin(&plugin).unwrap());

        let registration = lifecycle.container().registration(&plugin).unwrap();
        assert_eq!(registration.registered_by, "orchestration::lifecycle");
    }

    #[tokio::test]
    async fn test_wait_is_cancelled_by_shutdown_signal() {
        let lifecycle = lifecycle();
        let (passive, _) = counted("passive", &[]);
        let observed = Arc::new(AtomicUsize::new(0));
        let seen = observed.clone();
        let active = FnComponent::new(Metadata::new("active", "1.0.0"))
            .on_wait(move |mut shutdown: ShutdownWatch| {
                let seen = seen.clone();
                async move {
                    wait_for_signal(&mut shutdown).await;
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .build();

        let members = [passive, active];
        let (tx, rx) = watch::channel(false);
        let (result, _) = tokio::join!(lifecycle.wait(&members, rx), async {
            tokio::task::yield_now().await;
            tx.send(true).unwrap();
        });

        assert!(matches!(result, Err(OrchestratorError::Cancelled)));
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_returns_when_components_finish() {
        let lifecycle = lifecycle();
        let done = FnComponent::new(Metadata::new("job", "1.0.0"))
            .on_wait(|_| async { Ok(()) })
            .build();
        let broken = FnComponent::new(Metadata::new("broken", "1.0.0"))
            .on_wait(|_| async { Err(BoxError::from("crashed")) })
            .build();

        let (_tx, rx) = watch::channel(false);
        lifecycle.wait(&[done.clone()], rx.clone()).await.unwrap();

        let err = lifecycle.wait(&[done, broken], rx).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Batch {
                operation: BatchOperation::Wait,
                ..
            }
        ));
    }
}
