//! Whole-container lifecycle runs
//!
//! Batch calls only defer members whose outside dependencies are not ready.
//! The functions here issue dependency-respecting waves until nothing is left
//! to do, and drive an application from startup to teardown.

use std::collections::HashSet;

use log::{error, info, warn};

use crate::{
    config::LifecycleConfig,
    core::{
        error::{BatchOperation, OrchestratorError, OrchestratorResult},
        metadata::{ComponentId, ComponentKind},
        traits::{ComponentRef, ShutdownWatch},
    },
};

use super::{
    lifecycle::ComponentLifecycle,
    report::{BatchReport, StepOutcome},
};

impl ComponentLifecycle {
    /// Initialize every registered component, dependencies first.
    ///
    /// Components left uninitialized because a dependency failed or
    /// aborted are reported as deferred.
    pub async fn initialize_all(&self, allow_partial_failure: bool) -> OrchestratorResult<BatchReport> {
        let container = self.container();
        let mut report = BatchReport::new(BatchOperation::Initialize);
        let mut attempted = HashSet::new();

        loop {
            let wave = fresh(container.initialize_frontier(), &mut attempted, |c| {
                container.id_of(c)
            });
            if wave.is_empty() {
                break;
            }
            info!("Initializing wave of {} component(s)", wave.len());
            report.merge(self.initialize(&wave, true).await?);
        }

        for component in container.components() {
            let Some(id) = container.id_of(&component) else {
                continue;
            };
            if attempted.contains(&id) || container.state(&component)?.is_active() {
                continue;
            }
            let blocking: Vec<String> = component
                .metadata()
                .requires
                .iter()
                .filter(|required| !container.is_initialized(required))
                .map(|required| required.metadata().identity())
                .collect();
            report.record(
                id,
                component.metadata().identity(),
                Ok(StepOutcome::Deferred(blocking)),
            );
        }

        report.finish(allow_partial_failure)
    }

    /// Shut down every initialized component, dependents first.
    pub async fn shutdown_all(&self, allow_partial_failure: bool) -> OrchestratorResult<BatchReport> {
        let container = self.container();
        let mut report = BatchReport::new(BatchOperation::Shutdown);
        let mut attempted = HashSet::new();

        loop {
            let wave = fresh(container.shutdown_frontier(), &mut attempted, |c| {
                container.id_of(c)
            });
            if wave.is_empty() {
                break;
            }
            info!("Shutting down wave of {} component(s)", wave.len());
            report.merge(self.shutdown(&wave, true).await?);
        }

        for component in container.components() {
            let Some(id) = container.id_of(&component) else {
                continue;
            };
            if attempted.contains(&id) || !container.is_initialized(&component) {
                continue;
            }
            let blocking = container.active_dependents(&component)?;
            report.record(
                id,
                component.metadata().identity(),
                Ok(StepOutcome::Deferred(blocking)),
            );
        }

        report.finish(allow_partial_failure)
    }

    /// Run the application until `shutdown` fires or the app finishes.
    ///
    /// Startup initializes the whole container in waves. Failures of the app
    /// are fatal, as are library failures unless the policy allows them;
    /// plugin failures are logged and fatal only when the policy forbids
    /// them. Teardown always runs.
    pub async fn run(
        &self,
        policy: &LifecycleConfig,
        shutdown: ShutdownWatch,
    ) -> OrchestratorResult<()> {
        let app = self.container().provided_app()?;
        info!("Starting {}", app.metadata().identity());

        let outcome = self.start_and_wait(&app, policy, shutdown).await;

        info!("Tearing down {}", app.metadata().identity());
        let teardown = match self.shutdown_all(true).await {
            Ok(report) if report.is_success() => Ok(()),
            Ok(report) => {
                for (_, failure) in &report.failures {
                    error!("Shutdown failure: {failure}");
                }
                Err(report.into_error())
            }
            Err(err) => Err(err),
        };

        outcome.and(teardown)
    }

    async fn start_and_wait(
        &self,
        app: &ComponentRef,
        policy: &LifecycleConfig,
        shutdown: ShutdownWatch,
    ) -> OrchestratorResult<()> {
        let BatchReport {
            outcomes, failures, ..
        } = self.initialize_all(true).await?;

        let mut fatal = Vec::new();
        for (id, failure) in failures {
            if self.is_fatal(id, policy) {
                error!("Startup failure: {failure}");
                fatal.push(failure);
            } else {
                warn!("Continuing despite failure: {failure}");
            }
        }
        if !fatal.is_empty() {
            return Err(OrchestratorError::Batch {
                operation: BatchOperation::Initialize,
                failures: fatal,
            });
        }

        for skipped in outcomes
            .iter()
            .filter(|o| matches!(o.outcome, StepOutcome::Deferred(_)))
        {
            warn!("{} was not started: {}", skipped.identity, skipped.outcome);
        }

        if !self.container().is_initialized(app) {
            warn!("{} did not start, skipping wait", app.metadata().identity());
            return Ok(());
        }

        match self.wait(std::slice::from_ref(app), shutdown).await {
            Ok(()) => {
                info!("{} finished", app.metadata().identity());
                Ok(())
            }
            Err(OrchestratorError::Cancelled) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn is_fatal(&self, id: ComponentId, policy: &LifecycleConfig) -> bool {
        let kind = self
            .container()
            .component(id)
            .and_then(|component| self.container().internals(&component).ok())
            .map(|internals| internals.kind);

        match kind {
            Some(ComponentKind::App) => true,
            Some(ComponentKind::Library | ComponentKind::Generic) => {
                !policy.allow_partial_library_failure
            }
            Some(ComponentKind::Plugin) => !policy.allow_partial_plugin_failure,
            None => false,
        }
    }
}

/// Components from `candidates` not attempted yet; marks them attempted.
fn fresh<F>(
    candidates: Vec<ComponentRef>,
    attempted: &mut HashSet<ComponentId>,
    id_of: F,
) -> Vec<ComponentRef>
where
    F: Fn(&ComponentRef) -> Option<ComponentId>,
{
    candidates
        .into_iter()
        .filter(|component| id_of(component).is_some_and(|id| attempted.insert(id)))
        .collect()
}
