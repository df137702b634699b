//! Closure-backed components
//!
//! [`FnComponent`] turns plain closures into a [`Component`], so any value
//! can take part in the lifecycle without a dedicated type. Callbacks that
//! are not supplied behave like the trait defaults.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};

use crate::{
    core::{
        error::BoxError,
        metadata::{Metadata, MetadataPatch},
        traits::{wait_for_signal, Component, ComponentRef, InitOutcome, ShutdownWatch},
    },
    event::LifecycleEvent,
};

type InitFn = Arc<dyn Fn() -> BoxFuture<'static, Result<InitOutcome, BoxError>> + Send + Sync>;
type StepFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
type WaitFn =
    Arc<dyn Fn(ShutdownWatch) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A component assembled from optional callbacks
pub struct FnComponent {
    metadata: Metadata,
    initialize: Option<InitFn>,
    shutdown: Option<StepFn>,
    wait: Option<WaitFn>,
    before_initialize: Option<StepFn>,
    after_initialize: Option<StepFn>,
    before_shutdown: Option<StepFn>,
    after_shutdown: Option<StepFn>,
}

impl FnComponent {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            initialize: None,
            shutdown: None,
            wait: None,
            before_initialize: None,
            after_initialize: None,
            before_shutdown: None,
            after_shutdown: None,
        }
    }

    /// Start from type-derived metadata for `T`
    pub fn for_type<T: ?Sized>() -> Self {
        Self::new(Metadata::for_type::<T>())
    }

    /// Merge caller-supplied metadata fields over the current ones
    pub fn with_metadata(mut self, patch: MetadataPatch) -> Self {
        self.metadata.apply(patch);
        self
    }

    pub fn on_initialize<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<InitOutcome, BoxError>> + Send + 'static,
    {
        self.initialize = Some(Arc::new(move || f().boxed()));
        self
    }

    pub fn on_shutdown<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.shutdown = Some(step(f));
        self
    }

    pub fn on_wait<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ShutdownWatch) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.wait = Some(Arc::new(move |shutdown: ShutdownWatch| f(shutdown).boxed()));
        self
    }

    /// Component-specific hook, run before global handlers of the same event
    pub fn hook<F, Fut>(mut self, event: LifecycleEvent, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let slot = match event {
            LifecycleEvent::BeforeInitialize => &mut self.before_initialize,
            LifecycleEvent::AfterInitialize => &mut self.after_initialize,
            LifecycleEvent::BeforeShutdown => &mut self.before_shutdown,
            LifecycleEvent::AfterShutdown => &mut self.after_shutdown,
        };
        *slot = Some(step(f));
        self
    }

    pub fn has_initialize(&self) -> bool {
        self.initialize.is_some()
    }

    pub fn has_shutdown(&self) -> bool {
        self.shutdown.is_some()
    }

    pub fn has_wait(&self) -> bool {
        self.wait.is_some()
    }

    pub fn build(self) -> ComponentRef {
        Arc::new(self)
    }
}

fn step<F, Fut>(f: F) -> StepFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

async fn run_step(step: &Option<StepFn>) -> Result<(), BoxError> {
    match step {
        Some(step) => step().await,
        None => Ok(()),
    }
}

#[async_trait]
impl Component for FnComponent {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    async fn initialize(&self) -> Result<InitOutcome, BoxError> {
        match &self.initialize {
            Some(initialize) => initialize().await,
            None => Ok(InitOutcome::Ready),
        }
    }

    async fn shutdown(&self) -> Result<(), BoxError> {
        run_step(&self.shutdown).await
    }

    async fn wait(&self, mut shutdown: ShutdownWatch) -> Result<(), BoxError> {
        match &self.wait {
            Some(wait) => wait(shutdown).await,
            None => {
                wait_for_signal(&mut shutdown).await;
                Ok(())
            }
        }
    }

    async fn on_before_initialize(&self) -> Result<(), BoxError> {
        run_step(&self.before_initialize).await
    }

    async fn on_after_initialize(&self) -> Result<(), BoxError> {
        run_step(&self.after_initialize).await
    }

    async fn on_before_shutdown(&self) -> Result<(), BoxError> {
        run_step(&self.before_shutdown).await
    }

    async fn on_after_shutdown(&self) -> Result<(), BoxError> {
        run_step(&self.after_shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::watch;

    use super::*;

    struct Scheduler;

    #[tokio::test]
    async fn test_absent_callbacks_use_defaults() {
        let component = FnComponent::for_type::<Scheduler>();
        assert!(!component.has_initialize());
        assert!(!component.has_shutdown());
        assert!(!component.has_wait());

        let component = component.build();
        assert_eq!(component.metadata().name, "Scheduler");
        assert_eq!(component.initialize().await.unwrap(), InitOutcome::Ready);
        component.shutdown().await.unwrap();

        let (tx, rx) = watch::channel(false);
        let waiting = tokio::spawn({
            let component = component.clone();
            async move { component.wait(rx).await.is_ok() }
        });
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        tx.send(true).unwrap();
        assert!(waiting.await.unwrap());
    }

    #[tokio::test]
    async fn test_callbacks_are_invoked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hook_counter = calls.clone();
        let component = FnComponent::new(Metadata::new("worker", "2.0"))
            .on_initialize(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(InitOutcome::Abort)
                }
            })
            .hook(LifecycleEvent::AfterShutdown, move || {
                let counter = hook_counter.clone();
                async move {
                    counter.fetch_add(10, Ordering::SeqCst);
                    Ok(())
                }
            })
            .build();

        assert_eq!(component.initialize().await.unwrap(), InitOutcome::Abort);
        component.on_after_shutdown().await.unwrap();
        component.on_before_shutdown().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_with_metadata_patch() {
        let component = FnComponent::for_type::<Scheduler>()
            .with_metadata(MetadataPatch {
                name: Some("scheduler".to_string()),
                description: Some("cron runner".to_string()),
                ..Default::default()
            })
            .build();
        assert_eq!(component.metadata().identity(), "scheduler v0.0.0");
        assert_eq!(component.metadata().description, "cron runner");
    }
}
