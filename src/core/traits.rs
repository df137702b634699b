//! Core traits for orchestrated components
//!
//! Every unit the container manages implements [`Component`]. Only the
//! metadata accessor is required; the default bodies of the lifecycle methods
//! stand for "not implemented" and are treated as trivially successful.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{error::BoxError, metadata::Metadata};

/// Shared handle to a component.
pub type ComponentRef = Arc<dyn Component>;

/// Shutdown signal observed by long-running waits. `true` means stop.
pub type ShutdownWatch = watch::Receiver<bool>;

/// Result of a component's `initialize` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// The component is ready
    Ready,
    /// The component declined to start; it stays uninitialized
    Abort,
}

/// A registrable unit of application behavior
#[async_trait]
pub trait Component: Send + Sync {
    /// Identity and declared dependencies of this component
    fn metadata(&self) -> &Metadata;

    async fn initialize(&self) -> Result<InitOutcome, BoxError> {
        Ok(InitOutcome::Ready)
    }

    async fn shutdown(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Suspend until the component is done or the shutdown signal fires.
    ///
    /// The default parks until shutdown, so passive components never make a
    /// wait return early.
    async fn wait(&self, mut shutdown: ShutdownWatch) -> Result<(), BoxError> {
        wait_for_signal(&mut shutdown).await;
        Ok(())
    }

    async fn on_before_initialize(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_after_initialize(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_before_shutdown(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_after_shutdown(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Resolves once the watched value turns `true`. A dropped sender that never
/// signalled leaves the caller parked.
pub async fn wait_for_signal(shutdown: &mut ShutdownWatch) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Sender dropped: nobody can signal anymore
            if !*shutdown.borrow() {
                futures::future::pending::<()>().await;
            }
            return;
        }
    }
}

/// Address-based identity of a component allocation.
pub(crate) fn component_key(component: &ComponentRef) -> usize {
    Arc::as_ptr(component) as *const () as usize
}

/// Returns true when both handles point at the same component.
pub fn same_component(a: &ComponentRef, b: &ComponentRef) -> bool {
    component_key(a) == component_key(b)
}
