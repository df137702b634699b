//! Lifecycle event bus
//!
//! Handlers are registered per [`LifecycleEvent`] with an optional predicate
//! and run strictly in registration order for every `emit`. The first
//! failing handler aborts the dispatch and its error is returned to the
//! orchestrator as a lifecycle failure of the emitting component.

use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use log::{debug, error, warn};
use once_cell::sync::Lazy;

use crate::core::{
    error::{BoxError, LifecyclePhase, OrchestratorError, OrchestratorResult},
    traits::ComponentRef,
};

/// Events emitted around a component's lifecycle methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    BeforeInitialize,
    AfterInitialize,
    BeforeShutdown,
    AfterShutdown,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 4] = [
        LifecycleEvent::BeforeInitialize,
        LifecycleEvent::AfterInitialize,
        LifecycleEvent::BeforeShutdown,
        LifecycleEvent::AfterShutdown,
    ];

    pub fn as_str(&self) -> &'static str {
        self.phase().as_str()
    }

    pub fn phase(&self) -> LifecyclePhase {
        match self {
            LifecycleEvent::BeforeInitialize => LifecyclePhase::BeforeInitialize,
            LifecycleEvent::AfterInitialize => LifecyclePhase::AfterInitialize,
            LifecycleEvent::BeforeShutdown => LifecyclePhase::BeforeShutdown,
            LifecycleEvent::AfterShutdown => LifecyclePhase::AfterShutdown,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Asynchronous event handler
pub type EventHandler =
    Arc<dyn Fn(ComponentRef) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Decides whether a handler runs for a given component
pub type EventPredicate = Arc<dyn Fn(&ComponentRef) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

#[derive(Clone)]
struct RegisteredHandler {
    id: HandlerId,
    handler: EventHandler,
    predicate: Option<EventPredicate>,
}

impl RegisteredHandler {
    fn matches(&self, component: &ComponentRef) -> bool {
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate(component))
    }
}

static GLOBAL_EVENT_BUS: Lazy<Arc<EventBus>> = Lazy::new(|| Arc::new(EventBus::new()));

/// Table of lifecycle event handlers
pub struct EventBus {
    handlers: DashMap<LifecycleEvent, Vec<RegisteredHandler>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Process-wide bus, created on first use
    pub fn global() -> Arc<EventBus> {
        GLOBAL_EVENT_BUS.clone()
    }

    /// Register a handler directly
    pub fn subscribe(
        &self,
        event: LifecycleEvent,
        predicate: Option<EventPredicate>,
        handler: EventHandler,
    ) -> OrchestratorResult<HandlerId> {
        if self.is_closed() {
            return Err(OrchestratorError::BusClosed);
        }

        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let with_predicate = predicate.is_some();
        self.handlers.entry(event).or_default().push(RegisteredHandler {
            id,
            handler,
            predicate,
        });
        debug!("Registered handler for {event} (with check: {with_predicate})");
        Ok(id)
    }

    /// Start a fluent registration for `event`
    pub fn on(&self, event: LifecycleEvent) -> Registrar<'_> {
        Registrar {
            bus: self,
            event,
            predicate: None,
        }
    }

    /// Remove a single handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut removed = false;
        for mut list in self.handlers.iter_mut() {
            let before = list.len();
            list.retain(|registered| registered.id != id);
            removed |= list.len() != before;
        }
        removed
    }

    /// Run every matching handler for `component`, in registration order.
    pub async fn emit(
        &self,
        component: &ComponentRef,
        event: LifecycleEvent,
    ) -> OrchestratorResult<()> {
        if self.is_closed() {
            return Ok(());
        }

        // Release the table before calling user code
        let registered = match self.handlers.get(&event) {
            Some(list) => list.value().clone(),
            None => return Ok(()),
        };

        let matching: Vec<EventHandler> = registered
            .iter()
            .filter(|registered| registered.matches(component))
            .map(|registered| registered.handler.clone())
            .collect();

        if matching.is_empty() {
            return Ok(());
        }

        let identity = component.metadata().identity();
        debug!(
            "Emitting {event} for component {identity} ({} handlers)",
            matching.len()
        );

        for handler in matching {
            if let Err(source) = handler(component.clone()).await {
                error!("Error in event handler for {event} on {identity}: {source}");
                return Err(OrchestratorError::LifecycleFailure {
                    component: identity,
                    phase: event.phase(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// Drop the handlers of one event, or of all events
    pub fn clear(&self, event: Option<LifecycleEvent>) {
        match event {
            Some(event) => {
                self.handlers.remove(&event);
                debug!("Cleared handlers for {event}");
            }
            None => {
                self.handlers.clear();
                debug!("Cleared all event handlers");
            }
        }
    }

    pub fn handler_count(&self, event: LifecycleEvent) -> usize {
        self.handlers.get(&event).map_or(0, |list| list.len())
    }

    /// Drop all handlers and refuse new ones; later emits are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            warn!("Event bus already closed");
            return;
        }
        self.handlers.clear();
        debug!("Event bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Fluent handler registration returned by [`EventBus::on`]
pub struct Registrar<'a> {
    bus: &'a EventBus,
    event: LifecycleEvent,
    predicate: Option<EventPredicate>,
}

impl Registrar<'_> {
    /// Only run the handler for components accepted by `predicate`
    pub fn when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ComponentRef) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn run<F, Fut>(self, handler: F) -> OrchestratorResult<HandlerId>
    where
        F: Fn(ComponentRef) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let handler: EventHandler =
            Arc::new(move |component: ComponentRef| handler(component).boxed());
        self.bus.subscribe(self.event, self.predicate, handler)
    }

    pub fn run_sync<F>(self, handler: F) -> OrchestratorResult<HandlerId>
    where
        F: Fn(&ComponentRef) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(move |component: ComponentRef| {
            let result = handler(&component);
            async move { result }.boxed()
        });
        self.bus.subscribe(self.event, self.predicate, handler)
    }
}
