// crates/toolwarden-core/src/runtime/bus.rs
// ============================================================================
// Module: ToolWarden Event Bus
// Description: Fire-and-forget listener dispatch with per-listener deadlines.
// Purpose: Deliver governance events without ever blocking the decision path.
// Dependencies: async-trait, crate::core, thiserror, tokio, tracing
// ============================================================================

//! ## Overview
//! The bus maps event types to ordered listener lists. Emission returns to
//! the caller immediately: every listener runs on its own spawned task, so
//! the caller's stack unwinds before any listener executes. Listener errors
//! and panics are logged at warn level and suppressed. An asynchronous
//! listener that exceeds the 100 ms deadline is abandoned, not cancelled;
//! the bus stops awaiting and the listener finishes whenever it does.
//!
//! Emission snapshots the listener list, so concurrent subscription changes
//! never affect an in-flight dispatch.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;
use tracing::warn;

use crate::core::EventType;
use crate::core::GovernanceEvent;
use crate::core::TraceId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Execution deadline granted to each listener per event.
pub const LISTENER_DEADLINE: Duration = Duration::from_millis(100);

// ============================================================================
// SECTION: Listeners
// ============================================================================

/// Error returned by a listener; always suppressed and logged at warn level.
#[derive(Debug, Error)]
#[error("listener failure: {0}")]
pub struct ListenerError(pub String);

/// Event listener registered with the bus.
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Handles one event.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] on failure; the bus logs and suppresses it.
    async fn handle(&self, event: GovernanceEvent) -> Result<(), ListenerError>;
}

/// Adapter turning a synchronous closure into a listener.
struct FnListener<F> {
    /// Wrapped closure.
    callback: F,
}

#[async_trait]
impl<F> EventListener for FnListener<F>
where
    F: Fn(GovernanceEvent) + Send + Sync,
{
    async fn handle(&self, event: GovernanceEvent) -> Result<(), ListenerError> {
        (self.callback)(event);
        Ok(())
    }
}

/// Token identifying one registration for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerToken {
    /// Event type the listener was registered for.
    pub event_type: EventType,
    /// Registration identifier.
    id: u64,
}

/// Resolver consulted once per `emit` for the ambient trace id.
pub type TraceResolver = Arc<dyn Fn() -> Option<TraceId> + Send + Sync>;

// ============================================================================
// SECTION: Event Bus
// ============================================================================

/// Registry state behind the bus lock.
#[derive(Default)]
struct BusState {
    /// Ordered listener lists keyed by event type.
    listeners: BTreeMap<EventType, Vec<(u64, Arc<dyn EventListener>)>>,
    /// Optional ambient trace resolver.
    resolver: Option<TraceResolver>,
}

/// Fire-and-forget event bus for governance events.
pub struct EventBus {
    /// Registry state; mutated on subscribe, read on emit.
    state: Mutex<BusState>,
    /// Monotonic registration counter.
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Installs or clears the ambient trace resolver.
    ///
    /// The resolver is invoked exactly once per [`Self::emit`] call;
    /// [`Self::emit_event`] never consults it.
    pub fn set_trace_resolver(&self, resolver: Option<TraceResolver>) {
        self.locked().resolver = resolver;
    }

    /// Registers a listener for one event type.
    pub fn on(&self, event_type: EventType, listener: Arc<dyn EventListener>) -> ListenerToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.locked().listeners.entry(event_type).or_default().push((id, listener));
        ListenerToken {
            event_type,
            id,
        }
    }

    /// Registers a synchronous closure as a listener.
    pub fn on_fn<F>(&self, event_type: EventType, callback: F) -> ListenerToken
    where
        F: Fn(GovernanceEvent) + Send + Sync + 'static,
    {
        self.on(
            event_type,
            Arc::new(FnListener {
                callback,
            }),
        )
    }

    /// Removes one registration; removing an absent token is a no-op.
    pub fn off(&self, token: ListenerToken) -> bool {
        let mut state = self.locked();
        let Some(entries) = state.listeners.get_mut(&token.event_type) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(id, _)| *id != token.id);
        entries.len() != before
    }

    /// Removes every listener for one event type.
    pub fn remove_all(&self, event_type: EventType) {
        self.locked().listeners.remove(&event_type);
    }

    /// Returns the number of listeners registered for one event type.
    #[must_use]
    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.locked().listeners.get(&event_type).map_or(0, Vec::len)
    }

    /// Emits an event built from a type and data map.
    ///
    /// The ambient trace resolver is consulted exactly once; dispatch is
    /// deferred to spawned tasks and this call returns immediately.
    pub fn emit(&self, event_type: EventType, data: Map<String, Value>) {
        let resolved = {
            let state = self.locked();
            state.resolver.as_ref().and_then(|resolver| resolver())
        };
        let mut event = GovernanceEvent::new(event_type, data);
        event.trace_id = resolved;
        self.dispatch(event);
    }

    /// Emits a fully formed event without consulting the trace resolver.
    pub fn emit_event(&self, event: GovernanceEvent) {
        self.dispatch(event);
    }

    /// Spawns one supervised task per registered listener.
    fn dispatch(&self, event: GovernanceEvent) {
        let snapshot: Vec<Arc<dyn EventListener>> = {
            let state = self.locked();
            state
                .listeners
                .get(&event.event_type)
                .map(|entries| entries.iter().map(|(_, listener)| Arc::clone(listener)).collect())
                .unwrap_or_default()
        };
        for listener in snapshot {
            let event = event.clone();
            tokio::spawn(supervise_listener(listener, event));
        }
    }

    /// Locks the registry state, recovering from poisoning.
    fn locked(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// SECTION: Listener Supervision
// ============================================================================

/// Runs one listener under the execution deadline, suppressing failures.
async fn supervise_listener(listener: Arc<dyn EventListener>, event: GovernanceEvent) {
    let event_type = event.event_type;
    let handle = tokio::spawn(async move { listener.handle(event).await });
    match timeout(LISTENER_DEADLINE, handle).await {
        Err(_) => {
            warn!(event = event_type.as_str(), "listener exceeded deadline; no longer awaited");
        }
        Ok(Err(join_error)) => {
            warn!(
                event = event_type.as_str(),
                error = %join_error,
                "listener panicked during dispatch"
            );
        }
        Ok(Ok(Err(listener_error))) => {
            warn!(
                event = event_type.as_str(),
                error = %listener_error,
                "listener failed during dispatch"
            );
        }
        Ok(Ok(Ok(()))) => {}
    }
}
