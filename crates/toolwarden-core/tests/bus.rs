// crates/toolwarden-core/tests/bus.rs
// ============================================================================
// Module: Event Bus Tests
// Description: Verifies non-blocking dispatch, isolation, and deadlines.
// ============================================================================
//! ## Overview
//! Ensures emission returns before any listener executes, failing and
//! panicking listeners never affect their peers, the per-listener deadline
//! abandons without cancelling, and the trace resolver is consulted exactly
//! once per emit and never for pre-formed events.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::missing_docs_in_private_items,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Map;
use tokio::sync::mpsc;
use toolwarden_core::EventBus;
use toolwarden_core::EventListener;
use toolwarden_core::EventType;
use toolwarden_core::GovernanceEvent;
use toolwarden_core::ListenerError;
use toolwarden_core::TraceId;

/// Listener that forwards events into a channel.
struct ChannelListener {
    sender: mpsc::UnboundedSender<GovernanceEvent>,
}

#[async_trait]
impl EventListener for ChannelListener {
    async fn handle(&self, event: GovernanceEvent) -> Result<(), ListenerError> {
        self.sender.send(event).map_err(|err| ListenerError(err.to_string()))
    }
}

/// Listener that always fails.
struct FailingListener;

#[async_trait]
impl EventListener for FailingListener {
    async fn handle(&self, _event: GovernanceEvent) -> Result<(), ListenerError> {
        Err(ListenerError("intentional failure".to_string()))
    }
}

/// Listener that panics on every event.
struct PanickingListener;

#[async_trait]
impl EventListener for PanickingListener {
    async fn handle(&self, _event: GovernanceEvent) -> Result<(), ListenerError> {
        panic!("intentional panic");
    }
}

/// Listener that sleeps past the bus deadline and then reports completion.
struct SlowListener {
    sender: mpsc::UnboundedSender<&'static str>,
}

#[async_trait]
impl EventListener for SlowListener {
    async fn handle(&self, _event: GovernanceEvent) -> Result<(), ListenerError> {
        tokio::time::sleep(Duration::from_millis(250)).await;
        self.sender.send("finished").map_err(|err| ListenerError(err.to_string()))
    }
}

/// Subscribes a channel listener and returns the receiver.
fn subscribe(bus: &EventBus, event_type: EventType) -> mpsc::UnboundedReceiver<GovernanceEvent> {
    let (sender, receiver) = mpsc::unbounded_channel();
    bus.on(
        event_type,
        Arc::new(ChannelListener {
            sender,
        }),
    );
    receiver
}

#[tokio::test]
async fn emit_returns_before_listeners_execute() {
    let bus = EventBus::new();
    let mut receiver = subscribe(&bus, EventType::ToolCallAllowed);
    bus.emit(EventType::ToolCallAllowed, Map::new());
    assert!(
        receiver.try_recv().is_err(),
        "listener must not run on the caller's stack"
    );
    let event = receiver.recv().await.expect("delivery");
    assert_eq!(event.event_type, EventType::ToolCallAllowed);
}

#[tokio::test]
async fn failing_listener_does_not_block_its_peers() {
    let bus = EventBus::new();
    bus.on(EventType::ToolCallDenied, Arc::new(FailingListener));
    let mut receiver = subscribe(&bus, EventType::ToolCallDenied);
    bus.on(EventType::ToolCallDenied, Arc::new(FailingListener));
    bus.emit(EventType::ToolCallDenied, Map::new());
    let event = receiver.recv().await.expect("peer delivery");
    assert_eq!(event.event_type, EventType::ToolCallDenied);
}

#[tokio::test]
async fn panicking_listener_does_not_block_its_peers() {
    let bus = EventBus::new();
    bus.on(EventType::ToolCallError, Arc::new(PanickingListener));
    let mut receiver = subscribe(&bus, EventType::ToolCallError);
    bus.emit(EventType::ToolCallError, Map::new());
    let event = receiver.recv().await.expect("peer delivery");
    assert_eq!(event.event_type, EventType::ToolCallError);
}

#[tokio::test]
async fn slow_listener_is_abandoned_but_not_cancelled() {
    let bus = EventBus::new();
    let (sender, mut slow_receiver) = mpsc::unbounded_channel();
    bus.on(
        EventType::ApprovalRequested,
        Arc::new(SlowListener {
            sender,
        }),
    );
    let mut fast_receiver = subscribe(&bus, EventType::ApprovalRequested);

    bus.emit(EventType::ApprovalRequested, Map::new());
    // The fast listener completes while the slow one is still sleeping.
    let fast = tokio::time::timeout(Duration::from_millis(100), fast_receiver.recv())
        .await
        .expect("fast listener within deadline")
        .expect("fast delivery");
    assert_eq!(fast.event_type, EventType::ApprovalRequested);
    // The abandoned listener still runs to completion afterwards.
    let finished = tokio::time::timeout(Duration::from_secs(2), slow_receiver.recv())
        .await
        .expect("slow listener completes")
        .expect("slow delivery");
    assert_eq!(finished, "finished");
}

#[tokio::test]
async fn emission_targets_only_the_event_type() {
    let bus = EventBus::new();
    let mut allowed = subscribe(&bus, EventType::ToolCallAllowed);
    let mut denied = subscribe(&bus, EventType::ToolCallDenied);
    bus.emit(EventType::ToolCallAllowed, Map::new());
    allowed.recv().await.expect("allowed delivery");
    assert!(denied.try_recv().is_err(), "other types must not fire");
}

#[tokio::test]
async fn removed_listeners_are_not_invoked() {
    let bus = EventBus::new();
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let token = bus.on(
        EventType::PolicyCreated,
        Arc::new(ChannelListener {
            sender,
        }),
    );
    assert!(bus.off(token));
    assert!(!bus.off(token), "second removal is a no-op");
    bus.emit(EventType::PolicyCreated, Map::new());
    tokio::task::yield_now().await;
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn remove_all_clears_one_event_type() {
    let bus = EventBus::new();
    let mut created = subscribe(&bus, EventType::PolicyCreated);
    let mut deleted = subscribe(&bus, EventType::PolicyDeleted);
    bus.remove_all(EventType::PolicyCreated);
    assert_eq!(bus.listener_count(EventType::PolicyCreated), 0);
    assert_eq!(bus.listener_count(EventType::PolicyDeleted), 1);
    bus.emit(EventType::PolicyCreated, Map::new());
    bus.emit(EventType::PolicyDeleted, Map::new());
    deleted.recv().await.expect("survivor delivery");
    assert!(created.try_recv().is_err());
}

#[tokio::test]
async fn trace_resolver_is_consulted_once_per_emit() {
    let bus = EventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let trace = TraceId::generate();
    let resolved = trace.clone();
    bus.set_trace_resolver(Some(Arc::new(move || {
        counted.fetch_add(1, Ordering::SeqCst);
        Some(resolved.clone())
    })));

    let mut first = subscribe(&bus, EventType::AgentStarted);
    let mut second = subscribe(&bus, EventType::AgentStarted);
    bus.emit(EventType::AgentStarted, Map::new());

    let event = first.recv().await.expect("first delivery");
    second.recv().await.expect("second delivery");
    assert_eq!(event.trace_id.as_ref(), Some(&trace));
    assert_eq!(calls.load(Ordering::SeqCst), 1, "resolver runs once per emit");
}

#[tokio::test]
async fn emit_event_does_not_consult_the_resolver() {
    let bus = EventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    bus.set_trace_resolver(Some(Arc::new(move || {
        counted.fetch_add(1, Ordering::SeqCst);
        None
    })));
    let mut receiver = subscribe(&bus, EventType::AgentStopped);
    bus.emit_event(GovernanceEvent::new(EventType::AgentStopped, Map::new()));
    let event = receiver.recv().await.expect("delivery");
    assert_eq!(event.trace_id, None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
