// crates/toolwarden-core/src/runtime/killswitch.rs
// ============================================================================
// Module: ToolWarden Kill Switch
// Description: Global and per-tenant circuit breaker with idempotent writes.
// Purpose: Short-circuit evaluation deterministically during an incident.
// Dependencies: crate::core, crate::runtime::bus, serde
// ============================================================================

//! ## Overview
//! The kill switch holds two independent tiers: one global triple and one
//! triple per tenant. Activation and reset are idempotent first-write-wins
//! operations; a second activation changes nothing and emits nothing. The
//! tiers never interact: resetting the global tier leaves every tenant tier
//! untouched and vice versa. Activation is linearized with respect to every
//! subsequent `is_active` query through a single internal lock.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::json;

use crate::core::EventType;
use crate::core::GovernanceEvent;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::runtime::bus::EventBus;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Reset reason recorded when none is supplied.
pub const DEFAULT_RESET_REASON: &str = "Manual reset";

// ============================================================================
// SECTION: Status
// ============================================================================

/// Observable state of one kill-switch scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillSwitchStatus {
    /// True while the scope is tripped.
    pub active: bool,
    /// Activation instant, while active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<Timestamp>,
    /// Activation reason, while active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ============================================================================
// SECTION: Kill Switch
// ============================================================================

/// Two-tier state behind the kill-switch lock.
#[derive(Default)]
struct KillSwitchState {
    /// Global tier.
    global: KillSwitchStatus,
    /// Per-tenant tiers.
    tenants: BTreeMap<TenantId, KillSwitchStatus>,
}

/// Deterministic, tenant-scoped circuit breaker.
pub struct KillSwitch {
    /// Tiered state; critical sections are O(1).
    state: Mutex<KillSwitchState>,
    /// Optional bus for activation and reset events.
    bus: Option<Arc<EventBus>>,
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl KillSwitch {
    /// Creates a kill switch without event emission.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(KillSwitchState::default()),
            bus: None,
        }
    }

    /// Creates a kill switch that emits activation and reset events.
    #[must_use]
    pub fn with_bus(bus: Arc<EventBus>) -> Self {
        Self {
            state: Mutex::new(KillSwitchState::default()),
            bus: Some(bus),
        }
    }

    /// Activates a scope; idempotent when the scope is already active.
    ///
    /// On the first activation the triple is set and `killswitch.activated`
    /// is emitted with the reason and, for tenant scopes, the tenant id. A
    /// second activation returns without changing state or emitting.
    pub fn activate(&self, reason: &str, tenant: Option<&TenantId>) {
        let activated = {
            let mut state = self.locked();
            let scope = scope_entry(&mut state, tenant);
            if scope.active {
                false
            } else {
                scope.active = true;
                scope.activated_at = Some(Timestamp::now());
                scope.reason = Some(reason.to_string());
                true
            }
        };
        if !activated {
            return;
        }
        if let Some(bus) = &self.bus {
            let mut data = Map::new();
            data.insert("reason".to_string(), json!(reason));
            if let Some(tenant) = tenant {
                data.insert("tenantId".to_string(), json!(tenant.as_str()));
            }
            let mut event = GovernanceEvent::new(EventType::KillSwitchActivated, data);
            event.tenant_id = tenant.cloned();
            bus.emit_event(event);
        }
    }

    /// Resets a scope; idempotent when the scope is inactive.
    ///
    /// On an active scope the triple is cleared and `killswitch.deactivated`
    /// is emitted carrying both the reset reason (defaulting to
    /// [`DEFAULT_RESET_REASON`]) and the preserved previous reason.
    pub fn reset(&self, tenant: Option<&TenantId>, reason: Option<&str>) {
        let previous = {
            let mut state = self.locked();
            let scope = scope_entry(&mut state, tenant);
            if scope.active {
                let previous = scope.reason.take();
                scope.active = false;
                scope.activated_at = None;
                Some(previous)
            } else {
                None
            }
        };
        let Some(previous_reason) = previous else {
            return;
        };
        if let Some(bus) = &self.bus {
            let mut data = Map::new();
            data.insert(
                "reason".to_string(),
                json!(reason.unwrap_or(DEFAULT_RESET_REASON)),
            );
            data.insert("previousReason".to_string(), json!(previous_reason));
            if let Some(tenant) = tenant {
                data.insert("tenantId".to_string(), json!(tenant.as_str()));
            }
            let mut event = GovernanceEvent::new(EventType::KillSwitchDeactivated, data);
            event.tenant_id = tenant.cloned();
            bus.emit_event(event);
        }
    }

    /// Reports whether a scope is tripped.
    #[must_use]
    pub fn is_active(&self, tenant: Option<&TenantId>) -> bool {
        let state = self.locked();
        tenant.map_or(state.global.active, |tenant| {
            state.tenants.get(tenant).is_some_and(|scope| scope.active)
        })
    }

    /// Reports the full triple for a scope.
    #[must_use]
    pub fn status(&self, tenant: Option<&TenantId>) -> KillSwitchStatus {
        let state = self.locked();
        tenant.map_or_else(
            || state.global.clone(),
            |tenant| state.tenants.get(tenant).cloned().unwrap_or_default(),
        )
    }

    /// Locks the tiered state, recovering from poisoning.
    fn locked(&self) -> MutexGuard<'_, KillSwitchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the mutable triple for a scope, creating tenant tiers on demand.
fn scope_entry<'a>(
    state: &'a mut KillSwitchState,
    tenant: Option<&TenantId>,
) -> &'a mut KillSwitchStatus {
    match tenant {
        None => &mut state.global,
        Some(tenant) => state.tenants.entry(tenant.clone()).or_default(),
    }
}
