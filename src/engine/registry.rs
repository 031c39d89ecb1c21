//! Identity Registry - The `$data` side table.
//!
//! Maps a component instance (`$uid`) to its scope:
//! - Instance id allocation
//! - Instance → ScopeId mapping (several instances may map to one scope)
//!
//! Entries never own their scope: deleting one leaves the scope untouched.

use std::cell::RefCell;
use std::collections::HashMap;

use tracing::{error, trace};

use crate::error::{Result, ScopeError};
use crate::types::{InstanceId, ScopeId};

// =============================================================================
// Registry State
// =============================================================================

thread_local! {
    /// Map instance to its scope.
    static SCOPE_DATA: RefCell<HashMap<InstanceId, ScopeId>> = RefCell::new(HashMap::new());

    /// Counter for generating unique instance ids.
    static UID_COUNTER: RefCell<u64> = const { RefCell::new(0) };
}

// =============================================================================
// Instance Allocation
// =============================================================================

/// Allocate an identity for a new component instance.
pub fn allocate_instance() -> InstanceId {
    UID_COUNTER.with(|counter| {
        let mut counter = counter.borrow_mut();
        let id = InstanceId(*counter);
        *counter += 1;
        id
    })
}

// =============================================================================
// Mapping
// =============================================================================

/// Associate `instance` with `scope`, replacing any previous scope.
pub fn set_scope(instance: InstanceId, scope: ScopeId) {
    let previous = SCOPE_DATA.with(|data| data.borrow_mut().insert(instance, scope));
    if let Some(previous) = previous.filter(|p| *p != scope) {
        trace!(%instance, %previous, %scope, "scope mapping replaced");
    }
}

/// Scope registered for `instance`, if any.
pub fn get_scope(instance: InstanceId) -> Option<ScopeId> {
    SCOPE_DATA.with(|data| data.borrow().get(&instance).copied())
}

/// Scope registered for `instance`; a missing entry is a lifecycle contract
/// violation.
pub fn expect_scope(instance: InstanceId) -> Result<ScopeId> {
    get_scope(instance).ok_or_else(|| {
        error!(%instance, "no scope registered for instance");
        ScopeError::MissingRegistration(instance)
    })
}

/// Remove the entry for `instance`. The scope itself is not destroyed.
pub fn delete_scope(instance: InstanceId) -> Option<ScopeId> {
    SCOPE_DATA.with(|data| data.borrow_mut().remove(&instance))
}

/// Every instance currently mapped to `scope`, in id order.
pub fn instances_for(scope: ScopeId) -> Vec<InstanceId> {
    let mut instances: Vec<InstanceId> = SCOPE_DATA.with(|data| {
        data.borrow()
            .iter()
            .filter(|(_, mapped)| **mapped == scope)
            .map(|(instance, _)| *instance)
            .collect()
    });
    instances.sort();
    instances
}

/// Number of registered instances.
pub fn registered_count() -> usize {
    SCOPE_DATA.with(|data| data.borrow().len())
}

// =============================================================================
// Reset (for testing)
// =============================================================================

/// Reset all registry state (for testing).
pub fn reset_identity_registry() {
    SCOPE_DATA.with(|data| data.borrow_mut().clear());
    UID_COUNTER.with(|counter| *counter.borrow_mut() = 0);
}
