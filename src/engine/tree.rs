//! Scope Tree Builder - Turns host lifecycle signals into scope-tree changes.
//!
//! The host fires, per component instance:
//!
//! ```text
//! created → pre-link → rendered → … → destroyed
//! ```
//!
//! - `created`: resolve the parent scope, create or share a scope, register it
//! - `pre-link`: record the declared children, hand over to the link sequencer
//! - `rendered`: hand over to the link sequencer
//! - `destroyed`: destroy the scope if this instance owns it, drop the entry
//!
//! Signals out of that order are contract violations and return
//! [`ScopeError`].

use std::cell::RefCell;
use std::collections::HashMap;

use tracing::{debug, error, warn};

use super::lifecycle;
use super::registry::{delete_scope, expect_scope, get_scope, set_scope};
use crate::error::{Result, ScopeError};
use crate::scope::create_scope;
use crate::types::{InstanceId, LifecyclePhase, ScopeConfig, ScopeId};

// =============================================================================
// Instance Records
// =============================================================================

pub(super) struct InstanceRecord {
    pub(super) parent: Option<InstanceId>,
    /// Children declared at pre-link, in render order. These gate the
    /// instance's own post-link.
    pub(super) children: Vec<InstanceId>,
    /// Children created under this instance but not declared at pre-link.
    pub(super) dynamic_children: Vec<InstanceId>,
    /// Declared children whose post-link has not fired yet.
    pub(super) pending_children: usize,
    pub(super) owns_scope: bool,
    pub(super) phase: LifecyclePhase,
}

thread_local! {
    static INSTANCES: RefCell<HashMap<InstanceId, InstanceRecord>> = RefCell::new(HashMap::new());
}

pub(super) fn with_records<R>(f: impl FnOnce(&HashMap<InstanceId, InstanceRecord>) -> R) -> R {
    INSTANCES.with(|records| f(&records.borrow()))
}

pub(super) fn with_records_mut<R>(f: impl FnOnce(&mut HashMap<InstanceId, InstanceRecord>) -> R) -> R {
    INSTANCES.with(|records| f(&mut records.borrow_mut()))
}

fn phase_of(instance: InstanceId) -> Option<LifecyclePhase> {
    with_records(|records| records.get(&instance).map(|record| record.phase))
}

fn unknown_instance(instance: InstanceId, signal: &'static str) -> ScopeError {
    error!(%instance, signal, "lifecycle signal for an instance that was never created");
    ScopeError::UnknownInstance(instance)
}

// =============================================================================
// Inbound Signals
// =============================================================================

/// `created`: give the instance a scope.
///
/// The parent scope is the one registered for `parent`, or the Root Scope for
/// a top-level instance. `config.new_scope` picks between a fresh child scope
/// (owned by this instance) and the parent's scope itself (shared).
pub fn instance_created(
    instance: InstanceId,
    parent: Option<InstanceId>,
    config: &ScopeConfig,
) -> Result<()> {
    if phase_of(instance).is_some() {
        error!(%instance, "instance created twice");
        return Err(ScopeError::AlreadyCreated(instance));
    }

    let parent_scope = match parent {
        Some(parent) => expect_scope(parent)?,
        None => ScopeId::root(),
    };

    let (scope, owns_scope) = if config.new_scope {
        (create_scope(Some(parent_scope)), true)
    } else {
        (parent_scope, false)
    };
    set_scope(instance, scope);

    with_records_mut(|records| {
        if let Some(parent_record) = parent.and_then(|p| records.get_mut(&p)) {
            if !parent_record.children.contains(&instance) {
                parent_record.dynamic_children.push(instance);
            }
        }
        records.insert(
            instance,
            InstanceRecord {
                parent,
                children: Vec::new(),
                dynamic_children: Vec::new(),
                pending_children: 0,
                owns_scope,
                phase: LifecyclePhase::CREATED,
            },
        );
    });

    debug!(%instance, %scope, owns_scope, "instance created");
    Ok(())
}

/// `pre-link`: the instance's direct children are known.
///
/// `children` is the render order; post-links of these children fire in that
/// order and before the instance's own post-link.
pub fn instance_pre_link(instance: InstanceId, children: &[InstanceId]) -> Result<()> {
    let phase = phase_of(instance).ok_or_else(|| unknown_instance(instance, "pre-link"))?;
    expect_scope(instance)?;

    if phase.contains(LifecyclePhase::PRE_LINK_SIGNALED) {
        warn!(%instance, "duplicate pre-link signal ignored");
        return Ok(());
    }

    let mut declared: Vec<InstanceId> = Vec::with_capacity(children.len());
    for child in children {
        if *child != instance && !declared.contains(child) {
            declared.push(*child);
        }
    }
    check_declared_children(instance, &declared)?;

    with_records_mut(|records| {
        if let Some(record) = records.get_mut(&instance) {
            record.dynamic_children.retain(|child| !declared.contains(child));
            record.pending_children = declared.len();
            record.children = declared;
            record.phase |= LifecyclePhase::PRE_LINK_SIGNALED;
        }
    });

    lifecycle::pre_link_signaled(instance);
    Ok(())
}

/// Every declared child must be a live instance created under `instance`,
/// otherwise the parent would wait on it forever.
fn check_declared_children(instance: InstanceId, declared: &[InstanceId]) -> Result<()> {
    let stray = with_records(|records| {
        declared
            .iter()
            .map(|child| (*child, records.get(child).map(|record| record.parent)))
            .find(|(_, parent)| *parent != Some(Some(instance)))
    });

    match stray {
        None => Ok(()),
        Some((child, None)) => {
            error!(%instance, %child, "pre-link declared a child that was never created");
            Err(ScopeError::UnknownInstance(child))
        }
        Some((child, Some(parent))) => {
            error!(%instance, %child, ?parent, "pre-link declared another instance's child");
            Err(ScopeError::NotAChild { instance, child })
        }
    }
}

/// `rendered`: the instance's own rendering is done.
pub fn instance_rendered(instance: InstanceId) -> Result<()> {
    let phase = phase_of(instance).ok_or_else(|| unknown_instance(instance, "rendered"))?;

    if !phase.contains(LifecyclePhase::PRE_LINK_SIGNALED) {
        error!(%instance, ?phase, "rendered before pre-link");
        return Err(ScopeError::OutOfOrder {
            instance,
            signal: "rendered",
            phase,
        });
    }
    if phase.contains(LifecyclePhase::RENDERED) {
        warn!(%instance, "duplicate rendered signal ignored");
        return Ok(());
    }

    with_records_mut(|records| {
        if let Some(record) = records.get_mut(&instance) {
            record.phase |= LifecyclePhase::RENDERED;
        }
    });

    lifecycle::rendered(instance);
    Ok(())
}

/// `destroyed`: tear the instance down.
///
/// An owning instance destroys its scope first, so `$destroy` listeners still
/// find the instance registered; the registry entry is deleted afterwards
/// whether or not the instance owned the scope.
pub fn instance_destroyed(instance: InstanceId) -> Result<()> {
    let owns_scope = with_records(|records| records.get(&instance).map(|record| record.owns_scope))
        .ok_or_else(|| unknown_instance(instance, "destroyed"))?;
    let scope = expect_scope(instance)?;

    if owns_scope {
        scope.destroy();
    }
    delete_scope(instance);

    if let Some(record) = with_records_mut(|records| records.remove(&instance)) {
        lifecycle::forget(instance, record.parent, record.phase);
    }

    debug!(%instance, %scope, owns_scope, "instance destroyed");
    Ok(())
}

// =============================================================================
// Lookups
// =============================================================================

/// Scope of a live instance (the `$scope` accessor).
pub fn instance_scope(instance: InstanceId) -> Option<ScopeId> {
    get_scope(instance)
}

/// Parent instance given at `created`.
pub fn parent_instance(instance: InstanceId) -> Option<InstanceId> {
    with_records(|records| records.get(&instance).and_then(|record| record.parent))
}

/// Children of an instance: declared ones in render order, then any created
/// later.
pub fn child_instances(instance: InstanceId) -> Vec<InstanceId> {
    with_records(|records| {
        records
            .get(&instance)
            .map(|record| {
                record
                    .children
                    .iter()
                    .chain(&record.dynamic_children)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    })
}

/// Lifecycle progress of an instance, `None` once destroyed.
pub fn instance_phase(instance: InstanceId) -> Option<LifecyclePhase> {
    phase_of(instance)
}

/// Check if the instance created its own scope.
pub fn owns_scope(instance: InstanceId) -> bool {
    with_records(|records| records.get(&instance).is_some_and(|record| record.owns_scope))
}

// =============================================================================
// Reset (for testing)
// =============================================================================

/// Forget every instance record (for testing).
pub fn reset_instances() {
    with_records_mut(|records| records.clear());
}
