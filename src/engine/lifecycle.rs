//! Lifecycle Sequencer - Re-emits link signals in tree order.
//!
//! For a parent P with declared children C1, C2 the scopes observe
//!
//! ```text
//! $preLink(P)  $preLink(C1)  $preLink(C2)  $postLink(C1)  $postLink(C2)  $postLink(P)
//! ```
//!
//! whatever order the host reported `pre-link`/`rendered` in.
//!
//! - `$preLink(X)` fires once X is signaled and X's parent has pre-linked;
//!   X's ready children follow immediately, depth-first.
//! - `$postLink(X)` fires once X has pre-linked and rendered and
//!   `pending_children` reached zero. A declared child also waits until every
//!   declared sibling has pre-linked and every earlier one has post-linked.
//!
//! Children that were not declared at pre-link link on their own and never
//! hold up their parent.

use tracing::{trace, warn};

use super::registry::get_scope;
use super::tree::{with_records, with_records_mut};
use crate::types::{InstanceId, LifecyclePhase, POST_LINK_EVENT, PRE_LINK_EVENT};

// =============================================================================
// Entry Points (from the tree builder)
// =============================================================================

pub(super) fn pre_link_signaled(instance: InstanceId) {
    let mut linked = Vec::new();
    pre_link_cascade(instance, &mut linked);

    // Post-links only after the whole cascade, so siblings pre-link first.
    for linked_instance in linked {
        try_post_link(linked_instance);
        if let Some(parent) = parent_of(linked_instance) {
            try_first_pending_child(parent);
        }
    }
}

pub(super) fn rendered(instance: InstanceId) {
    try_post_link(instance);
}

/// Drop a destroyed instance from its parent's bookkeeping.
pub(super) fn forget(instance: InstanceId, parent: Option<InstanceId>, phase: LifecyclePhase) {
    let Some(parent) = parent else { return };

    let was_pending = with_records_mut(|records| {
        let Some(record) = records.get_mut(&parent) else {
            return false;
        };
        record.dynamic_children.retain(|child| *child != instance);
        let Some(index) = record.children.iter().position(|child| *child == instance) else {
            return false;
        };
        record.children.remove(index);
        if phase.contains(LifecyclePhase::POST_LINKED) {
            return false;
        }
        record.pending_children = record.pending_children.saturating_sub(1);
        true
    });

    if was_pending {
        trace!(%instance, %parent, "pending child destroyed before post-link");
        try_first_pending_child(parent);
        try_post_link(parent);
    }
}

// =============================================================================
// Pre-link
// =============================================================================

fn can_pre_link(instance: InstanceId) -> bool {
    with_records(|records| {
        let Some(record) = records.get(&instance) else {
            return false;
        };
        if !record.phase.contains(LifecyclePhase::PRE_LINK_SIGNALED)
            || record.phase.contains(LifecyclePhase::PRE_LINKED)
        {
            return false;
        }
        // A destroyed parent no longer gates its children.
        record
            .parent
            .and_then(|parent| records.get(&parent))
            .is_none_or(|parent| parent.phase.contains(LifecyclePhase::PRE_LINKED))
    })
}

fn pre_link_cascade(instance: InstanceId, linked: &mut Vec<InstanceId>) {
    if !can_pre_link(instance) {
        return;
    }

    with_records_mut(|records| {
        if let Some(record) = records.get_mut(&instance) {
            record.phase |= LifecyclePhase::PRE_LINKED;
        }
    });
    fire(instance, PRE_LINK_EVENT);
    linked.push(instance);

    // Read after $preLink so children added by its listeners are included.
    let children: Vec<InstanceId> = with_records(|records| {
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
    });
    for child in children {
        pre_link_cascade(child, linked);
    }
}

// =============================================================================
// Post-link
// =============================================================================

fn can_post_link(instance: InstanceId) -> bool {
    with_records(|records| {
        let Some(record) = records.get(&instance) else {
            return false;
        };
        if !record
            .phase
            .contains(LifecyclePhase::PRE_LINKED | LifecyclePhase::RENDERED)
            || record.phase.contains(LifecyclePhase::POST_LINKED)
            || record.pending_children > 0
        {
            return false;
        }

        let Some(parent) = record.parent.and_then(|parent| records.get(&parent)) else {
            return true;
        };
        let Some(position) = parent.children.iter().position(|child| *child == instance) else {
            return true;
        };
        parent.children.iter().enumerate().all(|(index, sibling)| {
            let phase = records
                .get(sibling)
                .map(|record| record.phase)
                .unwrap_or_default();
            if index < position {
                phase.contains(LifecyclePhase::POST_LINKED)
            } else {
                phase.contains(LifecyclePhase::PRE_LINKED)
            }
        })
    })
}

fn try_post_link(instance: InstanceId) {
    if !can_post_link(instance) {
        return;
    }

    let declared_parent = with_records_mut(|records| {
        let record = records.get_mut(&instance)?;
        record.phase |= LifecyclePhase::POST_LINKED;
        let parent = record.parent?;
        let parent_record = records.get_mut(&parent)?;
        if !parent_record.children.contains(&instance) {
            return None;
        }
        parent_record.pending_children = parent_record.pending_children.saturating_sub(1);
        Some(parent)
    });

    fire(instance, POST_LINK_EVENT);

    if let Some(parent) = declared_parent {
        try_first_pending_child(parent);
        try_post_link(parent);
    }
}

/// Try the first declared child that has not post-linked; the ones after it
/// are gated on it anyway.
fn try_first_pending_child(parent: InstanceId) {
    let next = with_records(|records| {
        let record = records.get(&parent)?;
        record.children.iter().copied().find(|child| {
            records
                .get(child)
                .is_none_or(|r| !r.phase.contains(LifecyclePhase::POST_LINKED))
        })
    });
    if let Some(child) = next {
        try_post_link(child);
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn parent_of(instance: InstanceId) -> Option<InstanceId> {
    with_records(|records| records.get(&instance).and_then(|record| record.parent))
}

/// Deliver a link event on the instance's own scope. No bubbling.
fn fire(instance: InstanceId, name: &'static str) {
    match get_scope(instance) {
        Some(scope) => {
            trace!(%instance, %scope, event = name, "link event");
            scope.fire_local(name, instance);
        }
        None => warn!(%instance, event = name, "link event for unregistered instance dropped"),
    }
}
