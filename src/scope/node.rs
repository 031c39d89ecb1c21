//! Scope Nodes - Hierarchical contexts stored in a thread-local arena.
//!
//! Manages the lifetime of every scope:
//! - Id allocation (ids are never reused)
//! - Parent/child linkage (parent is a plain id, children are owned by the node)
//! - Per-scope values with parent-chain lookup
//! - Subtree teardown on `destroy()`
//!
//! The Root Scope (id 0) exists from the first touch of the table.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::mem;
use std::rc::Rc;

use spark_signals::{signal, Signal};
use tracing::{debug, trace, warn};

use super::event::Listener;
use crate::types::{ScopeId, DESTROY_EVENT};

// =============================================================================
// Scope Table
// =============================================================================

pub(crate) struct ScopeNode {
    pub(crate) parent: Option<ScopeId>,
    pub(crate) children: Vec<ScopeId>,
    /// Listeners per event name, in registration order.
    pub(crate) listeners: HashMap<String, Vec<(usize, Listener)>>,
    values: HashMap<String, Rc<dyn Any>>,
}

impl ScopeNode {
    fn new(parent: Option<ScopeId>) -> Self {
        Self {
            parent,
            children: Vec::new(),
            listeners: HashMap::new(),
            values: HashMap::new(),
        }
    }
}

pub(crate) struct ScopeTable {
    pub(crate) nodes: HashMap<ScopeId, ScopeNode>,
    next_id: u64,
    next_listener_id: usize,
}

impl ScopeTable {
    fn with_root() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ScopeId::ROOT, ScopeNode::new(None));
        Self {
            nodes,
            next_id: 1,
            next_listener_id: 0,
        }
    }

    pub(crate) fn next_listener_id(&mut self) -> usize {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        id
    }
}

thread_local! {
    static SCOPES: RefCell<ScopeTable> = RefCell::new(ScopeTable::with_root());

    /// Number of live scopes, root included.
    /// A Signal so reactive hosts can track scope churn.
    static LIVE_SCOPES: Signal<usize> = signal(1);
}

pub(crate) fn with_table<R>(f: impl FnOnce(&ScopeTable) -> R) -> R {
    SCOPES.with(|table| f(&table.borrow()))
}

pub(crate) fn with_table_mut<R>(f: impl FnOnce(&mut ScopeTable) -> R) -> R {
    SCOPES.with(|table| f(&mut table.borrow_mut()))
}

// =============================================================================
// Creation
// =============================================================================

/// Create a scope as the last child of `parent`.
///
/// `None` creates a detached, root-like scope. A destroyed parent also yields
/// a detached scope.
pub fn create_scope(parent: Option<ScopeId>) -> ScopeId {
    let (id, attached) = with_table_mut(|table| {
        let id = ScopeId(table.next_id);
        table.next_id += 1;

        let attached = parent.filter(|p| table.nodes.contains_key(p));
        if let Some(node) = attached.and_then(|p| table.nodes.get_mut(&p)) {
            node.children.push(id);
        }
        table.nodes.insert(id, ScopeNode::new(attached));
        (id, attached)
    });

    if let (Some(parent), None) = (parent, attached) {
        warn!(scope = %id, %parent, "parent scope already destroyed, created detached scope");
    }

    LIVE_SCOPES.with(|count| count.update(|n| *n += 1));
    debug!(scope = %id, parent = ?attached, "scope created");
    id
}

/// Number of live scopes, root included.
///
/// Note: This creates a reactive dependency when called from a derived/effect.
pub fn live_scope_count() -> usize {
    LIVE_SCOPES.with(|count| count.get())
}

// =============================================================================
// Tree Accessors
// =============================================================================

impl ScopeId {
    /// Create a child scope (`$new`).
    pub fn new_child(self) -> ScopeId {
        create_scope(Some(self))
    }

    /// Check if the scope has not been destroyed.
    pub fn is_alive(self) -> bool {
        with_table(|table| table.nodes.contains_key(&self))
    }

    /// Check if the scope has been destroyed.
    pub fn is_destroyed(self) -> bool {
        !self.is_alive()
    }

    /// Parent scope (`$parent`). `None` for roots and destroyed scopes.
    pub fn parent(self) -> Option<ScopeId> {
        with_table(|table| table.nodes.get(&self).and_then(|node| node.parent))
    }

    /// Direct children in creation order.
    pub fn children(self) -> Vec<ScopeId> {
        with_table(|table| {
            table
                .nodes
                .get(&self)
                .map(|node| node.children.clone())
                .unwrap_or_default()
        })
    }

    /// Topmost ancestor (`$root`). The scope itself if it has no parent.
    pub fn root_of(self) -> ScopeId {
        with_table(|table| {
            let mut current = self;
            while let Some(parent) = table.nodes.get(&current).and_then(|node| node.parent) {
                current = parent;
            }
            current
        })
    }

    /// Number of ancestors.
    pub fn depth(self) -> usize {
        with_table(|table| {
            let mut depth = 0;
            let mut current = self;
            while let Some(parent) = table.nodes.get(&current).and_then(|node| node.parent) {
                depth += 1;
                current = parent;
            }
            depth
        })
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// Store a value on this scope. Ignored on destroyed scopes.
    pub fn set_value<T: Any>(self, key: impl Into<String>, value: T) {
        let stored = with_table_mut(|table| match table.nodes.get_mut(&self) {
            Some(node) => node.values.insert(key.into(), Rc::new(value) as Rc<dyn Any>),
            None => None,
        });
        // Drop the replaced value outside the table borrow.
        drop(stored);
    }

    /// Look a value up on this scope, then on each ancestor in turn.
    ///
    /// The nearest scope holding `key` wins; if its value is not a `T` the
    /// lookup yields `None` rather than continuing upward.
    pub fn get_value<T: Any>(self, key: &str) -> Option<Rc<T>> {
        with_table(|table| {
            let mut current = Some(self);
            while let Some(id) = current {
                let node = table.nodes.get(&id)?;
                if let Some(value) = node.values.get(key) {
                    return Rc::clone(value).downcast::<T>().ok();
                }
                current = node.parent;
            }
            None
        })
    }

    /// Look a value up on this scope only.
    pub fn own_value<T: Any>(self, key: &str) -> Option<Rc<T>> {
        with_table(|table| {
            let value = table.nodes.get(&self)?.values.get(key)?;
            Rc::clone(value).downcast::<T>().ok()
        })
    }

    /// Remove a value from this scope. Returns true if one was present.
    pub fn remove_value(self, key: &str) -> bool {
        let removed = with_table_mut(|table| {
            table
                .nodes
                .get_mut(&self)
                .and_then(|node| node.values.remove(key))
        });
        removed.is_some()
    }

    // =========================================================================
    // Destruction
    // =========================================================================

    /// Destroy this scope and its whole subtree.
    ///
    /// `$destroy` is broadcast over the subtree first, so every descendant
    /// observes it (parents before children) while still usable. The subtree
    /// is then removed and this scope is detached from its parent.
    ///
    /// The Root Scope survives: its descendants are destroyed and its
    /// listeners and values are released.
    pub fn destroy(self) {
        if self.is_destroyed() {
            trace!(scope = %self, "destroy on destroyed scope ignored");
            return;
        }

        self.broadcast(DESTROY_EVENT, self);

        // A $destroy listener may have torn this scope down already.
        if self.is_destroyed() {
            return;
        }

        let (removed, released_root) = with_table_mut(|table| {
            let mut garbage = Vec::new();
            let mut stack = table
                .nodes
                .get_mut(&self)
                .map(|node| mem::take(&mut node.children))
                .unwrap_or_default();

            while let Some(id) = stack.pop() {
                if let Some(node) = table.nodes.remove(&id) {
                    stack.extend(node.children.iter().copied());
                    garbage.push(node);
                }
            }

            if self.is_root() {
                if let Some(root) = table.nodes.get_mut(&self) {
                    let mut released = ScopeNode::new(None);
                    released.listeners = mem::take(&mut root.listeners);
                    released.values = mem::take(&mut root.values);
                    // Not counted: the root itself stays alive.
                    return (garbage, Some(released));
                }
            } else if let Some(node) = table.nodes.remove(&self) {
                if let Some(parent) = node.parent.and_then(|p| table.nodes.get_mut(&p)) {
                    parent.children.retain(|child| *child != self);
                }
                garbage.push(node);
            }
            (garbage, None)
        });

        let count = removed.len();
        // Listeners and values are dropped here, outside the table borrow.
        drop(removed);
        drop(released_root);

        LIVE_SCOPES.with(|live| live.update(|n| *n = n.saturating_sub(count)));
        debug!(scope = %self, removed = count, "scope destroyed");
    }
}

// =============================================================================
// Reset (for testing)
// =============================================================================

/// Drop every scope and recreate a fresh Root Scope (for testing).
pub fn reset_scopes() {
    let old = with_table_mut(|table| mem::replace(table, ScopeTable::with_root()));
    drop(old);
    LIVE_SCOPES.with(|live| live.set(1));
}
