//! Scope Events - Listener registry and event routing.
//!
//! # API
//!
//! - `on(name, fn)` - Subscribe on a scope, returns a [`Subscription`]
//! - `emit(name, payload)` - Dispatch on the scope, then each ancestor up to the root
//! - `broadcast(name, payload)` - Dispatch on the scope, then its subtree depth-first
//!
//! # Example
//!
//! ```ignore
//! use template_scope::ScopeId;
//!
//! let scope = ScopeId::root().new_child();
//! let sub = scope.on("saved", |event| {
//!     let id = event.payload::<u32>().copied();
//!     println!("saved {id:?} from {}", event.target_scope());
//! });
//!
//! scope.new_child().emit("saved", 7u32);
//! sub.off();
//! ```
//!
//! # Dispatch rules
//!
//! No table borrow is held while a listener runs, so listeners may subscribe,
//! unsubscribe, emit, or destroy scopes. Listeners are snapshotted per scope
//! before running: one removed mid-dispatch is skipped, one added
//! mid-dispatch waits for the next dispatch. A panicking listener unwinds out
//! of `emit`/`broadcast` and stops the rest of that dispatch.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use super::node::{with_table, with_table_mut};
use crate::types::ScopeId;

// =============================================================================
// TYPES
// =============================================================================

/// Listener callback. Rc so dispatch can run it without holding the table.
pub type Listener = Rc<dyn Fn(&ScopeEvent)>;

/// Event delivered to listeners.
pub struct ScopeEvent {
    name: String,
    target_scope: ScopeId,
    current_scope: Cell<Option<ScopeId>>,
    propagation_stopped: Cell<bool>,
    default_prevented: Cell<bool>,
    payload: Box<dyn Any>,
}

impl ScopeEvent {
    fn new(name: &str, target_scope: ScopeId, payload: Box<dyn Any>) -> Self {
        Self {
            name: name.to_string(),
            target_scope,
            current_scope: Cell::new(None),
            propagation_stopped: Cell::new(false),
            default_prevented: Cell::new(false),
            payload,
        }
    }

    /// Event name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope the event was emitted or broadcast on (`targetScope`).
    pub fn target_scope(&self) -> ScopeId {
        self.target_scope
    }

    /// Scope whose listeners are currently running. `None` after dispatch.
    pub fn current_scope(&self) -> Option<ScopeId> {
        self.current_scope.get()
    }

    /// Payload, if it is a `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Stop an `emit` from reaching further ancestors.
    ///
    /// Listeners on the current scope still run. Broadcasts ignore this.
    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped.get()
    }

    /// Flag the event as handled. The caller reads it back from the
    /// `ScopeEvent` returned by `emit`/`broadcast`.
    pub fn prevent_default(&self) {
        self.default_prevented.set(true);
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }
}

impl fmt::Debug for ScopeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeEvent")
            .field("name", &self.name)
            .field("target_scope", &self.target_scope)
            .field("current_scope", &self.current_scope.get())
            .field("propagation_stopped", &self.propagation_stopped.get())
            .field("default_prevented", &self.default_prevented.get())
            .finish_non_exhaustive()
    }
}

/// Handle to one listener registration.
///
/// Dropping it does not unsubscribe; call [`Subscription::off`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    scope: ScopeId,
    name: String,
    id: usize,
}

impl Subscription {
    /// Remove the listener. No-op if already removed or the scope is gone.
    pub fn off(&self) {
        self.scope.off(self);
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn event_name(&self) -> &str {
        &self.name
    }

    /// Check if the listener is still registered.
    pub fn is_active(&self) -> bool {
        is_registered(self.scope, &self.name, self.id)
    }
}

// =============================================================================
// HANDLER REGISTRY
// =============================================================================

impl ScopeId {
    /// Subscribe to `name` on this scope (`$on`).
    ///
    /// Listeners for the same name run in registration order. On a destroyed
    /// scope nothing is registered and the returned subscription is inert.
    pub fn on<F>(self, name: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&ScopeEvent) + 'static,
    {
        let name = name.into();
        let (id, registered) = with_table_mut(|table| {
            let id = table.next_listener_id();
            let registered = match table.nodes.get_mut(&self) {
                Some(node) => {
                    node.listeners
                        .entry(name.clone())
                        .or_default()
                        .push((id, Rc::new(handler) as Listener));
                    true
                }
                None => false,
            };
            (id, registered)
        });

        if !registered {
            trace!(scope = %self, event = %name, "listener on destroyed scope ignored");
        }

        Subscription {
            scope: self,
            name,
            id,
        }
    }

    /// Remove a listener registered on this scope.
    pub fn off(self, subscription: &Subscription) {
        if subscription.scope != self {
            return;
        }
        let removed = with_table_mut(|table| {
            let node = table.nodes.get_mut(&self)?;
            let handlers = node.listeners.get_mut(&subscription.name)?;
            let index = handlers.iter().position(|(id, _)| *id == subscription.id)?;
            let (_, handler) = handlers.remove(index);
            if handlers.is_empty() {
                node.listeners.remove(&subscription.name);
            }
            Some(handler)
        });
        // Drop the listener outside the table borrow.
        drop(removed);
    }

    /// Number of listeners registered for `name` on this scope.
    pub fn listener_count(self, name: &str) -> usize {
        with_table(|table| {
            table
                .nodes
                .get(&self)
                .and_then(|node| node.listeners.get(name))
                .map_or(0, Vec::len)
        })
    }

    // =========================================================================
    // EVENT DISPATCH
    // =========================================================================

    /// Dispatch upward (`$emit`): this scope's listeners, then the parent's,
    /// and so on up to the root, unless a listener stops propagation.
    ///
    /// Scopes without listeners for `name` are passed through. No-op on a
    /// destroyed scope.
    pub fn emit<P: Any>(self, name: &str, payload: P) -> ScopeEvent {
        let event = ScopeEvent::new(name, self, Box::new(payload));
        if self.is_destroyed() {
            trace!(scope = %self, event = %name, "emit on destroyed scope ignored");
            return event;
        }
        trace!(scope = %self, event = %name, "emit");

        let mut current = Some(self);
        while let Some(scope) = current {
            notify(scope, &event);
            if event.is_propagation_stopped() {
                break;
            }
            current = scope.parent();
        }

        event.current_scope.set(None);
        event
    }

    /// Dispatch downward (`$broadcast`): this scope, then every descendant
    /// depth-first, pre-order. Each sibling subtree completes before the next
    /// sibling starts. No-op on a destroyed scope.
    pub fn broadcast<P: Any>(self, name: &str, payload: P) -> ScopeEvent {
        let event = ScopeEvent::new(name, self, Box::new(payload));
        if self.is_destroyed() {
            trace!(scope = %self, event = %name, "broadcast on destroyed scope ignored");
            return event;
        }
        trace!(scope = %self, event = %name, "broadcast");

        let mut stack = vec![self];
        while let Some(scope) = stack.pop() {
            // Children are read after the scope's own listeners ran, so a
            // subtree destroyed by a listener is skipped.
            if !notify(scope, &event) {
                continue;
            }
            stack.extend(scope.children().into_iter().rev());
        }

        event.current_scope.set(None);
        event
    }

    /// `emit` with no payload.
    pub fn emit_empty(self, name: &str) -> ScopeEvent {
        self.emit(name, ())
    }

    /// `broadcast` with no payload.
    pub fn broadcast_empty(self, name: &str) -> ScopeEvent {
        self.broadcast(name, ())
    }

    /// Dispatch to this scope's listeners only, no propagation.
    pub(crate) fn fire_local<P: Any>(self, name: &str, payload: P) -> ScopeEvent {
        let event = ScopeEvent::new(name, self, Box::new(payload));
        notify(self, &event);
        event.current_scope.set(None);
        event
    }
}

/// Run `scope`'s listeners for the event. Returns false if the scope is gone
/// once they have run.
fn notify(scope: ScopeId, event: &ScopeEvent) -> bool {
    let snapshot: Option<Vec<(usize, Listener)>> = with_table(|table| {
        let node = table.nodes.get(&scope)?;
        Some(
            node.listeners
                .get(event.name())
                .map(|handlers| {
                    handlers
                        .iter()
                        .map(|(id, handler)| (*id, Rc::clone(handler)))
                        .collect()
                })
                .unwrap_or_default(),
        )
    });
    let Some(snapshot) = snapshot else {
        return false;
    };

    event.current_scope.set(Some(scope));
    for (id, handler) in snapshot {
        if !is_registered(scope, event.name(), id) {
            continue;
        }
        handler(event);
    }

    scope.is_alive()
}

fn is_registered(scope: ScopeId, name: &str, id: usize) -> bool {
    with_table(|table| {
        table
            .nodes
            .get(&scope)
            .and_then(|node| node.listeners.get(name))
            .is_some_and(|handlers| handlers.iter().any(|(handler_id, _)| *handler_id == id))
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{create_scope, reset_scopes};
    use crate::types::DESTROY_EVENT;
    use std::cell::RefCell;

    fn setup() {
        reset_scopes();
    }

    fn recorder() -> Rc<RefCell<Vec<&'static str>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn record(scope: ScopeId, name: &str, log: &Rc<RefCell<Vec<&'static str>>>, tag: &'static str) -> Subscription {
        let log = Rc::clone(log);
        scope.on(name, move |_| log.borrow_mut().push(tag))
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        setup();

        let scope = ScopeId::root().new_child();
        let log = recorder();
        record(scope, "e", &log, "first");
        record(scope, "e", &log, "second");
        record(scope, "other", &log, "other");

        scope.emit_empty("e");
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_emit_bubbles_to_root() {
        setup();

        let root = ScopeId::root();
        let a1 = root.new_child();
        let n = a1.new_child();
        let log = recorder();
        record(root, "e", &log, "root");
        record(a1, "e", &log, "a1");
        record(n, "e", &log, "n");

        scope_emit_and_check(n, &log, &["n", "a1", "root"]);
    }

    fn scope_emit_and_check(scope: ScopeId, log: &Rc<RefCell<Vec<&'static str>>>, expected: &[&str]) {
        scope.emit_empty("e");
        assert_eq!(log.borrow().as_slice(), expected);
    }

    #[test]
    fn test_emit_skips_scopes_without_listeners() {
        setup();

        let root = ScopeId::root();
        let a = root.new_child();
        let b = a.new_child();
        let log = recorder();
        record(b, "x", &log, "b");
        record(root, "x", &log, "root");

        b.emit_empty("x");
        assert_eq!(*log.borrow(), vec!["b", "root"]);
    }

    #[test]
    fn test_emit_does_not_reach_children_or_siblings() {
        setup();

        let root = ScopeId::root();
        let a = root.new_child();
        let sibling = root.new_child();
        let child = a.new_child();
        let log = recorder();
        record(sibling, "e", &log, "sibling");
        record(child, "e", &log, "child");

        a.emit_empty("e");
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_stop_propagation_halts_emit() {
        setup();

        let root = ScopeId::root();
        let a = root.new_child();
        let b = a.new_child();
        let log = recorder();
        record(root, "e", &log, "root");
        let log_a = Rc::clone(&log);
        a.on("e", move |event| {
            log_a.borrow_mut().push("a");
            event.stop_propagation();
        });
        record(a, "e", &log, "a-after");

        let event = b.emit_empty("e");
        assert_eq!(*log.borrow(), vec!["a", "a-after"]);
        assert!(event.is_propagation_stopped());
    }

    #[test]
    fn test_broadcast_depth_first_pre_order() {
        setup();

        let r = create_scope(None);
        let c1 = r.new_child();
        let c2 = r.new_child();
        let c1a = c1.new_child();
        let log = recorder();
        record(c2, "e", &log, "c2");
        record(c1a, "e", &log, "c1a");
        record(c1, "e", &log, "c1");
        record(r, "e", &log, "r");

        r.broadcast_empty("e");
        assert_eq!(*log.borrow(), vec!["r", "c1", "c1a", "c2"]);
    }

    #[test]
    fn test_broadcast_ignores_stop_propagation() {
        setup();

        let r = ScopeId::root().new_child();
        let c = r.new_child();
        let log = recorder();
        r.on("e", |event| event.stop_propagation());
        record(c, "e", &log, "c");

        r.broadcast_empty("e");
        assert_eq!(*log.borrow(), vec!["c"]);
    }

    #[test]
    fn test_event_metadata_and_payload() {
        setup();

        let parent = ScopeId::root().new_child();
        let child = parent.new_child();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        parent.on("saved", move |event| {
            seen_clone.borrow_mut().push((
                event.name().to_string(),
                event.target_scope(),
                event.current_scope(),
                event.payload::<u32>().copied(),
                event.payload::<String>().is_some(),
            ));
            event.prevent_default();
        });

        let event = child.emit("saved", 7u32);
        assert!(event.default_prevented());
        assert_eq!(event.current_scope(), None);
        assert_eq!(
            *seen.borrow(),
            vec![("saved".to_string(), child, Some(parent), Some(7), false)]
        );
    }

    #[test]
    fn test_off_removes_listener() {
        setup();

        let scope = ScopeId::root().new_child();
        let log = recorder();
        let sub = record(scope, "e", &log, "x");
        assert!(sub.is_active());
        assert_eq!(scope.listener_count("e"), 1);

        sub.off();
        sub.off();
        assert!(!sub.is_active());
        assert_eq!(scope.listener_count("e"), 0);

        scope.emit_empty("e");
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_off_with_foreign_scope_is_ignored() {
        setup();

        let a = ScopeId::root().new_child();
        let b = ScopeId::root().new_child();
        let log = recorder();
        let sub = record(a, "e", &log, "a");

        b.off(&sub);
        assert!(sub.is_active());
    }

    #[test]
    fn test_listener_removed_mid_dispatch_is_skipped() {
        setup();

        let scope = ScopeId::root().new_child();
        let log = recorder();
        let later: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let later_clone = Rc::clone(&later);
        scope.on("e", move |_| {
            if let Some(sub) = later_clone.borrow().as_ref() {
                sub.off();
            }
        });
        *later.borrow_mut() = Some(record(scope, "e", &log, "later"));

        scope.emit_empty("e");
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_listener_added_mid_dispatch_waits() {
        setup();

        let scope = ScopeId::root().new_child();
        let log = recorder();
        let log_clone = Rc::clone(&log);
        scope.on("e", move |event| {
            let log = Rc::clone(&log_clone);
            if let Some(current) = event.current_scope() {
                current.on("e", move |_| log.borrow_mut().push("added"));
            }
        });

        scope.emit_empty("e");
        assert!(log.borrow().is_empty());

        scope.emit_empty("e");
        assert_eq!(*log.borrow(), vec!["added"]);
    }

    #[test]
    fn test_destroyed_scope_is_inert() {
        setup();

        let parent = ScopeId::root().new_child();
        let child = parent.new_child();
        let log = recorder();
        record(parent, "e", &log, "parent");
        record(child, "e", &log, "child");

        parent.destroy();

        child.emit_empty("e");
        child.broadcast_empty("e");
        parent.emit_empty("e");
        parent.broadcast_empty("e");
        assert!(log.borrow().is_empty());

        let sub = record(child, "e", &log, "late");
        assert!(!sub.is_active());
        sub.off();
    }

    #[test]
    fn test_destroy_broadcasts_once_parent_first() {
        setup();

        let parent = ScopeId::root().new_child();
        let child = parent.new_child();
        let grandchild = child.new_child();
        let log = recorder();
        for (scope, tag) in [(parent, "parent"), (child, "child"), (grandchild, "grandchild")] {
            let log = Rc::clone(&log);
            scope.on(DESTROY_EVENT, move |event| {
                // Still usable while $destroy is delivered.
                assert!(event.current_scope().is_some_and(ScopeId::is_alive));
                log.borrow_mut().push(tag);
            });
        }

        parent.destroy();
        assert_eq!(*log.borrow(), vec!["parent", "child", "grandchild"]);
        assert!(grandchild.is_destroyed());
    }

    #[test]
    fn test_listener_destroying_scope_mid_broadcast() {
        setup();

        let r = ScopeId::root().new_child();
        let c1 = r.new_child();
        let c1a = c1.new_child();
        let c2 = r.new_child();
        let log = recorder();
        c1.on("e", move |_| c1.destroy());
        record(c1a, "e", &log, "c1a");
        record(c2, "e", &log, "c2");

        r.broadcast_empty("e");
        assert_eq!(*log.borrow(), vec!["c2"]);
        assert_eq!(r.children(), vec![c2]);
    }

    #[test]
    fn test_fire_local_does_not_propagate() {
        setup();

        let parent = ScopeId::root().new_child();
        let child = parent.new_child();
        let log = recorder();
        record(parent, "e", &log, "parent");
        record(child, "e", &log, "child");

        child.fire_local("e", ());
        assert_eq!(*log.borrow(), vec!["child"]);
    }

    #[test]
    fn test_panicking_listener_leaves_tables_usable() {
        setup();

        let scope = ScopeId::root().new_child();
        scope.on("boom", |_| panic!("listener failure"));

        let result = std::panic::catch_unwind(|| {
            scope.emit_empty("boom");
        });
        assert!(result.is_err());

        let log = recorder();
        record(scope, "ok", &log, "ok");
        scope.emit_empty("ok");
        assert_eq!(*log.borrow(), vec!["ok"]);
    }
}
