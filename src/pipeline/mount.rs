//! Mount API - Drive a declared component tree through its lifecycle.
//!
//! This module plays the host's role for code that has no rendering engine of
//! its own: it fires the engine's inbound signals for a tree of
//! [`ComponentSpec`]s in the order a template engine does.
//!
//! # Example
//!
//! ```ignore
//! use template_scope::pipeline::{mount, ComponentSpec};
//!
//! let app = ComponentSpec::new("list")
//!     .on_created(|instance, scope| {
//!         scope.on("$postLink", move |_| println!("{instance} linked"));
//!     })
//!     .child(ComponentSpec::new("item"))
//!     .child(ComponentSpec::new("item").share_scope());
//!
//! let handle = mount(&app)?;
//! let list_scope = handle.root().scope().expect("mounted");
//! list_scope.on("selected", |event| println!("{:?}", event.payload::<u32>()));
//!
//! handle.root().children()[0].scope().expect("mounted").emit("selected", 3u32);
//!
//! handle.unmount()?;
//! ```
//!
//! # Signal order
//!
//! - `created`: parents before children, siblings in order; each
//!   component's `on_created` hook runs right after its own `created`
//! - `pre-link` + `rendered`: children before parents (as templates finish)
//! - `destroyed`: parents before children
//!
//! The engine re-sequences link events, so listeners still observe
//! `$preLink` parent-first and `$postLink` parent-last.

use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::engine::{
    allocate_instance, expect_scope, instance_created, instance_destroyed, instance_pre_link,
    instance_rendered, instance_scope,
};
use crate::error::Result;
use crate::types::{InstanceId, ScopeConfig, ScopeId};

// =============================================================================
// Component Spec
// =============================================================================

/// Runs once an instance has its scope, before anything links.
pub type CreatedHook = Rc<dyn Fn(InstanceId, ScopeId)>;

/// Declared component: a name, its scope configuration, and its children in
/// render order.
#[derive(Clone)]
pub struct ComponentSpec {
    pub name: String,
    pub config: ScopeConfig,
    pub children: Vec<ComponentSpec>,
    on_created: Option<CreatedHook>,
}

impl fmt::Debug for ComponentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSpec")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("children", &self.children)
            .field("on_created", &self.on_created.is_some())
            .finish()
    }
}

impl ComponentSpec {
    /// Component with its own scope and no children.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: ScopeConfig::default(),
            children: Vec::new(),
            on_created: None,
        }
    }

    /// Reuse the parent's scope instead of creating one.
    pub fn share_scope(mut self) -> Self {
        self.config = ScopeConfig::shared();
        self
    }

    /// Set the scope configuration.
    pub fn config(mut self, config: ScopeConfig) -> Self {
        self.config = config;
        self
    }

    /// Run `hook` with the instance and its scope right after `created`.
    ///
    /// This is where listeners for the instance's own `$preLink`, `$postLink`
    /// and `$destroy` go: by the time [`mount`] returns, linking is over.
    pub fn on_created(mut self, hook: impl Fn(InstanceId, ScopeId) + 'static) -> Self {
        self.on_created = Some(Rc::new(hook));
        self
    }

    /// Append a child.
    pub fn child(mut self, child: ComponentSpec) -> Self {
        self.children.push(child);
        self
    }
}

// =============================================================================
// Mounted Tree
// =============================================================================

/// A rendered component instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedComponent {
    name: String,
    instance: InstanceId,
    children: Vec<MountedComponent>,
}

impl MountedComponent {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn children(&self) -> &[MountedComponent] {
        &self.children
    }

    /// The instance's scope (`$scope`). `None` once unmounted.
    pub fn scope(&self) -> Option<ScopeId> {
        instance_scope(self.instance)
    }

    /// First component named `name`, depth-first, including `self`.
    pub fn find(&self, name: &str) -> Option<&MountedComponent> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }
}

/// Handle returned by [`mount`].
///
/// Unmounts on drop if [`MountHandle::unmount`] was not called.
#[derive(Debug)]
pub struct MountHandle {
    root: MountedComponent,
    mounted: bool,
}

impl MountHandle {
    /// The mounted root component.
    pub fn root(&self) -> &MountedComponent {
        &self.root
    }

    /// Fire `destroyed` for every instance, parents first.
    pub fn unmount(mut self) -> Result<()> {
        self.mounted = false;
        destroy_tree(&self.root)
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        if self.mounted {
            discard_tree(&self.root);
        }
    }
}

// =============================================================================
// Mount / Unmount
// =============================================================================

/// Mount a component tree as a top-level instance (under the Root Scope).
pub fn mount(spec: &ComponentSpec) -> Result<MountHandle> {
    mount_under(spec, None)
}

/// Mount a component tree under an already-created instance.
pub fn mount_under(spec: &ComponentSpec, parent: Option<InstanceId>) -> Result<MountHandle> {
    let root = create_tree(spec, parent)?;
    if let Err(err) = link_tree(&root) {
        warn!(component = %root.name, error = %err, "link failed, discarding component tree");
        discard_tree(&root);
        return Err(err);
    }
    debug!(component = %root.name, instance = %root.instance, "component tree mounted");
    Ok(MountHandle {
        root,
        mounted: true,
    })
}

/// Create `spec` and its descendants. On failure every instance created so
/// far is destroyed again.
fn create_tree(spec: &ComponentSpec, parent: Option<InstanceId>) -> Result<MountedComponent> {
    let instance = allocate_instance();
    instance_created(instance, parent, &spec.config)?;

    let mut component = MountedComponent {
        name: spec.name.clone(),
        instance,
        children: Vec::with_capacity(spec.children.len()),
    };

    let created = expect_scope(instance).map(|scope| {
        if let Some(hook) = &spec.on_created {
            hook(instance, scope);
        }
    });
    if let Err(err) = created {
        discard_tree(&component);
        return Err(err);
    }

    for child in &spec.children {
        match create_tree(child, Some(instance)) {
            Ok(mounted) => component.children.push(mounted),
            Err(err) => {
                warn!(component = %spec.name, error = %err, "create failed, discarding partial tree");
                discard_tree(&component);
                return Err(err);
            }
        }
    }

    Ok(component)
}

fn link_tree(component: &MountedComponent) -> Result<()> {
    for child in &component.children {
        link_tree(child)?;
    }
    let children: Vec<InstanceId> = component.children.iter().map(|c| c.instance).collect();
    instance_pre_link(component.instance, &children)?;
    instance_rendered(component.instance)
}

fn destroy_tree(component: &MountedComponent) -> Result<()> {
    instance_destroyed(component.instance)?;
    for child in &component.children {
        destroy_tree(child)?;
    }
    Ok(())
}

/// Best-effort teardown: the tree may already be half gone.
fn discard_tree(component: &MountedComponent) {
    let _ = instance_destroyed(component.instance);
    for child in &component.children {
        discard_tree(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        parent_instance, registered_count, reset_identity_registry, reset_instances,
    };
    use crate::error::ScopeError;
    use crate::scope::{live_scope_count, reset_scopes};
    use crate::types::{DESTROY_EVENT, POST_LINK_EVENT, PRE_LINK_EVENT};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn setup() {
        reset_scopes();
        reset_identity_registry();
        reset_instances();
    }

    fn two_children() -> ComponentSpec {
        ComponentSpec::new("parent")
            .child(ComponentSpec::new("first"))
            .child(ComponentSpec::new("second"))
    }

    #[test]
    fn test_mount_builds_scope_tree() {
        setup();

        let handle = mount(&two_children()).expect("mount");
        let root = handle.root();
        let parent_scope = root.scope().expect("parent scope");

        assert_eq!(parent_scope.parent(), Some(ScopeId::root()));
        let child_scopes: Vec<ScopeId> = root
            .children()
            .iter()
            .map(|c| c.scope().expect("child scope"))
            .collect();
        assert_eq!(parent_scope.children(), child_scopes);
        assert_eq!(live_scope_count(), 4);
        assert_eq!(registered_count(), 3);
    }

    #[test]
    fn test_unmount_cleans_up() {
        setup();

        let handle = mount(&two_children()).expect("mount");
        let parent_scope = handle.root().scope().expect("scope");
        let destroyed = Rc::new(RefCell::new(0));
        let destroyed_clone = Rc::clone(&destroyed);
        parent_scope.on(DESTROY_EVENT, move |_| *destroyed_clone.borrow_mut() += 1);

        handle.unmount().expect("unmount");

        assert_eq!(*destroyed.borrow(), 1);
        assert!(parent_scope.is_destroyed());
        assert_eq!(live_scope_count(), 1);
        assert_eq!(registered_count(), 0);
    }

    #[test]
    fn test_drop_unmounts() {
        setup();

        {
            let _handle = mount(&two_children()).expect("mount");
            assert_eq!(registered_count(), 3);
        }
        assert_eq!(registered_count(), 0);
        assert_eq!(live_scope_count(), 1);
    }

    #[test]
    fn test_link_events_in_tree_order() {
        setup();

        let parent = allocate_instance();
        instance_created(parent, None, &ScopeConfig::default()).expect("created");
        let parent_scope = instance_scope(parent).expect("scope");

        let log: Rc<RefCell<Vec<(&'static str, InstanceId)>>> = Rc::new(RefCell::new(Vec::new()));
        for (event, tag) in [(PRE_LINK_EVENT, "pre"), (POST_LINK_EVENT, "post")] {
            let log = Rc::clone(&log);
            parent_scope.on(event, move |e| {
                if let Some(instance) = e.payload::<InstanceId>() {
                    log.borrow_mut().push((tag, *instance));
                }
            });
        }

        // Shared children deliver their link events on the parent's scope.
        let spec = ComponentSpec::new("first").share_scope();
        let first = create_tree(&spec, Some(parent)).expect("first");
        let second = create_tree(&spec, Some(parent)).expect("second");
        link_tree(&first).expect("link first");
        link_tree(&second).expect("link second");
        instance_pre_link(parent, &[first.instance(), second.instance()]).expect("pre-link");
        instance_rendered(parent).expect("rendered");

        let (a, b) = (first.instance(), second.instance());
        assert_eq!(
            *log.borrow(),
            vec![
                ("pre", parent),
                ("pre", a),
                ("pre", b),
                ("post", a),
                ("post", b),
                ("post", parent),
            ]
        );
    }

    #[test]
    fn test_find_by_name() {
        setup();

        let spec = ComponentSpec::new("app")
            .child(ComponentSpec::new("header"))
            .child(ComponentSpec::new("body").child(ComponentSpec::new("row")));
        let handle = mount(&spec).expect("mount");

        let row = handle.root().find("row").expect("row");
        let body = handle.root().find("body").expect("body");
        assert_eq!(row.scope().and_then(ScopeId::parent), body.scope());
        assert!(handle.root().find("footer").is_none());
    }

    #[test]
    fn test_shared_child_uses_parent_scope() {
        setup();

        let spec = ComponentSpec::new("parent").child(ComponentSpec::new("child").share_scope());
        let handle = mount(&spec).expect("mount");

        let parent = handle.root();
        assert_eq!(parent.children()[0].scope(), parent.scope());
        assert_eq!(live_scope_count(), 2);
    }

    #[test]
    fn test_on_created_sees_own_link_events() {
        setup();

        let log: Rc<RefCell<Vec<(&'static str, InstanceId)>>> = Rc::new(RefCell::new(Vec::new()));
        let log_clone = Rc::clone(&log);
        let spec = ComponentSpec::new("single").on_created(move |instance, scope| {
            assert_eq!(instance_scope(instance), Some(scope));
            for (event, tag) in [(PRE_LINK_EVENT, "pre"), (POST_LINK_EVENT, "post")] {
                let log = Rc::clone(&log_clone);
                scope.on(event, move |_| log.borrow_mut().push((tag, instance)));
            }
        });

        let handle = mount(&spec).expect("mount");
        let instance = handle.root().instance();
        assert_eq!(*log.borrow(), vec![("pre", instance), ("post", instance)]);
    }

    #[test]
    fn test_on_created_runs_parent_first() {
        setup();

        let order = Rc::new(RefCell::new(Vec::new()));
        let named = |name: &'static str| {
            let order = Rc::clone(&order);
            ComponentSpec::new(name).on_created(move |_, _| order.borrow_mut().push(name))
        };
        let spec = named("parent")
            .child(named("first").child(named("nested")))
            .child(named("second"));

        let _handle = mount(&spec).expect("mount");
        assert_eq!(*order.borrow(), vec!["parent", "first", "nested", "second"]);
    }

    #[test]
    fn test_failed_create_discards_partial_tree() {
        setup();

        // The first child tears its parent down, so the second child has no
        // parent scope to attach to.
        let saboteur = ComponentSpec::new("first").on_created(|instance, _| {
            if let Some(parent) = parent_instance(instance) {
                let _ = instance_destroyed(parent);
            }
        });
        let spec = ComponentSpec::new("parent")
            .child(saboteur)
            .child(ComponentSpec::new("second"));

        let result = mount(&spec);

        assert!(matches!(result, Err(ScopeError::MissingRegistration(_))));
        assert_eq!(registered_count(), 0);
        assert_eq!(live_scope_count(), 1);
    }
}
