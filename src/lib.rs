//! # template-scope
//!
//! Angular-style `$scope` hierarchy for component/template trees.
//!
//! Each rendered component instance gets a scope that can hold values,
//! listen to named events, and take part in parent/child propagation that
//! mirrors the template nesting.
//!
//! ## Architecture
//!
//! Scopes and instances are `Copy` ids into thread-local tables rather than
//! objects. The host's lifecycle signals drive everything:
//! ```text
//! host signals → Scope Tree Builder → Lifecycle Sequencer → $preLink/$postLink
//!                      ↓
//!              Identity Registry ($data) → instance_scope() → on/emit/broadcast
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Core types (ScopeId, InstanceId, LifecyclePhase, ScopeConfig)
//! - [`scope`] - Scope Nodes and event routing
//! - [`engine`] - Identity Registry, Scope Tree Builder, Lifecycle Sequencer
//! - [`pipeline`] - Mount/unmount driver for declared component trees
//! - [`error`] - Lifecycle contract violations

pub mod engine;
pub mod error;
pub mod pipeline;
pub mod scope;
pub mod types;

// Re-export commonly used items
pub use types::*;

pub use error::{Result, ScopeError};

pub use scope::{
    create_scope, live_scope_count, reset_scopes, Listener, ScopeEvent, Subscription,
};

pub use engine::{
    allocate_instance, child_instances, delete_scope, expect_scope, get_scope,
    instance_created, instance_destroyed, instance_phase, instance_pre_link,
    instance_rendered, instance_scope, instances_for, owns_scope, parent_instance,
    registered_count, reset_identity_registry, reset_instances, set_scope,
};

pub use pipeline::{mount, mount_under, ComponentSpec, CreatedHook, MountHandle, MountedComponent};

/// Root Scope (`$rootScope`).
pub fn root_scope() -> ScopeId {
    ScopeId::root()
}

/// Reset every table: scopes, registry, instance records (for testing).
pub fn reset_all() {
    reset_instances();
    reset_identity_registry();
    reset_scopes();
}
