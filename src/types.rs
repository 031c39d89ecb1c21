//! Core types for template-scope.
//!
//! These types define the foundation that everything builds on.
//! Scopes and component instances are plain `Copy` handles into thread-local
//! tables, never owning pointers.

use std::fmt;

// =============================================================================
// Handles
// =============================================================================

/// Handle to a Scope Node.
///
/// Ids are allocated from a monotonically increasing counter and never
/// reused, so a handle that outlives its scope always reads as destroyed.
/// Two handles are the same scope exactly when they compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub(crate) u64);

impl ScopeId {
    /// The Root Scope. It has no parent and lives as long as the thread.
    pub const ROOT: Self = Self(0);

    /// The Root Scope (`$rootScope`).
    pub const fn root() -> Self {
        Self::ROOT
    }

    /// Raw numeric id (`$id`).
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Check if this is the Root Scope.
    pub const fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// Identity of one rendered component instance (`$uid`).
///
/// Two structurally identical instances are still distinct: identity comes
/// from the allocator, not from the instance's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub(crate) u64);

impl InstanceId {
    /// Raw numeric id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance#{}", self.0)
    }
}

// =============================================================================
// Reserved Event Names
// =============================================================================

/// Fired on an instance's scope when it starts linking (parents first).
pub const PRE_LINK_EVENT: &str = "$preLink";

/// Fired on an instance's scope once it and all its children are linked.
pub const POST_LINK_EVENT: &str = "$postLink";

/// Broadcast over a scope subtree right before it is torn down.
pub const DESTROY_EVENT: &str = "$destroy";

// =============================================================================
// Lifecycle Phase (bitflags)
// =============================================================================

bitflags::bitflags! {
    /// Progress of a component instance through its lifecycle.
    ///
    /// The `*_SIGNALED`/`RENDERED` bits record what the host reported;
    /// `PRE_LINKED`/`POST_LINKED` record what has been re-emitted on the scope.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LifecyclePhase: u8 {
        const CREATED = 1 << 0;
        const PRE_LINK_SIGNALED = 1 << 1;
        const RENDERED = 1 << 2;
        const PRE_LINKED = 1 << 3;
        const POST_LINKED = 1 << 4;
    }
}

// =============================================================================
// Component Configuration
// =============================================================================

/// Per-component scope configuration, checked when an instance is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeConfig {
    /// `true` creates a child scope for the instance, `false` reuses the
    /// nearest ancestor's scope.
    pub new_scope: bool,
}

impl ScopeConfig {
    /// Create a fresh child scope (the default).
    pub const fn new_scope() -> Self {
        Self { new_scope: true }
    }

    /// Reuse the ancestor's scope.
    pub const fn shared() -> Self {
        Self { new_scope: false }
    }
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self::new_scope()
    }
}
