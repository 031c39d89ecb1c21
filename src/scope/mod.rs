//! Scope Nodes - Hierarchical event contexts.
//!
//! Every scope lives in a thread-local table and is addressed by a
//! [`ScopeId`](crate::types::ScopeId):
//! - Node: creation, parent/child linkage, values, subtree destruction
//! - Event: `on`/`off`, upward `emit`, downward `broadcast`
//!
//! # Architecture
//!
//! The parent link is a plain id, so a child never keeps its parent alive.
//! The only owning direction is parent → children:
//!
//! ```text
//! scope#0 (root, parent=None)
//! ├── scope#1 (parent=0)
//! │   └── scope#3 (parent=1)
//! └── scope#2 (parent=0)
//! ```

mod event;
mod node;

pub use event::*;
pub use node::*;
