//! Scope Engine - Component instances and their scopes.
//!
//! The engine sits between the host's lifecycle signals and the scope tree:
//! - Registry: instance ids and the instance → scope side table (`$data`)
//! - Tree: reacts to `created`/`pre-link`/`rendered`/`destroyed`
//! - Lifecycle: re-emits `$preLink`/`$postLink` in depth-first tree order
//!
//! # Architecture
//!
//! Instances are ids, not objects. The host owns the instances; the engine
//! only keeps what it needs to order link events:
//!
//! ```text
//! instance#0 → scope#1  (owner, children=[1, 2])
//! instance#1 → scope#2  (owner, parent=0)
//! instance#2 → scope#1  (shares instance#0's scope)
//! ```

mod lifecycle;
mod registry;
mod tree;

pub use registry::*;
pub use tree::*;
