//! Pipeline Module - Host-side driver for component trees.
//!
//! Connects a declared component tree to the engine's lifecycle signals:
//! ```text
//! ComponentSpec → created → pre-link/rendered → (app) → destroyed
//! ```

mod mount;

pub use mount::*;
