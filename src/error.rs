//! Lifecycle contract violations.
//!
//! Operations on destroyed scopes are not errors (they are silent no-ops).
//! What ends up here is a host firing lifecycle signals in an order the
//! scope tree cannot honour.

use crate::types::{InstanceId, LifecyclePhase};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    /// No scope is registered for the instance.
    #[error("no scope registered for {0}")]
    MissingRegistration(InstanceId),

    /// A signal arrived for an instance that was never created.
    #[error("{0} was never created")]
    UnknownInstance(InstanceId),

    /// A pre-link declared a child that was created under another instance.
    #[error("{child} is not a child of {instance}")]
    NotAChild {
        instance: InstanceId,
        child: InstanceId,
    },

    /// `created` fired twice for the same instance.
    #[error("{0} was already created")]
    AlreadyCreated(InstanceId),

    /// A signal arrived before the signals that must precede it.
    #[error("`{signal}` for {instance} arrived out of order (phase {phase:?})")]
    OutOfOrder {
        instance: InstanceId,
        signal: &'static str,
        phase: LifecyclePhase,
    },
}

pub type Result<T> = std::result::Result<T, ScopeError>;
