//! Directory operations engine.
//!
//! Owns the session state machine, classifies target groups against the protected-group
//! list, runs searches and membership additions through a [`dirops_ldap::DirectoryAdapter`],
//! and records every attempt as an [`AuditEvent`].

#![deny(missing_docs)]

mod audit;
mod coordinator;
mod engine;
mod policy;
mod session;

pub use audit::{AuditAction, AuditEmitter, AuditEvent, AuditSink, MemoryAuditSink, OperationStatus};
pub use coordinator::{
    GroupMutationCoordinator, MutationRequest, MutationResult, UserSearch, ALREADY_MEMBER,
};
pub use engine::DirectoryEngine;
pub use policy::{classify, GroupClass, ProtectedGroups};
pub use session::{Session, SessionLease, SessionManager, SessionState};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = dirops_core::Result<T>;
