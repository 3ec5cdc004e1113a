//! Error kinds for the object database core.
//!
//! Every externally callable method returns [`Result<T>`]; there is no
//! separate panic-based error channel for expected failures.

use thiserror::Error;

/// The kinds of failure a database operation can report.
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// Malformed inputs: empty names, default ids, out-of-range values, the
    /// wrong `PropertyData` variant for a field.
    #[error("bad arguments: {0}")]
    BadArguments(String),

    /// The entity does not support the requested operation (e.g. properties
    /// on a non-`PropertyEntity`).
    #[error("bad entity type: {0}")]
    BadEntityType(String),

    /// The operation would succeed but the requester lacks the capability.
    #[error("security violation: {0}")]
    SecurityViolation(String),

    /// The id does not refer to anything in the database.
    #[error("not found: {0}")]
    NotFound(String),

    /// The entity cannot be deleted right now because it is pinned by a live
    /// `EntityRef`.
    #[error("in use: {0}")]
    InUse(String),

    /// The persistence backend reported an unrecoverable failure.
    #[error("database error: {0}")]
    DatabaseError(String),

    /// The caller presented a lock token bound to a different entity, or of
    /// the wrong mode (reader where a writer was required, or vice versa).
    #[error("lock error: {0}")]
    LockError(String),

    /// The specific id cannot be deleted by policy: it is reserved, it is a
    /// Capability, it is the requester, it is the currently running program,
    /// or it is the requester's current container.
    #[error("impossible: {0}")]
    Impossible(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for the `SecurityViolation` variant.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Error::SecurityViolation(_))
    }

    /// Caller-selected "throw" mode: escalate a `SecurityViolation` at the
    /// call site. This is a documentation device, not a distinct channel —
    /// the value is simply propagated with `?` by the caller that opts in.
    /// Non-`SecurityViolation` variants pass through unchanged.
    pub fn escalate(self) -> Self {
        self
    }
}
