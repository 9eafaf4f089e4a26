//! Error types for the node and content stores.

use thiserror::Error;

use crate::types::NodeRef;

/// Errors returned by [`NodeStore`](crate::NodeStore) and
/// [`ContentStore`](crate::ContentStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The node does not exist in the store.
    #[error("node {0} not found")]
    NodeNotFound(NodeRef),

    /// The association does not exist.
    #[error("association {msg} not found")]
    AssociationNotFound {
        /// Description of the missing association.
        msg: String,
    },

    /// A sibling with the same name already exists under the parent.
    #[error("duplicate child name '{name}' under {parent}")]
    DuplicateChild {
        /// The parent node.
        parent: NodeRef,
        /// The clashing `cm:name`.
        name: String,
    },

    /// The node or association already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// A structural constraint of the store would be violated.
    #[error("integrity violation: {msg}")]
    IntegrityViolation {
        /// What constraint was violated.
        msg: String,
    },

    /// Moving the node would make it its own ancestor.
    #[error("cannot move {node} beneath its own descendant {new_parent}")]
    CyclicMove {
        /// The node being moved.
        node: NodeRef,
        /// The requested new parent.
        new_parent: NodeRef,
    },

    /// A unit of work is already open on this store.
    #[error("a transaction is already active")]
    TransactionActive,

    /// Commit or rollback was requested with no open unit of work.
    #[error("no active transaction")]
    NoTransaction,

    /// No content is stored under the URL.
    #[error("content {0} not found")]
    ContentNotFound(String),

    /// An internal lock was poisoned.
    #[error("lock error: {0}")]
    Lock(String),

    /// I/O error.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true for failures that only concern the addressed node or
    /// association (missing or already present). Everything else is a
    /// structural or infrastructure failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StoreError::NodeNotFound(_)
                | StoreError::AssociationNotFound { .. }
                | StoreError::DuplicateChild { .. }
                | StoreError::AlreadyExists(_)
                | StoreError::ContentNotFound(_)
        )
    }
}
