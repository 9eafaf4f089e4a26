//! Error types for the transfer subsystem.
//!
//! Failures are classified at the per-node catch boundary of every manifest
//! pass: non-fatal errors are logged against the node and the pass carries
//! on (the transfer is then rolled back as a whole), fatal errors abort the
//! pass immediately.

use reposync_store::{NodeRef, StoreError};
use thiserror::Error;

use crate::progress::{TransferId, TransferStatus};

/// Errors that can occur while receiving a transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Neither the node nor its parent could be located and no holding
    /// location applies.
    #[error("unable to resolve {node}: {msg}")]
    Unresolved {
        /// The source node.
        node: NodeRef,
        /// What could not be resolved.
        msg: String,
    },

    /// Nodes were parked in the temp folder and their parents never arrived.
    #[error("{count} orphan node(s) left without a parent, first {first}")]
    Orphans {
        /// Number of unparented nodes.
        count: usize,
        /// The first orphan.
        first: NodeRef,
    },

    /// Newer content is required but its part was never staged.
    #[error("content part '{part}' for {node} was not staged")]
    ContentNotStaged {
        /// The node whose content is missing.
        node: NodeRef,
        /// Expected part name.
        part: String,
    },

    /// Node or content store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The transfer was cancelled.
    #[error("transfer {0} cancelled")]
    Cancelled(TransferId),

    /// The transfer reached a terminal status and accepts no more updates.
    #[error("transfer {id} is already {status:?}")]
    TerminalStatus {
        /// The transfer.
        id: TransferId,
        /// Its terminal status.
        status: TransferStatus,
    },

    /// The operation is not allowed in the transfer's current status.
    #[error("transfer {id} is {status:?}, expected {expected:?}")]
    InvalidState {
        /// The transfer.
        id: TransferId,
        /// Its current status.
        status: TransferStatus,
        /// The status the operation needs.
        expected: TransferStatus,
    },

    /// Manifest version not understood by this receiver.
    #[error("version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Supported manifest version.
        expected: u32,
        /// Version found in the manifest header.
        got: u32,
    },

    /// Another transfer holds the target lock.
    #[error("transfer lock '{lock}' is held by transfer {holder}")]
    LockHeld {
        /// The lock name.
        lock: String,
        /// The current holder.
        holder: TransferId,
    },

    /// The transfer no longer holds the target lock (it timed out and was
    /// taken over, or was released).
    #[error("transfer {0} no longer holds the transfer lock")]
    LockLost(TransferId),

    /// No transfer with this id is known to the receiver.
    #[error("unknown transfer {0}")]
    UnknownTransfer(TransferId),

    /// The manifest stream is malformed.
    #[error("manifest error at record {record}: {msg}")]
    Manifest {
        /// Zero-based record index (0 is the header line).
        record: usize,
        /// Error message describing the issue.
        msg: String,
    },

    /// One or more nodes failed during the passes; every change was rolled
    /// back.
    #[error("transfer failed with {count} node error(s); first: {first}")]
    RollbackOnly {
        /// Number of failed nodes.
        count: usize,
        /// The first recorded failure.
        first: Box<TransferError>,
    },

    /// I/O error in the staging area.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected failure outside the transfer taxonomy.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TransferError {
    /// Returns true if the error must abort the current pass immediately.
    pub fn is_fatal(&self) -> bool {
        match self {
            TransferError::Unresolved { .. }
            | TransferError::Orphans { .. }
            | TransferError::ContentNotStaged { .. } => false,
            TransferError::Store(e) => !e.is_recoverable(),
            _ => true,
        }
    }

    /// Returns true if this is a cancellation, directly or as the cause of
    /// a rollback.
    pub fn is_cancellation(&self) -> bool {
        match self {
            TransferError::Cancelled(_) => true,
            TransferError::RollbackOnly { first, .. } => first.is_cancellation(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_store::StoreRef;

    fn node() -> NodeRef {
        NodeRef::new(StoreRef::workspace(), "n1")
    }

    #[test]
    fn test_node_level_errors_are_not_fatal() {
        let err = TransferError::Unresolved {
            node: node(),
            msg: "parent".to_string(),
        };
        assert!(!err.is_fatal());
        let orphans = TransferError::Orphans {
            count: 2,
            first: node(),
        };
        assert!(!orphans.is_fatal());
        assert!(orphans.to_string().contains("orphan"));
    }

    #[test]
    fn test_store_errors_follow_recoverability() {
        let missing = TransferError::from(StoreError::NodeNotFound(node()));
        assert!(!missing.is_fatal());
        let integrity = TransferError::from(StoreError::IntegrityViolation {
            msg: "x".to_string(),
        });
        assert!(integrity.is_fatal());
    }

    #[test]
    fn test_cancellation_is_fatal_and_distinguished() {
        let id = TransferId::from("t1");
        let err = TransferError::Cancelled(id.clone());
        assert!(err.is_fatal());
        assert!(err.is_cancellation());
        let wrapped = TransferError::RollbackOnly {
            count: 1,
            first: Box::new(TransferError::Cancelled(id)),
        };
        assert!(wrapped.is_cancellation());
        assert!(!TransferError::Internal("x".to_string()).is_cancellation());
    }
}
