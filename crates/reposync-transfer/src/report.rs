//! Destination report: the ordered audit trail of one transfer.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use reposync_store::{NodePath, NodeRef};

use crate::error::TransferError;
use crate::progress::{current_time_us, TransferId, TransferStatus};

/// Receives report events in order.
pub trait ReportWriter: Send {
    /// Opens the report.
    fn start_report(&mut self, transfer_id: &TransferId) -> Result<(), TransferError>;
    /// Records a status change.
    fn write_change_state(&mut self, status: TransferStatus);
    /// Records free text.
    fn write_comment(&mut self, text: &str);
    /// Records a created node.
    fn write_created(&mut self, node: &NodeRef, parent: &NodeRef, path: &NodePath);
    /// Records an updated node.
    fn write_updated(&mut self, node: &NodeRef, path: &NodePath);
    /// Records a moved node.
    fn write_moved(&mut self, node: &NodeRef, old_path: &NodePath, new_path: &NodePath);
    /// Records a deleted node.
    fn write_deleted(&mut self, node: &NodeRef, old_path: &NodePath);
    /// Records a failure.
    fn write_exception(&mut self, error: &TransferError);
    /// Closes the report.
    fn end_report(&mut self) -> Result<(), TransferError>;
}

/// One report entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReportEvent {
    /// Report opened.
    Start {
        /// The transfer.
        transfer_id: TransferId,
        /// Microseconds since the Unix epoch.
        timestamp_us: u64,
    },
    /// Status change.
    ChangeState {
        /// New status.
        status: TransferStatus,
    },
    /// Free text.
    Comment {
        /// The text.
        text: String,
    },
    /// Node created.
    Created {
        /// The node.
        node: NodeRef,
        /// Its parent.
        parent: NodeRef,
        /// Its path.
        path: NodePath,
    },
    /// Node updated.
    Updated {
        /// The node.
        node: NodeRef,
        /// Its path.
        path: NodePath,
    },
    /// Node moved.
    Moved {
        /// The node.
        node: NodeRef,
        /// Path before the move.
        old_path: NodePath,
        /// Path after the move.
        new_path: NodePath,
    },
    /// Node deleted.
    Deleted {
        /// The node.
        node: NodeRef,
        /// Its last path.
        old_path: NodePath,
    },
    /// Failure.
    Exception {
        /// Rendered error.
        message: String,
    },
    /// Report closed.
    End {
        /// Microseconds since the Unix epoch.
        timestamp_us: u64,
    },
}

/// Collects events and writes them as one JSON document on
/// [`ReportWriter::end_report`].
#[derive(Debug, Default)]
pub struct JsonReportWriter {
    events: Vec<ReportEvent>,
    output: Option<PathBuf>,
}

impl JsonReportWriter {
    /// Keeps the report in memory only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the report to `path` when it ends.
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            events: Vec::new(),
            output: Some(path.into()),
        }
    }

    /// Events so far.
    pub fn events(&self) -> &[ReportEvent] {
        &self.events
    }

    /// Serialized report.
    pub fn to_json(&self) -> Result<Vec<u8>, TransferError> {
        Ok(serde_json::to_vec_pretty(&self.events)?)
    }
}

impl ReportWriter for JsonReportWriter {
    fn start_report(&mut self, transfer_id: &TransferId) -> Result<(), TransferError> {
        self.events.clear();
        self.events.push(ReportEvent::Start {
            transfer_id: transfer_id.clone(),
            timestamp_us: current_time_us(),
        });
        Ok(())
    }

    fn write_change_state(&mut self, status: TransferStatus) {
        self.events.push(ReportEvent::ChangeState { status });
    }

    fn write_comment(&mut self, text: &str) {
        self.events.push(ReportEvent::Comment {
            text: text.to_string(),
        });
    }

    fn write_created(&mut self, node: &NodeRef, parent: &NodeRef, path: &NodePath) {
        self.events.push(ReportEvent::Created {
            node: node.clone(),
            parent: parent.clone(),
            path: path.clone(),
        });
    }

    fn write_updated(&mut self, node: &NodeRef, path: &NodePath) {
        self.events.push(ReportEvent::Updated {
            node: node.clone(),
            path: path.clone(),
        });
    }

    fn write_moved(&mut self, node: &NodeRef, old_path: &NodePath, new_path: &NodePath) {
        self.events.push(ReportEvent::Moved {
            node: node.clone(),
            old_path: old_path.clone(),
            new_path: new_path.clone(),
        });
    }

    fn write_deleted(&mut self, node: &NodeRef, old_path: &NodePath) {
        self.events.push(ReportEvent::Deleted {
            node: node.clone(),
            old_path: old_path.clone(),
        });
    }

    fn write_exception(&mut self, error: &TransferError) {
        self.events.push(ReportEvent::Exception {
            message: error.to_string(),
        });
    }

    fn end_report(&mut self) -> Result<(), TransferError> {
        self.events.push(ReportEvent::End {
            timestamp_us: current_time_us(),
        });
        if let Some(path) = &self.output {
            std::fs::write(path, self.to_json()?)?;
        }
        Ok(())
    }
}
