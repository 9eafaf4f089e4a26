//! Transfer progress records and the monitor that guards their lifecycle.
//!
//! Status moves forward only. Once a record reaches a terminal status it is
//! frozen; any update on a cancelled transfer raises
//! [`TransferError::Cancelled`], which is how in-flight passes notice an
//! asynchronous cancel.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::error::TransferError;

/// Identifier of one inbound transfer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    /// Generates a fresh random transfer id.
    pub fn generate() -> Self {
        TransferId(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransferId {
    fn from(value: &str) -> Self {
        TransferId(value.to_string())
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    /// Started; manifest and content are being staged.
    PreCommit,
    /// Commit was requested but processing has not begun.
    CommitRequested,
    /// Manifest passes are running.
    Committing,
    /// All passes succeeded and the unit of work was committed.
    Complete,
    /// The transfer failed and was rolled back.
    Error,
    /// The transfer was cancelled.
    Cancelled,
}

impl TransferStatus {
    /// Terminal statuses admit no further updates.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Complete | TransferStatus::Error | TransferStatus::Cancelled
        )
    }
}

/// Progress record of one transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferProgress {
    /// The transfer.
    pub transfer_id: TransferId,
    /// Current status.
    pub status: TransferStatus,
    /// Current position in the processing range.
    pub current_position: u64,
    /// End of the processing range.
    pub end_position: u64,
    /// Last recorded error, if any.
    pub error: Option<String>,
}

impl TransferProgress {
    fn new(transfer_id: TransferId) -> Self {
        Self {
            transfer_id,
            status: TransferStatus::PreCommit,
            current_position: 0,
            end_position: 0,
            error: None,
        }
    }
}

/// One entry of a transfer's audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Microseconds since the Unix epoch.
    pub timestamp_us: u64,
    /// Log message.
    pub message: String,
    /// Rendered error attached to the entry.
    pub error: Option<String>,
}

/// Tracks progress, status and the audit log of transfers.
pub trait ProgressMonitor: Send + Sync {
    /// Creates the record for a new transfer in `PreCommit`.
    fn create(&self, id: &TransferId) -> Result<(), TransferError>;

    /// Updates the current (and optionally end) position.
    fn update_progress(
        &self,
        id: &TransferId,
        position: u64,
        end: Option<u64>,
    ) -> Result<(), TransferError>;

    /// Moves the transfer to a new status.
    fn update_status(&self, id: &TransferId, status: TransferStatus) -> Result<(), TransferError>;

    /// Appends to the audit log. An attached error also becomes the
    /// record's error unless the record is already terminal.
    fn log(
        &self,
        id: &TransferId,
        message: &str,
        error: Option<&TransferError>,
    ) -> Result<(), TransferError>;

    /// Returns the progress record.
    fn get_progress(&self, id: &TransferId) -> Result<TransferProgress, TransferError>;

    /// Returns the audit log.
    fn get_log(&self, id: &TransferId) -> Result<Vec<LogEntry>, TransferError>;
}

/// Progress monitor backed by concurrent maps.
#[derive(Default)]
pub struct InMemoryProgressMonitor {
    records: DashMap<TransferId, TransferProgress>,
    logs: DashMap<TransferId, Vec<LogEntry>>,
}

impl InMemoryProgressMonitor {
    /// Creates an empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    fn check_mutable(record: &TransferProgress) -> Result<(), TransferError> {
        match record.status {
            TransferStatus::Cancelled => Err(TransferError::Cancelled(record.transfer_id.clone())),
            status if status.is_terminal() => Err(TransferError::TerminalStatus {
                id: record.transfer_id.clone(),
                status,
            }),
            _ => Ok(()),
        }
    }
}

impl ProgressMonitor for InMemoryProgressMonitor {
    fn create(&self, id: &TransferId) -> Result<(), TransferError> {
        self.records
            .insert(id.clone(), TransferProgress::new(id.clone()));
        self.logs.insert(id.clone(), Vec::new());
        Ok(())
    }

    fn update_progress(
        &self,
        id: &TransferId,
        position: u64,
        end: Option<u64>,
    ) -> Result<(), TransferError> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| TransferError::UnknownTransfer(id.clone()))?;
        Self::check_mutable(&record)?;
        record.current_position = position;
        if let Some(end) = end {
            record.end_position = end;
        }
        Ok(())
    }

    fn update_status(&self, id: &TransferId, status: TransferStatus) -> Result<(), TransferError> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| TransferError::UnknownTransfer(id.clone()))?;
        if record.status == status && status == TransferStatus::Cancelled {
            return Ok(());
        }
        Self::check_mutable(&record)?;
        info!(transfer_id = %id, from = ?record.status, to = ?status, "transfer status changed");
        record.status = status;
        Ok(())
    }

    fn log(
        &self,
        id: &TransferId,
        message: &str,
        error: Option<&TransferError>,
    ) -> Result<(), TransferError> {
        let rendered = error.map(|e| e.to_string());
        if let Some(err) = &rendered {
            warn!(transfer_id = %id, error = %err, "{}", message);
        } else {
            info!(transfer_id = %id, "{}", message);
        }
        {
            let mut log = self
                .logs
                .get_mut(id)
                .ok_or_else(|| TransferError::UnknownTransfer(id.clone()))?;
            log.push(LogEntry {
                timestamp_us: current_time_us(),
                message: message.to_string(),
                error: rendered.clone(),
            });
        }
        if let Some(err) = rendered {
            if let Some(mut record) = self.records.get_mut(id) {
                if !record.status.is_terminal() {
                    record.error = Some(err);
                }
            }
        }
        Ok(())
    }

    fn get_progress(&self, id: &TransferId) -> Result<TransferProgress, TransferError> {
        self.records
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| TransferError::UnknownTransfer(id.clone()))
    }

    fn get_log(&self, id: &TransferId) -> Result<Vec<LogEntry>, TransferError> {
        self.logs
            .get(id)
            .map(|l| l.value().clone())
            .ok_or_else(|| TransferError::UnknownTransfer(id.clone()))
    }
}

/// Get current time in microseconds since Unix epoch.
pub(crate) fn current_time_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
