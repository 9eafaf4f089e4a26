//! Sending side: the transmitter capability and the transfer driver.

use std::io::{Cursor, Read};
use std::sync::Arc;
use tracing::{debug, info, warn};

use reposync_store::{ContentStore, NodeRef, NodeStore, StoreError};

use crate::error::TransferError;
use crate::manifest::{ManifestHeader, ManifestNodeFactory, ManifestWriter};
use crate::progress::{TransferId, TransferProgress};
use crate::receiver::TransferReceiver;
use crate::requisite::{MissingContent, VecRequisiteWriter};

/// Moves a transfer to a destination and drives its lifecycle there.
pub trait Transmitter: Send + Sync {
    /// Checks that the destination can receive transfers.
    fn verify_target(&self) -> Result<(), TransferError>;
    /// Starts a transfer on the destination.
    fn begin(&self) -> Result<TransferId, TransferError>;
    /// Sends the manifest.
    fn send_manifest(&self, id: &TransferId, manifest: &mut dyn Read) -> Result<u64, TransferError>;
    /// Asks the destination which content parts it needs.
    fn get_requisites(&self, id: &TransferId) -> Result<Vec<MissingContent>, TransferError>;
    /// Sends one content part.
    fn send_content(
        &self,
        id: &TransferId,
        part_name: &str,
        content: &mut dyn Read,
    ) -> Result<u64, TransferError>;
    /// Asks the destination to check the staged transfer.
    fn prepare(&self, id: &TransferId) -> Result<(), TransferError>;
    /// Commits the staged transfer.
    fn commit(&self, id: &TransferId) -> Result<(), TransferError>;
    /// Aborts the transfer.
    fn abort(&self, id: &TransferId) -> Result<(), TransferError>;
    /// Destination progress record.
    fn get_status(&self, id: &TransferId) -> Result<TransferProgress, TransferError>;
    /// Destination report of the commit.
    fn get_transfer_report(&self, id: &TransferId) -> Result<Vec<u8>, TransferError>;
    /// Ends the transfer and frees its resources on the destination.
    fn end(&self, id: &TransferId) -> Result<(), TransferError>;
}

/// Transmitter bound to a receiver in the same process.
#[derive(Clone)]
pub struct InProcessTransmitter {
    receiver: Arc<TransferReceiver>,
}

impl InProcessTransmitter {
    /// Binds to `receiver`.
    pub fn new(receiver: Arc<TransferReceiver>) -> Self {
        Self { receiver }
    }
}

impl Transmitter for InProcessTransmitter {
    fn verify_target(&self) -> Result<(), TransferError> {
        let root = self.receiver.config().staging_root.as_path();
        std::fs::create_dir_all(root)?;
        Ok(())
    }

    fn begin(&self) -> Result<TransferId, TransferError> {
        self.receiver.start()
    }

    fn send_manifest(&self, id: &TransferId, manifest: &mut dyn Read) -> Result<u64, TransferError> {
        self.receiver.save_snapshot(id, manifest)
    }

    fn get_requisites(&self, id: &TransferId) -> Result<Vec<MissingContent>, TransferError> {
        let mut writer = VecRequisiteWriter::new();
        self.receiver.generate_requisite(id, &mut writer)?;
        Ok(writer.into_missing())
    }

    fn send_content(
        &self,
        id: &TransferId,
        part_name: &str,
        content: &mut dyn Read,
    ) -> Result<u64, TransferError> {
        self.receiver.save_content(id, part_name, content)
    }

    fn prepare(&self, id: &TransferId) -> Result<(), TransferError> {
        self.receiver.prepare(id)
    }

    fn commit(&self, id: &TransferId) -> Result<(), TransferError> {
        self.receiver.commit(id)
    }

    fn abort(&self, id: &TransferId) -> Result<(), TransferError> {
        self.receiver.abort(id)
    }

    fn get_status(&self, id: &TransferId) -> Result<TransferProgress, TransferError> {
        self.receiver.get_status(id)
    }

    fn get_transfer_report(&self, id: &TransferId) -> Result<Vec<u8>, TransferError> {
        self.receiver.get_transfer_report(id)
    }

    fn end(&self, id: &TransferId) -> Result<(), TransferError> {
        self.receiver.end(id)
    }
}

/// What to send.
#[derive(Debug, Clone, Default)]
pub struct TransferDefinition {
    /// Identity of the sending repository.
    pub repository_id: String,
    /// Source nodes to send. Nodes only present in the archive are sent as
    /// deletions.
    pub nodes: Vec<NodeRef>,
    /// Remove destination nodes the source no longer has.
    pub is_sync: bool,
    /// Lock transferred nodes read-only on the destination.
    pub is_read_only: bool,
}

/// Result of a finished transfer.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    /// The destination transfer id.
    pub transfer_id: TransferId,
    /// Final destination progress.
    pub progress: TransferProgress,
    /// Destination report.
    pub report: Vec<u8>,
    /// Content parts sent.
    pub parts_sent: usize,
}

/// Builds the manifest for `definition` from the source store.
pub fn build_manifest(
    definition: &TransferDefinition,
    source: &dyn NodeStore,
) -> Result<Vec<u8>, TransferError> {
    let mut header = ManifestHeader::new(
        definition.repository_id.clone(),
        definition.is_sync,
        definition.nodes.len() as u64,
    );
    header.is_read_only = definition.is_read_only;
    let factory = ManifestNodeFactory::new(source);
    let mut writer = ManifestWriter::new(Vec::new(), &header)?;
    for node in &definition.nodes {
        writer.write_node(&factory.create_manifest_node(node)?)?;
    }
    writer.finish()
}

/// Runs a whole transfer: manifest, requisite content, prepare and commit.
///
/// The destination transfer is always ended, also on failure.
pub fn transfer(
    definition: &TransferDefinition,
    source: &dyn NodeStore,
    source_content: &dyn ContentStore,
    transmitter: &dyn Transmitter,
) -> Result<TransferOutcome, TransferError> {
    transmitter.verify_target()?;
    let manifest = build_manifest(definition, source)?;
    let id = transmitter.begin()?;
    info!(transfer_id = %id, nodes = definition.nodes.len(), "sending transfer");

    let result = send(&id, manifest, source, source_content, transmitter);
    let outcome = match result {
        Ok(parts_sent) => Ok(TransferOutcome {
            progress: transmitter.get_status(&id)?,
            report: transmitter.get_transfer_report(&id)?,
            transfer_id: id.clone(),
            parts_sent,
        }),
        Err(err) => {
            // A failed commit has already reached a terminal status.
            if !err.is_cancellation() && !transmitter.get_status(&id)?.status.is_terminal() {
                if let Err(e) = transmitter.abort(&id) {
                    warn!(transfer_id = %id, error = %e, "abort failed");
                }
            }
            Err(err)
        }
    };
    transmitter.end(&id)?;
    outcome
}

fn send(
    id: &TransferId,
    manifest: Vec<u8>,
    source: &dyn NodeStore,
    source_content: &dyn ContentStore,
    transmitter: &dyn Transmitter,
) -> Result<usize, TransferError> {
    transmitter.send_manifest(id, &mut Cursor::new(manifest))?;
    let requisites = transmitter.get_requisites(id)?;
    for missing in &requisites {
        let data = source
            .get_property(&missing.node, &missing.qname)?
            .and_then(|value| value.as_content().cloned())
            .ok_or_else(|| StoreError::ContentNotFound(missing.part_name.clone()))?;
        let bytes = source_content.get(&data.content_url)?;
        debug!(transfer_id = %id, part = %missing.part_name, size = bytes.len(), "sending content");
        transmitter.send_content(id, &missing.part_name, &mut Cursor::new(bytes))?;
    }
    transmitter.prepare(id)?;
    transmitter.commit(id)?;
    Ok(requisites.len())
}
