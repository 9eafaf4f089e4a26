//! Transfer lifecycle on the receiving side.
//!
//! `start` takes the target lock and opens a staging area; the sender then
//! stages a manifest and the content parts it was asked for, and `commit`
//! runs the primary, secondary and tertiary passes inside one unit of work
//! on the node store. Any failure rolls the whole unit back.

use std::collections::BTreeSet;
use std::io::Read;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use dashmap::DashMap;
use reposync_store::{ContentStore, NodeRef, NodeStore};

use crate::alien::AlienProcessor;
use crate::config::ReceiverConfig;
use crate::error::TransferError;
use crate::lock::TransferLock;
use crate::manifest::ManifestHeader;
use crate::processor::{
    ChangeCapture, PassDriver, PrimaryManifestProcessor, SecondaryManifestProcessor,
    TertiaryManifestProcessor, TransferContext,
};
use crate::progress::{ProgressMonitor, TransferId, TransferProgress, TransferStatus};
use crate::report::{JsonReportWriter, ReportWriter};
use crate::requisite::{RequisiteProcessor, RequisiteWriter};
use crate::resolver::{BasicCorrespondingNodeResolver, CachingCorrespondingNodeResolver};
use crate::staging::StagingArea;

/// Number of passes a commit runs over the manifest.
const COMMIT_PASSES: u64 = 3;

/// Notified once at the end of every inbound commit.
pub trait TransferListener: Send + Sync {
    /// Called with the nodes the transfer created, updated and deleted. The
    /// sets are empty when the transfer was rolled back.
    fn on_end_inbound_transfer(
        &self,
        transfer_id: &TransferId,
        created: &BTreeSet<NodeRef>,
        updated: &BTreeSet<NodeRef>,
        deleted: &BTreeSet<NodeRef>,
    );
}

/// Receives transfers into a destination node store.
pub struct TransferReceiver {
    config: ReceiverConfig,
    store: Arc<dyn NodeStore>,
    content_store: Arc<dyn ContentStore>,
    monitor: Arc<dyn ProgressMonitor>,
    alien: AlienProcessor,
    lock: TransferLock,
    listeners: RwLock<Vec<Arc<dyn TransferListener>>>,
    transfers: DashMap<TransferId, StagingArea>,
}

impl TransferReceiver {
    /// Creates a receiver over the destination stores.
    pub fn new(
        config: ReceiverConfig,
        store: Arc<dyn NodeStore>,
        content_store: Arc<dyn ContentStore>,
        monitor: Arc<dyn ProgressMonitor>,
    ) -> Self {
        let alien = AlienProcessor::new(store.clone(), config.local_repository_id.clone());
        let lock = TransferLock::new(Duration::from_millis(config.lock_timeout_ms));
        Self {
            config,
            store,
            content_store,
            monitor,
            alien,
            lock,
            listeners: RwLock::new(Vec::new()),
            transfers: DashMap::new(),
        }
    }

    /// Receiver configuration.
    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Destination node store.
    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// Progress monitor.
    pub fn monitor(&self) -> &Arc<dyn ProgressMonitor> {
        &self.monitor
    }

    /// Registers a listener for committed transfers.
    pub fn add_listener(&self, listener: Arc<dyn TransferListener>) -> Result<(), TransferError> {
        self.listeners
            .write()
            .map_err(|e| TransferError::Internal(e.to_string()))?
            .push(listener);
        Ok(())
    }

    /// Starts a transfer: takes the target lock, which fails immediately
    /// when another live transfer holds it.
    pub fn start(&self) -> Result<TransferId, TransferError> {
        let id = TransferId::generate();
        self.lock.acquire(&self.config.lock_name, &id)?;
        let staging = match StagingArea::create(&self.config.staging_root, &id) {
            Ok(staging) => staging,
            Err(e) => {
                self.lock.release(&self.config.lock_name, &id);
                return Err(e);
            }
        };
        self.monitor.create(&id)?;
        self.transfers.insert(id.clone(), staging);
        info!(transfer_id = %id, "transfer started");
        Ok(id)
    }

    fn staging(&self, id: &TransferId) -> Result<StagingArea, TransferError> {
        self.transfers
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransferError::UnknownTransfer(id.clone()))
    }

    /// Fails unless the transfer holds the lock and is still staging.
    fn check_pre_commit(&self, id: &TransferId) -> Result<StagingArea, TransferError> {
        let staging = self.staging(id)?;
        self.lock.refresh(&self.config.lock_name, id)?;
        self.check_staging_status(id)?;
        Ok(staging)
    }

    fn check_staging_status(&self, id: &TransferId) -> Result<(), TransferError> {
        match self.monitor.get_progress(id)?.status {
            TransferStatus::PreCommit => Ok(()),
            TransferStatus::Cancelled => Err(TransferError::Cancelled(id.clone())),
            status => Err(TransferError::InvalidState {
                id: id.clone(),
                status,
                expected: TransferStatus::PreCommit,
            }),
        }
    }

    /// Stages the manifest, returning its size in bytes.
    pub fn save_snapshot(&self, id: &TransferId, reader: impl Read) -> Result<u64, TransferError> {
        let staging = self.check_pre_commit(id)?;
        let size = staging.save_snapshot(reader)?;
        let header = staging.open_snapshot()?.header().clone();
        header.check_version()?;
        self.monitor.log(
            id,
            &format!(
                "manifest received from {} ({} nodes, {} bytes)",
                header.repository_id, header.node_count, size
            ),
            None,
        )?;
        Ok(size)
    }

    /// Stages one content part, returning its size in bytes.
    pub fn save_content(
        &self,
        id: &TransferId,
        part_name: &str,
        reader: impl Read,
    ) -> Result<u64, TransferError> {
        let staging = self.check_pre_commit(id)?;
        staging.save_content(part_name, reader)
    }

    /// Writes the content parts the destination still needs.
    pub fn generate_requisite(
        &self,
        id: &TransferId,
        writer: &mut dyn RequisiteWriter,
    ) -> Result<(), TransferError> {
        let staging = self.check_pre_commit(id)?;
        let reader = staging.open_snapshot()?;
        let header = reader.header().clone();
        let resolver = self.resolver();
        let mut pass = RequisiteProcessor::new(self.store.as_ref(), &resolver, writer);
        let interval = self.config.effective_progress_interval();
        let mut driver = PassDriver::new(id, self.monitor.as_ref(), interval);
        driver.run(&mut pass, &header, reader)?;
        driver.into_result()
    }

    /// Checks that everything needed for the commit was staged.
    pub fn prepare(&self, id: &TransferId) -> Result<(), TransferError> {
        let staging = self.check_pre_commit(id)?;
        if !staging.has_snapshot() {
            return Err(TransferError::Manifest {
                record: 0,
                msg: "no manifest staged".to_string(),
            });
        }
        self.monitor.log(id, "transfer prepared", None)
    }

    fn resolver(&self) -> CachingCorrespondingNodeResolver<BasicCorrespondingNodeResolver> {
        CachingCorrespondingNodeResolver::new(BasicCorrespondingNodeResolver::new(self.store.clone()))
    }

    /// Applies the staged manifest. Blocks until the transfer reaches a
    /// terminal status; a cancellation surfaces as
    /// [`TransferError::Cancelled`].
    pub fn commit(&self, id: &TransferId) -> Result<(), TransferError> {
        let staging = self.staging(id)?;
        // A finished or cancelled transfer keeps its report untouched.
        self.check_staging_status(id)?;
        let mut report = JsonReportWriter::to_file(staging.report_path());
        report.start_report(id)?;
        let mut changes = ChangeCapture::default();

        let result = self.apply(id, &staging, &mut report, &mut changes);
        match &result {
            Ok(()) => {
                info!(
                    transfer_id = %id,
                    created = changes.created.len(),
                    updated = changes.updated.len(),
                    deleted = changes.deleted.len(),
                    "transfer complete"
                );
            }
            Err(err) => {
                let status = if err.is_cancellation() {
                    TransferStatus::Cancelled
                } else {
                    TransferStatus::Error
                };
                error!(transfer_id = %id, error = %err, ?status, "transfer failed");
                report.write_exception(err);
                report.write_change_state(status);
                if let Err(e) = self.monitor.log(id, "transfer failed", Some(err)) {
                    warn!(transfer_id = %id, error = %e, "could not log failure");
                }
                if let Err(e) = self.monitor.update_status(id, status) {
                    warn!(transfer_id = %id, error = %e, "could not record final status");
                }
                changes = ChangeCapture::default();
            }
        }
        if let Err(e) = report.end_report() {
            warn!(transfer_id = %id, error = %e, "could not write transfer report");
        }
        self.notify(id, &changes);
        match result {
            Err(err) if err.is_cancellation() => Err(TransferError::Cancelled(id.clone())),
            other => other,
        }
    }

    /// Runs [`TransferReceiver::commit`] on the blocking pool.
    pub fn commit_async(self: &Arc<Self>, id: &TransferId) -> JoinHandle<Result<(), TransferError>> {
        let receiver = Arc::clone(self);
        let id = id.clone();
        tokio::task::spawn_blocking(move || receiver.commit(&id))
    }

    fn apply(
        &self,
        id: &TransferId,
        staging: &StagingArea,
        report: &mut JsonReportWriter,
        changes: &mut ChangeCapture,
    ) -> Result<(), TransferError> {
        self.lock.refresh(&self.config.lock_name, id)?;
        self.monitor.update_status(id, TransferStatus::CommitRequested)?;
        let header = staging.open_snapshot()?.header().clone();
        header.check_version()?;
        self.monitor.update_status(id, TransferStatus::Committing)?;
        report.write_change_state(TransferStatus::Committing);
        self.monitor
            .update_progress(id, 0, Some(header.node_count * COMMIT_PASSES))?;

        self.store.begin()?;
        // Complete is recorded before the store commits so that a late
        // cancellation still rolls back.
        let applied = self
            .run_passes(id, &header, staging, report, changes)
            .and_then(|()| self.monitor.update_status(id, TransferStatus::Complete));
        match applied {
            Ok(()) => {
                report.write_change_state(TransferStatus::Complete);
                if let Err(e) = self.store.commit() {
                    error!(transfer_id = %id, error = %e, "store commit failed after completion");
                    if let Err(rollback) = self.store.rollback() {
                        error!(transfer_id = %id, error = %rollback, "rollback failed");
                    }
                    return Err(e.into());
                }
                Ok(())
            }
            Err(err) => {
                if let Err(e) = self.store.rollback() {
                    error!(transfer_id = %id, error = %e, "rollback failed");
                }
                Err(err)
            }
        }
    }

    fn run_passes(
        &self,
        id: &TransferId,
        header: &ManifestHeader,
        staging: &StagingArea,
        report: &mut JsonReportWriter,
        changes: &mut ChangeCapture,
    ) -> Result<(), TransferError> {
        let resolver = self.resolver();
        let ctx = TransferContext {
            transfer_id: id,
            store: self.store.as_ref(),
            content_store: self.content_store.as_ref(),
            resolver: &resolver,
            alien: &self.alien,
            staging,
            config: &self.config,
        };
        let heartbeat = || self.lock.refresh(&self.config.lock_name, id);
        let interval = self.config.effective_progress_interval();
        let mut driver =
            PassDriver::new(id, self.monitor.as_ref(), interval).with_heartbeat(&heartbeat);

        {
            let mut pass = PrimaryManifestProcessor::new(&ctx, &mut *report, &mut *changes);
            driver.run(&mut pass, header, staging.open_snapshot()?)?;
        }
        // Later passes would only repeat the failures of missing nodes.
        if !driver.node_errors().is_empty() {
            return driver.into_result();
        }
        {
            let mut pass = SecondaryManifestProcessor::new(&ctx, &mut *report, &mut *changes);
            driver.run(&mut pass, header, staging.open_snapshot()?)?;
        }
        if !driver.node_errors().is_empty() {
            return driver.into_result();
        }
        {
            let mut pass = TertiaryManifestProcessor::new(&ctx, &mut *report, &mut *changes);
            driver.run(&mut pass, header, staging.open_snapshot()?)?;
        }
        driver.into_result()
    }

    fn notify(&self, id: &TransferId, changes: &ChangeCapture) {
        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(e) => {
                warn!(transfer_id = %id, error = %e, "listener list unavailable");
                return;
            }
        };
        for listener in listeners {
            listener.on_end_inbound_transfer(id, &changes.created, &changes.updated, &changes.deleted);
        }
    }

    /// Marks the transfer cancelled. A running commit stops at its next
    /// progress checkpoint and rolls back.
    pub fn cancel(&self, id: &TransferId) -> Result<(), TransferError> {
        self.staging(id)?;
        self.monitor.update_status(id, TransferStatus::Cancelled)?;
        info!(transfer_id = %id, "transfer cancelled");
        Ok(())
    }

    /// Aborts the transfer; equivalent to [`TransferReceiver::cancel`].
    pub fn abort(&self, id: &TransferId) -> Result<(), TransferError> {
        self.cancel(id)
    }

    /// Ends the transfer: releases the lock and removes the staging area
    /// unless configured to keep it.
    pub fn end(&self, id: &TransferId) -> Result<(), TransferError> {
        let Some((_, staging)) = self.transfers.remove(id) else {
            return Err(TransferError::UnknownTransfer(id.clone()));
        };
        if !self.lock.release(&self.config.lock_name, id) {
            warn!(transfer_id = %id, "transfer lock was no longer held");
        }
        if !self.config.keep_staging {
            staging.remove()?;
        }
        info!(transfer_id = %id, "transfer ended");
        Ok(())
    }

    /// Current progress of a transfer.
    pub fn get_status(&self, id: &TransferId) -> Result<TransferProgress, TransferError> {
        self.monitor.get_progress(id)
    }

    /// The destination report written by the last commit.
    pub fn get_transfer_report(&self, id: &TransferId) -> Result<Vec<u8>, TransferError> {
        self.staging(id)?.read_report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ManifestNode, ManifestWriter, NormalNode};
    use crate::processor::testing::{file, folder, SOURCE};
    use crate::progress::{InMemoryProgressMonitor, LogEntry};
    use crate::report::ReportEvent;
    use crate::requisite::VecRequisiteWriter;
    use reposync_store::{MemoryContentStore, MemoryNodeStore, StoreRef};
    use std::io::Cursor;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(TransferId, usize, usize, usize)>>,
    }

    impl TransferListener for Recorder {
        fn on_end_inbound_transfer(
            &self,
            transfer_id: &TransferId,
            created: &BTreeSet<NodeRef>,
            updated: &BTreeSet<NodeRef>,
            deleted: &BTreeSet<NodeRef>,
        ) {
            self.calls.lock().unwrap().push((
                transfer_id.clone(),
                created.len(),
                updated.len(),
                deleted.len(),
            ));
        }
    }

    struct Fixture {
        receiver: Arc<TransferReceiver>,
        recorder: Arc<Recorder>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(InMemoryProgressMonitor::new()))
    }

    fn fixture_with(monitor: Arc<dyn ProgressMonitor>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = ReceiverConfig {
            staging_root: dir.path().to_path_buf(),
            ..ReceiverConfig::default()
        };
        let receiver = Arc::new(TransferReceiver::new(
            config,
            Arc::new(MemoryNodeStore::new()),
            Arc::new(MemoryContentStore::new()),
            monitor,
        ));
        let recorder = Arc::new(Recorder::default());
        receiver.add_listener(recorder.clone()).unwrap();
        Fixture {
            receiver,
            recorder,
            _dir: dir,
        }
    }

    fn manifest(is_sync: bool, nodes: &[NormalNode]) -> Vec<u8> {
        let header = ManifestHeader::new(SOURCE, is_sync, nodes.len() as u64);
        let mut writer = ManifestWriter::new(Vec::new(), &header).unwrap();
        for node in nodes {
            writer.write_node(&ManifestNode::Normal(node.clone())).unwrap();
        }
        writer.finish().unwrap()
    }

    fn tree() -> Vec<NormalNode> {
        let top = folder("top", None);
        let child = folder("child", Some(&top));
        let leaf = file("leaf.txt", &child, b"leaf", 7);
        vec![top, child, leaf]
    }

    fn send(receiver: &TransferReceiver, nodes: &[NormalNode]) -> TransferId {
        let id = receiver.start().unwrap();
        receiver
            .save_snapshot(&id, Cursor::new(manifest(false, nodes)))
            .unwrap();
        let mut requisite = VecRequisiteWriter::new();
        receiver.generate_requisite(&id, &mut requisite).unwrap();
        for missing in requisite.missing() {
            receiver
                .save_content(&id, &missing.part_name, Cursor::new(b"leaf".to_vec()))
                .unwrap();
        }
        receiver.prepare(&id).unwrap();
        id
    }

    /// Cancels the transfer just before it would be recorded Complete.
    #[derive(Default)]
    struct CancelOnComplete {
        inner: InMemoryProgressMonitor,
    }

    impl ProgressMonitor for CancelOnComplete {
        fn create(&self, id: &TransferId) -> Result<(), TransferError> {
            self.inner.create(id)
        }

        fn update_progress(
            &self,
            id: &TransferId,
            position: u64,
            end: Option<u64>,
        ) -> Result<(), TransferError> {
            self.inner.update_progress(id, position, end)
        }

        fn update_status(&self, id: &TransferId, status: TransferStatus) -> Result<(), TransferError> {
            if status == TransferStatus::Complete {
                self.inner.update_status(id, TransferStatus::Cancelled)?;
            }
            self.inner.update_status(id, status)
        }

        fn log(
            &self,
            id: &TransferId,
            message: &str,
            error: Option<&TransferError>,
        ) -> Result<(), TransferError> {
            self.inner.log(id, message, error)
        }

        fn get_progress(&self, id: &TransferId) -> Result<TransferProgress, TransferError> {
            self.inner.get_progress(id)
        }

        fn get_log(&self, id: &TransferId) -> Result<Vec<LogEntry>, TransferError> {
            self.inner.get_log(id)
        }
    }

    fn report_events(receiver: &TransferReceiver, id: &TransferId) -> Vec<ReportEvent> {
        serde_json::from_slice(&receiver.get_transfer_report(id).unwrap()).unwrap()
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn test_full_transfer_commits() {
            let f = fixture();
            let nodes = tree();
            let id = send(&f.receiver, &nodes);
            f.receiver.commit(&id).unwrap();

            let status = f.receiver.get_status(&id).unwrap();
            assert_eq!(status.status, TransferStatus::Complete);
            assert_eq!(status.end_position, 9);
            assert_eq!(status.current_position, 9);
            let leaf = nodes[2].node_ref.in_store(StoreRef::workspace());
            assert_eq!(
                f.receiver.store().get_path(&leaf).unwrap().to_string(),
                "/cm:top/cm:child/cm:leaf.txt"
            );
            assert_eq!(f.recorder.calls.lock().unwrap()[0], (id.clone(), 3, 0, 0));

            let events: Vec<ReportEvent> =
                serde_json::from_slice(&f.receiver.get_transfer_report(&id).unwrap()).unwrap();
            assert_eq!(
                events
                    .iter()
                    .filter(|e| matches!(e, ReportEvent::Created { .. }))
                    .count(),
                3
            );
            f.receiver.end(&id).unwrap();
            assert!(f.receiver.get_transfer_report(&id).is_err());
        }

        #[test]
        fn test_second_start_fails_while_locked() {
            let f = fixture();
            let first = f.receiver.start().unwrap();
            let err = f.receiver.start().unwrap_err();
            assert!(matches!(err, TransferError::LockHeld { .. }));
            f.receiver.end(&first).unwrap();
            let second = f.receiver.start().unwrap();
            f.receiver.end(&second).unwrap();
        }

        #[test]
        fn test_requisite_skips_up_to_date_content() {
            let f = fixture();
            let nodes = tree();
            let id = send(&f.receiver, &nodes);
            f.receiver.commit(&id).unwrap();
            f.receiver.end(&id).unwrap();

            let id = f.receiver.start().unwrap();
            f.receiver
                .save_snapshot(&id, Cursor::new(manifest(false, &nodes)))
                .unwrap();
            let mut requisite = VecRequisiteWriter::new();
            f.receiver.generate_requisite(&id, &mut requisite).unwrap();
            assert!(requisite.is_finished());
            assert!(requisite.missing().is_empty());
            f.receiver.end(&id).unwrap();
        }

        #[test]
        fn test_reapplying_changes_nothing() {
            let f = fixture();
            let nodes = tree();
            let id = send(&f.receiver, &nodes);
            f.receiver.commit(&id).unwrap();
            f.receiver.end(&id).unwrap();
            let id = send(&f.receiver, &nodes);
            f.receiver.commit(&id).unwrap();
            assert_eq!(f.recorder.calls.lock().unwrap()[1], (id, 0, 0, 0));
        }
    }

    mod failures {
        use super::*;

        #[test]
        fn test_node_error_rolls_back_everything() {
            let f = fixture();
            let mut nodes = tree();
            // The leaf's parent never arrives.
            nodes.remove(1);
            let id = send(&f.receiver, &nodes);
            let err = f.receiver.commit(&id).unwrap_err();
            assert!(matches!(err, TransferError::RollbackOnly { .. }));
            assert!(err.to_string().contains("orphan"));

            let top = nodes[0].node_ref.in_store(StoreRef::workspace());
            assert!(!f.receiver.store().exists(&top).unwrap());
            let status = f.receiver.get_status(&id).unwrap();
            assert_eq!(status.status, TransferStatus::Error);
            assert!(status.error.is_some());
            assert_eq!(f.recorder.calls.lock().unwrap()[0], (id.clone(), 0, 0, 0));
            assert!(!f.receiver.monitor().get_log(&id).unwrap().is_empty());
        }

        #[test]
        fn test_cancelled_before_commit() {
            let f = fixture();
            let id = send(&f.receiver, &tree());
            f.receiver.cancel(&id).unwrap();
            let err = f.receiver.commit(&id).unwrap_err();
            assert!(matches!(err, TransferError::Cancelled(_)));
            assert_eq!(
                f.receiver.get_status(&id).unwrap().status,
                TransferStatus::Cancelled
            );
            assert!(f
                .receiver
                .save_content(&id, "late", Cursor::new(Vec::new()))
                .is_err());
        }

        #[test]
        fn test_expired_lock_is_taken_over() {
            let dir = tempfile::tempdir().unwrap();
            let config = ReceiverConfig {
                staging_root: dir.path().to_path_buf(),
                lock_timeout_ms: 0,
                ..ReceiverConfig::default()
            };
            let receiver = TransferReceiver::new(
                config,
                Arc::new(MemoryNodeStore::new()),
                Arc::new(MemoryContentStore::new()),
                Arc::new(InMemoryProgressMonitor::new()),
            );
            let stale = send(&receiver, &tree());
            let fresh = receiver.start().unwrap();
            let err = receiver.commit(&stale).unwrap_err();
            assert!(matches!(err, TransferError::LockLost(_)));
            assert_eq!(
                receiver.get_status(&stale).unwrap().status,
                TransferStatus::Error
            );
            receiver.end(&fresh).unwrap();
        }

        #[test]
        fn test_cancel_at_completion_rolls_back() {
            let f = fixture_with(Arc::new(CancelOnComplete::default()));
            let nodes = tree();
            let id = send(&f.receiver, &nodes);
            let err = f.receiver.commit(&id).unwrap_err();
            assert!(matches!(err, TransferError::Cancelled(_)));

            assert_eq!(
                f.receiver.get_status(&id).unwrap().status,
                TransferStatus::Cancelled
            );
            for node in &nodes {
                let node = node.node_ref.in_store(StoreRef::workspace());
                assert!(!f.receiver.store().exists(&node).unwrap());
            }
            assert_eq!(f.recorder.calls.lock().unwrap().clone(), vec![(id.clone(), 0, 0, 0)]);
            let events = report_events(&f.receiver, &id);
            assert!(events.contains(&ReportEvent::ChangeState {
                status: TransferStatus::Cancelled
            }));
            assert!(!events.contains(&ReportEvent::ChangeState {
                status: TransferStatus::Complete
            }));
        }

        #[test]
        fn test_second_commit_leaves_report_and_listener_alone() {
            let f = fixture();
            let id = send(&f.receiver, &tree());
            f.receiver.commit(&id).unwrap();
            let report = f.receiver.get_transfer_report(&id).unwrap();

            let err = f.receiver.commit(&id).unwrap_err();
            assert!(matches!(
                err,
                TransferError::InvalidState {
                    status: TransferStatus::Complete,
                    ..
                }
            ));
            assert_eq!(f.receiver.get_transfer_report(&id).unwrap(), report);
            assert_eq!(f.recorder.calls.lock().unwrap().len(), 1);
            assert_eq!(
                f.receiver.get_status(&id).unwrap().status,
                TransferStatus::Complete
            );
        }

        #[test]
        fn test_unknown_transfer() {
            let f = fixture();
            let err = f.receiver.commit(&TransferId::from("nope")).unwrap_err();
            assert!(matches!(err, TransferError::UnknownTransfer(_)));
        }
    }

    mod asynchronous {
        use super::*;

        #[tokio::test]
        async fn test_commit_async_completes() {
            let f = fixture();
            let id = send(&f.receiver, &tree());
            f.receiver.commit_async(&id).await.unwrap().unwrap();
            assert_eq!(
                f.receiver.get_status(&id).unwrap().status,
                TransferStatus::Complete
            );
        }
    }
}
