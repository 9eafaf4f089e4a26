//! Manifest passes and the driver that runs them.
//!
//! Every pass walks the manifest in stream order through the same
//! [`PassDriver`], which is the per-node catch boundary: a non-fatal error
//! is logged against the node and collected, a fatal one aborts the pass.

pub mod primary;
pub mod secondary;
pub mod tertiary;

use std::collections::BTreeSet;
use tracing::{debug, error, warn};

use reposync_store::{ContentStore, NodeRef, NodeStore};

use crate::alien::AlienProcessor;
use crate::config::ReceiverConfig;
use crate::error::TransferError;
use crate::manifest::{DeletedNode, ManifestHeader, ManifestNode, NormalNode};
use crate::progress::{ProgressMonitor, TransferId};
use crate::resolver::CorrespondingNodeResolver;
use crate::staging::StagingArea;

pub use primary::PrimaryManifestProcessor;
pub use secondary::SecondaryManifestProcessor;
pub use tertiary::TertiaryManifestProcessor;

/// One pass over a manifest.
pub trait ManifestProcessor {
    /// Short pass name used in logs.
    fn name(&self) -> &'static str;

    /// Called before the header.
    fn start_manifest(&mut self) -> Result<(), TransferError> {
        Ok(())
    }

    /// Called once with the header.
    fn process_header(&mut self, header: &ManifestHeader) -> Result<(), TransferError>;

    /// Called for every live node record.
    fn process_normal_node(&mut self, node: &NormalNode) -> Result<(), TransferError>;

    /// Called for every deleted node record.
    fn process_deleted_node(&mut self, node: &DeletedNode) -> Result<(), TransferError>;

    /// Called after the last record.
    fn end_manifest(&mut self) -> Result<(), TransferError> {
        Ok(())
    }
}

/// Everything the passes of one transfer share.
pub struct TransferContext<'a> {
    /// The transfer.
    pub transfer_id: &'a TransferId,
    /// Destination node store.
    pub store: &'a dyn NodeStore,
    /// Destination content store.
    pub content_store: &'a dyn ContentStore,
    /// Resolver private to this transfer.
    pub resolver: &'a dyn CorrespondingNodeResolver,
    /// Alien bookkeeping.
    pub alien: &'a AlienProcessor,
    /// Staged manifest and content.
    pub staging: &'a StagingArea,
    /// Receiver configuration.
    pub config: &'a ReceiverConfig,
}

/// Nodes created, updated and deleted by one transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeCapture {
    /// Created nodes.
    pub created: BTreeSet<NodeRef>,
    /// Updated nodes that were not created by the same transfer.
    pub updated: BTreeSet<NodeRef>,
    /// Deleted nodes.
    pub deleted: BTreeSet<NodeRef>,
}

impl ChangeCapture {
    /// Records a created node.
    pub fn record_created(&mut self, node: &NodeRef) {
        self.deleted.remove(node);
        self.created.insert(node.clone());
    }

    /// Records an updated node.
    pub fn record_updated(&mut self, node: &NodeRef) {
        if !self.created.contains(node) {
            self.updated.insert(node.clone());
        }
    }

    /// Records a deleted node.
    pub fn record_deleted(&mut self, node: &NodeRef) {
        self.created.remove(node);
        self.updated.remove(node);
        self.deleted.insert(node.clone());
    }

    /// True when nothing changed.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Periodic hook run at every progress checkpoint.
pub type Heartbeat<'a> = dyn Fn() -> Result<(), TransferError> + 'a;

/// Runs passes over a manifest, tracking the position across passes and
/// collecting non-fatal node errors.
pub struct PassDriver<'a> {
    transfer_id: &'a TransferId,
    monitor: &'a dyn ProgressMonitor,
    interval: u64,
    position: u64,
    node_errors: Vec<TransferError>,
    heartbeat: Option<&'a Heartbeat<'a>>,
}

impl<'a> PassDriver<'a> {
    /// Creates a driver checkpointing every `interval` records.
    pub fn new(transfer_id: &'a TransferId, monitor: &'a dyn ProgressMonitor, interval: u64) -> Self {
        Self {
            transfer_id,
            monitor,
            interval: interval.max(1),
            position: 0,
            node_errors: Vec::new(),
            heartbeat: None,
        }
    }

    /// Runs `heartbeat` at every checkpoint.
    pub fn with_heartbeat(mut self, heartbeat: &'a Heartbeat<'a>) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// Records processed across all passes so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Non-fatal errors collected so far.
    pub fn node_errors(&self) -> &[TransferError] {
        &self.node_errors
    }

    /// Folds the collected errors into one rollback error, if any.
    pub fn into_result(self) -> Result<(), TransferError> {
        let count = self.node_errors.len();
        match self.node_errors.into_iter().next() {
            None => Ok(()),
            Some(first) => Err(TransferError::RollbackOnly {
                count,
                first: Box::new(first),
            }),
        }
    }

    /// Updates progress (which also detects cancellation) and runs the
    /// heartbeat.
    pub fn checkpoint(&self) -> Result<(), TransferError> {
        self.monitor
            .update_progress(self.transfer_id, self.position, None)?;
        if let Some(heartbeat) = self.heartbeat {
            heartbeat()?;
        }
        Ok(())
    }

    fn guard(
        &mut self,
        pass: &str,
        node: Option<&NodeRef>,
        result: Result<(), TransferError>,
    ) -> Result<(), TransferError> {
        let Err(err) = result else {
            return Ok(());
        };
        if err.is_fatal() {
            error!(transfer_id = %self.transfer_id, pass, error = %err, "fatal error, aborting pass");
            return Err(err);
        }
        let message = match node {
            Some(node) => format!("{} pass failed on {}", pass, node),
            None => format!("{} pass failed", pass),
        };
        warn!(transfer_id = %self.transfer_id, pass, error = %err, "{}", message);
        self.monitor.log(self.transfer_id, &message, Some(&err))?;
        self.node_errors.push(err);
        Ok(())
    }

    /// Runs one pass over the header and `nodes`.
    pub fn run<P, I>(
        &mut self,
        processor: &mut P,
        header: &ManifestHeader,
        nodes: I,
    ) -> Result<(), TransferError>
    where
        P: ManifestProcessor + ?Sized,
        I: IntoIterator<Item = Result<ManifestNode, TransferError>>,
    {
        let pass = processor.name();
        debug!(transfer_id = %self.transfer_id, pass, "pass started");
        let started = processor.start_manifest();
        self.guard(pass, None, started)?;
        let headed = processor.process_header(header);
        self.guard(pass, None, headed)?;

        for record in nodes {
            let node = record?;
            let result = match &node {
                ManifestNode::Normal(normal) => processor.process_normal_node(normal),
                ManifestNode::Deleted(deleted) => processor.process_deleted_node(deleted),
            };
            self.guard(pass, Some(node.node_ref()), result)?;
            self.position += 1;
            if self.position % self.interval == 0 {
                self.checkpoint()?;
            }
        }

        let ended = processor.end_manifest();
        self.guard(pass, None, ended)?;
        self.checkpoint()?;
        debug!(
            transfer_id = %self.transfer_id,
            pass,
            position = self.position,
            errors = self.node_errors.len(),
            "pass finished"
        );
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{InMemoryProgressMonitor, TransferStatus};
    use reposync_store::{NodePath, StoreRef};
    use std::cell::Cell;

    struct Scripted {
        fail_on: &'static [(&'static str, bool)],
        seen: Vec<String>,
    }

    impl ManifestProcessor for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn process_header(&mut self, _header: &ManifestHeader) -> Result<(), TransferError> {
            Ok(())
        }

        fn process_normal_node(&mut self, _node: &NormalNode) -> Result<(), TransferError> {
            Ok(())
        }

        fn process_deleted_node(&mut self, node: &DeletedNode) -> Result<(), TransferError> {
            self.seen.push(node.node_ref.id().to_string());
            match self.fail_on.iter().find(|(id, _)| *id == node.node_ref.id()) {
                Some((_, fatal)) => {
                    if *fatal {
                        Err(TransferError::Internal("boom".to_string()))
                    } else {
                        Err(TransferError::Unresolved {
                            node: node.node_ref.clone(),
                            msg: "parent".to_string(),
                        })
                    }
                }
                _ => Ok(()),
            }
        }
    }

    fn records(ids: &[&str]) -> Vec<Result<ManifestNode, TransferError>> {
        ids.iter()
            .map(|id| {
                Ok(ManifestNode::Deleted(DeletedNode {
                    node_ref: NodeRef::new(StoreRef::workspace(), *id),
                    parent_path: NodePath::root(),
                    primary_parent_assoc: None,
                }))
            })
            .collect()
    }

    fn monitor(id: &TransferId) -> InMemoryProgressMonitor {
        let monitor = InMemoryProgressMonitor::new();
        monitor.create(id).unwrap();
        monitor
    }

    mod driver {
        use super::*;

        #[test]
        fn test_non_fatal_errors_are_collected() {
            let id = TransferId::from("t");
            let monitor = monitor(&id);
            let header = ManifestHeader::new("r", false, 3);
            let mut processor = Scripted {
                fail_on: &[("b", false)],
                seen: Vec::new(),
            };
            let mut driver = PassDriver::new(&id, &monitor, 20);
            driver
                .run(&mut processor, &header, records(&["a", "b", "c"]))
                .unwrap();
            assert_eq!(processor.seen, vec!["a", "b", "c"]);
            assert_eq!(driver.position(), 3);
            assert_eq!(monitor.get_log(&id).unwrap().len(), 1);
            let err = driver.into_result().unwrap_err();
            assert!(matches!(err, TransferError::RollbackOnly { count: 1, .. }));
        }

        #[test]
        fn test_each_bad_node_gets_an_audit_entry() {
            let id = TransferId::from("t");
            let monitor = monitor(&id);
            let header = ManifestHeader::new("r", false, 4);
            let mut processor = Scripted {
                fail_on: &[("a", false), ("c", false)],
                seen: Vec::new(),
            };
            let mut driver = PassDriver::new(&id, &monitor, 20);
            driver
                .run(&mut processor, &header, records(&["a", "b", "c", "d"]))
                .unwrap();
            assert_eq!(processor.seen, vec!["a", "b", "c", "d"]);
            let errors: Vec<_> = monitor
                .get_log(&id)
                .unwrap()
                .into_iter()
                .filter_map(|entry| entry.error)
                .collect();
            assert_eq!(errors.len(), 2);
            assert!(errors[0].ends_with("/a: parent"));
            assert!(errors[1].ends_with("/c: parent"));
            let err = driver.into_result().unwrap_err();
            assert!(matches!(err, TransferError::RollbackOnly { count: 2, .. }));
        }

        #[test]
        fn test_fatal_error_aborts_pass() {
            let id = TransferId::from("t");
            let monitor = monitor(&id);
            let header = ManifestHeader::new("r", false, 3);
            let mut processor = Scripted {
                fail_on: &[("b", true)],
                seen: Vec::new(),
            };
            let mut driver = PassDriver::new(&id, &monitor, 20);
            let err = driver
                .run(&mut processor, &header, records(&["a", "b", "c"]))
                .unwrap_err();
            assert!(matches!(err, TransferError::Internal(_)));
            assert_eq!(processor.seen, vec!["a", "b"]);
        }

        #[test]
        fn test_checkpoint_detects_cancellation() {
            let id = TransferId::from("t");
            let monitor = monitor(&id);
            monitor.update_status(&id, TransferStatus::Cancelled).unwrap();
            let header = ManifestHeader::new("r", false, 3);
            let mut processor = Scripted {
                fail_on: &[],
                seen: Vec::new(),
            };
            let mut driver = PassDriver::new(&id, &monitor, 2);
            let err = driver
                .run(&mut processor, &header, records(&["a", "b", "c"]))
                .unwrap_err();
            assert!(err.is_cancellation());
            assert_eq!(processor.seen, vec!["a", "b"]);
        }

        #[test]
        fn test_heartbeat_runs_at_checkpoints() {
            let id = TransferId::from("t");
            let monitor = monitor(&id);
            let header = ManifestHeader::new("r", false, 4);
            let beats = Cell::new(0);
            let heartbeat = || {
                beats.set(beats.get() + 1);
                Ok(())
            };
            let mut processor = Scripted {
                fail_on: &[],
                seen: Vec::new(),
            };
            let mut driver = PassDriver::new(&id, &monitor, 2).with_heartbeat(&heartbeat);
            driver
                .run(&mut processor, &header, records(&["a", "b", "c", "d"]))
                .unwrap();
            // Two interval checkpoints plus the end of pass.
            assert_eq!(beats.get(), 3);
            assert_eq!(monitor.get_progress(&id).unwrap().current_position, 4);
        }
    }

    mod changes {
        use super::*;

        #[test]
        fn test_created_then_updated_stays_created() {
            let node = NodeRef::new(StoreRef::workspace(), "n");
            let mut changes = ChangeCapture::default();
            changes.record_created(&node);
            changes.record_updated(&node);
            assert!(changes.updated.is_empty());
            changes.record_deleted(&node);
            assert!(changes.created.is_empty());
            assert!(changes.deleted.contains(&node));
            assert!(!changes.is_empty());
        }
    }
}
