//! Fault Injection - stores and monitors that fail on demand

use std::collections::BTreeSet;
use std::sync::Mutex;

use reposync_store::{
    AssociationRef, ChildAssociationRef, MemoryNodeStore, NodePath, NodeRef, NodeStore,
    PropertyMap, PropertyValue, QName, StoreError, StoreRef, StoreSnapshot,
};
use reposync_transfer::{
    InMemoryProgressMonitor, LogEntry, ProgressMonitor, TransferError, TransferId,
    TransferProgress, TransferStatus,
};

/// Memory node store that fails creating chosen node ids with a fatal
/// integrity violation.
#[derive(Default)]
pub struct FaultyNodeStore {
    inner: MemoryNodeStore,
    fail_create: Mutex<BTreeSet<String>>,
}

impl FaultyNodeStore {
    pub fn new(inner: MemoryNodeStore) -> Self {
        Self {
            inner,
            fail_create: Mutex::new(BTreeSet::new()),
        }
    }

    /// Creating a node with this id fails from now on.
    pub fn fail_on_create(&self, id: &str) {
        if let Ok(mut ids) = self.fail_create.lock() {
            ids.insert(id.to_string());
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut ids) = self.fail_create.lock() {
            ids.clear();
        }
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        self.inner.snapshot()
    }

    fn injected(&self, id: Option<&String>) -> Result<(), StoreError> {
        let ids = self
            .fail_create
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        match id {
            Some(id) if ids.contains(id) => Err(StoreError::IntegrityViolation {
                msg: format!("injected fault creating {}", id),
            }),
            _ => Ok(()),
        }
    }
}

impl NodeStore for FaultyNodeStore {
    fn root_node(&self, store: &StoreRef) -> Result<NodeRef, StoreError> {
        self.inner.root_node(store)
    }

    fn exists(&self, node: &NodeRef) -> Result<bool, StoreError> {
        self.inner.exists(node)
    }

    fn get_type(&self, node: &NodeRef) -> Result<QName, StoreError> {
        self.inner.get_type(node)
    }

    fn set_type(&self, node: &NodeRef, node_type: QName) -> Result<(), StoreError> {
        self.inner.set_type(node, node_type)
    }

    fn get_properties(&self, node: &NodeRef) -> Result<PropertyMap, StoreError> {
        self.inner.get_properties(node)
    }

    fn get_property(
        &self,
        node: &NodeRef,
        qname: &QName,
    ) -> Result<Option<PropertyValue>, StoreError> {
        self.inner.get_property(node, qname)
    }

    fn set_properties(&self, node: &NodeRef, properties: PropertyMap) -> Result<(), StoreError> {
        self.inner.set_properties(node, properties)
    }

    fn set_property(
        &self,
        node: &NodeRef,
        qname: QName,
        value: PropertyValue,
    ) -> Result<(), StoreError> {
        self.inner.set_property(node, qname, value)
    }

    fn remove_property(&self, node: &NodeRef, qname: &QName) -> Result<(), StoreError> {
        self.inner.remove_property(node, qname)
    }

    fn get_aspects(&self, node: &NodeRef) -> Result<BTreeSet<QName>, StoreError> {
        self.inner.get_aspects(node)
    }

    fn add_aspect(
        &self,
        node: &NodeRef,
        aspect: QName,
        properties: PropertyMap,
    ) -> Result<(), StoreError> {
        self.inner.add_aspect(node, aspect, properties)
    }

    fn remove_aspect(&self, node: &NodeRef, aspect: &QName) -> Result<(), StoreError> {
        self.inner.remove_aspect(node, aspect)
    }

    fn create_node(
        &self,
        parent: &NodeRef,
        assoc_type: QName,
        assoc_qname: QName,
        node_type: QName,
        id: Option<String>,
        properties: PropertyMap,
    ) -> Result<ChildAssociationRef, StoreError> {
        self.injected(id.as_ref())?;
        self.inner
            .create_node(parent, assoc_type, assoc_qname, node_type, id, properties)
    }

    fn move_node(
        &self,
        node: &NodeRef,
        new_parent: &NodeRef,
        assoc_type: QName,
        assoc_qname: QName,
    ) -> Result<ChildAssociationRef, StoreError> {
        self.inner.move_node(node, new_parent, assoc_type, assoc_qname)
    }

    fn delete_node(&self, node: &NodeRef) -> Result<(), StoreError> {
        self.inner.delete_node(node)
    }

    fn archive_node(&self, node: &NodeRef) -> Result<NodeRef, StoreError> {
        self.inner.archive_node(node)
    }

    fn restore_node(
        &self,
        archived: &NodeRef,
        parent: Option<&NodeRef>,
        assoc_type: Option<QName>,
        assoc_qname: Option<QName>,
    ) -> Result<ChildAssociationRef, StoreError> {
        self.inner
            .restore_node(archived, parent, assoc_type, assoc_qname)
    }

    fn get_primary_parent(
        &self,
        node: &NodeRef,
    ) -> Result<Option<ChildAssociationRef>, StoreError> {
        self.inner.get_primary_parent(node)
    }

    fn get_parent_assocs(&self, node: &NodeRef) -> Result<Vec<ChildAssociationRef>, StoreError> {
        self.inner.get_parent_assocs(node)
    }

    fn get_child_assocs(&self, node: &NodeRef) -> Result<Vec<ChildAssociationRef>, StoreError> {
        self.inner.get_child_assocs(node)
    }

    fn get_child_by_qname(
        &self,
        parent: &NodeRef,
        qname: &QName,
    ) -> Result<Option<ChildAssociationRef>, StoreError> {
        self.inner.get_child_by_qname(parent, qname)
    }

    fn add_child(
        &self,
        parent: &NodeRef,
        child: &NodeRef,
        assoc_type: QName,
        assoc_qname: QName,
    ) -> Result<ChildAssociationRef, StoreError> {
        self.inner.add_child(parent, child, assoc_type, assoc_qname)
    }

    fn remove_child_association(&self, assoc: &ChildAssociationRef) -> Result<bool, StoreError> {
        self.inner.remove_child_association(assoc)
    }

    fn get_target_assocs(&self, node: &NodeRef) -> Result<Vec<AssociationRef>, StoreError> {
        self.inner.get_target_assocs(node)
    }

    fn get_source_assocs(&self, node: &NodeRef) -> Result<Vec<AssociationRef>, StoreError> {
        self.inner.get_source_assocs(node)
    }

    fn create_association(
        &self,
        source: &NodeRef,
        target: &NodeRef,
        assoc_type: QName,
    ) -> Result<AssociationRef, StoreError> {
        self.inner.create_association(source, target, assoc_type)
    }

    fn remove_association(&self, assoc: &AssociationRef) -> Result<bool, StoreError> {
        self.inner.remove_association(assoc)
    }

    fn get_path(&self, node: &NodeRef) -> Result<NodePath, StoreError> {
        self.inner.get_path(node)
    }

    fn begin(&self) -> Result<(), StoreError> {
        self.inner.begin()
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.inner.commit()
    }

    fn rollback(&self) -> Result<(), StoreError> {
        self.inner.rollback()
    }
}

/// Progress monitor that cancels a committing transfer once it reports a
/// position at or past `at`.
pub struct CancelAtMonitor {
    inner: InMemoryProgressMonitor,
    at: u64,
}

impl CancelAtMonitor {
    pub fn new(at: u64) -> Self {
        Self {
            inner: InMemoryProgressMonitor::new(),
            at,
        }
    }
}

impl ProgressMonitor for CancelAtMonitor {
    fn create(&self, id: &TransferId) -> Result<(), TransferError> {
        self.inner.create(id)
    }

    fn update_progress(
        &self,
        id: &TransferId,
        position: u64,
        end: Option<u64>,
    ) -> Result<(), TransferError> {
        let committing = self.inner.get_progress(id)?.status == TransferStatus::Committing;
        if committing && position >= self.at {
            self.inner.update_status(id, TransferStatus::Cancelled)?;
        }
        self.inner.update_progress(id, position, end)
    }

    fn update_status(&self, id: &TransferId, status: TransferStatus) -> Result<(), TransferError> {
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
