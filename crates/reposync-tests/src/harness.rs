//! Test Harness - source and destination repositories wired for transfers

use std::collections::BTreeSet;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use reposync_store::model::content;
use reposync_store::{
    ContentStore, MemoryContentStore, MemoryNodeStore, NodeRef, NodeStore, PropertyMap,
    PropertyValue, QName, StoreError, StoreRef,
};
use reposync_transfer::{
    build_manifest, InMemoryProgressMonitor, InProcessTransmitter, ProgressMonitor,
    ReceiverConfig, TransferDefinition, TransferError, TransferId, TransferListener,
    TransferOutcome, TransferReceiver, Transmitter,
};

use crate::fault::FaultyNodeStore;

fn name_props(name: &str) -> PropertyMap {
    let mut props = PropertyMap::new();
    props.insert(content::PROP_NAME, PropertyValue::from(name));
    props
}

/// A sending repository.
pub struct SourceRepo {
    pub repository_id: String,
    pub store: MemoryNodeStore,
    pub content: MemoryContentStore,
}

impl SourceRepo {
    pub fn new(repository_id: &str) -> Self {
        Self {
            repository_id: repository_id.to_string(),
            store: MemoryNodeStore::new(),
            content: MemoryContentStore::new(),
        }
    }

    pub fn root(&self) -> Result<NodeRef, StoreError> {
        self.store.root_node(&StoreRef::workspace())
    }

    /// Creates a folder; `id` pins the node id, e.g. to mirror a node that
    /// another repository already sent.
    pub fn folder_with_id(
        &self,
        parent: &NodeRef,
        name: &str,
        id: Option<&str>,
    ) -> Result<NodeRef, StoreError> {
        let assoc = self.store.create_node(
            parent,
            content::ASSOC_CONTAINS,
            QName::new("cm", name),
            content::TYPE_FOLDER,
            id.map(str::to_string),
            name_props(name),
        )?;
        Ok(assoc.child)
    }

    pub fn folder(&self, parent: &NodeRef, name: &str) -> Result<NodeRef, StoreError> {
        self.folder_with_id(parent, name, None)
    }

    pub fn file(
        &self,
        parent: &NodeRef,
        name: &str,
        bytes: &[u8],
        modified: u64,
    ) -> Result<NodeRef, StoreError> {
        let data = self.content.put(bytes, "text/plain", "UTF-8")?;
        let mut props = name_props(name);
        props.insert(content::PROP_CONTENT, PropertyValue::Content(data));
        props.insert(content::PROP_MODIFIED, PropertyValue::Date(modified));
        let assoc = self.store.create_node(
            parent,
            content::ASSOC_CONTAINS,
            QName::new("cm", name),
            content::TYPE_CONTENT,
            None,
            props,
        )?;
        Ok(assoc.child)
    }

    /// Replaces the content of a file.
    pub fn rewrite(&self, node: &NodeRef, bytes: &[u8], modified: u64) -> Result<(), StoreError> {
        let data = self.content.put(bytes, "text/plain", "UTF-8")?;
        self.store
            .set_property(node, content::PROP_CONTENT, PropertyValue::Content(data))?;
        self.store
            .set_property(node, content::PROP_MODIFIED, PropertyValue::Date(modified))
    }

    pub fn definition(&self, nodes: &[NodeRef], is_sync: bool) -> TransferDefinition {
        TransferDefinition {
            repository_id: self.repository_id.clone(),
            nodes: nodes.to_vec(),
            is_sync,
            is_read_only: false,
        }
    }

    /// Runs a whole transfer to `destination`.
    pub fn send(
        &self,
        destination: &Destination,
        definition: &TransferDefinition,
    ) -> Result<TransferOutcome, TransferError> {
        reposync_transfer::transfer(
            definition,
            &self.store,
            &self.content,
            &destination.transmitter,
        )
    }
}

/// Changes delivered to one listener call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundChanges {
    pub transfer_id: Option<TransferId>,
    pub created: BTreeSet<NodeRef>,
    pub updated: BTreeSet<NodeRef>,
    pub deleted: BTreeSet<NodeRef>,
}

impl InboundChanges {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Records every inbound transfer notification.
#[derive(Debug, Default)]
pub struct InboundRecorder {
    calls: Mutex<Vec<InboundChanges>>,
}

impl InboundRecorder {
    pub fn calls(&self) -> Vec<InboundChanges> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<InboundChanges> {
        self.calls().pop()
    }
}

impl TransferListener for InboundRecorder {
    fn on_end_inbound_transfer(
        &self,
        transfer_id: &TransferId,
        created: &BTreeSet<NodeRef>,
        updated: &BTreeSet<NodeRef>,
        deleted: &BTreeSet<NodeRef>,
    ) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(InboundChanges {
                transfer_id: Some(transfer_id.clone()),
                created: created.clone(),
                updated: updated.clone(),
                deleted: deleted.clone(),
            });
        }
    }
}

/// A receiving repository with its receiver and an in-process transmitter.
pub struct Destination {
    pub store: Arc<FaultyNodeStore>,
    pub content: Arc<MemoryContentStore>,
    pub monitor: Arc<dyn ProgressMonitor>,
    pub receiver: Arc<TransferReceiver>,
    pub transmitter: InProcessTransmitter,
    pub recorder: Arc<InboundRecorder>,
    _staging: TempDir,
}

impl Destination {
    pub fn new() -> Result<Self, TransferError> {
        Self::with(Arc::new(InMemoryProgressMonitor::new()), |_| {})
    }

    /// Builds a destination with its own monitor and config tweaks.
    pub fn with(
        monitor: Arc<dyn ProgressMonitor>,
        configure: impl FnOnce(&mut ReceiverConfig),
    ) -> Result<Self, TransferError> {
        let staging = tempfile::tempdir()?;
        let mut config = ReceiverConfig {
            staging_root: staging.path().to_path_buf(),
            local_repository_id: "destination".to_string(),
            ..ReceiverConfig::default()
        };
        configure(&mut config);
        let store = Arc::new(FaultyNodeStore::new(MemoryNodeStore::new()));
        let content = Arc::new(MemoryContentStore::new());
        let receiver = Arc::new(TransferReceiver::new(
            config,
            store.clone(),
            content.clone(),
            monitor.clone(),
        ));
        let recorder = Arc::new(InboundRecorder::default());
        receiver.add_listener(recorder.clone())?;
        Ok(Self {
            store,
            content,
            monitor,
            transmitter: InProcessTransmitter::new(receiver.clone()),
            receiver,
            recorder,
            _staging: staging,
        })
    }

    /// The live counterpart of a source node.
    pub fn live(node: &NodeRef) -> NodeRef {
        node.in_store(StoreRef::workspace())
    }

    pub fn exists(&self, node: &NodeRef) -> Result<bool, StoreError> {
        self.store.exists(&Self::live(node))
    }

    pub fn path(&self, node: &NodeRef) -> Result<String, StoreError> {
        Ok(self.store.get_path(&Self::live(node))?.to_string())
    }

    /// Bytes of the node's main content.
    pub fn read_content(&self, node: &NodeRef) -> Result<Vec<u8>, StoreError> {
        let data = self
            .store
            .get_property(&Self::live(node), &content::PROP_CONTENT)?
            .and_then(|value| value.as_content().cloned())
            .ok_or_else(|| StoreError::ContentNotFound(node.to_string()))?;
        self.content.get(&data.content_url)
    }

    /// Stages a transfer from `source` without committing it.
    pub fn stage(
        &self,
        source: &SourceRepo,
        definition: &TransferDefinition,
    ) -> Result<TransferId, TransferError> {
        let manifest = build_manifest(definition, &source.store)?;
        let id = self.transmitter.begin()?;
        self.transmitter
            .send_manifest(&id, &mut Cursor::new(manifest))?;
        for missing in self.transmitter.get_requisites(&id)? {
            let data = source
                .store
                .get_property(&missing.node, &missing.qname)?
                .and_then(|value| value.as_content().cloned())
                .ok_or_else(|| StoreError::ContentNotFound(missing.part_name.clone()))?;
            let bytes = source.content.get(&data.content_url)?;
            self.transmitter
                .send_content(&id, &missing.part_name, &mut Cursor::new(bytes))?;
        }
        self.transmitter.prepare(&id)?;
        Ok(id)
    }
}
