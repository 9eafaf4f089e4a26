//! Builds manifest records from a source node store.

use reposync_store::model::content;
use reposync_store::{
    ChildAssociationRef, NodePath, NodeRef, NodeStore, PropertyValue, StoreError, StoreRef,
};

use super::{DeletedNode, ManifestNode, NormalNode};

/// Turns source nodes into manifest records.
pub struct ManifestNodeFactory<'a> {
    store: &'a dyn NodeStore,
}

impl<'a> ManifestNodeFactory<'a> {
    /// Creates a factory reading from `store`.
    pub fn new(store: &'a dyn NodeStore) -> Self {
        Self { store }
    }

    /// Describes `node`. A node that only exists in the archive store is
    /// described as deleted.
    pub fn create_manifest_node(&self, node: &NodeRef) -> Result<ManifestNode, StoreError> {
        let live = node.in_store(StoreRef::workspace());
        if self.store.exists(&live)? {
            return self.normal(&live).map(ManifestNode::Normal);
        }
        let archived = node.in_store(StoreRef::archive());
        if self.store.exists(&archived)? {
            return self.deleted(&live, &archived).map(ManifestNode::Deleted);
        }
        Err(StoreError::NodeNotFound(node.clone()))
    }

    fn normal(&self, node: &NodeRef) -> Result<NormalNode, StoreError> {
        let primary_parent_assoc =
            self.store
                .get_primary_parent(node)?
                .ok_or_else(|| StoreError::IntegrityViolation {
                    msg: format!("store root {} cannot be transferred", node),
                })?;
        let parent_path = self.store.get_path(&primary_parent_assoc.parent)?;
        Ok(NormalNode {
            node_ref: node.clone(),
            node_type: self.store.get_type(node)?,
            properties: self.store.get_properties(node)?,
            aspects: self.store.get_aspects(node)?,
            parent_path,
            parent_assocs: self.store.get_parent_assocs(node)?,
            child_assocs: self.store.get_child_assocs(node)?,
            target_assocs: self.store.get_target_assocs(node)?,
            source_assocs: self.store.get_source_assocs(node)?,
            primary_parent_assoc,
        })
    }

    fn deleted(&self, live: &NodeRef, archived: &NodeRef) -> Result<DeletedNode, StoreError> {
        let original_parent = match self
            .store
            .get_property(archived, &content::PROP_ARCHIVED_ORIGINAL_PARENT)?
        {
            Some(PropertyValue::NodeRef(parent)) if self.store.exists(&parent)? => Some(parent),
            _ => None,
        };
        let archived_assoc = self.store.get_primary_parent(archived)?;
        let (parent_path, primary_parent_assoc) = match (original_parent, archived_assoc) {
            (Some(parent), Some(assoc)) => (
                self.store.get_path(&parent)?,
                Some(ChildAssociationRef::new(
                    assoc.assoc_type,
                    parent,
                    assoc.qname,
                    live.clone(),
                    true,
                )),
            ),
            _ => (NodePath::root(), None),
        };
        Ok(DeletedNode {
            node_ref: live.clone(),
            parent_path,
            primary_parent_assoc,
        })
    }
}
