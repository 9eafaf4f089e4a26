//! The node store capability consumed by the transfer engine.

use std::collections::BTreeSet;

use crate::error::StoreError;
use crate::types::{AssociationRef, ChildAssociationRef, NodePath, NodeRef, QName, StoreRef};
use crate::value::{PropertyMap, PropertyValue};

/// Hierarchical node storage: CRUD on nodes, properties, aspects, parent/child
/// and peer associations, plus a single unit of work.
///
/// This trait abstracts over the repository backend so the reconciliation
/// engine can run against the in-memory store in tests and any persistent
/// store in production.
pub trait NodeStore: Send + Sync {
    /// Returns the root node of a store.
    fn root_node(&self, store: &StoreRef) -> Result<NodeRef, StoreError>;

    /// Returns true if the node exists.
    fn exists(&self, node: &NodeRef) -> Result<bool, StoreError>;

    /// Returns the type of the node.
    fn get_type(&self, node: &NodeRef) -> Result<QName, StoreError>;

    /// Changes the type of the node.
    fn set_type(&self, node: &NodeRef, node_type: QName) -> Result<(), StoreError>;

    /// Returns all properties of the node.
    fn get_properties(&self, node: &NodeRef) -> Result<PropertyMap, StoreError>;

    /// Returns one property, or None if it is not set.
    fn get_property(&self, node: &NodeRef, qname: &QName)
        -> Result<Option<PropertyValue>, StoreError>;

    /// Replaces all properties of the node.
    fn set_properties(&self, node: &NodeRef, properties: PropertyMap) -> Result<(), StoreError>;

    /// Sets one property.
    fn set_property(
        &self,
        node: &NodeRef,
        qname: QName,
        value: PropertyValue,
    ) -> Result<(), StoreError>;

    /// Removes one property. Removing an absent property is not an error.
    fn remove_property(&self, node: &NodeRef, qname: &QName) -> Result<(), StoreError>;

    /// Returns the aspects applied to the node.
    fn get_aspects(&self, node: &NodeRef) -> Result<BTreeSet<QName>, StoreError>;

    /// Returns true if the aspect is applied.
    fn has_aspect(&self, node: &NodeRef, aspect: &QName) -> Result<bool, StoreError> {
        Ok(self.get_aspects(node)?.contains(aspect))
    }

    /// Applies an aspect and sets its properties.
    fn add_aspect(
        &self,
        node: &NodeRef,
        aspect: QName,
        properties: PropertyMap,
    ) -> Result<(), StoreError>;

    /// Removes an aspect. Its properties are left to the caller.
    fn remove_aspect(&self, node: &NodeRef, aspect: &QName) -> Result<(), StoreError>;

    /// Creates a node under `parent` with a primary association.
    ///
    /// When `id` is given the node keeps that id, otherwise a fresh one is
    /// generated. The node lives in the parent's store.
    #[allow(clippy::too_many_arguments)]
    fn create_node(
        &self,
        parent: &NodeRef,
        assoc_type: QName,
        assoc_qname: QName,
        node_type: QName,
        id: Option<String>,
        properties: PropertyMap,
    ) -> Result<ChildAssociationRef, StoreError>;

    /// Moves a node to a new primary parent, returning the new primary
    /// association.
    fn move_node(
        &self,
        node: &NodeRef,
        new_parent: &NodeRef,
        assoc_type: QName,
        assoc_qname: QName,
    ) -> Result<ChildAssociationRef, StoreError>;

    /// Hard-deletes a node and its primary descendants, with every
    /// association touching them.
    fn delete_node(&self, node: &NodeRef) -> Result<(), StoreError>;

    /// Returns true if [`NodeStore::archive_node`] is supported.
    fn supports_archive(&self) -> bool {
        true
    }

    /// Moves a node and its primary descendants to the archive store.
    /// Returns the archived node reference (same id, archive store).
    fn archive_node(&self, node: &NodeRef) -> Result<NodeRef, StoreError>;

    /// Restores an archived node under `parent` (or under its original
    /// parent when None). Returns the new primary association.
    fn restore_node(
        &self,
        archived: &NodeRef,
        parent: Option<&NodeRef>,
        assoc_type: Option<QName>,
        assoc_qname: Option<QName>,
    ) -> Result<ChildAssociationRef, StoreError>;

    /// Returns the primary parent association; None for a store root.
    fn get_primary_parent(&self, node: &NodeRef)
        -> Result<Option<ChildAssociationRef>, StoreError>;

    /// Returns every association where the node is the child.
    fn get_parent_assocs(&self, node: &NodeRef) -> Result<Vec<ChildAssociationRef>, StoreError>;

    /// Returns every association where the node is the parent, in creation
    /// order.
    fn get_child_assocs(&self, node: &NodeRef) -> Result<Vec<ChildAssociationRef>, StoreError>;

    /// Returns the first child association of `parent` named `qname`.
    fn get_child_by_qname(
        &self,
        parent: &NodeRef,
        qname: &QName,
    ) -> Result<Option<ChildAssociationRef>, StoreError> {
        Ok(self
            .get_child_assocs(parent)?
            .into_iter()
            .find(|assoc| &assoc.qname == qname))
    }

    /// Adds a secondary (non-primary) child association.
    fn add_child(
        &self,
        parent: &NodeRef,
        child: &NodeRef,
        assoc_type: QName,
        assoc_qname: QName,
    ) -> Result<ChildAssociationRef, StoreError>;

    /// Removes a secondary child association. Returns false if it did not
    /// exist. Primary associations cannot be removed this way.
    fn remove_child_association(&self, assoc: &ChildAssociationRef) -> Result<bool, StoreError>;

    /// Returns the peer associations where the node is the source.
    fn get_target_assocs(&self, node: &NodeRef) -> Result<Vec<AssociationRef>, StoreError>;

    /// Returns the peer associations where the node is the target.
    fn get_source_assocs(&self, node: &NodeRef) -> Result<Vec<AssociationRef>, StoreError>;

    /// Creates a peer association.
    fn create_association(
        &self,
        source: &NodeRef,
        target: &NodeRef,
        assoc_type: QName,
    ) -> Result<AssociationRef, StoreError>;

    /// Removes a peer association. Returns false if it did not exist.
    fn remove_association(&self, assoc: &AssociationRef) -> Result<bool, StoreError>;

    /// Returns the primary path of the node from its store root.
    fn get_path(&self, node: &NodeRef) -> Result<NodePath, StoreError>;

    /// Opens the unit of work. Only one may be open at a time.
    fn begin(&self) -> Result<(), StoreError>;

    /// Makes every change since [`NodeStore::begin`] permanent.
    fn commit(&self) -> Result<(), StoreError>;

    /// Discards every change since [`NodeStore::begin`].
    fn rollback(&self) -> Result<(), StoreError>;
}
