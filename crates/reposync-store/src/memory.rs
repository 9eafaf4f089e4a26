//! In-memory node store.
//!
//! The whole repository state lives in one [`StoreSnapshot`] behind an
//! `RwLock`. A unit of work is a saved copy of the snapshot taken at
//! [`NodeStore::begin`]; rollback swaps it back in.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::error::StoreError;
use crate::model::content;
use crate::node_store::NodeStore;
use crate::types::{AssociationRef, ChildAssociationRef, NodePath, NodeRef, QName, StoreRef};
use crate::value::{PropertyMap, PropertyValue};

/// Type given to store roots.
const TYPE_STORE_ROOT: QName = QName::from_static("sys:store_root");

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct NodeRecord {
    node_type: QName,
    properties: PropertyMap,
    aspects: BTreeSet<QName>,
}

/// Serializable state of a [`MemoryNodeStore`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    roots: BTreeMap<StoreRef, NodeRef>,
    nodes: BTreeMap<NodeRef, NodeRecord>,
    child_assocs: Vec<ChildAssociationRef>,
    peer_assocs: BTreeSet<AssociationRef>,
    archived_origins: BTreeMap<NodeRef, ChildAssociationRef>,
}

impl StoreSnapshot {
    fn with_roots(stores: &[StoreRef]) -> Self {
        let mut snapshot = StoreSnapshot::default();
        for store in stores {
            let root = NodeRef::generate(store.clone());
            snapshot.nodes.insert(
                root.clone(),
                NodeRecord {
                    node_type: TYPE_STORE_ROOT,
                    properties: PropertyMap::new(),
                    aspects: BTreeSet::new(),
                },
            );
            snapshot.roots.insert(store.clone(), root);
        }
        snapshot
    }

    fn record(&self, node: &NodeRef) -> Result<&NodeRecord, StoreError> {
        self.nodes
            .get(node)
            .ok_or_else(|| StoreError::NodeNotFound(node.clone()))
    }

    fn record_mut(&mut self, node: &NodeRef) -> Result<&mut NodeRecord, StoreError> {
        self.nodes
            .get_mut(node)
            .ok_or_else(|| StoreError::NodeNotFound(node.clone()))
    }

    fn is_root(&self, node: &NodeRef) -> bool {
        self.roots.values().any(|root| root == node)
    }

    fn primary_parent(&self, node: &NodeRef) -> Option<&ChildAssociationRef> {
        self.child_assocs
            .iter()
            .find(|assoc| assoc.is_primary && &assoc.child == node)
    }

    /// The node followed by all of its primary descendants, depth first.
    fn primary_subtree(&self, node: &NodeRef) -> Vec<NodeRef> {
        let mut result = Vec::new();
        let mut stack = vec![node.clone()];
        while let Some(current) = stack.pop() {
            for assoc in self
                .child_assocs
                .iter()
                .filter(|a| a.is_primary && a.parent == current)
            {
                stack.push(assoc.child.clone());
            }
            result.push(current);
        }
        result
    }

    /// True if `ancestor` is on the primary parent chain of `node` (or is it).
    fn is_primary_ancestor(&self, ancestor: &NodeRef, node: &NodeRef) -> bool {
        let mut current = Some(node.clone());
        while let Some(n) = current {
            if &n == ancestor {
                return true;
            }
            current = self.primary_parent(&n).map(|a| a.parent.clone());
        }
        false
    }

    fn check_unique_name(
        &self,
        parent: &NodeRef,
        name: Option<&str>,
        except: Option<&NodeRef>,
    ) -> Result<(), StoreError> {
        let Some(name) = name else {
            return Ok(());
        };
        let clash = self
            .child_assocs
            .iter()
            .filter(|a| a.is_primary && &a.parent == parent && Some(&a.child) != except)
            .any(|a| {
                self.nodes
                    .get(&a.child)
                    .and_then(|r| r.properties.get(&content::PROP_NAME))
                    .and_then(PropertyValue::as_text)
                    == Some(name)
            });
        if clash {
            return Err(StoreError::DuplicateChild {
                parent: parent.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn node_name(&self, node: &NodeRef) -> Option<String> {
        self.nodes
            .get(node)
            .and_then(|r| r.properties.get(&content::PROP_NAME))
            .and_then(PropertyValue::as_text)
            .map(str::to_string)
    }

    fn remove_subtree(&mut self, subtree: &[NodeRef]) {
        let doomed: BTreeSet<&NodeRef> = subtree.iter().collect();
        for node in subtree {
            self.nodes.remove(node);
            self.archived_origins.remove(node);
        }
        self.child_assocs
            .retain(|a| !doomed.contains(&a.parent) && !doomed.contains(&a.child));
        self.peer_assocs
            .retain(|a| !doomed.contains(&a.source) && !doomed.contains(&a.target));
    }

    /// Re-keys a primary subtree into `to`. Associations internal to the
    /// subtree follow it; links to nodes outside it, including the root's
    /// primary parent link, are dropped.
    fn relocate_subtree(&mut self, root: &NodeRef, to: &StoreRef) -> usize {
        let subtree = self.primary_subtree(root);
        let mapping: BTreeMap<NodeRef, NodeRef> = subtree
            .iter()
            .map(|n| (n.clone(), n.in_store(to.clone())))
            .collect();

        for (old, new) in &mapping {
            if let Some(record) = self.nodes.remove(old) {
                self.nodes.insert(new.clone(), record);
            }
        }

        let child_assocs = std::mem::take(&mut self.child_assocs);
        self.child_assocs = child_assocs
            .into_iter()
            .filter_map(|mut a| {
                match (mapping.get(&a.parent), mapping.get(&a.child)) {
                    (Some(p), Some(c)) => {
                        a.parent = p.clone();
                        a.child = c.clone();
                        Some(a)
                    }
                    (None, None) => Some(a),
                    _ => None,
                }
            })
            .collect();

        let peer_assocs = std::mem::take(&mut self.peer_assocs);
        self.peer_assocs = peer_assocs
            .into_iter()
            .filter_map(|mut a| match (mapping.get(&a.source), mapping.get(&a.target)) {
                (Some(s), Some(t)) => {
                    a.source = s.clone();
                    a.target = t.clone();
                    Some(a)
                }
                (None, None) => Some(a),
                _ => None,
            })
            .collect();

        mapping.len()
    }
}

/// Node store held entirely in memory. Thread-safe via RwLock.
pub struct MemoryNodeStore {
    state: RwLock<StoreSnapshot>,
    saved: Mutex<Option<StoreSnapshot>>,
}

impl MemoryNodeStore {
    /// Creates an empty store with workspace and archive roots.
    pub fn new() -> Self {
        Self::from_snapshot(StoreSnapshot::with_roots(&[
            StoreRef::workspace(),
            StoreRef::archive(),
        ]))
    }

    /// Creates a store from a previously taken snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
            saved: Mutex::new(None),
        }
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        Ok(self.read()?.clone())
    }

    /// Loads a store from a JSON snapshot file.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let contents = std::fs::read_to_string(path)?;
        let snapshot: StoreSnapshot = serde_json::from_str(&contents)?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Writes the current state as a JSON snapshot file.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&*self.read()?)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Number of nodes across all stores, roots included.
    pub fn node_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.nodes.len())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreSnapshot>, StoreError> {
        self.state
            .read()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreSnapshot>, StoreError> {
        self.state
            .write()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }
}

impl Default for MemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for MemoryNodeStore {
    fn root_node(&self, store: &StoreRef) -> Result<NodeRef, StoreError> {
        self.read()?
            .roots
            .get(store)
            .cloned()
            .ok_or_else(|| StoreError::IntegrityViolation {
                msg: format!("store {} does not exist", store),
            })
    }

    fn exists(&self, node: &NodeRef) -> Result<bool, StoreError> {
        Ok(self.read()?.nodes.contains_key(node))
    }

    fn get_type(&self, node: &NodeRef) -> Result<QName, StoreError> {
        Ok(self.read()?.record(node)?.node_type.clone())
    }

    fn set_type(&self, node: &NodeRef, node_type: QName) -> Result<(), StoreError> {
        self.write()?.record_mut(node)?.node_type = node_type;
        Ok(())
    }

    fn get_properties(&self, node: &NodeRef) -> Result<PropertyMap, StoreError> {
        Ok(self.read()?.record(node)?.properties.clone())
    }

    fn get_property(
        &self,
        node: &NodeRef,
        qname: &QName,
    ) -> Result<Option<PropertyValue>, StoreError> {
        Ok(self.read()?.record(node)?.properties.get(qname).cloned())
    }

    fn set_properties(&self, node: &NodeRef, properties: PropertyMap) -> Result<(), StoreError> {
        self.write()?.record_mut(node)?.properties = properties;
        Ok(())
    }

    fn set_property(
        &self,
        node: &NodeRef,
        qname: QName,
        value: PropertyValue,
    ) -> Result<(), StoreError> {
        self.write()?
            .record_mut(node)?
            .properties
            .insert(qname, value);
        Ok(())
    }

    fn remove_property(&self, node: &NodeRef, qname: &QName) -> Result<(), StoreError> {
        self.write()?.record_mut(node)?.properties.remove(qname);
        Ok(())
    }

    fn get_aspects(&self, node: &NodeRef) -> Result<BTreeSet<QName>, StoreError> {
        Ok(self.read()?.record(node)?.aspects.clone())
    }

    fn add_aspect(
        &self,
        node: &NodeRef,
        aspect: QName,
        properties: PropertyMap,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let record = state.record_mut(node)?;
        record.aspects.insert(aspect);
        record.properties.extend(properties);
        Ok(())
    }

    fn remove_aspect(&self, node: &NodeRef, aspect: &QName) -> Result<(), StoreError> {
        self.write()?.record_mut(node)?.aspects.remove(aspect);
        Ok(())
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
        let mut state = self.write()?;
        state.record(parent)?;

        let node = match id {
            Some(id) => NodeRef::new(parent.store().clone(), id),
            None => NodeRef::generate(parent.store().clone()),
        };
        if state.nodes.contains_key(&node) {
            return Err(StoreError::AlreadyExists(format!("node {}", node)));
        }
        let name = properties
            .get(&content::PROP_NAME)
            .and_then(PropertyValue::as_text);
        state.check_unique_name(parent, name, None)?;

        state.nodes.insert(
            node.clone(),
            NodeRecord {
                node_type,
                properties,
                aspects: BTreeSet::new(),
            },
        );
        let assoc = ChildAssociationRef::new(assoc_type, parent.clone(), assoc_qname, node, true);
        state.child_assocs.push(assoc.clone());
        debug!(node = %assoc.child, parent = %parent, "node created");
        Ok(assoc)
    }

    fn move_node(
        &self,
        node: &NodeRef,
        new_parent: &NodeRef,
        assoc_type: QName,
        assoc_qname: QName,
    ) -> Result<ChildAssociationRef, StoreError> {
        let mut state = self.write()?;
        state.record(node)?;
        state.record(new_parent)?;
        if node.store() != new_parent.store() {
            return Err(StoreError::IntegrityViolation {
                msg: format!("cannot move {} across stores to {}", node, new_parent),
            });
        }
        if state.is_primary_ancestor(node, new_parent) {
            return Err(StoreError::CyclicMove {
                node: node.clone(),
                new_parent: new_parent.clone(),
            });
        }
        let name = state.node_name(node);
        state.check_unique_name(new_parent, name.as_deref(), Some(node))?;

        let old = state
            .child_assocs
            .iter()
            .position(|a| a.is_primary && &a.child == node)
            .ok_or_else(|| StoreError::IntegrityViolation {
                msg: format!("store root {} cannot be moved", node),
            })?;
        state.child_assocs.remove(old);
        let assoc =
            ChildAssociationRef::new(assoc_type, new_parent.clone(), assoc_qname, node.clone(), true);
        state.child_assocs.push(assoc.clone());
        Ok(assoc)
    }

    fn delete_node(&self, node: &NodeRef) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.record(node)?;
        if state.is_root(node) {
            return Err(StoreError::IntegrityViolation {
                msg: format!("store root {} cannot be deleted", node),
            });
        }
        let subtree = state.primary_subtree(node);
        debug!(node = %node, count = subtree.len(), "deleting node subtree");
        state.remove_subtree(&subtree);
        Ok(())
    }

    fn archive_node(&self, node: &NodeRef) -> Result<NodeRef, StoreError> {
        let mut state = self.write()?;
        state.record(node)?;
        let archive = StoreRef::archive();
        if node.store() == &archive || state.is_root(node) {
            return Err(StoreError::IntegrityViolation {
                msg: format!("{} cannot be archived", node),
            });
        }
        let archive_root = state
            .roots
            .get(&archive)
            .cloned()
            .ok_or_else(|| StoreError::IntegrityViolation {
                msg: "no archive store".to_string(),
            })?;
        let origin = state
            .primary_parent(node)
            .cloned()
            .ok_or_else(|| StoreError::IntegrityViolation {
                msg: format!("{} has no primary parent", node),
            })?;

        let archived = node.in_store(archive);
        if state.nodes.contains_key(&archived) {
            let stale = state.primary_subtree(&archived);
            state.remove_subtree(&stale);
        }

        let moved = state.relocate_subtree(node, archived.store());
        state.child_assocs.push(ChildAssociationRef::new(
            origin.assoc_type.clone(),
            archive_root,
            origin.qname.clone(),
            archived.clone(),
            true,
        ));
        let record = state.record_mut(&archived)?;
        record.aspects.insert(content::ASPECT_ARCHIVED);
        record.properties.insert(
            content::PROP_ARCHIVED_ORIGINAL_PARENT,
            PropertyValue::NodeRef(origin.parent.clone()),
        );
        record
            .properties
            .insert(content::PROP_ARCHIVED_DATE, PropertyValue::Date(now_us()));
        state.archived_origins.insert(archived.clone(), origin);
        debug!(node = %node, archived = %archived, count = moved, "node archived");
        Ok(archived)
    }

    fn restore_node(
        &self,
        archived: &NodeRef,
        parent: Option<&NodeRef>,
        assoc_type: Option<QName>,
        assoc_qname: Option<QName>,
    ) -> Result<ChildAssociationRef, StoreError> {
        let mut state = self.write()?;
        state.record(archived)?;
        let origin = state
            .archived_origins
            .get(archived)
            .cloned()
            .ok_or_else(|| StoreError::IntegrityViolation {
                msg: format!("{} is not an archived node", archived),
            })?;
        let parent = parent.cloned().unwrap_or_else(|| origin.parent.clone());
        state.record(&parent)?;

        let restored = archived.in_store(parent.store().clone());
        if state.nodes.contains_key(&restored) {
            return Err(StoreError::AlreadyExists(format!("node {}", restored)));
        }
        let name = state.node_name(archived);
        state.check_unique_name(&parent, name.as_deref(), None)?;

        state.relocate_subtree(archived, parent.store());
        state.archived_origins.remove(archived);
        let assoc = ChildAssociationRef::new(
            assoc_type.unwrap_or(origin.assoc_type),
            parent,
            assoc_qname.unwrap_or(origin.qname),
            restored.clone(),
            true,
        );
        state.child_assocs.push(assoc.clone());
        let record = state.record_mut(&restored)?;
        record.aspects.remove(&content::ASPECT_ARCHIVED);
        record
            .properties
            .remove(&content::PROP_ARCHIVED_ORIGINAL_PARENT);
        record.properties.remove(&content::PROP_ARCHIVED_DATE);
        debug!(node = %restored, "node restored from archive");
        Ok(assoc)
    }

    fn get_primary_parent(
        &self,
        node: &NodeRef,
    ) -> Result<Option<ChildAssociationRef>, StoreError> {
        let state = self.read()?;
        state.record(node)?;
        Ok(state.primary_parent(node).cloned())
    }

    fn get_parent_assocs(&self, node: &NodeRef) -> Result<Vec<ChildAssociationRef>, StoreError> {
        let state = self.read()?;
        state.record(node)?;
        Ok(state
            .child_assocs
            .iter()
            .filter(|a| &a.child == node)
            .cloned()
            .collect())
    }

    fn get_child_assocs(&self, node: &NodeRef) -> Result<Vec<ChildAssociationRef>, StoreError> {
        let state = self.read()?;
        state.record(node)?;
        Ok(state
            .child_assocs
            .iter()
            .filter(|a| &a.parent == node)
            .cloned()
            .collect())
    }

    fn add_child(
        &self,
        parent: &NodeRef,
        child: &NodeRef,
        assoc_type: QName,
        assoc_qname: QName,
    ) -> Result<ChildAssociationRef, StoreError> {
        let mut state = self.write()?;
        state.record(parent)?;
        state.record(child)?;
        if parent.store() != child.store() || state.is_primary_ancestor(child, parent) {
            return Err(StoreError::IntegrityViolation {
                msg: format!("cannot link {} beneath {}", child, parent),
            });
        }
        let assoc =
            ChildAssociationRef::new(assoc_type, parent.clone(), assoc_qname, child.clone(), false);
        if state.child_assocs.contains(&assoc) {
            return Err(StoreError::AlreadyExists(format!("association {}", assoc)));
        }
        state.child_assocs.push(assoc.clone());
        Ok(assoc)
    }

    fn remove_child_association(&self, assoc: &ChildAssociationRef) -> Result<bool, StoreError> {
        if assoc.is_primary {
            return Err(StoreError::IntegrityViolation {
                msg: format!("primary association {} cannot be removed", assoc),
            });
        }
        let mut state = self.write()?;
        match state.child_assocs.iter().position(|a| a == assoc) {
            Some(pos) => {
                state.child_assocs.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_target_assocs(&self, node: &NodeRef) -> Result<Vec<AssociationRef>, StoreError> {
        let state = self.read()?;
        state.record(node)?;
        Ok(state
            .peer_assocs
            .iter()
            .filter(|a| &a.source == node)
            .cloned()
            .collect())
    }

    fn get_source_assocs(&self, node: &NodeRef) -> Result<Vec<AssociationRef>, StoreError> {
        let state = self.read()?;
        state.record(node)?;
        Ok(state
            .peer_assocs
            .iter()
            .filter(|a| &a.target == node)
            .cloned()
            .collect())
    }

    fn create_association(
        &self,
        source: &NodeRef,
        target: &NodeRef,
        assoc_type: QName,
    ) -> Result<AssociationRef, StoreError> {
        let mut state = self.write()?;
        state.record(source)?;
        state.record(target)?;
        let assoc = AssociationRef::new(source.clone(), assoc_type, target.clone());
        if !state.peer_assocs.insert(assoc.clone()) {
            return Err(StoreError::AlreadyExists(format!("association {}", assoc)));
        }
        Ok(assoc)
    }

    fn remove_association(&self, assoc: &AssociationRef) -> Result<bool, StoreError> {
        Ok(self.write()?.peer_assocs.remove(assoc))
    }

    fn get_path(&self, node: &NodeRef) -> Result<NodePath, StoreError> {
        let state = self.read()?;
        state.record(node)?;
        let mut elements = Vec::new();
        let mut current = node.clone();
        while let Some(assoc) = state.primary_parent(&current) {
            elements.push(assoc.qname.clone());
            current = assoc.parent.clone();
        }
        elements.reverse();
        Ok(NodePath::new(elements))
    }

    fn begin(&self) -> Result<(), StoreError> {
        let mut saved = self
            .saved
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        if saved.is_some() {
            return Err(StoreError::TransactionActive);
        }
        *saved = Some(self.read()?.clone());
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        let mut saved = self
            .saved
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        saved.take().map(|_| ()).ok_or(StoreError::NoTransaction)
    }

    fn rollback(&self) -> Result<(), StoreError> {
        let mut saved = self
            .saved
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        let snapshot = saved.take().ok_or(StoreError::NoTransaction)?;
        *self.write()? = snapshot;
        debug!("unit of work rolled back");
        Ok(())
    }
}

fn now_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
