//! Alien node bookkeeping.
//!
//! A destination node is alien while content from a repository other than
//! its owner lives beneath it. The invasion set is the multi-valued
//! `trx:invadedBy` property; the `trx:alien` aspect is present iff that set
//! is non-empty. The owner of a transferred node is its
//! `trx:fromRepositoryId`; a node without the transferred aspect is owned by
//! the local repository.
//!
//! Structural changes are guarded in two phases: the invasion changes are
//! first computed against the current tree into an [`InvasionDelta`], then
//! applied together with the structural change inside the caller's unit of
//! work.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use reposync_store::model::{content, transfer};
use reposync_store::{
    ChildAssociationRef, NodeRef, NodeStore, PropertyMap, PropertyValue, QName, StoreError,
};

/// Pending invasion-set changes: the resulting set per node, in the order
/// the nodes were visited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvasionDelta {
    order: Vec<NodeRef>,
    sets: BTreeMap<NodeRef, BTreeSet<String>>,
}

impl InvasionDelta {
    /// Records the resulting invasion set of a node.
    pub fn set(&mut self, node: NodeRef, invaded_by: BTreeSet<String>) {
        if !self.sets.contains_key(&node) {
            self.order.push(node.clone());
        }
        self.sets.insert(node, invaded_by);
    }

    /// Pending set of a node, if any.
    pub fn get(&self, node: &NodeRef) -> Option<&BTreeSet<String>> {
        self.sets.get(node)
    }

    /// True when nothing changes.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of nodes touched.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Iterates changes in visit order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeRef, &BTreeSet<String>)> {
        self.order
            .iter()
            .filter_map(move |node| self.sets.get(node).map(|set| (node, set)))
    }
}

/// Maintains invasion sets and prunes foreign-protected subtrees.
pub struct AlienProcessor {
    store: Arc<dyn NodeStore>,
    local_repository_id: String,
}

impl AlienProcessor {
    /// Creates a processor over the destination store.
    pub fn new(store: Arc<dyn NodeStore>, local_repository_id: impl Into<String>) -> Self {
        Self {
            store,
            local_repository_id: local_repository_id.into(),
        }
    }

    /// True iff the node's invasion set is non-empty.
    pub fn is_alien(&self, node: &NodeRef) -> Result<bool, StoreError> {
        self.store.has_aspect(node, &transfer::ASPECT_ALIEN)
    }

    /// Repositories currently invading the node.
    pub fn invaded_by(&self, node: &NodeRef) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .store
            .get_property(node, &transfer::PROP_INVADED_BY)?
            .map(|v| v.text_list().into_iter().collect())
            .unwrap_or_default())
    }

    fn invaded_in(
        &self,
        delta: &InvasionDelta,
        node: &NodeRef,
    ) -> Result<BTreeSet<String>, StoreError> {
        match delta.get(node) {
            Some(set) => Ok(set.clone()),
            None => self.invaded_by(node),
        }
    }

    fn from_repository(&self, node: &NodeRef) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .get_property(node, &transfer::PROP_FROM_REPOSITORY_ID)?
            .and_then(|v| v.as_text().map(str::to_string)))
    }

    fn owner(&self, node: &NodeRef) -> Result<String, StoreError> {
        if self.store.has_aspect(node, &transfer::ASPECT_TRANSFERRED)? {
            if let Some(repo) = self.from_repository(node)? {
                return Ok(repo);
            }
        }
        Ok(self.local_repository_id.clone())
    }

    fn is_transferred_or_alien(&self, node: &NodeRef) -> Result<bool, StoreError> {
        let aspects = self.store.get_aspects(node)?;
        Ok(aspects.contains(&transfer::ASPECT_TRANSFERRED)
            || aspects.contains(&transfer::ASPECT_ALIEN))
    }

    fn primary_children(&self, node: &NodeRef) -> Result<Vec<NodeRef>, StoreError> {
        Ok(self
            .store
            .get_child_assocs(node)?
            .into_iter()
            .filter(|a| a.is_primary)
            .map(|a| a.child)
            .collect())
    }

    fn is_containment(assoc: &ChildAssociationRef) -> bool {
        assoc.is_primary && assoc.assoc_type == content::ASSOC_CONTAINS
    }

    /// Writes a delta to the store.
    pub fn apply(&self, delta: &InvasionDelta) -> Result<(), StoreError> {
        for (node, invaded_by) in delta.iter() {
            if !self.store.exists(node)? {
                continue;
            }
            if invaded_by.is_empty() {
                self.store.remove_aspect(node, &transfer::ASPECT_ALIEN)?;
                self.store.remove_property(node, &transfer::PROP_INVADED_BY)?;
                debug!(node = %node, "no longer alien");
            } else {
                let value = PropertyValue::from_text_list(invaded_by.iter().cloned());
                if self.store.has_aspect(node, &transfer::ASPECT_ALIEN)? {
                    self.store
                        .set_property(node, transfer::PROP_INVADED_BY, value)?;
                } else {
                    let mut props = PropertyMap::new();
                    props.insert(transfer::PROP_INVADED_BY, value);
                    self.store.add_aspect(node, transfer::ASPECT_ALIEN, props)?;
                }
                debug!(node = %node, invaded_by = ?invaded_by, "invasion set updated");
            }
        }
        Ok(())
    }

    /// Computes the invasion changes caused by a new child link.
    pub fn plan_create_child(
        &self,
        assoc: &ChildAssociationRef,
        repository_id: &str,
    ) -> Result<InvasionDelta, StoreError> {
        let mut delta = InvasionDelta::default();
        if !Self::is_containment(assoc) || !self.is_transferred_or_alien(&assoc.parent)? {
            return Ok(delta);
        }
        if !self.is_alien(&assoc.parent)?
            && self.from_repository(&assoc.parent)?.as_deref() == Some(repository_id)
        {
            return Ok(delta);
        }

        let mut child_set = self.invaded_by(&assoc.child)?;
        child_set.insert(repository_id.to_string());
        delta.set(assoc.child.clone(), child_set);

        let mut current = Some(assoc.clone());
        while let Some(link) = current {
            let parent = link.parent;
            if !self.is_transferred_or_alien(&parent)? {
                break;
            }
            let mut set = self.invaded_by(&parent)?;
            if !set.insert(repository_id.to_string()) {
                break;
            }
            delta.set(parent.clone(), set);
            current = self.store.get_primary_parent(&parent)?;
        }
        Ok(delta)
    }

    /// Marks a child created by `repository_id` beneath a transferred or
    /// alien parent, then walks upward until an ancestor is already invaded
    /// by that repository.
    pub fn on_create_child(
        &self,
        assoc: &ChildAssociationRef,
        repository_id: &str,
        is_new_node: bool,
    ) -> Result<(), StoreError> {
        let delta = self.plan_create_child(assoc, repository_id)?;
        debug!(
            child = %assoc.child,
            repository_id,
            is_new_node,
            marked = delta.len(),
            "alien check on create"
        );
        self.apply(&delta)
    }

    /// Computes the invasion changes caused by removing `node` from under
    /// `old_assoc` (or its current primary parent).
    pub fn plan_delete(
        &self,
        node: &NodeRef,
        old_assoc: Option<&ChildAssociationRef>,
    ) -> Result<InvasionDelta, StoreError> {
        let mut delta = InvasionDelta::default();
        let mut ex_invaders = self.invaded_by(node)?;
        if ex_invaders.is_empty() {
            return Ok(delta);
        }
        let mut current = match old_assoc {
            Some(assoc) => Some(assoc.clone()),
            None => self.store.get_primary_parent(node)?,
        };
        let mut current_node = node.clone();

        while let Some(link) = current {
            if ex_invaders.is_empty() {
                break;
            }
            let parent = link.parent;
            if !self.is_alien(&parent)? {
                break;
            }
            ex_invaders.remove(&self.owner(&parent)?);

            let siblings: Vec<NodeRef> = self
                .primary_children(&parent)?
                .into_iter()
                .filter(|child| child != &current_node)
                .collect();
            let mut still_needed = BTreeSet::new();
            for sibling in &siblings {
                let sibling_set = self.invaded_in(&delta, sibling)?;
                still_needed.extend(ex_invaders.intersection(&sibling_set).cloned());
            }
            ex_invaders.retain(|invader| !still_needed.contains(invader));

            if !ex_invaders.is_empty() {
                let remaining: BTreeSet<String> = self
                    .invaded_by(&parent)?
                    .difference(&ex_invaders)
                    .cloned()
                    .collect();
                delta.set(parent.clone(), remaining);
            }
            current = self.store.get_primary_parent(&parent)?;
            current_node = parent;
        }
        Ok(delta)
    }

    /// Releases the invasions an alien node contributed to its ancestors,
    /// before the node is removed.
    pub fn before_delete_alien(
        &self,
        node: &NodeRef,
        old_assoc: Option<&ChildAssociationRef>,
    ) -> Result<(), StoreError> {
        let delta = self.plan_delete(node, old_assoc)?;
        debug!(node = %node, released = delta.len(), "alien check before delete");
        self.apply(&delta)
    }

    fn plan_retreat(
        &self,
        delta: &mut InvasionDelta,
        node: &NodeRef,
        repository_id: &str,
    ) -> Result<(), StoreError> {
        let mut stack = vec![node.clone()];
        while let Some(current) = stack.pop() {
            if !self.is_alien(&current)? {
                continue;
            }
            let owner = self.owner(&current)?;
            if owner != repository_id {
                continue;
            }
            let mut set = self.invaded_in(delta, &current)?;
            set.remove(&owner);
            delta.set(current.clone(), set);
            for child in self.primary_children(&current)? {
                if self.invaded_in(delta, &child)?.contains(repository_id) {
                    stack.push(child);
                }
            }
        }
        Ok(())
    }

    /// Computes the invasion changes caused by a node arriving under a new
    /// parent link.
    pub fn plan_move(&self, new_assoc: &ChildAssociationRef) -> Result<InvasionDelta, StoreError> {
        let mut delta = InvasionDelta::default();
        let parent = &new_assoc.parent;
        let child = &new_assoc.child;

        if !self.is_transferred_or_alien(parent)? || new_assoc.assoc_type != content::ASSOC_CONTAINS
        {
            self.plan_retreat(&mut delta, child, &self.local_repository_id)?;
            return Ok(delta);
        }

        let child_set = self.invaded_by(child)?;
        let mut to_add: BTreeSet<String> = BTreeSet::new();
        if self.is_alien(parent)? {
            let parent_set = self.invaded_by(parent)?;
            to_add.extend(child_set.difference(&parent_set).cloned());
        } else {
            let parent_from = self.from_repository(parent)?;
            for invader in &child_set {
                if Some(invader.as_str()) == parent_from.as_deref() {
                    self.plan_retreat(&mut delta, child, invader)?;
                } else {
                    to_add.insert(invader.clone());
                }
            }
        }

        let mut current = Some(new_assoc.clone());
        while let Some(link) = current {
            if to_add.is_empty() {
                break;
            }
            let ancestor = link.parent;
            if !self.is_transferred_or_alien(&ancestor)? {
                break;
            }
            let mut set = self.invaded_in(&delta, &ancestor)?;
            to_add.retain(|invader| !set.contains(invader));
            if to_add.is_empty() {
                break;
            }
            set.extend(to_add.iter().cloned());
            delta.set(ancestor.clone(), set);
            current = self.store.get_primary_parent(&ancestor)?;
        }
        Ok(delta)
    }

    /// Re-propagates invasions after a node moved under `new_assoc`.
    pub fn after_move_alien(&self, new_assoc: &ChildAssociationRef) -> Result<(), StoreError> {
        let delta = self.plan_move(new_assoc)?;
        debug!(node = %new_assoc.child, changed = delta.len(), "alien check after move");
        self.apply(&delta)
    }

    /// Moves a node, keeping the invasion sets at both locations correct.
    pub fn move_node(
        &self,
        node: &NodeRef,
        new_parent: &NodeRef,
        assoc_type: QName,
        assoc_qname: QName,
    ) -> Result<ChildAssociationRef, StoreError> {
        if self.is_alien(node)? {
            let old = self.store.get_primary_parent(node)?;
            let delta = self.plan_delete(node, old.as_ref())?;
            self.apply(&delta)?;
        }
        let new_assoc = self
            .store
            .move_node(node, new_parent, assoc_type, assoc_qname)?;
        self.after_move_alien(&new_assoc)?;
        Ok(new_assoc)
    }

    /// Hard-deletes a node, releasing its invasions first when it is alien.
    pub fn delete_node(&self, node: &NodeRef) -> Result<(), StoreError> {
        if self.is_alien(node)? {
            self.before_delete_alien(node, None)?;
        }
        self.store.delete_node(node)
    }

    /// Deletes the descendants of `node` (and `node` itself) owned by
    /// `from_repository_id` that no other repository depends on. Nodes still
    /// invaded by others are kept and their invasion sets recalculated.
    /// Returns the deleted nodes.
    pub fn prune_node(
        &self,
        node: &NodeRef,
        from_repository_id: &str,
    ) -> Result<Vec<NodeRef>, StoreError> {
        let starting_parent = self.store.get_primary_parent(node)?;
        let mut stack = vec![node.clone()];
        let mut to_recalculate: Vec<NodeRef> = Vec::new();
        let mut deleted = Vec::new();

        while let Some(current) = stack.pop() {
            if !self.store.exists(&current)? {
                continue;
            }
            let owned = self.from_repository(&current)?.as_deref() == Some(from_repository_id);
            if self.is_alien(&current)? {
                let invaded_by = self.invaded_by(&current)?;
                if invaded_by.contains(from_repository_id) {
                    if invaded_by.len() == 1 && owned {
                        self.delete_node(&current)?;
                        deleted.push(current);
                        continue;
                    }
                    for child in self.primary_children(&current)? {
                        if self.invaded_by(&child)?.contains(from_repository_id) {
                            stack.push(child);
                        }
                    }
                    if !to_recalculate.contains(&current) {
                        to_recalculate.push(current);
                    }
                } else if owned {
                    stack.extend(self.primary_children(&current)?);
                    if !to_recalculate.contains(&current) {
                        to_recalculate.push(current);
                    }
                }
            } else if owned {
                self.delete_node(&current)?;
                deleted.push(current);
            }
        }

        while let Some(folder) = to_recalculate.pop() {
            if self.store.exists(&folder)? {
                self.recalc_invasion(&folder, from_repository_id)?;
            }
        }

        let mut ripple = starting_parent;
        while let Some(link) = ripple {
            let parent = link.parent;
            if !self.is_alien(&parent)? || self.recalc_invasion(&parent, from_repository_id)? {
                break;
            }
            ripple = self.store.get_primary_parent(&parent)?;
        }
        debug!(node = %node, from_repository_id, deleted = deleted.len(), "pruned");
        Ok(deleted)
    }

    /// Drops `from_repository_id` from a folder's invasion set unless an
    /// alien child still carries it or comes from it. Returns true while the
    /// folder stays invaded by that repository.
    fn recalc_invasion(&self, folder: &NodeRef, from_repository_id: &str) -> Result<bool, StoreError> {
        let mut still_invaded = false;
        for child in self.primary_children(folder)? {
            let child_set = self.invaded_by(&child)?;
            if child_set.is_empty() {
                continue;
            }
            if child_set.contains(from_repository_id)
                || self.from_repository(&child)?.as_deref() == Some(from_repository_id)
            {
                still_invaded = true;
                break;
            }
        }
        if !still_invaded {
            let mut set = self.invaded_by(folder)?;
            if set.remove(from_repository_id) {
                let mut delta = InvasionDelta::default();
                delta.set(folder.clone(), set);
                self.apply(&delta)?;
            }
        }
        Ok(still_invaded)
    }
}
