//! Pass 2: reconcile non-primary child links and peer links.
//!
//! Runs after pass 1 so every endpoint the manifest mentions has been
//! materialized. Child links are diffed by their other endpoint; peer links
//! by the (source, target, type) triple. Association identity never
//! includes a storage id.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use reposync_store::{AssociationRef, ChildAssociationRef, NodeRef, StoreRef};

use super::{ChangeCapture, ManifestProcessor, TransferContext};
use crate::error::TransferError;
use crate::manifest::{DeletedNode, ManifestHeader, NormalNode};
use crate::report::ReportWriter;

/// Links to drop and links to create, in application order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssocDiff<T> {
    /// Removed first.
    pub to_remove: Vec<T>,
    /// Added after the removals.
    pub to_add: Vec<T>,
}

impl<T> AssocDiff<T> {
    /// True when the current links already match.
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }
}

impl<T> Default for AssocDiff<T> {
    fn default() -> Self {
        Self {
            to_remove: Vec::new(),
            to_add: Vec::new(),
        }
    }
}

/// Diffs child links keyed by their other endpoint.
///
/// A required link whose other endpoint is already linked but with another
/// type or name replaces the current link. A required link to an endpoint
/// that is not linked yet is added when `exists` holds for the endpoint and
/// dropped otherwise. Current links to endpoints not required are removed.
pub fn diff_child_assocs<K, E>(
    required: &[ChildAssociationRef],
    current: &[ChildAssociationRef],
    other_end: K,
    exists: E,
) -> AssocDiff<ChildAssociationRef>
where
    K: Fn(&ChildAssociationRef) -> &NodeRef,
    E: Fn(&NodeRef) -> bool,
{
    let current_by_end: BTreeMap<&NodeRef, &ChildAssociationRef> =
        current.iter().map(|assoc| (other_end(assoc), assoc)).collect();
    let required_by_end: BTreeMap<&NodeRef, &ChildAssociationRef> =
        required.iter().map(|assoc| (other_end(assoc), assoc)).collect();

    let mut diff = AssocDiff::default();
    for (end, wanted) in &required_by_end {
        match current_by_end.get(end) {
            Some(existing) => {
                if existing.assoc_type != wanted.assoc_type || existing.qname != wanted.qname {
                    diff.to_remove.push((*existing).clone());
                    diff.to_add.push((*wanted).clone());
                }
            }
            None if exists(end) => diff.to_add.push((*wanted).clone()),
            None => {}
        }
    }
    for (end, existing) in &current_by_end {
        if !required_by_end.contains_key(end) {
            diff.to_remove.push((*existing).clone());
        }
    }
    diff
}

/// Diffs peer links keyed by (source, target, type). Duplicates collapse.
pub fn diff_peer_assocs<K, E>(
    required: &[AssociationRef],
    current: &[AssociationRef],
    other_end: K,
    exists: E,
) -> AssocDiff<AssociationRef>
where
    K: Fn(&AssociationRef) -> &NodeRef,
    E: Fn(&NodeRef) -> bool,
{
    let required: BTreeSet<&AssociationRef> = required.iter().collect();
    let current: BTreeSet<&AssociationRef> = current.iter().collect();
    AssocDiff {
        to_remove: current
            .difference(&required)
            .map(|assoc| (*assoc).clone())
            .collect(),
        to_add: required
            .difference(&current)
            .filter(|assoc| exists(other_end(assoc)))
            .map(|assoc| (*assoc).clone())
            .collect(),
    }
}

fn live(node: &NodeRef) -> NodeRef {
    node.in_store(StoreRef::workspace())
}

/// Rewrites a source link onto destination endpoints.
fn live_child_assoc(assoc: &ChildAssociationRef) -> ChildAssociationRef {
    ChildAssociationRef::new(
        assoc.assoc_type.clone(),
        live(&assoc.parent),
        assoc.qname.clone(),
        live(&assoc.child),
        assoc.is_primary,
    )
}

fn live_peer_assoc(assoc: &AssociationRef) -> AssociationRef {
    AssociationRef::new(
        live(&assoc.source),
        assoc.assoc_type.clone(),
        live(&assoc.target),
    )
}

/// Reconciles the associations of every manifest node.
pub struct SecondaryManifestProcessor<'a> {
    ctx: &'a TransferContext<'a>,
    report: &'a mut dyn ReportWriter,
    changes: &'a mut ChangeCapture,
}

impl<'a> SecondaryManifestProcessor<'a> {
    /// Creates the pass.
    pub fn new(
        ctx: &'a TransferContext<'a>,
        report: &'a mut dyn ReportWriter,
        changes: &'a mut ChangeCapture,
    ) -> Self {
        Self {
            ctx,
            report,
            changes,
        }
    }

    fn existing<'n>(
        &self,
        ends: impl Iterator<Item = &'n NodeRef>,
    ) -> Result<BTreeSet<NodeRef>, TransferError> {
        let mut found = BTreeSet::new();
        for end in ends {
            if self.ctx.store.exists(end)? {
                found.insert(end.clone());
            }
        }
        Ok(found)
    }

    /// Links where `target` is the parent.
    fn reconcile_children(&self, node: &NormalNode, target: &NodeRef) -> Result<usize, TransferError> {
        let store = self.ctx.store;
        let required: Vec<ChildAssociationRef> = node
            .child_assocs
            .iter()
            .filter(|assoc| !assoc.is_primary)
            .map(live_child_assoc)
            .collect();
        let current: Vec<ChildAssociationRef> = store
            .get_child_assocs(target)?
            .into_iter()
            .filter(|assoc| !assoc.is_primary)
            .collect();
        let existing = self.existing(required.iter().map(|assoc| &assoc.child))?;
        let diff = diff_child_assocs(&required, &current, |a| &a.child, |n| existing.contains(n));
        for assoc in &diff.to_remove {
            store.remove_child_association(assoc)?;
        }
        for assoc in &diff.to_add {
            store.add_child(target, &assoc.child, assoc.assoc_type.clone(), assoc.qname.clone())?;
        }
        Ok(diff.to_remove.len() + diff.to_add.len())
    }

    /// Links where `target` is the child.
    fn reconcile_parents(&self, node: &NormalNode, target: &NodeRef) -> Result<usize, TransferError> {
        let store = self.ctx.store;
        let required: Vec<ChildAssociationRef> = node
            .parent_assocs
            .iter()
            .filter(|assoc| !assoc.is_primary)
            .map(live_child_assoc)
            .collect();
        let current: Vec<ChildAssociationRef> = store
            .get_parent_assocs(target)?
            .into_iter()
            .filter(|assoc| !assoc.is_primary)
            .collect();
        let existing = self.existing(required.iter().map(|assoc| &assoc.parent))?;
        let diff = diff_child_assocs(&required, &current, |a| &a.parent, |n| existing.contains(n));
        for assoc in &diff.to_remove {
            store.remove_child_association(assoc)?;
        }
        for assoc in &diff.to_add {
            store.add_child(&assoc.parent, target, assoc.assoc_type.clone(), assoc.qname.clone())?;
        }
        Ok(diff.to_remove.len() + diff.to_add.len())
    }

    /// Peer links in both directions.
    fn reconcile_peers(&self, node: &NormalNode, target: &NodeRef) -> Result<usize, TransferError> {
        let store = self.ctx.store;
        let mut changed = 0;

        let required: Vec<AssociationRef> = node.target_assocs.iter().map(live_peer_assoc).collect();
        let current = store.get_target_assocs(target)?;
        let existing = self.existing(required.iter().map(|assoc| &assoc.target))?;
        let diff = diff_peer_assocs(&required, &current, |a| &a.target, |n| existing.contains(n));
        for assoc in &diff.to_remove {
            store.remove_association(assoc)?;
        }
        for assoc in &diff.to_add {
            store.create_association(target, &assoc.target, assoc.assoc_type.clone())?;
        }
        changed += diff.to_remove.len() + diff.to_add.len();

        let required: Vec<AssociationRef> = node.source_assocs.iter().map(live_peer_assoc).collect();
        let current = store.get_source_assocs(target)?;
        let existing = self.existing(required.iter().map(|assoc| &assoc.source))?;
        let diff = diff_peer_assocs(&required, &current, |a| &a.source, |n| existing.contains(n));
        for assoc in &diff.to_remove {
            store.remove_association(assoc)?;
        }
        for assoc in &diff.to_add {
            store.create_association(&assoc.source, target, assoc.assoc_type.clone())?;
        }
        changed += diff.to_remove.len() + diff.to_add.len();
        Ok(changed)
    }
}

impl ManifestProcessor for SecondaryManifestProcessor<'_> {
    fn name(&self) -> &'static str {
        "secondary"
    }

    fn process_header(&mut self, _header: &ManifestHeader) -> Result<(), TransferError> {
        Ok(())
    }

    fn process_normal_node(&mut self, node: &NormalNode) -> Result<(), TransferError> {
        let pair = self.ctx.resolver.resolve(
            &node.node_ref,
            Some(&node.primary_parent_assoc),
            &node.parent_path,
        )?;
        let Some(target) = pair.resolved_child else {
            return Err(TransferError::Unresolved {
                node: node.node_ref.clone(),
                msg: "node missing after the primary pass".to_string(),
            });
        };

        let changed = self.reconcile_children(node, &target)?
            + self.reconcile_parents(node, &target)?
            + self.reconcile_peers(node, &target)?;
        debug!(node = %target, changed, "associations reconciled");
        if changed > 0 {
            let path = self.ctx.store.get_path(&target)?;
            self.report.write_updated(&target, &path);
            self.changes.record_updated(&target);
        }
        Ok(())
    }

    fn process_deleted_node(&mut self, _node: &DeletedNode) -> Result<(), TransferError> {
        Ok(())
    }
}
