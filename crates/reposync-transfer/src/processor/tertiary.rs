//! Pass 3: on sync transfers, remove destination children the source no
//! longer has.

use std::collections::BTreeSet;
use tracing::{debug, info};

use reposync_store::model::transfer;
use reposync_store::{NodeRef, StoreRef};

use super::{ChangeCapture, ManifestProcessor, TransferContext};
use crate::error::TransferError;
use crate::manifest::{DeletedNode, ManifestHeader, NormalNode};
use crate::report::ReportWriter;

/// Deletes or prunes unexpected primary children of manifest nodes.
///
/// Only children carrying the transferred aspect are considered. An alien
/// child is pruned for the syncing repository; a child owned by the syncing
/// repository is deleted; anything else is left alone.
pub struct TertiaryManifestProcessor<'a> {
    ctx: &'a TransferContext<'a>,
    report: &'a mut dyn ReportWriter,
    changes: &'a mut ChangeCapture,
    repository_id: Option<String>,
}

impl<'a> TertiaryManifestProcessor<'a> {
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
            repository_id: None,
        }
    }

    fn sync_child(&mut self, child: &NodeRef, repository_id: &str) -> Result<(), TransferError> {
        let store = self.ctx.store;
        if !store.has_aspect(child, &transfer::ASPECT_TRANSFERRED)? {
            return Ok(());
        }
        let path = store.get_path(child)?;
        if self.ctx.alien.is_alien(child)? {
            let deleted = self.ctx.alien.prune_node(child, repository_id)?;
            info!(node = %child, deleted = deleted.len(), "alien node pruned by sync");
            for removed in &deleted {
                self.report.write_deleted(removed, &path);
                self.changes.record_deleted(removed);
            }
            return Ok(());
        }
        let owner = store
            .get_property(child, &transfer::PROP_FROM_REPOSITORY_ID)?
            .and_then(|value| value.as_text().map(str::to_string));
        if owner.as_deref() == Some(repository_id) {
            self.ctx.alien.delete_node(child)?;
            info!(node = %child, path = %path, "node removed by sync");
            self.report.write_deleted(child, &path);
            self.changes.record_deleted(child);
        } else {
            debug!(node = %child, owner = ?owner, "unexpected child owned elsewhere, kept");
        }
        Ok(())
    }
}

impl ManifestProcessor for TertiaryManifestProcessor<'_> {
    fn name(&self) -> &'static str {
        "tertiary"
    }

    fn process_header(&mut self, header: &ManifestHeader) -> Result<(), TransferError> {
        self.repository_id = header.is_sync.then(|| header.repository_id.clone());
        Ok(())
    }

    fn process_normal_node(&mut self, node: &NormalNode) -> Result<(), TransferError> {
        let Some(repository_id) = self.repository_id.clone() else {
            return Ok(());
        };
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

        let expected: BTreeSet<NodeRef> = node
            .child_assocs
            .iter()
            .filter(|assoc| assoc.is_primary)
            .map(|assoc| assoc.child.in_store(StoreRef::workspace()))
            .collect();
        let unexpected: Vec<NodeRef> = self
            .ctx
            .store
            .get_child_assocs(&target)?
            .into_iter()
            .filter(|assoc| assoc.is_primary && !expected.contains(&assoc.child))
            .map(|assoc| assoc.child)
            .collect();
        for child in unexpected {
            // An earlier prune in this loop may have removed it.
            if self.ctx.store.exists(&child)? {
                self.sync_child(&child, &repository_id)?;
            }
        }
        Ok(())
    }

    fn process_deleted_node(&mut self, _node: &DeletedNode) -> Result<(), TransferError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::testing::{Harness, SOURCE};
    use crate::processor::PrimaryManifestProcessor;
    use crate::report::JsonReportWriter;
    use reposync_store::model::content;
    use reposync_store::{PropertyMap, PropertyValue, QName};

    const THIRD: &str = "third-repo";

    fn apply(h: &Harness, header: &ManifestHeader, nodes: &[NormalNode]) -> ChangeCapture {
        let resolver = h.resolver();
        let ctx = h.ctx(&resolver);
        let mut report = JsonReportWriter::new();
        let mut changes = ChangeCapture::default();
        {
            let mut primary = PrimaryManifestProcessor::new(&ctx, &mut report, &mut changes);
            primary.process_header(header).unwrap();
            for node in nodes {
                primary.process_normal_node(node).unwrap();
            }
            primary.end_manifest().unwrap();
        }
        {
            let mut tertiary = TertiaryManifestProcessor::new(&ctx, &mut report, &mut changes);
            tertiary.process_header(header).unwrap();
            for node in nodes {
                tertiary.process_normal_node(node).unwrap();
            }
        }
        changes
    }

    fn with_children(mut node: NormalNode, children: &[&NormalNode]) -> NormalNode {
        node.child_assocs = children
            .iter()
            .map(|child| child.primary_parent_assoc.clone())
            .collect();
        node
    }

    #[test]
    fn test_sync_deletes_missing_child() {
        let h = Harness::new();
        let top = h.folder("top", None);
        let kept = h.folder("kept", Some(&top));
        let orphan = h.folder("Orphan", Some(&top));
        let full = ManifestHeader::new(SOURCE, true, 3);
        apply(
            &h,
            &full,
            &[
                with_children(top.clone(), &[&kept, &orphan]),
                kept.clone(),
                orphan.clone(),
            ],
        );

        let changes = apply(&h, &full, &[with_children(top, &[&kept]), kept.clone()]);
        let dest = Harness::live(&orphan);
        assert!(changes.deleted.contains(&dest));
        assert!(!h.store.exists(&dest).unwrap());
        assert!(h.store.exists(&Harness::live(&kept)).unwrap());
    }

    #[test]
    fn test_non_sync_transfer_deletes_nothing() {
        let h = Harness::new();
        let top = h.folder("top", None);
        let orphan = h.folder("Orphan", Some(&top));
        let partial = ManifestHeader::new(SOURCE, false, 2);
        apply(&h, &partial, &[top.clone(), orphan.clone()]);
        let changes = apply(&h, &partial, &[top]);
        assert!(changes.deleted.is_empty());
        assert!(h.store.exists(&Harness::live(&orphan)).unwrap());
    }

    #[test]
    fn test_sync_prunes_alien_child() {
        let h = Harness::new();
        let top = h.folder("top", None);
        let orphan = h.folder("Orphan", Some(&top));
        let owned = h.folder("owned", Some(&orphan));
        let full = ManifestHeader::new(SOURCE, true, 3);
        apply(
            &h,
            &full,
            &[
                with_children(top.clone(), &[&orphan]),
                with_children(orphan.clone(), &[&owned]),
                owned.clone(),
            ],
        );
        let foreign = h.folder("foreign", Some(&orphan));
        apply(&h, &ManifestHeader::new(THIRD, false, 1), &[foreign.clone()]);
        assert!(h.alien.is_alien(&Harness::live(&orphan)).unwrap());

        let changes = apply(&h, &full, &[with_children(top, &[])]);
        assert!(changes.deleted.contains(&Harness::live(&owned)));
        assert!(h.store.exists(&Harness::live(&orphan)).unwrap());
        assert!(h.store.exists(&Harness::live(&foreign)).unwrap());
    }

    #[test]
    fn test_child_owned_elsewhere_is_kept() {
        let h = Harness::new();
        let top = h.folder("top", None);
        let full = ManifestHeader::new(SOURCE, true, 1);
        apply(&h, &full, &[with_children(top.clone(), &[])]);

        // An invading child from a third repository.
        let invader = h.folder("invader", Some(&top));
        apply(&h, &ManifestHeader::new(THIRD, false, 1), &[invader.clone()]);

        // A transferred child owned by the third repository that invades
        // nothing.
        let dest_top = Harness::live(&top);
        let mut props = PropertyMap::new();
        props.insert(content::PROP_NAME, PropertyValue::from("plain"));
        let plain = h
            .store
            .create_node(
                &dest_top,
                content::ASSOC_CONTAINS,
                QName::new("cm", "plain"),
                content::TYPE_FOLDER,
                None,
                props,
            )
            .unwrap()
            .child;
        let mut stamp = PropertyMap::new();
        stamp.insert(transfer::PROP_FROM_REPOSITORY_ID, PropertyValue::from(THIRD));
        h.store
            .add_aspect(&plain, transfer::ASPECT_TRANSFERRED, stamp)
            .unwrap();

        let changes = apply(&h, &full, &[with_children(top, &[])]);
        assert!(changes.deleted.is_empty());
        assert!(h.store.exists(&Harness::live(&invader)).unwrap());
        assert!(h.store.exists(&plain).unwrap());
    }
}
