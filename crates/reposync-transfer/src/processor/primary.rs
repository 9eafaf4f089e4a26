//! Pass 1: materialize every manifest node on the destination.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use reposync_store::model::{content, is_local_only, transfer};
use reposync_store::{
    ChildAssociationRef, ContentData, NodeRef, PropertyMap, PropertyValue, QName, StoreRef,
};

use super::{ChangeCapture, ManifestProcessor, TransferContext};
use crate::error::TransferError;
use crate::manifest::{DeletedNode, ManifestHeader, NormalNode};
use crate::report::ReportWriter;
use crate::requisite::is_content_missing;

/// Creates, updates, moves, restores and deletes destination nodes so they
/// mirror the manifest records.
///
/// Nodes whose parent cannot be resolved yet are parked in a temporary
/// folder and moved under their parent once a later record creates it.
pub struct PrimaryManifestProcessor<'a> {
    ctx: &'a TransferContext<'a>,
    report: &'a mut dyn ReportWriter,
    changes: &'a mut ChangeCapture,
    header: Option<ManifestHeader>,
    temp_folder: Option<NodeRef>,
    // Expected parent -> parked children with their source primary links.
    orphans: BTreeMap<NodeRef, Vec<ChildAssociationRef>>,
}

impl<'a> PrimaryManifestProcessor<'a> {
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
            header: None,
            temp_folder: None,
            orphans: BTreeMap::new(),
        }
    }

    /// Number of nodes still waiting for their parent.
    pub fn orphan_count(&self) -> usize {
        self.orphans.values().map(Vec::len).sum()
    }

    fn header(&self) -> Result<&ManifestHeader, TransferError> {
        self.header
            .as_ref()
            .ok_or_else(|| TransferError::Internal("manifest header not processed".to_string()))
    }

    fn live(node: &NodeRef) -> NodeRef {
        node.in_store(StoreRef::workspace())
    }

    fn temp_folder(&mut self) -> Result<NodeRef, TransferError> {
        if let Some(folder) = &self.temp_folder {
            return Ok(folder.clone());
        }
        let store = self.ctx.store;
        let root = store.root_node(&StoreRef::workspace())?;
        let name = format!("temp-{}", self.ctx.transfer_id);
        let mut props = PropertyMap::new();
        props.insert(content::PROP_NAME, PropertyValue::from(name.as_str()));
        let assoc = store.create_node(
            &root,
            content::ASSOC_CONTAINS,
            QName::new("trx", &name),
            transfer::TYPE_TEMP_FOLDER,
            None,
            props,
        )?;
        debug!(transfer_id = %self.ctx.transfer_id, folder = %assoc.child, "temp folder created");
        self.temp_folder = Some(assoc.child.clone());
        Ok(assoc.child)
    }

    fn forget_orphan(&mut self, node: &NodeRef) {
        for waiting in self.orphans.values_mut() {
            waiting.retain(|assoc| Self::live(&assoc.child) != *node);
        }
        self.orphans.retain(|_, waiting| !waiting.is_empty());
    }

    /// Moves the nodes parked for `parent` under it.
    fn adopt_orphans(&mut self, parent: &NodeRef) -> Result<(), TransferError> {
        let Some(waiting) = self.orphans.remove(parent) else {
            return Ok(());
        };
        for assoc in waiting {
            let child = Self::live(&assoc.child);
            let old_path = self.ctx.store.get_path(&child)?;
            let new_assoc = self.ctx.alien.move_node(
                &child,
                parent,
                assoc.assoc_type.clone(),
                assoc.qname.clone(),
            )?;
            let new_path = self.ctx.store.get_path(&new_assoc.child)?;
            debug!(node = %child, parent = %parent, "orphan re-parented");
            self.report.write_moved(&child, &old_path, &new_path);
        }
        Ok(())
    }

    /// The value a content property takes on the destination: the current
    /// value while it is up to date, otherwise the staged part.
    fn content_value(
        &self,
        node: &NormalNode,
        qname: &QName,
        data: &ContentData,
        current: Option<&PropertyMap>,
    ) -> Result<PropertyValue, TransferError> {
        if !is_content_missing(current, qname, node.modified()) {
            if let Some(value) = current.and_then(|props| props.get(qname)) {
                return Ok(value.clone());
            }
        }
        let part = data.part_name();
        match self.ctx.staging.read_content(part)? {
            Some(bytes) => {
                let stored = self
                    .ctx
                    .content_store
                    .put(&bytes, &data.mimetype, &data.encoding)?;
                debug!(node = %node.node_ref, property = %qname, part, "content installed");
                Ok(PropertyValue::Content(stored))
            }
            None => Err(TransferError::ContentNotStaged {
                node: node.node_ref.clone(),
                part: part.to_string(),
            }),
        }
    }

    fn desired_properties(
        &self,
        node: &NormalNode,
        current: Option<&PropertyMap>,
    ) -> Result<PropertyMap, TransferError> {
        let header = self.header()?;
        let mut desired = PropertyMap::new();
        for (qname, value) in &node.properties {
            if is_local_only(qname) {
                continue;
            }
            let value = match value.as_content() {
                Some(data) => self.content_value(node, qname, data, current)?,
                None => value.clone(),
            };
            desired.insert(qname.clone(), value);
        }
        if let Some(current) = current {
            for (qname, value) in current {
                if is_local_only(qname) {
                    desired.insert(qname.clone(), value.clone());
                }
            }
        }

        // A node that was itself transferred to the source keeps its origin.
        let origin = node
            .properties
            .get(&transfer::PROP_REPOSITORY_ID)
            .and_then(PropertyValue::as_text)
            .unwrap_or(header.repository_id.as_str())
            .to_string();
        desired.insert(transfer::PROP_REPOSITORY_ID, PropertyValue::Text(origin));
        desired.insert(
            transfer::PROP_FROM_REPOSITORY_ID,
            PropertyValue::from(header.repository_id.as_str()),
        );
        if header.is_read_only {
            desired.insert(
                content::PROP_LOCK_TYPE,
                PropertyValue::from(content::LOCK_TYPE_READ_ONLY),
            );
        }
        Ok(desired)
    }

    fn desired_aspects(
        &self,
        node: &NormalNode,
        current: Option<&BTreeSet<QName>>,
    ) -> Result<BTreeSet<QName>, TransferError> {
        let header = self.header()?;
        let mut desired: BTreeSet<QName> = node
            .aspects
            .iter()
            .filter(|aspect| !is_local_only(aspect))
            .cloned()
            .collect();
        desired.insert(transfer::ASPECT_TRANSFERRED);
        if header.is_read_only {
            desired.insert(content::ASPECT_LOCKABLE);
        }
        if let Some(current) = current {
            desired.extend(current.iter().filter(|a| is_local_only(a)).cloned());
        }
        Ok(desired)
    }

    /// Brings type, aspects and properties of an existing node in line with
    /// the record. Returns true if anything changed.
    fn apply_state(&self, node: &NormalNode, target: &NodeRef) -> Result<bool, TransferError> {
        let store = self.ctx.store;
        let mut changed = false;

        if store.get_type(target)? != node.node_type {
            store.set_type(target, node.node_type.clone())?;
            changed = true;
        }

        let current_aspects = store.get_aspects(target)?;
        let aspects = self.desired_aspects(node, Some(&current_aspects))?;
        for aspect in current_aspects.difference(&aspects) {
            store.remove_aspect(target, aspect)?;
            changed = true;
        }
        for aspect in aspects.difference(&current_aspects) {
            store.add_aspect(target, aspect.clone(), PropertyMap::new())?;
            changed = true;
        }

        let current_props = store.get_properties(target)?;
        let props = self.desired_properties(node, Some(&current_props))?;
        if props != current_props {
            store.set_properties(target, props)?;
            changed = true;
        }
        Ok(changed)
    }

    fn update_node(
        &mut self,
        node: &NormalNode,
        target: &NodeRef,
        parent: Option<&NodeRef>,
    ) -> Result<(), TransferError> {
        let store = self.ctx.store;
        let incoming = &node.primary_parent_assoc;
        let mut changed = false;

        if let Some(parent) = parent {
            let current = store.get_primary_parent(target)?;
            let moved = match &current {
                Some(assoc) => {
                    assoc.parent != *parent
                        || assoc.qname != incoming.qname
                        || assoc.assoc_type != incoming.assoc_type
                }
                None => false,
            };
            if moved {
                let old_path = store.get_path(target)?;
                self.ctx.alien.move_node(
                    target,
                    parent,
                    incoming.assoc_type.clone(),
                    incoming.qname.clone(),
                )?;
                let new_path = store.get_path(target)?;
                debug!(node = %target, from = %old_path, to = %new_path, "node moved");
                self.report.write_moved(target, &old_path, &new_path);
                self.forget_orphan(target);
                changed = true;
            }
        }

        if self.apply_state(node, target)? {
            changed = true;
        }
        if changed {
            let path = store.get_path(target)?;
            self.report.write_updated(target, &path);
            self.changes.record_updated(target);
        }
        Ok(())
    }

    fn restore_node(
        &mut self,
        node: &NormalNode,
        archived: &NodeRef,
        parent: &NodeRef,
    ) -> Result<NodeRef, TransferError> {
        let incoming = &node.primary_parent_assoc;
        let assoc = self.ctx.store.restore_node(
            archived,
            Some(parent),
            Some(incoming.assoc_type.clone()),
            Some(incoming.qname.clone()),
        )?;
        self.ctx.alien.after_move_alien(&assoc)?;
        self.apply_state(node, &assoc.child)?;
        let path = self.ctx.store.get_path(&assoc.child)?;
        info!(node = %assoc.child, path = %path, "node restored from archive");
        self.report.write_created(&assoc.child, parent, &path);
        self.changes.record_created(&assoc.child);
        Ok(assoc.child)
    }

    fn create_node(
        &mut self,
        node: &NormalNode,
        parent: Option<&NodeRef>,
    ) -> Result<NodeRef, TransferError> {
        let incoming = &node.primary_parent_assoc;
        let parent = match parent {
            Some(parent) => parent.clone(),
            None => {
                let folder = self.temp_folder()?;
                debug!(node = %node.node_ref, parent = %incoming.parent, "parent missing, parking node");
                self.orphans
                    .entry(Self::live(&incoming.parent))
                    .or_default()
                    .push(incoming.clone());
                folder
            }
        };

        let props = self.desired_properties(node, None)?;
        let assoc = self.ctx.store.create_node(
            &parent,
            incoming.assoc_type.clone(),
            incoming.qname.clone(),
            node.node_type.clone(),
            Some(node.node_ref.id().to_string()),
            props,
        )?;
        for aspect in self.desired_aspects(node, None)? {
            self.ctx
                .store
                .add_aspect(&assoc.child, aspect, PropertyMap::new())?;
        }
        let repository_id = self.header()?.repository_id.clone();
        self.ctx
            .alien
            .on_create_child(&assoc, &repository_id, true)?;

        let path = self.ctx.store.get_path(&assoc.child)?;
        debug!(node = %assoc.child, path = %path, "node created");
        self.report.write_created(&assoc.child, &parent, &path);
        self.changes.record_created(&assoc.child);
        Ok(assoc.child)
    }
}

impl ManifestProcessor for PrimaryManifestProcessor<'_> {
    fn name(&self) -> &'static str {
        "primary"
    }

    fn process_header(&mut self, header: &ManifestHeader) -> Result<(), TransferError> {
        header.check_version()?;
        self.header = Some(header.clone());
        Ok(())
    }

    fn process_normal_node(&mut self, node: &NormalNode) -> Result<(), TransferError> {
        let pair = self.ctx.resolver.resolve(
            &node.node_ref,
            Some(&node.primary_parent_assoc),
            &node.parent_path,
        )?;
        let target = match (&pair.resolved_child, &pair.resolved_parent) {
            (Some(child), parent) => {
                self.update_node(node, child, parent.as_ref())?;
                child.clone()
            }
            (None, Some(parent)) => {
                let archived = node.node_ref.in_store(StoreRef::archive());
                if self.ctx.store.exists(&archived)? {
                    self.restore_node(node, &archived, parent)?
                } else {
                    self.create_node(node, Some(parent))?
                }
            }
            (None, None) => self.create_node(node, None)?,
        };
        self.adopt_orphans(&target)
    }

    fn process_deleted_node(&mut self, node: &DeletedNode) -> Result<(), TransferError> {
        let pair = self.ctx.resolver.resolve(
            &node.node_ref,
            node.primary_parent_assoc.as_ref(),
            &node.parent_path,
        )?;
        let Some(target) = pair.resolved_child else {
            debug!(node = %node.node_ref, "deleted node not present, nothing to do");
            return Ok(());
        };
        let store = self.ctx.store;
        let path = store.get_path(&target)?;

        if self.ctx.alien.is_alien(&target)? {
            let repository_id = self.header()?.repository_id.clone();
            let deleted = self.ctx.alien.prune_node(&target, &repository_id)?;
            for removed in &deleted {
                self.report.write_deleted(removed, &path);
                self.changes.record_deleted(removed);
            }
            if store.exists(&target)? {
                self.report.write_comment(&format!(
                    "{} kept: still invaded by other repositories",
                    target
                ));
            }
            return Ok(());
        }

        if self.ctx.config.archive_deleted && store.supports_archive() {
            let archived = store.archive_node(&target)?;
            debug!(node = %target, archived = %archived, "node archived");
        } else {
            self.ctx.alien.delete_node(&target)?;
            debug!(node = %target, "node deleted");
        }
        self.report.write_deleted(&target, &path);
        self.changes.record_deleted(&target);
        Ok(())
    }

    fn end_manifest(&mut self) -> Result<(), TransferError> {
        if let Some(first) = self
            .orphans
            .values()
            .flatten()
            .next()
            .map(|assoc| Self::live(&assoc.child))
        {
            return Err(TransferError::Orphans {
                count: self.orphan_count(),
                first,
            });
        }
        if let Some(folder) = self.temp_folder.take() {
            if self.ctx.store.get_child_assocs(&folder)?.is_empty() {
                self.ctx.store.delete_node(&folder)?;
                debug!(folder = %folder, "temp folder removed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::testing::{Harness, SOURCE};
    use crate::report::JsonReportWriter;
    use reposync_store::ContentStore;

    fn run(
        harness: &Harness,
        header: &ManifestHeader,
        nodes: &[NormalNode],
    ) -> (ChangeCapture, Result<(), TransferError>) {
        let resolver = harness.resolver();
        let ctx = harness.ctx(&resolver);
        let mut report = JsonReportWriter::new();
        let mut changes = ChangeCapture::default();
        let result = {
            let mut pass = PrimaryManifestProcessor::new(&ctx, &mut report, &mut changes);
            let mut result = pass.process_header(header);
            for node in nodes {
                if result.is_ok() {
                    result = pass.process_normal_node(node);
                }
            }
            result.and_then(|_| pass.end_manifest())
        };
        (changes, result)
    }

    mod create {
        use super::*;

        #[test]
        fn test_creates_tree_with_same_ids() {
            let h = Harness::new();
            let top = h.folder("top", None);
            let child = h.folder("child", Some(&top));
            let file = h.file("file.txt", &child, b"hello", 10);
            h.stage(&file, b"hello");
            let header = ManifestHeader::new(SOURCE, false, 3);

            let (changes, result) = run(&h, &header, &[top.clone(), child.clone(), file.clone()]);
            result.unwrap();
            assert_eq!(changes.created.len(), 3);

            let dest = Harness::live(&file);
            let path = h.store.get_path(&dest).unwrap();
            assert_eq!(path.to_string(), "/cm:top/cm:child/cm:file.txt");
            let props = h.store.get_properties(&dest).unwrap();
            let data = props[&content::PROP_CONTENT].as_content().unwrap().clone();
            assert_eq!(h.content.get(&data.content_url).unwrap(), b"hello".to_vec());
            assert_eq!(
                props[&transfer::PROP_FROM_REPOSITORY_ID].as_text(),
                Some(SOURCE)
            );
            assert!(h
                .store
                .has_aspect(&dest, &transfer::ASPECT_TRANSFERRED)
                .unwrap());
        }

        #[test]
        fn test_unstaged_content_fails_node() {
            let h = Harness::new();
            let top = h.folder("top", None);
            let file = h.file("file.txt", &top, b"hello", 10);
            let header = ManifestHeader::new(SOURCE, false, 2);
            let (_, result) = run(&h, &header, &[top, file]);
            let err = result.unwrap_err();
            assert!(matches!(err, TransferError::ContentNotStaged { .. }));
            assert!(!err.is_fatal());
        }

        #[test]
        fn test_read_only_transfer_locks_nodes() {
            let h = Harness::new();
            let top = h.folder("top", None);
            let mut header = ManifestHeader::new(SOURCE, false, 1);
            header.is_read_only = true;
            run(&h, &header, &[top.clone()]).1.unwrap();
            let dest = Harness::live(&top);
            assert!(h.store.has_aspect(&dest, &content::ASPECT_LOCKABLE).unwrap());
            assert_eq!(
                h.store
                    .get_property(&dest, &content::PROP_LOCK_TYPE)
                    .unwrap()
                    .and_then(|v| v.as_text().map(str::to_string)),
                Some(content::LOCK_TYPE_READ_ONLY.to_string())
            );
        }

        #[test]
        fn test_origin_repository_is_carried_through() {
            let h = Harness::new();
            let mut top = h.folder("top", None);
            top.properties
                .insert(transfer::PROP_REPOSITORY_ID, PropertyValue::from("origin"));
            let header = ManifestHeader::new(SOURCE, false, 1);
            run(&h, &header, &[top.clone()]).1.unwrap();
            let props = h.store.get_properties(&Harness::live(&top)).unwrap();
            assert_eq!(props[&transfer::PROP_REPOSITORY_ID].as_text(), Some("origin"));
            assert_eq!(props[&transfer::PROP_FROM_REPOSITORY_ID].as_text(), Some(SOURCE));
        }
    }

    mod update {
        use super::*;

        #[test]
        fn test_second_application_changes_nothing() {
            let h = Harness::new();
            let top = h.folder("top", None);
            let file = h.file("file.txt", &top, b"v1", 10);
            h.stage(&file, b"v1");
            let header = ManifestHeader::new(SOURCE, false, 2);
            run(&h, &header, &[top.clone(), file.clone()]).1.unwrap();

            let (changes, result) = run(&h, &header, &[top, file]);
            result.unwrap();
            assert!(changes.is_empty());
        }

        #[test]
        fn test_newer_content_replaces_older() {
            let h = Harness::new();
            let top = h.folder("top", None);
            let file = h.file("file.txt", &top, b"v1", 10);
            h.stage(&file, b"v1");
            let header = ManifestHeader::new(SOURCE, false, 2);
            run(&h, &header, &[top.clone(), file]).1.unwrap();

            let newer = h.file("file.txt", &top, b"v2", 20);
            h.stage(&newer, b"v2");
            let (changes, result) = run(&h, &header, &[top, newer.clone()]);
            result.unwrap();
            let dest = Harness::live(&newer);
            assert!(changes.updated.contains(&dest));
            let data = h
                .store
                .get_property(&dest, &content::PROP_CONTENT)
                .unwrap()
                .and_then(|v| v.as_content().cloned())
                .unwrap();
            assert_eq!(h.content.get(&data.content_url).unwrap(), b"v2".to_vec());
        }

        #[test]
        fn test_moved_node_is_reparented() {
            let h = Harness::new();
            let a = h.folder("a", None);
            let b = h.folder("b", None);
            let x = h.folder("x", Some(&a));
            let header = ManifestHeader::new(SOURCE, false, 3);
            run(&h, &header, &[a, b.clone(), x]).1.unwrap();

            let moved = h.folder("x", Some(&b));
            let (changes, result) = run(&h, &header, &[moved.clone()]);
            result.unwrap();
            let dest = Harness::live(&moved);
            assert!(changes.updated.contains(&dest));
            assert_eq!(h.store.get_path(&dest).unwrap().to_string(), "/cm:b/cm:x");
        }

        #[test]
        fn test_local_only_state_survives_update() {
            let h = Harness::new();
            let top = h.folder("top", None);
            let header = ManifestHeader::new(SOURCE, false, 1);
            run(&h, &header, &[top.clone()]).1.unwrap();
            let dest = Harness::live(&top);
            h.store
                .set_property(&dest, QName::new("sys", "localFlag"), PropertyValue::Bool(true))
                .unwrap();

            let mut renamed = top.clone();
            renamed
                .properties
                .insert(QName::new("cm", "title"), PropertyValue::from("Top"));
            run(&h, &header, &[renamed]).1.unwrap();
            let props = h.store.get_properties(&dest).unwrap();
            assert_eq!(props[&QName::new("sys", "localFlag")], PropertyValue::Bool(true));
            assert_eq!(props[&QName::new("cm", "title")].as_text(), Some("Top"));
        }
    }

    mod orphans {
        use super::*;

        #[test]
        fn test_child_before_parent_is_adopted() {
            let h = Harness::new();
            let top = h.folder("top", None);
            let child = h.folder("child", Some(&top));
            let header = ManifestHeader::new(SOURCE, false, 2);

            // Parent id unknown on the destination and its path does not
            // exist yet.
            let (changes, result) = run(&h, &header, &[child.clone(), top.clone()]);
            result.unwrap();
            assert_eq!(changes.created.len(), 2);
            let dest = Harness::live(&child);
            assert_eq!(h.store.get_path(&dest).unwrap().to_string(), "/cm:top/cm:child");
            let root_children = h.store.get_child_assocs(&h.root).unwrap();
            assert_eq!(root_children.len(), 1, "temp folder must be removed");
        }

        #[test]
        fn test_missing_parent_fails_at_end() {
            let h = Harness::new();
            let top = h.folder("top", None);
            let child = h.folder("child", Some(&top));
            let header = ManifestHeader::new(SOURCE, false, 1);
            let (_, result) = run(&h, &header, &[child]);
            let err = result.unwrap_err();
            assert!(err.to_string().contains("orphan"));
            assert!(!err.is_fatal());
        }
    }

    mod delete {
        use super::*;

        fn delete(h: &Harness, header: &ManifestHeader, node: &NormalNode) -> ChangeCapture {
            let resolver = h.resolver();
            let ctx = h.ctx(&resolver);
            let mut report = JsonReportWriter::new();
            let mut changes = ChangeCapture::default();
            let mut pass = PrimaryManifestProcessor::new(&ctx, &mut report, &mut changes);
            pass.process_header(header).unwrap();
            pass.process_deleted_node(&DeletedNode {
                node_ref: node.node_ref.clone(),
                parent_path: node.parent_path.clone(),
                primary_parent_assoc: Some(node.primary_parent_assoc.clone()),
            })
            .unwrap();
            pass.end_manifest().unwrap();
            changes
        }

        #[test]
        fn test_deleted_node_is_archived_then_restored() {
            let h = Harness::new();
            let top = h.folder("top", None);
            let header = ManifestHeader::new(SOURCE, false, 1);
            run(&h, &header, &[top.clone()]).1.unwrap();

            let changes = delete(&h, &header, &top);
            let dest = Harness::live(&top);
            assert!(changes.deleted.contains(&dest));
            assert!(!h.store.exists(&dest).unwrap());
            assert!(h.store.exists(&dest.in_store(StoreRef::archive())).unwrap());

            // Deleting again is a no-op.
            assert!(delete(&h, &header, &top).is_empty());

            let (changes, result) = run(&h, &header, &[top]);
            result.unwrap();
            assert!(changes.created.contains(&dest));
            assert!(h.store.exists(&dest).unwrap());
        }

        #[test]
        fn test_hard_delete_without_archive() {
            let mut h = Harness::new();
            h.config.archive_deleted = false;
            let top = h.folder("top", None);
            let header = ManifestHeader::new(SOURCE, false, 1);
            run(&h, &header, &[top.clone()]).1.unwrap();
            delete(&h, &header, &top);
            let dest = Harness::live(&top);
            assert!(!h.store.exists(&dest).unwrap());
            assert!(!h.store.exists(&dest.in_store(StoreRef::archive())).unwrap());
        }

        #[test]
        fn test_alien_node_is_pruned_not_deleted() {
            let h = Harness::new();
            let top = h.folder("top", None);
            let owned = h.folder("owned", Some(&top));
            let header = ManifestHeader::new(SOURCE, false, 2);
            run(&h, &header, &[top.clone(), owned.clone()]).1.unwrap();

            // Content from another repository lands under the folder.
            let other = ManifestHeader::new("other-repo", false, 1);
            let foreign = h.folder("foreign", Some(&top));
            run(&h, &other, &[foreign.clone()]).1.unwrap();
            let dest_top = Harness::live(&top);
            assert!(h.alien.is_alien(&dest_top).unwrap());

            let changes = delete(&h, &header, &top);
            assert!(changes.deleted.contains(&Harness::live(&owned)));
            assert!(h.store.exists(&dest_top).unwrap());
            assert!(h.store.exists(&Harness::live(&foreign)).unwrap());
        }
    }
}
