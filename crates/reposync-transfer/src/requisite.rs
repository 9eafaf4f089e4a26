//! Pre-flight pass: which content does the destination still need?

use serde::{Deserialize, Serialize};

use reposync_store::model::content;
use reposync_store::{NodeRef, NodeStore, PropertyMap, PropertyValue, QName};

use crate::error::TransferError;
use crate::manifest::{DeletedNode, ManifestHeader, NormalNode};
use crate::processor::ManifestProcessor;
use crate::resolver::CorrespondingNodeResolver;

/// Decides whether a content property must be sent.
///
/// Content is missing when the destination node is absent, when it lacks
/// the property, or when both `cm:modified` timestamps are known and the
/// source is strictly newer. Ties and unknown timestamps count as present.
pub fn is_content_missing(
    destination: Option<&PropertyMap>,
    qname: &QName,
    source_modified: Option<u64>,
) -> bool {
    let Some(properties) = destination else {
        return true;
    };
    match properties.get(qname) {
        None | Some(PropertyValue::Null) => return true,
        Some(_) => {}
    }
    let destination_modified = properties
        .get(&content::PROP_MODIFIED)
        .and_then(PropertyValue::as_date);
    match (source_modified, destination_modified) {
        (Some(source), Some(destination)) => source > destination,
        _ => false,
    }
}

/// One content part the sender must transmit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingContent {
    /// The node carrying the content.
    pub node: NodeRef,
    /// The content property.
    pub qname: QName,
    /// Part name the content travels under.
    pub part_name: String,
}

/// Receives missing-content declarations.
pub trait RequisiteWriter {
    /// Called once before any declaration.
    fn start(&mut self);
    /// One missing content part.
    fn missing_content(&mut self, node: &NodeRef, qname: &QName, part_name: &str);
    /// Called once after the last declaration.
    fn end(&mut self);
}

/// Collects declarations in memory.
#[derive(Debug, Default)]
pub struct VecRequisiteWriter {
    missing: Vec<MissingContent>,
    finished: bool,
}

impl VecRequisiteWriter {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `end` was called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Declarations so far.
    pub fn missing(&self) -> &[MissingContent] {
        &self.missing
    }

    /// Takes the declarations.
    pub fn into_missing(self) -> Vec<MissingContent> {
        self.missing
    }
}

impl RequisiteWriter for VecRequisiteWriter {
    fn start(&mut self) {
        self.missing.clear();
        self.finished = false;
    }

    fn missing_content(&mut self, node: &NodeRef, qname: &QName, part_name: &str) {
        self.missing.push(MissingContent {
            node: node.clone(),
            qname: qname.clone(),
            part_name: part_name.to_string(),
        });
    }

    fn end(&mut self) {
        self.finished = true;
    }
}

/// Read-only pass emitting the content the destination lacks.
pub struct RequisiteProcessor<'a> {
    store: &'a dyn NodeStore,
    resolver: &'a dyn CorrespondingNodeResolver,
    writer: &'a mut dyn RequisiteWriter,
}

impl<'a> RequisiteProcessor<'a> {
    /// Creates the pass.
    pub fn new(
        store: &'a dyn NodeStore,
        resolver: &'a dyn CorrespondingNodeResolver,
        writer: &'a mut dyn RequisiteWriter,
    ) -> Self {
        Self {
            store,
            resolver,
            writer,
        }
    }
}

impl ManifestProcessor for RequisiteProcessor<'_> {
    fn name(&self) -> &'static str {
        "requisite"
    }

    fn start_manifest(&mut self) -> Result<(), TransferError> {
        self.writer.start();
        Ok(())
    }

    fn process_header(&mut self, header: &ManifestHeader) -> Result<(), TransferError> {
        header.check_version()
    }

    fn process_normal_node(&mut self, node: &NormalNode) -> Result<(), TransferError> {
        let pair = self.resolver.resolve(
            &node.node_ref,
            Some(&node.primary_parent_assoc),
            &node.parent_path,
        )?;
        let destination = match &pair.resolved_child {
            Some(child) => Some(self.store.get_properties(child)?),
            None => None,
        };
        let modified = node.modified();
        for (qname, data) in node.content_properties() {
            if is_content_missing(destination.as_ref(), qname, modified) {
                self.writer
                    .missing_content(&node.node_ref, qname, data.part_name());
            }
        }
        Ok(())
    }

    fn process_deleted_node(&mut self, _node: &DeletedNode) -> Result<(), TransferError> {
        Ok(())
    }

    fn end_manifest(&mut self) -> Result<(), TransferError> {
        self.writer.end();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_store::ContentData;

    fn with_content(modified: Option<u64>) -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert(
            content::PROP_CONTENT,
            PropertyValue::Content(ContentData::new("store://aa/aa", "text/plain", 1, "UTF-8")),
        );
        if let Some(m) = modified {
            props.insert(content::PROP_MODIFIED, PropertyValue::Date(m));
        }
        props
    }

    mod staleness {
        use super::*;

        #[test]
        fn test_missing_destination_node() {
            assert!(is_content_missing(None, &content::PROP_CONTENT, Some(5)));
        }

        #[test]
        fn test_missing_property() {
            let props = PropertyMap::new();
            assert!(is_content_missing(Some(&props), &content::PROP_CONTENT, Some(5)));
            let mut null = PropertyMap::new();
            null.insert(content::PROP_CONTENT, PropertyValue::Null);
            assert!(is_content_missing(Some(&null), &content::PROP_CONTENT, None));
        }

        #[test]
        fn test_strictly_newer_source() {
            let props = with_content(Some(10));
            assert!(is_content_missing(Some(&props), &content::PROP_CONTENT, Some(11)));
            assert!(!is_content_missing(Some(&props), &content::PROP_CONTENT, Some(10)));
            assert!(!is_content_missing(Some(&props), &content::PROP_CONTENT, Some(9)));
        }

        #[test]
        fn test_unknown_timestamps_count_as_present() {
            let props = with_content(None);
            assert!(!is_content_missing(Some(&props), &content::PROP_CONTENT, Some(11)));
            let props = with_content(Some(10));
            assert!(!is_content_missing(Some(&props), &content::PROP_CONTENT, None));
        }
    }

    mod writer {
        use super::*;
        use reposync_store::StoreRef;

        #[test]
        fn test_collects_between_start_and_end() {
            let mut writer = VecRequisiteWriter::new();
            writer.start();
            writer.missing_content(
                &NodeRef::new(StoreRef::workspace(), "n"),
                &content::PROP_CONTENT,
                "abc",
            );
            assert!(!writer.is_finished());
            writer.end();
            assert!(writer.is_finished());
            let missing = writer.into_missing();
            assert_eq!(missing.len(), 1);
            assert_eq!(missing[0].part_name, "abc");
        }
    }
}
