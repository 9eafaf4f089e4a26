//! Manifest records describing one source-side snapshot.
//!
//! A manifest is a header followed by node records in stream order. Each
//! pass of the receiver walks the records once, in that order.

pub mod codec;
pub mod factory;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use reposync_store::model::content;
use reposync_store::{
    AssociationRef, ChildAssociationRef, ContentData, NodePath, NodeRef, PropertyMap, QName,
};

use crate::error::TransferError;

pub use codec::{ManifestReader, ManifestWriter};
pub use factory::ManifestNodeFactory;

/// Manifest format version written and understood by this crate.
pub const MANIFEST_VERSION: u32 = 1;

/// Transfer metadata, read once before any node record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestHeader {
    /// Identity of the sending repository.
    pub repository_id: String,
    /// Full transfer; the tertiary pass deletes nodes missing from it.
    pub is_sync: bool,
    /// Stamp nodes created or updated by this transfer read-only.
    #[serde(default)]
    pub is_read_only: bool,
    /// Number of node records that follow.
    pub node_count: u64,
    /// Microseconds since the Unix epoch.
    pub created_at_us: u64,
    /// Format version.
    pub version: u32,
}

impl ManifestHeader {
    /// Creates a header for the current format version.
    pub fn new(repository_id: impl Into<String>, is_sync: bool, node_count: u64) -> Self {
        Self {
            repository_id: repository_id.into(),
            is_sync,
            is_read_only: false,
            node_count,
            created_at_us: crate::progress::current_time_us(),
            version: MANIFEST_VERSION,
        }
    }

    /// Fails with a fatal error when the version is not understood.
    pub fn check_version(&self) -> Result<(), TransferError> {
        if self.version != MANIFEST_VERSION {
            return Err(TransferError::VersionMismatch {
                expected: MANIFEST_VERSION,
                got: self.version,
            });
        }
        Ok(())
    }
}

/// A live source node.
///
/// `parent_assocs` and `child_assocs` list every structural link of the
/// node, the primary ones included; the secondary pass reconciles only the
/// non-primary links, the tertiary pass reads the primary children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalNode {
    /// Stable identity shared by source and destination.
    pub node_ref: NodeRef,
    /// Node type.
    pub node_type: QName,
    /// Properties, content references included.
    pub properties: PropertyMap,
    /// Applied aspects.
    pub aspects: BTreeSet<QName>,
    /// The owning parent link.
    pub primary_parent_assoc: ChildAssociationRef,
    /// Path of the primary parent from its store root.
    pub parent_path: NodePath,
    /// Links where this node is the child.
    #[serde(default)]
    pub parent_assocs: Vec<ChildAssociationRef>,
    /// Links where this node is the parent.
    #[serde(default)]
    pub child_assocs: Vec<ChildAssociationRef>,
    /// Peer links where this node is the source.
    #[serde(default)]
    pub target_assocs: Vec<AssociationRef>,
    /// Peer links where this node is the target.
    #[serde(default)]
    pub source_assocs: Vec<AssociationRef>,
}

impl NormalNode {
    /// Content-valued properties.
    pub fn content_properties(&self) -> impl Iterator<Item = (&QName, &ContentData)> {
        self.properties
            .iter()
            .filter_map(|(qname, value)| value.as_content().map(|c| (qname, c)))
    }

    /// The modification timestamp paired with every content property.
    pub fn modified(&self) -> Option<u64> {
        self.properties
            .get(&content::PROP_MODIFIED)
            .and_then(|v| v.as_date())
    }
}

/// A node deleted at the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedNode {
    /// Stable identity of the deleted node.
    pub node_ref: NodeRef,
    /// Path of its former parent.
    pub parent_path: NodePath,
    /// Its former owning link, when still known.
    #[serde(default)]
    pub primary_parent_assoc: Option<ChildAssociationRef>,
}

/// One node record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManifestNode {
    /// A live node.
    Normal(NormalNode),
    /// A node deleted at the source.
    Deleted(DeletedNode),
}

impl ManifestNode {
    /// Identity of the node the record describes.
    pub fn node_ref(&self) -> &NodeRef {
        match self {
            ManifestNode::Normal(node) => &node.node_ref,
            ManifestNode::Deleted(node) => &node.node_ref,
        }
    }

    /// Path of the node's primary parent.
    pub fn parent_path(&self) -> &NodePath {
        match self {
            ManifestNode::Normal(node) => &node.parent_path,
            ManifestNode::Deleted(node) => &node.parent_path,
        }
    }

    /// The owning link, if known.
    pub fn primary_parent_assoc(&self) -> Option<&ChildAssociationRef> {
        match self {
            ManifestNode::Normal(node) => Some(&node.primary_parent_assoc),
            ManifestNode::Deleted(node) => node.primary_parent_assoc.as_ref(),
        }
    }
}
