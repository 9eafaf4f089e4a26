//! Well-known qualified names.

/// Core content model (`cm:` and `sys:`).
pub mod content {
    use crate::types::QName;

    /// Folder type.
    pub const TYPE_FOLDER: QName = QName::from_static("cm:folder");
    /// Content (document) type.
    pub const TYPE_CONTENT: QName = QName::from_static("cm:content");
    /// Primary containment association.
    pub const ASSOC_CONTAINS: QName = QName::from_static("cm:contains");
    /// Node name, unique among the primary children of a folder.
    pub const PROP_NAME: QName = QName::from_static("cm:name");
    /// Main content property.
    pub const PROP_CONTENT: QName = QName::from_static("cm:content");
    /// Last modification time, paired with every content property.
    pub const PROP_MODIFIED: QName = QName::from_static("cm:modified");
    /// Lockable aspect.
    pub const ASPECT_LOCKABLE: QName = QName::from_static("cm:lockable");
    /// Lock type property of the lockable aspect.
    pub const PROP_LOCK_TYPE: QName = QName::from_static("cm:lockType");
    /// Read-only lock type value.
    pub const LOCK_TYPE_READ_ONLY: &str = "READ_ONLY_LOCK";
    /// Marks a node that lives in the archive store.
    pub const ASPECT_ARCHIVED: QName = QName::from_static("sys:archived");
    /// Original parent of an archived node.
    pub const PROP_ARCHIVED_ORIGINAL_PARENT: QName =
        QName::from_static("sys:archivedOriginalParent");
    /// Time the node was archived.
    pub const PROP_ARCHIVED_DATE: QName = QName::from_static("sys:archivedDate");
}

/// Transfer model (`trx:`).
pub mod transfer {
    use crate::types::QName;

    /// Applied to every node created or updated by an inbound transfer.
    pub const ASPECT_TRANSFERRED: QName = QName::from_static("trx:transferred");
    /// Repository where the node originated.
    pub const PROP_REPOSITORY_ID: QName = QName::from_static("trx:repositoryId");
    /// Repository that transferred (and owns) the node here.
    pub const PROP_FROM_REPOSITORY_ID: QName = QName::from_static("trx:fromRepositoryId");
    /// Applied while a node is invaded by content from other repositories.
    pub const ASPECT_ALIEN: QName = QName::from_static("trx:alien");
    /// Multi-valued set of repositories invading the node.
    pub const PROP_INVADED_BY: QName = QName::from_static("trx:invadedBy");
    /// Type of the per-transfer folder that parks orphans.
    pub const TYPE_TEMP_FOLDER: QName = QName::from_static("trx:tempFolder");
}

use crate::types::QName;

/// Properties that belong to the receiving repository and never travel in a
/// manifest: the transfer bookkeeping and system namespaces.
pub fn is_local_only(qname: &QName) -> bool {
    matches!(qname.prefix(), Some("trx") | Some("sys"))
}
