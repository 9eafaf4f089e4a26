//! Identity and association types shared by the source and destination sides.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Identifies one store inside a repository, e.g. `workspace://SpacesStore`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoreRef {
    protocol: String,
    identifier: String,
}

impl StoreRef {
    /// Creates a store reference from its protocol and identifier.
    pub fn new(protocol: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            identifier: identifier.into(),
        }
    }

    /// The live store that holds the content tree.
    pub fn workspace() -> Self {
        Self::new("workspace", "SpacesStore")
    }

    /// The archive (trash) store that holds soft-deleted nodes.
    pub fn archive() -> Self {
        Self::new("archive", "SpacesStore")
    }

    /// Returns the protocol part.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Returns the identifier part.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl fmt::Display for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.identifier)
    }
}

impl FromStr for StoreRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (protocol, identifier) = s
            .split_once("://")
            .ok_or_else(|| format!("invalid store reference '{}'", s))?;
        if protocol.is_empty() || identifier.is_empty() || identifier.contains('/') {
            return Err(format!("invalid store reference '{}'", s));
        }
        Ok(StoreRef::new(protocol, identifier))
    }
}

impl TryFrom<String> for StoreRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StoreRef> for String {
    fn from(value: StoreRef) -> Self {
        value.to_string()
    }
}

/// A node identity: the store it lives in plus a stable id.
///
/// The id is preserved across repositories, so a transferred node has the
/// same id on the source and on the destination.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeRef {
    store: StoreRef,
    id: String,
}

impl NodeRef {
    /// Creates a node reference.
    pub fn new(store: StoreRef, id: impl Into<String>) -> Self {
        Self {
            store,
            id: id.into(),
        }
    }

    /// Creates a reference in `store` with a fresh random id.
    pub fn generate(store: StoreRef) -> Self {
        Self::new(store, uuid::Uuid::new_v4().to_string())
    }

    /// Returns the store part.
    pub fn store(&self) -> &StoreRef {
        &self.store
    }

    /// Returns the stable id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Same id, different store.
    pub fn in_store(&self, store: StoreRef) -> NodeRef {
        NodeRef::new(store, self.id.clone())
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store, self.id)
    }
}

impl FromStr for NodeRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (store, id) = s
            .rsplit_once('/')
            .ok_or_else(|| format!("invalid node reference '{}'", s))?;
        if id.is_empty() {
            return Err(format!("invalid node reference '{}'", s));
        }
        Ok(NodeRef::new(store.parse()?, id))
    }
}

impl TryFrom<String> for NodeRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeRef> for String {
    fn from(value: NodeRef) -> Self {
        value.to_string()
    }
}

/// A prefixed qualified name such as `cm:name`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QName(Cow<'static, str>);

impl QName {
    /// Builds a qualified name from a static string, usable in `const` items.
    pub const fn from_static(name: &'static str) -> Self {
        QName(Cow::Borrowed(name))
    }

    /// Builds `prefix:local_name`.
    pub fn new(prefix: &str, local_name: &str) -> Self {
        QName(Cow::Owned(format!("{}:{}", prefix, local_name)))
    }

    /// The namespace prefix, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.0.split_once(':').map(|(p, _)| p)
    }

    /// The local part after the prefix.
    pub fn local_name(&self) -> &str {
        match self.0.split_once(':') {
            Some((_, local)) => local,
            None => &self.0,
        }
    }

    /// Returns the full prefixed form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QName {
    fn from(value: &str) -> Self {
        QName(Cow::Owned(value.to_string()))
    }
}

/// Materialized path from a store root: the association qnames of each step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(Vec<QName>);

impl NodePath {
    /// The path of a store root.
    pub fn root() -> Self {
        NodePath(Vec::new())
    }

    /// Creates a path from its elements.
    pub fn new(elements: Vec<QName>) -> Self {
        NodePath(elements)
    }

    /// Returns the path elements, root first.
    pub fn elements(&self) -> &[QName] {
        &self.0
    }

    /// Returns a new path with one more element.
    pub fn child(&self, qname: QName) -> NodePath {
        let mut elements = self.0.clone();
        elements.push(qname);
        NodePath(elements)
    }

    /// Returns true for the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of steps from the root.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the root path.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for element in &self.0 {
            write!(f, "/{}", element)?;
        }
        Ok(())
    }
}

/// A parent/child link. Exactly one of a node's parent links is primary
/// (the owning one); the rest are secondary.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChildAssociationRef {
    /// Association type, e.g. `cm:contains`.
    pub assoc_type: QName,
    /// Parent end.
    pub parent: NodeRef,
    /// Association name; the path element of the child.
    pub qname: QName,
    /// Child end.
    pub child: NodeRef,
    /// Whether this is the owning link.
    pub is_primary: bool,
}

impl ChildAssociationRef {
    /// Creates a child association.
    pub fn new(
        assoc_type: QName,
        parent: NodeRef,
        qname: QName,
        child: NodeRef,
        is_primary: bool,
    ) -> Self {
        Self {
            assoc_type,
            parent,
            qname,
            child,
            is_primary,
        }
    }
}

impl fmt::Display for ChildAssociationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -[{} {}{}]-> {}",
            self.parent,
            self.assoc_type,
            self.qname,
            if self.is_primary { " primary" } else { "" },
            self.child
        )
    }
}

/// A directed peer link with no ownership semantics. Two peer associations
/// are the same link when endpoints and type match.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssociationRef {
    /// Source endpoint.
    pub source: NodeRef,
    /// Association type.
    pub assoc_type: QName,
    /// Target endpoint.
    pub target: NodeRef,
}

impl AssociationRef {
    /// Creates a peer association.
    pub fn new(source: NodeRef, assoc_type: QName, target: NodeRef) -> Self {
        Self {
            source,
            assoc_type,
            target,
        }
    }
}

impl fmt::Display for AssociationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.source, self.assoc_type, self.target)
    }
}
