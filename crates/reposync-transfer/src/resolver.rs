//! Maps source nodes to their destination counterparts.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use reposync_store::{ChildAssociationRef, NodePath, NodeRef, NodeStore, StoreError, StoreRef};

/// Destination parent and child for one source node. Either side may be
/// unresolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedParentChildPair {
    /// Destination node that should be the primary parent.
    pub resolved_parent: Option<NodeRef>,
    /// Destination node representing the source node.
    pub resolved_child: Option<NodeRef>,
}

impl ResolvedParentChildPair {
    /// Both sides resolved.
    pub fn is_fully_resolved(&self) -> bool {
        self.resolved_parent.is_some() && self.resolved_child.is_some()
    }
}

/// Resolves a (node, primary parent link, parent path) triple.
pub trait CorrespondingNodeResolver: Send + Sync {
    /// Resolves the destination counterparts of a source node and its parent.
    fn resolve(
        &self,
        node_ref: &NodeRef,
        primary_parent_assoc: Option<&ChildAssociationRef>,
        parent_path: &NodePath,
    ) -> Result<ResolvedParentChildPair, StoreError>;
}

/// Looks nodes up by their preserved id, and parents by id or by walking
/// the parent path from the destination root.
pub struct BasicCorrespondingNodeResolver {
    store: Arc<dyn NodeStore>,
}

impl BasicCorrespondingNodeResolver {
    /// Creates a resolver over the destination store.
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }

    fn live(node: &NodeRef) -> NodeRef {
        node.in_store(StoreRef::workspace())
    }

    fn resolve_path(&self, path: &NodePath) -> Result<Option<NodeRef>, StoreError> {
        let mut current = self.store.root_node(&StoreRef::workspace())?;
        for element in path.elements() {
            match self.store.get_child_by_qname(&current, element)? {
                Some(assoc) => current = assoc.child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

impl CorrespondingNodeResolver for BasicCorrespondingNodeResolver {
    fn resolve(
        &self,
        node_ref: &NodeRef,
        primary_parent_assoc: Option<&ChildAssociationRef>,
        parent_path: &NodePath,
    ) -> Result<ResolvedParentChildPair, StoreError> {
        let child = Self::live(node_ref);
        let resolved_child = if self.store.exists(&child)? {
            Some(child)
        } else {
            None
        };

        let by_id = match primary_parent_assoc {
            Some(assoc) => {
                let parent = Self::live(&assoc.parent);
                if self.store.exists(&parent)? {
                    Some(parent)
                } else {
                    None
                }
            }
            None => None,
        };
        let resolved_parent = match by_id {
            Some(parent) => Some(parent),
            None => self.resolve_path(parent_path)?,
        };

        debug!(
            node = %node_ref,
            child = resolved_child.is_some(),
            parent = resolved_parent.is_some(),
            "resolved corresponding node"
        );
        Ok(ResolvedParentChildPair {
            resolved_parent,
            resolved_child,
        })
    }
}

/// Caches fully resolved pairs of a delegate resolver. One instance serves
/// one transfer.
pub struct CachingCorrespondingNodeResolver<R> {
    delegate: R,
    cache: DashMap<NodeRef, ResolvedParentChildPair>,
}

impl<R: CorrespondingNodeResolver> CachingCorrespondingNodeResolver<R> {
    /// Wraps `delegate`.
    pub fn new(delegate: R) -> Self {
        Self {
            delegate,
            cache: DashMap::new(),
        }
    }

    /// Returns true if a pair is cached for the node.
    pub fn is_cached(&self, node_ref: &NodeRef) -> bool {
        self.cache.contains_key(node_ref)
    }

    /// Number of cached pairs.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl<R: CorrespondingNodeResolver> CorrespondingNodeResolver for CachingCorrespondingNodeResolver<R> {
    fn resolve(
        &self,
        node_ref: &NodeRef,
        primary_parent_assoc: Option<&ChildAssociationRef>,
        parent_path: &NodePath,
    ) -> Result<ResolvedParentChildPair, StoreError> {
        if let Some(hit) = self.cache.get(node_ref) {
            return Ok(hit.value().clone());
        }
        let pair = self
            .delegate
            .resolve(node_ref, primary_parent_assoc, parent_path)?;
        if pair.is_fully_resolved() {
            self.cache.insert(node_ref.clone(), pair.clone());
        }
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_store::model::content;
    use reposync_store::{MemoryNodeStore, PropertyMap, PropertyValue, QName};

    fn folder(store: &dyn NodeStore, parent: &NodeRef, name: &str, id: &str) -> NodeRef {
        let mut props = PropertyMap::new();
        props.insert(content::PROP_NAME, PropertyValue::from(name));
        store
            .create_node(
                parent,
                content::ASSOC_CONTAINS,
                QName::new("cm", name),
                content::TYPE_FOLDER,
                Some(id.to_string()),
                props,
            )
            .unwrap()
            .child
    }

    fn assoc(parent: &str, name: &str, child: &str) -> ChildAssociationRef {
        ChildAssociationRef::new(
            content::ASSOC_CONTAINS,
            NodeRef::new(StoreRef::workspace(), parent),
            QName::new("cm", name),
            NodeRef::new(StoreRef::workspace(), child),
            true,
        )
    }

    fn node(id: &str) -> NodeRef {
        NodeRef::new(StoreRef::workspace(), id)
    }

    mod basic {
        use super::*;

        #[test]
        fn test_child_and_parent_by_id() {
            let store: Arc<dyn NodeStore> = Arc::new(MemoryNodeStore::new());
            let root = store.root_node(&StoreRef::workspace()).unwrap();
            let p = folder(store.as_ref(), &root, "p", "p1");
            let c = folder(store.as_ref(), &p, "c", "c1");
            let resolver = BasicCorrespondingNodeResolver::new(store);

            let pair = resolver
                .resolve(&c, Some(&assoc("p1", "c", "c1")), &NodePath::root())
                .unwrap();
            assert_eq!(pair.resolved_child, Some(c));
            assert_eq!(pair.resolved_parent, Some(p));
        }

        #[test]
        fn test_parent_by_path_when_id_is_unknown() {
            let store: Arc<dyn NodeStore> = Arc::new(MemoryNodeStore::new());
            let root = store.root_node(&StoreRef::workspace()).unwrap();
            let home = folder(store.as_ref(), &root, "home", "local-home");
            let resolver = BasicCorrespondingNodeResolver::new(store);

            let path = NodePath::root().child(QName::new("cm", "home"));
            let pair = resolver
                .resolve(&node("new"), Some(&assoc("source-home", "new", "new")), &path)
                .unwrap();
            assert_eq!(pair.resolved_parent, Some(home));
            assert!(pair.resolved_child.is_none());
        }

        #[test]
        fn test_root_path_resolves_to_destination_root() {
            let store: Arc<dyn NodeStore> = Arc::new(MemoryNodeStore::new());
            let root = store.root_node(&StoreRef::workspace()).unwrap();
            let resolver = BasicCorrespondingNodeResolver::new(store);
            let pair = resolver
                .resolve(&node("x"), Some(&assoc("source-root", "x", "x")), &NodePath::root())
                .unwrap();
            assert_eq!(pair.resolved_parent, Some(root));
        }

        #[test]
        fn test_nothing_resolves() {
            let store: Arc<dyn NodeStore> = Arc::new(MemoryNodeStore::new());
            let resolver = BasicCorrespondingNodeResolver::new(store);
            let path = NodePath::root().child(QName::new("cm", "missing"));
            let pair = resolver
                .resolve(&node("x"), Some(&assoc("gone", "x", "x")), &path)
                .unwrap();
            assert_eq!(pair, ResolvedParentChildPair::default());
        }
    }

    mod caching {
        use super::*;

        #[test]
        fn test_only_full_resolutions_are_cached() {
            let store: Arc<dyn NodeStore> = Arc::new(MemoryNodeStore::new());
            let root = store.root_node(&StoreRef::workspace()).unwrap();
            let resolver =
                CachingCorrespondingNodeResolver::new(BasicCorrespondingNodeResolver::new(
                    store.clone(),
                ));
            let link = assoc("source-root", "a", "a1");

            let first = resolver.resolve(&node("a1"), Some(&link), &NodePath::root()).unwrap();
            assert!(first.resolved_child.is_none());
            assert!(!resolver.is_cached(&node("a1")));

            let a = folder(store.as_ref(), &root, "a", "a1");
            let second = resolver.resolve(&node("a1"), Some(&link), &NodePath::root()).unwrap();
            assert_eq!(second.resolved_child, Some(a.clone()));
            assert!(resolver.is_cached(&node("a1")));

            // A cached pair is served without consulting the store again.
            store.delete_node(&a).unwrap();
            let third = resolver.resolve(&node("a1"), Some(&link), &NodePath::root()).unwrap();
            assert_eq!(third, second);
            assert_eq!(resolver.cached(), 1);
        }
    }
}
