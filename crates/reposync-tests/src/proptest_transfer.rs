//! Property-Based Tests for Transfers

use proptest::prelude::*;
use proptest::sample::Index;

use reposync_store::{NodeRef, StoreError};

use crate::harness::SourceRepo;

/// Parent choices for a random tree: node `i` hangs under the root or one
/// of the nodes created before it.
pub fn arb_tree_shape() -> impl Strategy<Value = Vec<Index>> {
    proptest::collection::vec(any::<Index>(), 1..12)
}

/// Builds the tree in `source`, returning nodes in creation order.
pub fn build_tree(source: &SourceRepo, shape: &[Index]) -> Result<Vec<NodeRef>, StoreError> {
    let root = source.root()?;
    let mut nodes: Vec<NodeRef> = Vec::with_capacity(shape.len());
    for (i, choice) in shape.iter().enumerate() {
        let slot = choice.index(i + 1);
        let parent = if slot == 0 { root.clone() } else { nodes[slot - 1].clone() };
        nodes.push(source.folder(&parent, &format!("f{}", i))?);
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use reposync_store::model::content;
    use reposync_store::{ContentData, NodeStore, PropertyMap, PropertyValue};
    use reposync_transfer::{
        is_content_missing, BasicCorrespondingNodeResolver, CachingCorrespondingNodeResolver,
        CorrespondingNodeResolver, ManifestNode, ManifestNodeFactory,
    };

    use crate::harness::Destination;

    fn tree_reproduced(shape: Vec<Index>) {
        let source = SourceRepo::new("source-repo");
        let dest = Destination::new().unwrap();
        let nodes = build_tree(&source, &shape).unwrap();
        source
            .send(&dest, &source.definition(&nodes, true))
            .unwrap();
        for node in &nodes {
            assert_eq!(
                dest.path(node).unwrap(),
                source.store.get_path(node).unwrap().to_string()
            );
        }
    }

    fn caching_matches_delegate(shape: Vec<Index>, known: usize) {
        let source = SourceRepo::new("source-repo");
        let nodes = build_tree(&source, &shape).unwrap();

        // The destination only holds a prefix of the source tree.
        let dest = Destination::new().unwrap();
        let known = known.min(nodes.len());
        source
            .send(&dest, &source.definition(&nodes[..known], false))
            .unwrap();

        let store: Arc<dyn NodeStore> = dest.store.clone();
        let basic = BasicCorrespondingNodeResolver::new(store.clone());
        let caching = CachingCorrespondingNodeResolver::new(BasicCorrespondingNodeResolver::new(store));
        let factory = ManifestNodeFactory::new(&source.store);
        for _ in 0..2 {
            for node in &nodes {
                let Ok(ManifestNode::Normal(record)) = factory.create_manifest_node(node) else {
                    panic!("source node {} not describable", node);
                };
                let expected = basic
                    .resolve(node, Some(&record.primary_parent_assoc), &record.parent_path)
                    .unwrap();
                let got = caching
                    .resolve(node, Some(&record.primary_parent_assoc), &record.parent_path)
                    .unwrap();
                assert_eq!(got, expected);
                assert_eq!(caching.is_cached(node), expected.is_fully_resolved());
            }
        }
    }

    fn staleness_rule(destination_modified: Option<u64>, source_modified: Option<u64>, has_content: bool) {
        let mut props = PropertyMap::new();
        props.insert(content::PROP_NAME, PropertyValue::from("doc"));
        if has_content {
            props.insert(
                content::PROP_CONTENT,
                PropertyValue::Content(ContentData::new(
                    "store://aa/doc",
                    "text/plain",
                    3,
                    "UTF-8",
                )),
            );
        }
        if let Some(modified) = destination_modified {
            props.insert(content::PROP_MODIFIED, PropertyValue::Date(modified));
        }
        let expected = !has_content
            || matches!((source_modified, destination_modified), (Some(s), Some(d)) if s > d);
        assert_eq!(
            is_content_missing(Some(&props), &content::PROP_CONTENT, source_modified),
            expected
        );
        assert!(is_content_missing(None, &content::PROP_CONTENT, source_modified));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_transfer_reproduces_tree(shape in arb_tree_shape()) {
            tree_reproduced(shape);
        }

        #[test]
        fn prop_caching_resolver_matches_delegate(shape in arb_tree_shape(), known in 0usize..12) {
            caching_matches_delegate(shape, known);
        }

        #[test]
        fn prop_content_staleness(
            destination_modified in proptest::option::of(0u64..100),
            source_modified in proptest::option::of(0u64..100),
            has_content in any::<bool>(),
        ) {
            staleness_rule(destination_modified, source_modified, has_content);
        }
    }
}
