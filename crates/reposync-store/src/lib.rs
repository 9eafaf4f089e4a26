#![warn(missing_docs)]

//! reposync store subsystem: destination node store, content store, shared node data model

pub mod content;
pub mod error;
pub mod memory;
pub mod model;
pub mod node_store;
pub mod types;
pub mod value;

pub use content::{ContentStore, MemoryContentStore};
pub use error::StoreError;
pub use memory::{MemoryNodeStore, StoreSnapshot};
pub use node_store::NodeStore;
pub use types::{AssociationRef, ChildAssociationRef, NodePath, NodeRef, QName, StoreRef};
pub use value::{content_url_to_part_name, ContentData, PropertyMap, PropertyValue};
