//! Content (blob) storage keyed by content URL.

use dashmap::DashMap;

use crate::error::StoreError;
use crate::value::ContentData;

/// Byte storage for content blobs.
pub trait ContentStore: Send + Sync {
    /// Stores a blob and returns its descriptor.
    fn put(&self, bytes: &[u8], mimetype: &str, encoding: &str) -> Result<ContentData, StoreError>;

    /// Reads a blob back.
    fn get(&self, content_url: &str) -> Result<Vec<u8>, StoreError>;

    /// Returns true if a blob is stored under the URL.
    fn exists(&self, content_url: &str) -> Result<bool, StoreError>;
}

/// Content-addressed in-memory blob store. URLs have the form
/// `store://<first two hex digits>/<blake3 hex>`.
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryContentStore {
    /// Creates an empty content store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs stored.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Returns true when no blob is stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    fn url_for(bytes: &[u8]) -> String {
        let hex = blake3::hash(bytes).to_hex();
        format!("store://{}/{}", &hex[..2], hex)
    }
}

impl ContentStore for MemoryContentStore {
    fn put(&self, bytes: &[u8], mimetype: &str, encoding: &str) -> Result<ContentData, StoreError> {
        let url = Self::url_for(bytes);
        self.blobs
            .entry(url.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(ContentData::new(url, mimetype, bytes.len() as u64, encoding))
    }

    fn get(&self, content_url: &str) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .get(content_url)
            .map(|b| b.value().clone())
            .ok_or_else(|| StoreError::ContentNotFound(content_url.to_string()))
    }

    fn exists(&self, content_url: &str) -> Result<bool, StoreError> {
        Ok(self.blobs.contains_key(content_url))
    }
}
