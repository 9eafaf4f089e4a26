//! Typed property values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{NodeRef, QName};

/// Property map of a node, ordered by qualified name.
pub type PropertyMap = BTreeMap<QName, PropertyValue>;

/// Immutable descriptor of a content blob.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentData {
    /// Location of the blob in its content store.
    pub content_url: String,
    /// MIME type of the content.
    pub mimetype: String,
    /// Size in bytes.
    pub size: u64,
    /// Character encoding.
    pub encoding: String,
}

impl ContentData {
    /// Creates a content descriptor.
    pub fn new(
        content_url: impl Into<String>,
        mimetype: impl Into<String>,
        size: u64,
        encoding: impl Into<String>,
    ) -> Self {
        Self {
            content_url: content_url.into(),
            mimetype: mimetype.into(),
            size,
            encoding: encoding.into(),
        }
    }

    /// The part name under which the blob travels: the URL text after the
    /// final `/`.
    pub fn part_name(&self) -> &str {
        content_url_to_part_name(&self.content_url)
    }
}

/// Maps a content URL to its transfer part name.
pub fn content_url_to_part_name(content_url: &str) -> &str {
    match content_url.rfind('/') {
        Some(idx) => &content_url[idx + 1..],
        None => content_url,
    }
}

/// A typed property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    /// Explicit null.
    Null,
    /// Text value.
    Text(String),
    /// Integer value.
    Long(i64),
    /// Boolean value.
    Bool(bool),
    /// Date as microseconds since the Unix epoch.
    Date(u64),
    /// Content reference.
    Content(ContentData),
    /// Reference to another node.
    NodeRef(NodeRef),
    /// Multi-valued property.
    Multi(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Returns the text, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the date, if this is a date value.
    pub fn as_date(&self) -> Option<u64> {
        match self {
            PropertyValue::Date(us) => Some(*us),
            _ => None,
        }
    }

    /// Returns the content descriptor, if this is a content value.
    pub fn as_content(&self) -> Option<&ContentData> {
        match self {
            PropertyValue::Content(c) => Some(c),
            _ => None,
        }
    }

    /// Returns true for a content value.
    pub fn is_content(&self) -> bool {
        matches!(self, PropertyValue::Content(_))
    }

    /// Collects the text members of a multi-valued (or single text) value.
    pub fn text_list(&self) -> Vec<String> {
        match self {
            PropertyValue::Text(s) => vec![s.clone()],
            PropertyValue::Multi(values) => values
                .iter()
                .filter_map(|v| v.as_text().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Builds a multi-valued text property.
    pub fn from_text_list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PropertyValue::Multi(
            values
                .into_iter()
                .map(|v| PropertyValue::Text(v.into()))
                .collect(),
        )
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}
