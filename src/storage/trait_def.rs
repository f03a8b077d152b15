use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store request failed: {0}")]
    Transport(String),
    #[error("record store request timed out")]
    Timeout,
    #[error("record store returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed record store response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A typed document field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    Title(String),
    Text(String),
    /// RFC 3339 timestamp
    Date(String),
    Select(String),
    Number(f64),
    Url(String),
}

impl PropertyValue {
    /// Textual content, for filtering and display
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Title(s)
            | PropertyValue::Text(s)
            | PropertyValue::Date(s)
            | PropertyValue::Select(s)
            | PropertyValue::Url(s) => Some(s),
            PropertyValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

pub type Properties = BTreeMap<String, PropertyValue>;

/// Equality filter on one property
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    TextEquals { property: String, value: String },
}

impl Filter {
    pub fn text_equals(property: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::TextEquals {
            property: property.into(),
            value: value.into(),
        }
    }

    pub fn property(&self) -> &str {
        match self {
            Filter::TextEquals { property, .. } => property,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Filter::TextEquals { value, .. } => value,
        }
    }

    pub fn matches(&self, properties: &Properties) -> bool {
        properties
            .get(self.property())
            .and_then(PropertyValue::as_text)
            .is_some_and(|v| v == self.value())
    }
}

/// Result of a create call
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedRecord {
    /// Store-specific document id, used for patch and retrieve
    pub id: String,
    /// Atomically assigned unique number, when the store returns one inline
    pub unique_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub unique_id: Option<u64>,
    pub properties: Properties,
}

#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub records: Vec<StoredRecord>,
    /// Opaque cursor for the next page; `None` on the last page
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Create a new document
    async fn create(&self, properties: &Properties) -> StoreResult<CreatedRecord>;

    /// Overwrite the given properties of an existing document
    async fn patch(&self, id: &str, properties: &Properties) -> StoreResult<()>;

    /// Read one document back; `None` if the store does not (yet) see it
    async fn retrieve(&self, id: &str) -> StoreResult<Option<StoredRecord>>;

    /// One page of documents matching the filter
    async fn query(&self, filter: &Filter, cursor: Option<&str>) -> StoreResult<QueryPage>;
}
