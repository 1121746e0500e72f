//! Document store collaborator
//!
//! The document store is the authoritative persistence layer. Records are
//! JSON documents grouped into named tables; each call is independently
//! atomic and no transaction spans tables.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A document ready to be inserted
#[derive(Debug, Clone)]
pub struct Document {
    /// Primary key inside the table
    pub id: String,
    /// JSON body; always an object
    pub body: Value,
    /// Keys that must be unique among the table's live documents
    pub unique_keys: Vec<String>,
}

impl Document {
    /// Build a document by serializing `value`
    pub fn from_value<T: Serialize>(id: impl Into<String>, value: &T) -> Result<Self> {
        let body = serde_json::to_value(value)?;
        if !body.is_object() {
            return Err(Error::InvalidArgument(
                "document body must serialize to a JSON object".into(),
            ));
        }
        Ok(Self {
            id: id.into(),
            body,
            unique_keys: Vec::new(),
        })
    }

    /// Attach a uniqueness key
    pub fn with_unique_key(mut self, key: impl Into<String>) -> Self {
        self.unique_keys.push(key.into());
        self
    }
}

/// Decode a stored document body
pub fn decode<T: DeserializeOwned>(body: Value) -> Result<T> {
    Ok(serde_json::from_value(body)?)
}

/// Serialize a value into a field set for [`DocumentStore::update_fields`]
pub fn fields<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::InvalidArgument(
            "field set must serialize to a JSON object".into(),
        )),
    }
}

/// One clause of a [`Filter`]
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// Top-level field equals the value
    Eq(String, Value),
    /// Top-level array field contains the string value
    Contains(String, String),
}

/// Conjunction of clauses over top-level document fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub clauses: Vec<Clause>,
}

impl Filter {
    /// Match every live document
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Eq(field.into(), value.into()));
        self
    }

    pub fn contains(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.clauses.push(Clause::Contains(field.into(), value.into()));
        self
    }

    /// Evaluate the filter against a document body
    pub fn matches(&self, body: &Value) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Eq(field, value) => body.get(field) == Some(value),
            Clause::Contains(field, value) => body
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.iter().any(|v| v.as_str() == Some(value))),
        })
    }
}

/// Document store operations consumed by the core
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document, returning its id
    ///
    /// Fails with `AlreadyExists` when the id is live in the table or one
    /// of the unique keys is held by another live document.
    async fn insert(&self, table: &str, document: Document) -> Result<String>;

    /// Fetch a live document by id
    async fn find_by_id(&self, table: &str, id: &str) -> Result<Option<Value>>;

    /// Fetch every live document matching the filter, in insertion order
    async fn find_many(&self, table: &str, filter: &Filter) -> Result<Vec<Value>>;

    /// Shallow-merge top-level fields into a live document
    async fn update_fields(&self, table: &str, id: &str, fields: Map<String, Value>) -> Result<()>;

    /// Replace the unique keys held by a live document
    async fn rekey(&self, table: &str, id: &str, unique_keys: Vec<String>) -> Result<()>;

    /// Mark a document deleted and release its unique keys
    async fn soft_delete(&self, table: &str, id: &str, operator: &str) -> Result<()>;

    /// Next value of a monotonic counter, starting at 1
    async fn next_sequence(&self, name: &str) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_eq_and_contains() {
        let body = json!({"concept": "c1", "scene": "s1", "entities": ["a", "b"]});

        assert!(Filter::all().matches(&body));
        assert!(Filter::all().eq("concept", "c1").matches(&body));
        assert!(!Filter::all().eq("concept", "c2").matches(&body));
        assert!(Filter::all().contains("entities", "b").matches(&body));
        assert!(!Filter::all().contains("entities", "z").matches(&body));
        assert!(
            Filter::all()
                .eq("concept", "c1")
                .eq("scene", "s1")
                .contains("entities", "a")
                .matches(&body)
        );
        assert!(!Filter::all().contains("concept", "c1").matches(&body));
    }

    #[test]
    fn test_document_rejects_non_object() {
        assert!(Document::from_value("1", &"just a string").is_err());

        let doc = Document::from_value("1", &json!({"name": "x"}))
            .unwrap()
            .with_unique_key("name:x");
        assert_eq!(doc.unique_keys, vec!["name:x".to_string()]);
    }
}
