//! Concept types
//!
//! A concept classifies entities. Concepts form a forest: top-level concepts
//! own a storage partition and every descendant shares its root's partition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain category of a concept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptType {
    Person,
    Place,
    Object,
    Event,
    Organization,
    #[default]
    Other,
}

impl ConceptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Place => "place",
            Self::Object => "object",
            Self::Event => "event",
            Self::Organization => "organization",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "person" => Some(Self::Person),
            "place" => Some(Self::Place),
            "object" => Some(Self::Object),
            "event" => Some(Self::Event),
            "organization" => Some(Self::Organization),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConceptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A taxonomy node
///
/// Children are not stored on the concept itself; the forest owns the
/// parent/child structure and `parent` is the only persisted link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub uid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConceptType,
    /// Physical table; only top-level concepts carry one
    #[serde(default)]
    pub table: String,
    /// Parent uid, empty for top-level concepts
    #[serde(default)]
    pub parent: String,
    /// Attribute definition uids, in order
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub operator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Concept {
    pub fn new(name: impl Into<String>, kind: ConceptType) -> Self {
        let now = Utc::now();
        Self {
            uid: Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            table: String::new(),
            parent: String::new(),
            attributes: Vec::new(),
            remark: String::new(),
            cover: String::new(),
            creator: String::new(),
            operator: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Assign the physical table (top-level concepts only)
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_attributes(mut self, attributes: Vec<String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }

    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = creator.into();
        self.operator = self.creator.clone();
        self
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_empty()
    }

    /// Unique key held in the document store for this concept's name
    pub(crate) fn name_key(name: &str) -> String {
        format!("name:{}", name)
    }
}

/// Typed storage partition (the physical table entities live in)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Partition(String);

impl Partition {
    pub fn new(table: impl Into<String>) -> Self {
        Self(table.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concept_builder() {
        let concept = Concept::new("Person", ConceptType::Person)
            .with_table("entities")
            .with_remark("people")
            .with_creator("alice");

        assert!(concept.is_top_level());
        assert_eq!(concept.table, "entities");
        assert_eq!(concept.operator, "alice");
        assert!(!concept.uid.is_empty());
    }

    #[test]
    fn test_concept_serializes_type_field() {
        let concept = Concept::new("Place", ConceptType::Place);
        let value = serde_json::to_value(&concept).unwrap();
        assert_eq!(value["type"], "place");

        let back: Concept = serde_json::from_value(value).unwrap();
        assert_eq!(back, concept);
    }

    #[test]
    fn test_concept_type_parse() {
        assert_eq!(ConceptType::parse("Person"), Some(ConceptType::Person));
        assert_eq!(ConceptType::parse("organization"), Some(ConceptType::Organization));
        assert_eq!(ConceptType::parse("alien"), None);
    }

    #[test]
    fn test_partition_display() {
        let partition = Partition::new("entities");
        assert_eq!(partition.to_string(), "entities");
        assert_eq!(partition.as_str(), "entities");
    }
}
