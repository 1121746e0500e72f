//! Events and relation statics attached to an entity

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::graph::Direction;

/// Structured date range; either end may be blank
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub begin: String,
    #[serde(default)]
    pub end: String,
}

/// Structured place, optionally pointing at a place entity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub entity: Option<String>,
}

/// Denormalized view of a relation from the owning entity's side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationCase {
    /// Link document uid
    pub uid: String,
    /// The other entity
    pub entity: String,
    pub name: String,
    #[serde(default)]
    pub relation: String,
    #[serde(default)]
    pub direction: Direction,
}

/// A dated, placed occurrence owned by an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub date: DateRange,
    #[serde(default)]
    pub place: Place,
    /// Asset ids
    #[serde(default)]
    pub assets: Vec<String>,
    #[serde(default)]
    pub relations: Vec<RelationCase>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            date: DateRange::default(),
            place: Place::default(),
            assets: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn with_date(mut self, begin: impl Into<String>, end: impl Into<String>) -> Self {
        self.date = DateRange {
            begin: begin.into(),
            end: end.into(),
        };
        self
    }

    pub fn with_place(mut self, name: impl Into<String>, entity: Option<String>) -> Self {
        self.place = Place {
            name: name.into(),
            entity,
        };
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}
