//! Persisted relation between two entities
//!
//! The `links` collection is the authoritative record of relations; graph
//! edges are derived from it and rebuilt by reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::link::Direction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub uid: String,
    /// Source entity uid
    pub from: String,
    /// Target entity uid
    pub to: String,
    /// Edge label
    #[serde(default)]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub relation: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub operator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Link {
    pub(crate) fn triple_key(from: &str, to: &str, name: &str) -> String {
        format!("{}|{}|{}", from, to, name)
    }

    pub(crate) fn unique_key(&self) -> String {
        Self::triple_key(&self.from, &self.to, &self.name)
    }
}
