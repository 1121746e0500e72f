//! Graph node shadow

use serde::{Deserialize, Serialize};

/// Local copy of a node held by the graph store
///
/// Each node stands for exactly one entity; `entity` is that entity's uid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Graph-native numeric id
    pub id: i64,
    /// Display name (the entity name at creation time)
    pub name: String,
    /// Label set; the first label is the entity's partition table
    pub labels: Vec<String>,
    /// Owning entity uid
    pub entity: String,
}

impl GraphNode {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Primary label, used when deleting the node
    pub fn label(&self) -> &str {
        self.labels.first().map(String::as_str).unwrap_or_default()
    }
}
