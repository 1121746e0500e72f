//! Graph edge shadow and direction

use serde::{Deserialize, Serialize};

/// Direction of a relation as read from the source entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Source points at target
    #[default]
    Forward,
    /// Target points at source
    Backward,
    /// Symmetric relation
    Both,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "forward" | "out" => Some(Self::Forward),
            "backward" | "in" => Some(Self::Backward),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Local copy of an edge held by the graph store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Graph-native numeric id
    pub id: i64,
    /// Relation name, unique per (from, to)
    pub name: String,
    /// Edge label in the graph store
    pub kind: String,
    /// Relation category
    pub relation: String,
    pub direction: Direction,
    /// Source entity uid
    pub from: String,
    /// Target entity uid
    pub to: String,
}

impl GraphEdge {
    /// The `(from, to, name)` triple that identifies the edge
    pub fn triple(&self) -> (String, String, String) {
        (self.from.clone(), self.to.clone(), self.name.clone())
    }

    /// Whether the edge touches the entity
    pub fn touches(&self, entity: &str) -> bool {
        self.from == entity || self.to == entity
    }
}

/// True when a relation name could be confused with a numeric graph id
pub fn is_numeric_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parse() {
        assert_eq!(Direction::parse("forward"), Some(Direction::Forward));
        assert_eq!(Direction::parse("IN"), Some(Direction::Backward));
        assert_eq!(Direction::parse("both"), Some(Direction::Both));
        assert_eq!(Direction::parse("sideways"), None);
        assert_eq!(Direction::default().as_str(), "forward");
    }

    #[test]
    fn test_numeric_name() {
        assert!(is_numeric_name("123"));
        assert!(!is_numeric_name("friend"));
        assert!(!is_numeric_name("friend2"));
        assert!(!is_numeric_name(""));
    }
}
