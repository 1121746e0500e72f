//! Examine record and its state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Moderation decision
///
/// `Idle` awaits a decision; `Free` (approved) and `Refuse` (rejected) are
/// both terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamineStatus {
    #[default]
    Idle,
    Free,
    Refuse,
}

impl ExamineStatus {
    pub fn code(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Free => 1,
            Self::Refuse => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Free => "free",
            Self::Refuse => "refuse",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "idle" | "pending" | "0" => Some(Self::Idle),
            "free" | "approved" | "approve" | "1" => Some(Self::Free),
            "refuse" | "rejected" | "reject" | "2" => Some(Self::Refuse),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for ExamineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What part of the entity a proposal touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamineCategory {
    /// name, cover, summary, description
    Base,
    /// A property keyed by attribute key
    Attribute,
    /// Not actionable yet
    Event,
}

impl ExamineCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Attribute => "attribute",
            Self::Event => "event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "base" => Some(Self::Base),
            "attribute" | "attr" => Some(Self::Attribute),
            "event" => Some(Self::Event),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExamineCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A proposed change awaiting moderation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamineRecord {
    pub uid: String,
    /// Target entity uid
    pub target: String,
    /// Field key, or attribute key for `Attribute` proposals
    pub key: String,
    pub value: String,
    pub category: ExamineCategory,
    #[serde(default)]
    pub status: ExamineStatus,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub operator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_aliases() {
        assert_eq!(ExamineStatus::parse("approved"), Some(ExamineStatus::Free));
        assert_eq!(ExamineStatus::parse("Refuse"), Some(ExamineStatus::Refuse));
        assert_eq!(ExamineStatus::parse("0"), Some(ExamineStatus::Idle));
        assert_eq!(ExamineStatus::parse("maybe"), None);
        assert_eq!(ExamineStatus::Refuse.code(), 2);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ExamineStatus::Idle.is_terminal());
        assert!(ExamineStatus::Free.is_terminal());
        assert!(ExamineStatus::Refuse.is_terminal());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&ExamineCategory::Attribute).unwrap();
        assert_eq!(json, "\"attribute\"");
        let status: ExamineStatus = serde_json::from_str("\"free\"").unwrap();
        assert_eq!(status, ExamineStatus::Free);
    }
}
