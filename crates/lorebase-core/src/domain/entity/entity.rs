//! Entity types and the status state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::{Event, RelationCase};

/// Lifecycle status of an entity
///
/// `Idle` is the draft state. `Failed` is terminal and reachable from every
/// other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    #[default]
    Idle,
    Pending,
    Usable,
    Failed,
}

impl EntityStatus {
    pub fn code(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Pending => 1,
            Self::Usable => 2,
            Self::Failed => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Idle),
            1 => Some(Self::Pending),
            2 => Some(Self::Usable),
            3 => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Usable => "usable",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "idle" | "draft" => Some(Self::Idle),
            "pending" => Some(Self::Pending),
            "usable" | "published" => Some(Self::Usable),
            "failed" | "rejected" => Some(Self::Failed),
            _ => s.parse().ok().and_then(Self::from_code),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Whether a move to `next` is allowed
    pub fn can_transition_to(&self, next: EntityStatus) -> bool {
        match (self, next) {
            (Self::Failed, _) => false,
            (_, _) => true,
        }
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One (optional entity reference, literal value) pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub value: String,
}

impl Word {
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            entity: None,
            value: value.into(),
        }
    }

    pub fn reference(entity: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            entity: Some(entity.into()),
            value: value.into(),
        }
    }
}

/// Property value keyed by attribute uid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Attribute definition uid
    pub key: String,
    pub words: Vec<Word>,
}

/// The primary domain object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub uid: String,
    /// Sequence-generated numeric id
    #[serde(default)]
    pub id: u64,
    pub name: String,
    /// Suffix telling homonyms apart
    #[serde(default)]
    pub disambiguation: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cover: String,
    /// Owning concept uid; blank routes to the default table
    #[serde(default)]
    pub concept: String,
    /// Owning scene (tenant)
    #[serde(default)]
    pub scene: String,
    #[serde(default)]
    pub status: EntityStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub relations: Vec<RelationCase>,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub operator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(name: impl Into<String>, concept: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            uid: Uuid::new_v4().to_string(),
            id: 0,
            name: name.into(),
            disambiguation: String::new(),
            summary: String::new(),
            description: String::new(),
            cover: String::new(),
            concept: concept.into(),
            scene: String::new(),
            status: EntityStatus::Idle,
            tags: Vec::new(),
            synonyms: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            relations: Vec::new(),
            creator: String::new(),
            operator: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_scene(mut self, scene: impl Into<String>) -> Self {
        self.scene = scene.into();
        self
    }

    pub fn with_disambiguation(mut self, disambiguation: impl Into<String>) -> Self {
        self.disambiguation = disambiguation.into();
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Name with the disambiguation suffix, used to tell homonyms apart
    pub fn display_name(&self) -> String {
        if self.disambiguation.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.disambiguation)
        }
    }

    pub fn property(&self, key: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.key == key)
    }

    /// Replace the words of a property, adding it if missing
    pub fn set_property(&mut self, key: &str, words: Vec<Word>) {
        match self.properties.iter_mut().find(|p| p.key == key) {
            Some(property) => property.words = words,
            None => self.properties.push(Property {
                key: key.to_string(),
                words,
            }),
        }
    }

    pub fn event(&self, uid: &str) -> Option<&Event> {
        self.events.iter().find(|e| e.uid == uid)
    }
}

/// Deduplicate while keeping first occurrences, dropping blanks
pub(crate) fn normalize_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(EntityStatus::Idle.code(), 0);
        assert_eq!(EntityStatus::Failed.code(), 3);
        assert_eq!(EntityStatus::from_code(2), Some(EntityStatus::Usable));
        assert_eq!(EntityStatus::from_code(9), None);
        assert_eq!(EntityStatus::parse("draft"), Some(EntityStatus::Idle));
        assert_eq!(EntityStatus::parse("1"), Some(EntityStatus::Pending));
        assert_eq!(EntityStatus::parse("nope"), None);
    }

    #[test]
    fn test_status_transitions() {
        use EntityStatus::*;
        for from in [Idle, Pending, Usable] {
            for to in [Idle, Pending, Usable, Failed] {
                assert!(from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
        for to in [Idle, Pending, Usable] {
            assert!(!Failed.can_transition_to(to));
        }
    }

    #[test]
    fn test_display_name() {
        let entity = Entity::new("Li Bai", "c1");
        assert_eq!(entity.display_name(), "Li Bai");
        let entity = entity.with_disambiguation("poet");
        assert_eq!(entity.display_name(), "Li Bai (poet)");
    }

    #[test]
    fn test_set_property() {
        let mut entity = Entity::new("Li Bai", "c1");
        entity.set_property("attr-1", vec![Word::literal("701")]);
        entity.set_property("attr-2", vec![Word::reference("e9", "Du Fu")]);
        entity.set_property("attr-1", vec![Word::literal("702")]);

        assert_eq!(entity.properties.len(), 2);
        assert_eq!(entity.property("attr-1").unwrap().words[0].value, "702");
        assert_eq!(entity.property("attr-2").unwrap().words[0].entity.as_deref(), Some("e9"));
    }

    #[test]
    fn test_decode_minimal_entity() {
        let now = Utc::now();
        let value = serde_json::json!({
            "uid": "e1",
            "name": "Zhang San",
            "created_at": now,
            "updated_at": now,
        });
        let entity: Entity = serde_json::from_value(value).unwrap();
        assert_eq!(entity.status, EntityStatus::Idle);
        assert!(entity.concept.is_empty());
    }

    #[test]
    fn test_normalize_list() {
        let items = vec![" a ".into(), "b".into(), "".into(), "a".into()];
        assert_eq!(normalize_list(items), vec!["a".to_string(), "b".to_string()]);
    }
}
