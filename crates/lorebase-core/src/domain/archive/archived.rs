//! Archived record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entity::{Entity, EntityStatus};
use crate::error::Result;

/// Published snapshot of an entity
///
/// One active record per entity. Re-archiving rewrites `payload` and
/// `digest` but keeps `uid` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedRecord {
    pub uid: String,
    /// Owning entity uid
    pub entity: String,
    /// Display name, disambiguated for homonyms
    pub name: String,
    #[serde(default)]
    pub concept: String,
    #[serde(default)]
    pub scene: String,
    /// Serialized entity
    pub payload: String,
    /// SHA-256 hex digest of `payload`
    pub digest: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub operator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArchivedRecord {
    /// Decode the payload as a published entity
    ///
    /// The result is always `Usable`, whatever the live entity's status.
    pub fn decode(&self) -> Result<Entity> {
        let mut entity: Entity = serde_json::from_str(&self.payload)?;
        entity.status = EntityStatus::Usable;
        Ok(entity)
    }

    pub(crate) fn entity_key(entity: &str) -> String {
        format!("entity:{}", entity)
    }
}
