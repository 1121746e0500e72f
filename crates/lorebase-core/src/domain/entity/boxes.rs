//! Entity boxes
//!
//! A box is a saved collection of entities. Members are held by uid; when an
//! entity is removed its uid is replaced by its name in `keywords` so the
//! collection keeps pointing at the same subject.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::document::{BOXES_TABLE, Document, DocumentStore, Filter, decode};
use crate::error::{Error, Result};

/// A saved collection of entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBox {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub owner: String,
    /// Member entity uids
    #[serde(default)]
    pub entities: Vec<String>,
    /// Names of members that no longer exist
    #[serde(default)]
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Box persistence
pub struct BoxStore {
    store: Arc<dyn DocumentStore>,
}

impl BoxStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn create_box(&self, name: &str, owner: &str) -> Result<EntityBox> {
        if name.trim().is_empty() {
            return Err(Error::InvalidArgument("box name is required".into()));
        }
        let now = Utc::now();
        let entity_box = EntityBox {
            uid: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            owner: owner.to_string(),
            entities: Vec::new(),
            keywords: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.store
            .insert(BOXES_TABLE, Document::from_value(&entity_box.uid, &entity_box)?)
            .await?;

        info!(box_uid = %entity_box.uid, name = %entity_box.name, "Box created");
        Ok(entity_box)
    }

    pub async fn get(&self, uid: &str) -> Result<EntityBox> {
        let body = self
            .store
            .find_by_id(BOXES_TABLE, uid)
            .await?
            .ok_or_else(|| Error::not_found("box", uid))?;
        decode(body)
    }

    async fn save_members(&self, entity_box: &EntityBox) -> Result<()> {
        let mut fields = Map::new();
        fields.insert("entities".into(), serde_json::to_value(&entity_box.entities)?);
        fields.insert("keywords".into(), serde_json::to_value(&entity_box.keywords)?);
        fields.insert("updated_at".into(), serde_json::to_value(entity_box.updated_at)?);
        self.store.update_fields(BOXES_TABLE, &entity_box.uid, fields).await
    }

    /// Add an entity to a box; appending a member twice is a no-op
    pub async fn append(&self, box_uid: &str, entity_uid: &str) -> Result<EntityBox> {
        let mut entity_box = self.get(box_uid).await?;
        if entity_box.entities.iter().any(|e| e == entity_uid) {
            return Ok(entity_box);
        }
        entity_box.entities.push(entity_uid.to_string());
        entity_box.updated_at = Utc::now();
        self.save_members(&entity_box).await?;

        debug!(box_uid = %box_uid, entity_uid = %entity_uid, "Entity added to box");
        Ok(entity_box)
    }

    /// Every box holding the entity by uid
    pub async fn list_containing(&self, entity_uid: &str) -> Result<Vec<EntityBox>> {
        let rows = self
            .store
            .find_many(BOXES_TABLE, &Filter::all().contains("entities", entity_uid))
            .await?;

        let mut boxes = Vec::with_capacity(rows.len());
        for row in rows {
            match decode::<EntityBox>(row) {
                Ok(entity_box) => boxes.push(entity_box),
                Err(e) => warn!(error = %e, "Skipping undecodable box"),
            }
        }
        Ok(boxes)
    }

    /// Swap the entity's uid for its name in every box that holds it
    pub async fn detach_entity(&self, entity_uid: &str, name: &str) -> Result<usize> {
        let boxes = self.list_containing(entity_uid).await?;
        let count = boxes.len();

        for mut entity_box in boxes {
            entity_box.entities.retain(|e| e != entity_uid);
            if !name.is_empty() && !entity_box.keywords.iter().any(|k| k == name) {
                entity_box.keywords.push(name.to_string());
            }
            entity_box.updated_at = Utc::now();
            self.save_members(&entity_box).await?;
        }

        if count > 0 {
            info!(entity_uid = %entity_uid, boxes = count, "Entity detached from boxes");
        }
        Ok(count)
    }
}

impl EntityBox {
    pub fn contains(&self, entity_uid: &str) -> bool {
        self.entities.iter().any(|e| e == entity_uid)
    }
}
