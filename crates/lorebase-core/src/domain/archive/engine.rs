//! Archival engine
//!
//! Freezes an entity's serialized state plus a content digest. Records are
//! cached in memory by entity uid after the first lookup.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::digest::digest_json;
use crate::domain::document::{ARCHIVED_TABLE, Document, DocumentStore, Filter, decode};
use crate::domain::entity::Entity;
use crate::error::{Error, Result};

use super::archived::ArchivedRecord;

/// Result of rewriting an archived record
#[derive(Debug, Clone)]
pub struct ArchiveUpdate {
    pub record: ArchivedRecord,
    /// Whether the digest differs from the previous one
    pub changed: bool,
}

/// Archival engine
pub struct ArchiveEngine {
    store: Arc<dyn DocumentStore>,
    /// entity uid -> record
    records: RwLock<HashMap<String, ArchivedRecord>>,
}

impl ArchiveEngine {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Publish an entity
    ///
    /// An entity that already has a record gets it rewritten in place.
    pub async fn archive(&self, entity: &Entity, operator: &str) -> Result<ArchivedRecord> {
        if let Some(existing) = self.get_by_entity(&entity.uid).await? {
            return Ok(self.update_file(&existing, entity, operator).await?.record);
        }

        let (payload, digest) = digest_json(entity)?;
        let now = Utc::now();
        let record = ArchivedRecord {
            uid: Uuid::new_v4().to_string(),
            entity: entity.uid.clone(),
            name: entity.display_name(),
            concept: entity.concept.clone(),
            scene: entity.scene.clone(),
            payload,
            digest,
            creator: operator.to_string(),
            operator: operator.to_string(),
            created_at: now,
            updated_at: now,
        };

        let document = Document::from_value(&record.uid, &record)?
            .with_unique_key(ArchivedRecord::entity_key(&record.entity));
        self.store.insert(ARCHIVED_TABLE, document).await?;
        self.records
            .write()
            .await
            .insert(record.entity.clone(), record.clone());

        info!(entity_uid = %entity.uid, digest = %record.digest, "Entity archived");
        Ok(record)
    }

    /// Re-serialize the entity into an existing record
    ///
    /// The write is unconditional; `changed` reports whether the digest
    /// moved. Unchanged content rewrites the same payload bytes.
    pub async fn update_file(&self, archived: &ArchivedRecord, entity: &Entity, operator: &str) -> Result<ArchiveUpdate> {
        let (payload, digest) = digest_json(entity)?;
        let changed = digest != archived.digest;

        let mut record = archived.clone();
        record.name = entity.display_name();
        record.concept = entity.concept.clone();
        record.scene = entity.scene.clone();
        record.payload = payload;
        record.digest = digest;
        record.operator = operator.to_string();
        record.updated_at = Utc::now();

        let mut fields = Map::new();
        fields.insert("name".into(), Value::from(record.name.clone()));
        fields.insert("concept".into(), Value::from(record.concept.clone()));
        fields.insert("scene".into(), Value::from(record.scene.clone()));
        fields.insert("payload".into(), Value::from(record.payload.clone()));
        fields.insert("digest".into(), Value::from(record.digest.clone()));
        fields.insert("operator".into(), Value::from(operator));
        fields.insert("updated_at".into(), serde_json::to_value(record.updated_at)?);
        self.store.update_fields(ARCHIVED_TABLE, &record.uid, fields).await?;

        self.records
            .write()
            .await
            .insert(record.entity.clone(), record.clone());

        debug!(entity_uid = %record.entity, changed, "Archived record rewritten");
        Ok(ArchiveUpdate { record, changed })
    }

    /// The active record of an entity
    pub async fn get_by_entity(&self, entity: &str) -> Result<Option<ArchivedRecord>> {
        if let Some(record) = self.records.read().await.get(entity) {
            return Ok(Some(record.clone()));
        }

        let rows = self
            .store
            .find_many(ARCHIVED_TABLE, &Filter::all().eq("entity", entity))
            .await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        let record: ArchivedRecord = decode(row)?;
        self.records
            .write()
            .await
            .insert(entity.to_string(), record.clone());
        Ok(Some(record))
    }

    /// Published view of an entity
    pub async fn decode(&self, entity: &str) -> Result<Entity> {
        self.get_by_entity(entity)
            .await?
            .ok_or_else(|| Error::not_found("archived record for entity", entity))?
            .decode()
    }

    /// Drop the entity's record; returns whether one existed
    pub async fn remove_by_entity(&self, entity: &str, operator: &str) -> Result<bool> {
        let Some(record) = self.get_by_entity(entity).await? else {
            return Ok(false);
        };
        self.store.soft_delete(ARCHIVED_TABLE, &record.uid, operator).await?;
        self.records.write().await.remove(entity);

        info!(entity_uid = %entity, operator = %operator, "Archived record removed");
        Ok(true)
    }

    async fn list(&self, filter: Filter) -> Result<Vec<Entity>> {
        let rows = self.store.find_many(ARCHIVED_TABLE, &filter).await?;
        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let decoded = decode::<ArchivedRecord>(row).and_then(|record| record.decode());
            match decoded {
                Ok(entity) => entities.push(entity),
                Err(e) => warn!(error = %e, "Skipping undecodable archived record"),
            }
        }
        Ok(entities)
    }

    pub async fn list_by_concept(&self, concept: &str) -> Result<Vec<Entity>> {
        self.list(Filter::all().eq("concept", concept)).await
    }

    pub async fn list_by_scene(&self, scene: &str, concept: &str) -> Result<Vec<Entity>> {
        self.list(Filter::all().eq("scene", scene).eq("concept", concept)).await
    }

    pub async fn list_all(&self) -> Result<Vec<Entity>> {
        self.list(Filter::all()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::{EntityStatus, Word};
    use crate::infrastructure::SqliteDocumentStore;
    use crate::storage::Database;
    use serde_json::json;

    async fn setup() -> (ArchiveEngine, Arc<dyn DocumentStore>) {
        let db = Database::in_memory().await.unwrap();
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(db.pool().clone()));
        (ArchiveEngine::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_archive_round_trip() {
        let (engine, _) = setup().await;
        let mut entity = Entity::new("Zhang San", "person").with_disambiguation("scholar");
        entity.set_property("attr-1", vec![Word::literal("701")]);

        let record = engine.archive(&entity, "alice").await.unwrap();
        assert_eq!(record.name, "Zhang San (scholar)");
        assert_eq!(record.digest.len(), 64);

        let decoded = engine.decode(&entity.uid).await.unwrap();
        assert_eq!(decoded.name, entity.name);
        assert_eq!(decoded.concept, entity.concept);
        assert_eq!(decoded.properties, entity.properties);
        assert_eq!(decoded.status, EntityStatus::Usable);
    }

    #[tokio::test]
    async fn test_update_file_idempotent() {
        let (engine, store) = setup().await;
        let entity = Entity::new("Li Si", "person");
        let record = engine.archive(&entity, "alice").await.unwrap();

        let first = engine.update_file(&record, &entity, "bob").await.unwrap();
        let second = engine.update_file(&first.record, &entity, "bob").await.unwrap();
        assert!(!first.changed);
        assert!(!second.changed);
        assert_eq!(first.record.digest, record.digest);
        assert_eq!(second.record.digest, record.digest);

        let stored = store.find_by_id(ARCHIVED_TABLE, &record.uid).await.unwrap().unwrap();
        assert_eq!(stored["payload"], Value::from(record.payload.clone()));
    }

    #[tokio::test]
    async fn test_rearchive_preserves_identity() {
        let (engine, _) = setup().await;
        let mut entity = Entity::new("Wang Wu", "person");
        let first = engine.archive(&entity, "alice").await.unwrap();

        entity.summary = "changed".into();
        let second = engine.archive(&entity, "bob").await.unwrap();
        assert_eq!(second.uid, first.uid);
        assert_ne!(second.digest, first.digest);
        assert_eq!(second.creator, "alice");
        assert_eq!(second.operator, "bob");
        assert_eq!(engine.decode(&entity.uid).await.unwrap().summary, "changed");
    }

    #[tokio::test]
    async fn test_listing_skips_undecodable() {
        let (engine, store) = setup().await;
        let a = Entity::new("A", "person").with_scene("s1");
        let b = Entity::new("B", "person").with_scene("s2");
        let c = Entity::new("C", "place").with_scene("s1");
        engine.archive(&a, "x").await.unwrap();
        engine.archive(&b, "x").await.unwrap();
        engine.archive(&c, "x").await.unwrap();

        let now = Utc::now();
        store
            .insert(
                ARCHIVED_TABLE,
                Document::from_value(
                    "broken",
                    &json!({
                        "uid": "broken", "entity": "ghost", "name": "ghost", "concept": "person",
                        "scene": "s1", "payload": "{oops", "digest": "", "created_at": now, "updated_at": now
                    }),
                )
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(engine.list_by_concept("person").await.unwrap().len(), 2);
        let scoped = engine.list_by_scene("s1", "person").await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].name, "A");
        assert_eq!(engine.list_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_remove_by_entity() {
        let (engine, store) = setup().await;
        let entity = Entity::new("Zhao Liu", "person");
        engine.archive(&entity, "alice").await.unwrap();

        assert!(engine.remove_by_entity(&entity.uid, "alice").await.unwrap());
        assert!(engine.get_by_entity(&entity.uid).await.unwrap().is_none());
        assert!(!engine.remove_by_entity(&entity.uid, "alice").await.unwrap());
        assert!(engine.decode(&entity.uid).await.unwrap_err().is_not_found());

        // A fresh engine sees the same state from the store
        let fresh = ArchiveEngine::new(store);
        assert!(fresh.get_by_entity(&entity.uid).await.unwrap().is_none());

        // And publishing again starts a new record
        engine.archive(&entity, "alice").await.unwrap();
    }
}
