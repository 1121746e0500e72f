//! Entity cache
//!
//! A registry of loaded entities that lazily mirrors the document store.
//! The physical table of an entity is re-derived from its concept on every
//! store call, because `update_base` can re-point the concept.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::archive::ArchiveEngine;
use crate::domain::document::{Document, DocumentStore, Filter, LINKS_TABLE, decode, fields};
use crate::domain::graph::{GraphMirror, Link};
use crate::domain::reconcile::{Outbox, OutboxEntry};
use crate::domain::taxonomy::{Partition, Taxonomy};
use crate::error::{Error, Result};

use super::boxes::BoxStore;
use super::entity::{Entity, EntityStatus, Word, normalize_list};
use super::event::{Event, RelationCase};

/// Sequence backing `Entity::id`
const ENTITY_SEQUENCE: &str = "entity";

/// Entity cache
pub struct EntityCache {
    store: Arc<dyn DocumentStore>,
    taxonomy: Arc<Taxonomy>,
    archive: Arc<ArchiveEngine>,
    boxes: Arc<BoxStore>,
    mirror: Arc<GraphMirror>,
    outbox: Arc<Outbox>,
    eager_replication: bool,
    entities: RwLock<HashMap<String, Entity>>,
    /// Per-entity write locks; every read-modify-write holds one
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EntityCache {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        taxonomy: Arc<Taxonomy>,
        archive: Arc<ArchiveEngine>,
        boxes: Arc<BoxStore>,
        mirror: Arc<GraphMirror>,
        outbox: Arc<Outbox>,
    ) -> Self {
        Self {
            store,
            taxonomy,
            archive,
            boxes,
            mirror,
            outbox,
            eager_replication: true,
            entities: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Toggle the immediate graph-node creation after `create`
    pub fn with_eager_replication(mut self, eager: bool) -> Self {
        self.eager_replication = eager;
        self
    }

    /// Physical table of an entity
    pub async fn table_of(&self, entity: &Entity) -> Partition {
        self.taxonomy.partition_of(&entity.concept).await
    }

    /// Cached copy only, no store access
    pub async fn cached(&self, uid: &str) -> Option<Entity> {
        self.entities.read().await.get(uid).cloned()
    }

    pub async fn evict(&self, uid: &str) -> bool {
        self.entities.write().await.remove(uid).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }

    /// Serialize writers of one entity
    async fn lock(&self, uid: &str) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().await.entry(uid.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    /// Cached entity, or a lookup across every partition on a miss
    pub async fn get(&self, uid: &str) -> Result<Entity> {
        if let Some(entity) = self.cached(uid).await {
            debug!(entity_uid = %uid, "Entity cache hit");
            return Ok(entity);
        }
        debug!(entity_uid = %uid, "Entity cache miss");

        for partition in self.taxonomy.partitions().await {
            if let Some(body) = self.store.find_by_id(partition.as_str(), uid).await? {
                let entity: Entity = decode(body)?;
                self.entities
                    .write()
                    .await
                    .insert(entity.uid.clone(), entity.clone());
                return Ok(entity);
            }
        }
        Err(Error::not_found("entity", uid))
    }

    /// Persist a new entity in its concept's partition
    ///
    /// The graph node is not created inline: the entity is queued in the
    /// outbox and, with eager replication on, a detached task tries to
    /// create the node right away. A failure there never fails `create`.
    pub async fn create(&self, mut entity: Entity, operator: &str) -> Result<Entity> {
        entity.name = entity.name.trim().to_string();
        if entity.name.is_empty() {
            return Err(Error::InvalidArgument("entity name is required".into()));
        }
        entity.concept = entity.concept.trim().to_string();
        if !entity.concept.is_empty() && !self.taxonomy.exists(&entity.concept).await {
            return Err(Error::not_found("concept", &entity.concept));
        }
        if entity.uid.is_empty() {
            entity.uid = Uuid::new_v4().to_string();
        }

        let table = self.table_of(&entity).await;
        entity.id = self.store.next_sequence(ENTITY_SEQUENCE).await?;
        entity.status = EntityStatus::Idle;
        entity.tags = normalize_list(std::mem::take(&mut entity.tags));
        entity.synonyms = normalize_list(std::mem::take(&mut entity.synonyms));
        entity.creator = operator.to_string();
        entity.operator = operator.to_string();
        entity.created_at = Utc::now();
        entity.updated_at = entity.created_at;

        self.store
            .insert(table.as_str(), Document::from_value(&entity.uid, &entity)?)
            .await?;
        self.entities
            .write()
            .await
            .insert(entity.uid.clone(), entity.clone());

        info!(entity_uid = %entity.uid, id = entity.id, table = %table, "Entity created");

        self.outbox
            .enqueue(OutboxEntry::new(&entity.uid, &entity.name, table.as_str()))
            .await;
        if self.eager_replication {
            self.spawn_replication(&entity, table);
        }

        Ok(entity)
    }

    fn spawn_replication(&self, entity: &Entity, table: Partition) {
        let mirror = self.mirror.clone();
        let outbox = self.outbox.clone();
        let uid = entity.uid.clone();
        let name = entity.name.clone();

        tokio::spawn(async move {
            match mirror.create_node_by_entity(&uid, &name, table.as_str()).await {
                Ok(_) => {
                    outbox.ack(&uid).await;
                }
                Err(e) if e.is_already_exists() => {
                    outbox.ack(&uid).await;
                }
                Err(e) => {
                    outbox.record_failure(&uid).await;
                    warn!(entity_uid = %uid, error = %e, "Graph node creation deferred to reconciliation");
                }
            }
        });
    }

    /// Soft-remove a draft entity
    ///
    /// Also drops its archived record, swaps it out of every box by name,
    /// retires the relations touching it and deletes its graph node on a
    /// best-effort basis.
    pub async fn remove(&self, uid: &str, operator: &str) -> Result<()> {
        {
            let _guard = self.lock(uid).await;
            let entity = self.get(uid).await?;
            if entity.status != EntityStatus::Idle {
                return Err(Error::Prohibition(format!(
                    "entity '{}' is {} and can only be removed as a draft",
                    uid, entity.status
                )));
            }

            let table = self.table_of(&entity).await;
            self.store.soft_delete(table.as_str(), uid, operator).await?;
            self.archive.remove_by_entity(uid, operator).await?;
            self.boxes.detach_entity(uid, &entity.name).await?;
            self.entities.write().await.remove(uid);
        }
        // Released before the other endpoints of its relations are locked
        self.locks.lock().await.remove(uid);
        self.outbox.ack(uid).await;

        if let Err(e) = self.mirror.remove_node(uid).await {
            warn!(entity_uid = %uid, error = %e, "Graph node left behind after entity removal");
        }
        let retired = self.retire_links(uid, operator).await?;

        info!(entity_uid = %uid, operator = %operator, links_retired = retired, "Entity removed");
        Ok(())
    }

    /// Soft-delete every link touching a removed entity and drop the
    /// relation statics pointing at it
    async fn retire_links(&self, uid: &str, operator: &str) -> Result<usize> {
        let mut retired = 0;
        for filter in [Filter::all().eq("from", uid), Filter::all().eq("to", uid)] {
            for row in self.store.find_many(LINKS_TABLE, &filter).await? {
                let link: Link = decode(row)?;
                self.store.soft_delete(LINKS_TABLE, &link.uid, operator).await?;
                if link.to == uid {
                    match self.remove_relation_static(&link.from, &link.uid, operator).await {
                        Ok(_) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e),
                    }
                }
                debug!(link_uid = %link.uid, entity_uid = %uid, "Relation retired with its entity");
                retired += 1;
            }
        }
        Ok(retired)
    }

    /// Apply a mutation and persist only the top-level fields it changed
    async fn update_with<F>(&self, uid: &str, operator: &str, mutate: F) -> Result<Entity>
    where
        F: FnOnce(&mut Entity) -> Result<()>,
    {
        let _guard = self.lock(uid).await;
        let before = self.get(uid).await?;
        let mut after = before.clone();
        mutate(&mut after)?;
        stamp(&mut after, operator);
        self.persist(&before, after).await
    }

    /// Write the fields that differ from `before`; the caller holds the lock
    async fn persist(&self, before: &Entity, after: Entity) -> Result<Entity> {
        let old = fields(before)?;
        let changed: Map<String, Value> = fields(&after)?
            .into_iter()
            .filter(|(key, value)| old.get(key) != Some(value))
            .collect();

        let table = self.table_of(&after).await;
        self.store.update_fields(table.as_str(), &after.uid, changed).await?;
        self.entities
            .write()
            .await
            .insert(after.uid.clone(), after.clone());
        Ok(after)
    }

    /// Update base fields, moving the document if the partition changes
    pub async fn update_base(
        &self,
        uid: &str,
        name: &str,
        disambiguation: &str,
        description: &str,
        concept: &str,
        operator: &str,
    ) -> Result<Entity> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument("entity name is required".into()));
        }
        let concept = concept.trim();
        if !concept.is_empty() && !self.taxonomy.exists(concept).await {
            return Err(Error::not_found("concept", concept));
        }

        let _guard = self.lock(uid).await;
        let current = self.get(uid).await?;
        let from = self.table_of(&current).await;
        let to = self.taxonomy.partition_of(concept).await;

        let mut moved = current.clone();
        moved.name = name.to_string();
        moved.disambiguation = disambiguation.to_string();
        moved.description = description.to_string();
        moved.concept = concept.to_string();
        stamp(&mut moved, operator);

        if from == to {
            let entity = self.persist(&current, moved).await?;
            info!(entity_uid = %uid, "Entity base updated");
            return Ok(entity);
        }

        self.store
            .insert(to.as_str(), Document::from_value(&moved.uid, &moved)?)
            .await?;
        self.store.soft_delete(from.as_str(), uid, operator).await?;
        self.entities
            .write()
            .await
            .insert(moved.uid.clone(), moved.clone());

        info!(entity_uid = %uid, from = %from, to = %to, "Entity moved to another partition");
        Ok(moved)
    }

    pub async fn update_name(&self, uid: &str, name: &str, operator: &str) -> Result<Entity> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidArgument("entity name is required".into()));
        }
        self.update_with(uid, operator, |e| {
            e.name = name;
            Ok(())
        })
        .await
    }

    pub async fn update_cover(&self, uid: &str, cover: &str, operator: &str) -> Result<Entity> {
        self.update_with(uid, operator, |e| {
            e.cover = cover.to_string();
            Ok(())
        })
        .await
    }

    /// Update the summary
    pub async fn update_remark(&self, uid: &str, summary: &str, operator: &str) -> Result<Entity> {
        self.update_with(uid, operator, |e| {
            e.summary = summary.to_string();
            Ok(())
        })
        .await
    }

    pub async fn update_description(&self, uid: &str, description: &str, operator: &str) -> Result<Entity> {
        self.update_with(uid, operator, |e| {
            e.description = description.to_string();
            Ok(())
        })
        .await
    }

    pub async fn update_tags(&self, uid: &str, tags: Vec<String>, operator: &str) -> Result<Entity> {
        self.update_with(uid, operator, |e| {
            e.tags = normalize_list(tags);
            Ok(())
        })
        .await
    }

    pub async fn update_synonyms(&self, uid: &str, synonyms: Vec<String>, operator: &str) -> Result<Entity> {
        self.update_with(uid, operator, |e| {
            e.synonyms = normalize_list(synonyms);
            Ok(())
        })
        .await
    }

    /// Set the words of the property keyed by `attribute`
    pub async fn update_property(
        &self,
        uid: &str,
        attribute: &str,
        words: Vec<Word>,
        operator: &str,
    ) -> Result<Entity> {
        if !self.taxonomy.attributes().contains(attribute).await {
            return Err(Error::not_found("attribute", attribute));
        }
        self.update_with(uid, operator, |e| {
            e.set_property(attribute, words);
            Ok(())
        })
        .await
    }

    /// Move the entity through its status machine
    ///
    /// Entering `Usable` publishes an archived record before the status is
    /// written, so a failed archive leaves the previous status in place.
    /// Leaving `Usable` keeps the last published record.
    pub async fn update_status(&self, uid: &str, status: EntityStatus, operator: &str) -> Result<Entity> {
        let _guard = self.lock(uid).await;
        let before = self.get(uid).await?;
        if !before.status.can_transition_to(status) {
            return Err(Error::Prohibition(format!(
                "entity '{}' is {} and cannot move to {}",
                uid, before.status, status
            )));
        }

        let mut after = before.clone();
        after.status = status;
        stamp(&mut after, operator);
        if status == EntityStatus::Usable {
            self.archive.archive(&after, operator).await?;
        }
        let entity = self.persist(&before, after).await?;

        info!(entity_uid = %uid, status = %status, "Entity status updated");
        Ok(entity)
    }

    /// Live entities classified under a concept
    pub async fn list_by_concept(&self, concept: &str) -> Result<Vec<Entity>> {
        let table = self.taxonomy.partition_of(concept).await;
        self.find(&table, &Filter::all().eq("concept", concept)).await
    }

    /// Every live entity with the name, homonyms included
    pub async fn find_by_name(&self, name: &str) -> Result<Vec<Entity>> {
        let mut found = Vec::new();
        for partition in self.taxonomy.partitions().await {
            found.extend(self.find(&partition, &Filter::all().eq("name", name)).await?);
        }
        Ok(found)
    }

    /// Every live entity in a partition
    pub async fn scan(&self, partition: &Partition) -> Result<Vec<Entity>> {
        self.find(partition, &Filter::all()).await
    }

    async fn find(&self, partition: &Partition, filter: &Filter) -> Result<Vec<Entity>> {
        let rows = self.store.find_many(partition.as_str(), filter).await?;
        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            match decode::<Entity>(row) {
                Ok(entity) => entities.push(entity),
                Err(e) => warn!(table = %partition, error = %e, "Skipping undecodable entity"),
            }
        }
        Ok(entities)
    }

    // ========== Events ==========

    pub async fn add_event(&self, uid: &str, mut event: Event, operator: &str) -> Result<Event> {
        if event.name.trim().is_empty() {
            return Err(Error::InvalidArgument("event name is required".into()));
        }
        if event.uid.is_empty() {
            event.uid = Uuid::new_v4().to_string();
        }
        let added = event.clone();
        self.update_with(uid, operator, |e| {
            if e.event(&event.uid).is_some() {
                return Err(Error::already_exists("event", &event.uid));
            }
            e.events.push(event);
            Ok(())
        })
        .await?;

        debug!(entity_uid = %uid, event_uid = %added.uid, "Event added");
        Ok(added)
    }

    pub async fn remove_event(&self, uid: &str, event_uid: &str, operator: &str) -> Result<()> {
        self.update_with(uid, operator, |e| {
            let before = e.events.len();
            e.events.retain(|ev| ev.uid != event_uid);
            if e.events.len() == before {
                return Err(Error::not_found("event", event_uid));
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn events(&self, uid: &str) -> Result<Vec<Event>> {
        Ok(self.get(uid).await?.events)
    }

    // ========== Relation statics ==========

    /// Record a relation on the entity's denormalized relation list
    pub async fn add_relation_static(&self, uid: &str, case: RelationCase, operator: &str) -> Result<Entity> {
        self.update_with(uid, operator, |e| {
            e.relations.retain(|r| r.uid != case.uid);
            e.relations.push(case);
            Ok(())
        })
        .await
    }

    pub async fn remove_relation_static(&self, uid: &str, link_uid: &str, operator: &str) -> Result<Entity> {
        self.update_with(uid, operator, |e| {
            e.relations.retain(|r| r.uid != link_uid);
            Ok(())
        })
        .await
    }

    /// Entity counts per partition, for diagnostics
    pub async fn counts(&self) -> Result<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for partition in self.taxonomy.partitions().await {
            let rows = self.store.find_many(partition.as_str(), &Filter::all()).await?;
            counts.insert(partition.to_string(), rows.len());
        }
        Ok(counts)
    }
}

fn stamp(entity: &mut Entity, operator: &str) {
    entity.operator = operator.to_string();
    entity.updated_at = Utc::now();
}
