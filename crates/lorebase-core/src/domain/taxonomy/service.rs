//! Taxonomy service
//!
//! Owns the concept forest and the per-concept partition cache behind a
//! single reader-writer lock. Every mutation persists to the document store
//! before the in-memory forest changes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::document::{
    ARCHIVED_TABLE, ATTRIBUTES_TABLE, BOXES_TABLE, CONCEPTS_TABLE, Document, DocumentStore, EXAMINES_TABLE, Filter,
    LINKS_TABLE, decode,
};
use crate::error::{Error, Result};

use super::attribute::AttributeRegistry;
use super::concept::{Concept, Partition};
use super::forest::ConceptForest;

/// Collections that can never be used as an entity partition
const RESERVED_TABLES: &[&str] = &[
    CONCEPTS_TABLE,
    ATTRIBUTES_TABLE,
    LINKS_TABLE,
    ARCHIVED_TABLE,
    EXAMINES_TABLE,
    BOXES_TABLE,
];

#[derive(Debug, Default)]
struct TaxonomyState {
    forest: ConceptForest,
    /// concept uid -> partition of its root
    partitions: HashMap<String, Partition>,
}

impl TaxonomyState {
    fn resolve_partition(&self, uid: &str, default: &Partition) -> Partition {
        self.forest
            .root_of(uid)
            .filter(|root| !root.table.is_empty())
            .map(|root| Partition::new(root.table.clone()))
            .unwrap_or_else(|| default.clone())
    }

    fn cache_partition(&mut self, uid: &str, default: &Partition) {
        let partition = self.resolve_partition(uid, default);
        self.partitions.insert(uid.to_string(), partition);
    }
}

/// Concept taxonomy
pub struct Taxonomy {
    store: Arc<dyn DocumentStore>,
    attributes: Arc<AttributeRegistry>,
    default_partition: Partition,
    state: RwLock<TaxonomyState>,
}

impl Taxonomy {
    pub fn new(store: Arc<dyn DocumentStore>, attributes: Arc<AttributeRegistry>, default_table: &str) -> Self {
        Self {
            store,
            attributes,
            default_partition: Partition::new(default_table),
            state: RwLock::new(TaxonomyState::default()),
        }
    }

    pub fn attributes(&self) -> &Arc<AttributeRegistry> {
        &self.attributes
    }

    pub fn default_partition(&self) -> &Partition {
        &self.default_partition
    }

    /// Rebuild the forest from the `concepts` collection
    ///
    /// Parents are attached before children; concepts whose parent never
    /// shows up are skipped with a warning.
    pub async fn load(&self) -> Result<usize> {
        let rows = self.store.find_many(CONCEPTS_TABLE, &Filter::all()).await?;
        let mut pending: Vec<Concept> = Vec::with_capacity(rows.len());
        for row in rows {
            match decode::<Concept>(row) {
                Ok(concept) => pending.push(concept),
                Err(e) => warn!(error = %e, "Skipping undecodable concept"),
            }
        }

        let mut state = TaxonomyState::default();
        loop {
            let before = pending.len();
            pending.retain(|concept| {
                let attached = if concept.is_top_level() {
                    state.forest.insert_top(concept.clone())
                } else if state.forest.contains(&concept.parent) {
                    state.forest.insert_child(&concept.parent.clone(), concept.clone())
                } else {
                    return true;
                };
                if !attached {
                    warn!(concept_uid = %concept.uid, "Duplicate concept skipped");
                }
                false
            });
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }
        for orphan in &pending {
            warn!(concept_uid = %orphan.uid, parent = %orphan.parent, "Concept parent missing");
        }

        let uids: Vec<String> = state.forest.preorder().iter().map(|c| c.uid.clone()).collect();
        for uid in &uids {
            state.cache_partition(uid, &self.default_partition);
        }

        let count = state.forest.len();
        *self.state.write().await = state;
        info!(count, "Taxonomy loaded");
        Ok(count)
    }

    async fn check_attributes(&self, attributes: &[String]) -> Result<()> {
        for uid in attributes {
            if !self.attributes.contains(uid).await {
                return Err(Error::not_found("attribute", uid));
            }
        }
        Ok(())
    }

    fn prepare(concept: &mut Concept, operator: &str) -> Result<()> {
        concept.name = concept.name.trim().to_string();
        if concept.name.is_empty() {
            return Err(Error::InvalidArgument("concept name is required".into()));
        }
        if concept.uid.is_empty() {
            concept.uid = Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        concept.created_at = now;
        concept.updated_at = now;
        if concept.creator.is_empty() {
            concept.creator = operator.to_string();
        }
        concept.operator = operator.to_string();
        Ok(())
    }

    async fn persist(&self, concept: &Concept) -> Result<()> {
        let document =
            Document::from_value(&concept.uid, concept)?.with_unique_key(Concept::name_key(&concept.name));
        self.store.insert(CONCEPTS_TABLE, document).await?;
        Ok(())
    }

    /// Register a top-level concept
    pub async fn create_top_concept(&self, mut concept: Concept, operator: &str) -> Result<Concept> {
        Self::prepare(&mut concept, operator)?;
        concept.parent.clear();
        concept.table = concept.table.trim().to_string();
        if RESERVED_TABLES.contains(&concept.table.as_str()) {
            return Err(Error::InvalidArgument(format!(
                "'{}' is reserved and cannot hold entities",
                concept.table
            )));
        }
        self.check_attributes(&concept.attributes).await?;

        let mut state = self.state.write().await;
        if state.forest.name_taken(&concept.name, None) {
            return Err(Error::already_exists("concept", &concept.name));
        }
        self.persist(&concept).await?;
        state.forest.insert_top(concept.clone());
        state.cache_partition(&concept.uid, &self.default_partition);

        info!(concept_uid = %concept.uid, name = %concept.name, table = %concept.table, "Top concept created");
        Ok(concept)
    }

    /// Append a child concept under an existing parent
    ///
    /// Children never own a table; they share their root's partition.
    pub async fn create_child(&self, parent: &str, mut concept: Concept, operator: &str) -> Result<Concept> {
        Self::prepare(&mut concept, operator)?;
        concept.parent = parent.to_string();
        concept.table.clear();
        self.check_attributes(&concept.attributes).await?;

        let mut state = self.state.write().await;
        if !state.forest.contains(parent) {
            return Err(Error::not_found("concept", parent));
        }
        if state.forest.name_taken(&concept.name, None) {
            return Err(Error::already_exists("concept", &concept.name));
        }
        self.persist(&concept).await?;
        state.forest.insert_child(parent, concept.clone());
        state.cache_partition(&concept.uid, &self.default_partition);

        info!(concept_uid = %concept.uid, parent = %parent, name = %concept.name, "Child concept created");
        Ok(concept)
    }

    pub async fn get_by_uid(&self, uid: &str) -> Result<Concept> {
        self.state
            .read()
            .await
            .forest
            .get(uid)
            .cloned()
            .ok_or_else(|| Error::not_found("concept", uid))
    }

    /// First concept with the name in pre-order
    pub async fn get_by_name(&self, name: &str) -> Result<Concept> {
        self.state
            .read()
            .await
            .forest
            .find_by_name(name)
            .cloned()
            .ok_or_else(|| Error::not_found("concept", name))
    }

    pub async fn exists(&self, uid: &str) -> bool {
        self.state.read().await.forest.contains(uid)
    }

    pub async fn get_top_concepts(&self) -> Vec<Concept> {
        self.state
            .read()
            .await
            .forest
            .top_concepts()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Every concept, depth-first pre-order
    pub async fn all(&self) -> Vec<Concept> {
        self.state.read().await.forest.preorder().into_iter().cloned().collect()
    }

    pub async fn children(&self, uid: &str) -> Result<Vec<Concept>> {
        self.state
            .read()
            .await
            .forest
            .children(uid)
            .map(|children| children.into_iter().cloned().collect())
            .ok_or_else(|| Error::not_found("concept", uid))
    }

    /// Whether `uid` sits anywhere below `ancestor`
    pub async fn had_child(&self, ancestor: &str, uid: &str) -> bool {
        self.state.read().await.forest.had_child(ancestor, uid)
    }

    /// Whether the concept or any descendant uses the attribute
    ///
    /// `key` may be an attribute key or an attribute uid.
    pub async fn had_attribute(&self, uid: &str, key: &str) -> Result<bool> {
        let attribute = match self.attributes.get_by_key(key).await {
            Ok(def) => def.uid,
            Err(e) if e.is_not_found() => key.to_string(),
            Err(e) => return Err(e),
        };

        let state = self.state.read().await;
        if !state.forest.contains(uid) {
            return Err(Error::not_found("concept", uid));
        }
        Ok(state.forest.had_attribute(uid, &attribute))
    }

    /// Storage partition for a concept
    ///
    /// Blank or unknown concepts fall back to the default partition.
    pub async fn partition_of(&self, concept: &str) -> Partition {
        if concept.is_empty() {
            return self.default_partition.clone();
        }
        let state = self.state.read().await;
        match state.partitions.get(concept) {
            Some(partition) => partition.clone(),
            None => {
                debug!(concept_uid = %concept, "Partition cache miss");
                state.resolve_partition(concept, &self.default_partition)
            }
        }
    }

    /// Every distinct partition, the default one included
    pub async fn partitions(&self) -> Vec<Partition> {
        let state = self.state.read().await;
        let mut set: BTreeSet<Partition> = state.partitions.values().cloned().collect();
        set.insert(self.default_partition.clone());
        set.into_iter().collect()
    }

    /// Update display fields; a rename re-validates uniqueness
    pub async fn update_base(
        &self,
        uid: &str,
        name: &str,
        remark: &str,
        cover: &str,
        operator: &str,
    ) -> Result<Concept> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument("concept name is required".into()));
        }

        let mut state = self.state.write().await;
        let current = state
            .forest
            .get(uid)
            .cloned()
            .ok_or_else(|| Error::not_found("concept", uid))?;

        if current.name != name {
            if state.forest.name_taken(name, Some(uid)) {
                return Err(Error::already_exists("concept", name));
            }
            self.store
                .rekey(CONCEPTS_TABLE, uid, vec![Concept::name_key(name)])
                .await?;
        }

        let now = Utc::now();
        let mut fields = Map::new();
        fields.insert("name".into(), Value::from(name));
        fields.insert("remark".into(), Value::from(remark));
        fields.insert("cover".into(), Value::from(cover));
        fields.insert("operator".into(), Value::from(operator));
        fields.insert("updated_at".into(), serde_json::to_value(now)?);
        self.store.update_fields(CONCEPTS_TABLE, uid, fields).await?;

        let concept = state
            .forest
            .get_mut(uid)
            .ok_or_else(|| Error::not_found("concept", uid))?;
        concept.name = name.to_string();
        concept.remark = remark.to_string();
        concept.cover = cover.to_string();
        concept.operator = operator.to_string();
        concept.updated_at = now;

        info!(concept_uid = %uid, "Concept updated");
        Ok(concept.clone())
    }

    /// Replace the concept's attribute list
    pub async fn update_attributes(&self, uid: &str, attributes: Vec<String>, operator: &str) -> Result<Concept> {
        self.check_attributes(&attributes).await?;

        let mut state = self.state.write().await;
        if !state.forest.contains(uid) {
            return Err(Error::not_found("concept", uid));
        }

        let now = Utc::now();
        let mut fields = Map::new();
        fields.insert("attributes".into(), serde_json::to_value(&attributes)?);
        fields.insert("operator".into(), Value::from(operator));
        fields.insert("updated_at".into(), serde_json::to_value(now)?);
        self.store.update_fields(CONCEPTS_TABLE, uid, fields).await?;

        let concept = state
            .forest
            .get_mut(uid)
            .ok_or_else(|| Error::not_found("concept", uid))?;
        concept.attributes = attributes;
        concept.operator = operator.to_string();
        concept.updated_at = now;

        info!(concept_uid = %uid, count = concept.attributes.len(), "Concept attributes updated");
        Ok(concept.clone())
    }

    /// Remove a concept
    ///
    /// Only the concept's own document is soft-deleted. Its descendants are
    /// detached from the forest together with it, but their documents stay
    /// in the store and are skipped as orphans by `load`.
    ///
    /// Refused with `Prohibition` while any live entity is classified under
    /// the concept or one of its descendants.
    pub async fn remove(&self, uid: &str, operator: &str) -> Result<Vec<Concept>> {
        let mut state = self.state.write().await;
        if !state.forest.contains(uid) {
            return Err(Error::not_found("concept", uid));
        }

        let subtree: Vec<String> = state.forest.subtree(uid).iter().map(|c| c.uid.clone()).collect();
        let mut tables: BTreeSet<Partition> = BTreeSet::new();
        tables.insert(state.resolve_partition(uid, &self.default_partition));
        tables.insert(self.default_partition.clone());

        for table in &tables {
            for concept in &subtree {
                let live = self
                    .store
                    .find_many(table.as_str(), &Filter::all().eq("concept", concept.as_str()))
                    .await?;
                if !live.is_empty() {
                    return Err(Error::Prohibition(format!(
                        "concept '{}' still classifies {} live entit{}",
                        concept,
                        live.len(),
                        if live.len() == 1 { "y" } else { "ies" }
                    )));
                }
            }
        }

        self.store.soft_delete(CONCEPTS_TABLE, uid, operator).await?;
        let removed = state.forest.remove(uid);
        for concept in &removed {
            state.partitions.remove(&concept.uid);
        }

        info!(concept_uid = %uid, removed = removed.len(), operator = %operator, "Concept removed");
        Ok(removed)
    }
}
