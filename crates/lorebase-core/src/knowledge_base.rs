//! Knowledge base context handle
//!
//! `KnowledgeBase` is built once at startup and wires every component
//! together. There is no process-wide state: two handles over two databases
//! are fully isolated.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::archive::ArchiveEngine;
use crate::domain::document::{Document, DocumentStore, Filter, LINKS_TABLE, decode};
use crate::domain::entity::{BoxStore, Entity, EntityCache, EntityStatus, RelationCase};
use crate::domain::examine::ExamineWorkflow;
use crate::domain::graph::{Direction, EdgeProps, GraphMirror, GraphStore, Link};
use crate::domain::reconcile::{Outbox, ReconcileReport, ReconcileScheduler, Reconciler};
use crate::domain::taxonomy::{AttributeRegistry, Taxonomy};
use crate::error::{Error, Result};
use crate::infrastructure::{SqliteDocumentStore, SqliteGraphStore};
use crate::storage::Database;

/// A relation to create between two entities
#[derive(Debug, Clone)]
pub struct NewRelation {
    pub from: String,
    pub to: String,
    /// Edge label
    pub kind: String,
    pub name: String,
    pub relation: String,
    pub direction: Direction,
}

impl NewRelation {
    pub fn new(from: impl Into<String>, to: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: "relation".into(),
            name: name.into(),
            relation: String::new(),
            direction: Direction::Forward,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = relation.into();
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

pub struct KnowledgeBase {
    config: Config,
    database: Option<Database>,
    store: Arc<dyn DocumentStore>,
    graph: Arc<dyn GraphStore>,
    attributes: Arc<AttributeRegistry>,
    taxonomy: Arc<Taxonomy>,
    archive: Arc<ArchiveEngine>,
    boxes: Arc<BoxStore>,
    mirror: Arc<GraphMirror>,
    outbox: Arc<Outbox>,
    entities: Arc<EntityCache>,
    examine: Arc<ExamineWorkflow>,
    reconciler: Arc<Reconciler>,
}

impl KnowledgeBase {
    /// Open the database named by the configuration and load the taxonomy
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let path = config.database_path()?;
        let database = Database::open(&path, config.storage.max_connections).await?;

        let mut kb = Self::over_database(database, config).await?;
        info!(path = %path.display(), "Knowledge base opened");
        kb.config.storage.path = Some(path);
        Ok(kb)
    }

    /// Fresh in-memory knowledge base with default configuration
    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::in_memory_with(Config::default()).await
    }

    pub async fn in_memory_with(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let database = Database::in_memory().await?;
        Self::over_database(database, config).await
    }

    async fn over_database(database: Database, config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(database.pool().clone()));
        let graph: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(database.pool().clone()));

        let mut kb = Self::with_stores(config, store, graph)
            .await
            .context("Failed to load knowledge base state")?;
        kb.database = Some(database);
        Ok(kb)
    }

    /// Wire the components over arbitrary store implementations
    pub async fn with_stores(config: Config, store: Arc<dyn DocumentStore>, graph: Arc<dyn GraphStore>) -> Result<Self> {
        let attributes = Arc::new(AttributeRegistry::new(store.clone()));
        let taxonomy = Arc::new(Taxonomy::new(
            store.clone(),
            attributes.clone(),
            &config.cache.default_table,
        ));
        let archive = Arc::new(ArchiveEngine::new(store.clone()));
        let boxes = Arc::new(BoxStore::new(store.clone()));
        let mirror = Arc::new(GraphMirror::new(graph.clone()));
        let outbox = Arc::new(Outbox::new());
        let entities = Arc::new(
            EntityCache::new(
                store.clone(),
                taxonomy.clone(),
                archive.clone(),
                boxes.clone(),
                mirror.clone(),
                outbox.clone(),
            )
            .with_eager_replication(config.cache.eager_replication),
        );
        let examine = Arc::new(ExamineWorkflow::new(
            store.clone(),
            entities.clone(),
            attributes.clone(),
            archive.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            entities.clone(),
            taxonomy.clone(),
            mirror.clone(),
            outbox.clone(),
        ));

        let attribute_count = attributes.load().await?;
        let concept_count = taxonomy.load().await?;
        info!(
            attributes = attribute_count,
            concepts = concept_count,
            "Knowledge base state loaded"
        );

        Ok(Self {
            config,
            database: None,
            store,
            graph,
            attributes,
            taxonomy,
            archive,
            boxes,
            mirror,
            outbox,
            entities,
            examine,
            reconciler,
        })
    }

    // ========== Accessors ==========

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The backing database, when opened through [`open`](Self::open) or
    /// [`in_memory`](Self::in_memory)
    pub fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    pub fn attributes(&self) -> &Arc<AttributeRegistry> {
        &self.attributes
    }

    pub fn taxonomy(&self) -> &Arc<Taxonomy> {
        &self.taxonomy
    }

    pub fn entities(&self) -> &Arc<EntityCache> {
        &self.entities
    }

    pub fn archive(&self) -> &Arc<ArchiveEngine> {
        &self.archive
    }

    pub fn boxes(&self) -> &Arc<BoxStore> {
        &self.boxes
    }

    pub fn mirror(&self) -> &Arc<GraphMirror> {
        &self.mirror
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    pub fn examine(&self) -> &Arc<ExamineWorkflow> {
        &self.examine
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    // ========== Operations ==========

    /// Run one reconciliation pass
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconciler.reconcile().await
    }

    /// A stopped scheduler over this knowledge base's reconciler
    pub fn scheduler(&self) -> ReconcileScheduler {
        ReconcileScheduler::new(
            self.reconciler.clone(),
            Duration::from_secs(self.config.reconcile.interval_secs),
        )
    }

    /// Publish an entity under the configured archive operator
    pub async fn publish(&self, uid: &str) -> Result<Entity> {
        self.entities
            .update_status(uid, EntityStatus::Usable, &self.config.archive.operator)
            .await
    }

    /// Relate two entities
    ///
    /// The graph edge is created first, then the `links` document, then the
    /// source entity's relation statics. An edge left behind by an earlier
    /// attempt that never reached the `links` collection is adopted.
    pub async fn create_relation(&self, new: NewRelation, operator: &str) -> Result<Link> {
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidArgument("relation name is required".into()));
        }
        if new.from == new.to {
            return Err(Error::InvalidArgument("an entity cannot be related to itself".into()));
        }
        if !self.find_links(&new.from, &new.to, &name).await?.is_empty() {
            return Err(Error::already_exists(
                "relation",
                format!("{} -{}-> {}", new.from, name, new.to),
            ));
        }

        let from = self.entities.get(&new.from).await?;
        let to = self.entities.get(&new.to).await?;
        let from_node = self
            .mirror
            .ensure_node(&from.uid, &from.name, self.entities.table_of(&from).await.as_str())
            .await?;
        let to_node = self
            .mirror
            .ensure_node(&to.uid, &to.name, self.entities.table_of(&to).await.as_str())
            .await?;

        let props = EdgeProps {
            name: name.clone(),
            relation: new.relation.clone(),
            direction: new.direction,
        };
        match self.mirror.create_link(&from_node, &to_node, &new.kind, props).await {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e),
        }

        let now = Utc::now();
        let link = Link {
            uid: Uuid::new_v4().to_string(),
            from: from.uid.clone(),
            to: to.uid.clone(),
            kind: new.kind,
            name,
            relation: new.relation,
            direction: new.direction,
            creator: operator.to_string(),
            operator: operator.to_string(),
            created_at: now,
            updated_at: now,
        };
        let document = Document::from_value(&link.uid, &link)?.with_unique_key(link.unique_key());
        self.store.insert(LINKS_TABLE, document).await?;

        let case = RelationCase {
            uid: link.uid.clone(),
            entity: link.to.clone(),
            name: link.name.clone(),
            relation: link.relation.clone(),
            direction: link.direction,
        };
        self.entities.add_relation_static(&link.from, case, operator).await?;

        info!(link_uid = %link.uid, from = %link.from, to = %link.to, name = %link.name, "Relation created");
        Ok(link)
    }

    /// Remove a relation: edge, link document and relation static
    pub async fn remove_relation(&self, link_uid: &str, operator: &str) -> Result<()> {
        let link = self.get_relation(link_uid).await?;

        self.mirror.remove_link(&link.from, &link.to, &link.name).await?;
        self.store.soft_delete(LINKS_TABLE, link_uid, operator).await?;
        match self.entities.remove_relation_static(&link.from, link_uid, operator).await {
            Ok(_) => {}
            // The source entity may already be gone
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        info!(link_uid = %link_uid, operator = %operator, "Relation removed");
        Ok(())
    }

    pub async fn get_relation(&self, link_uid: &str) -> Result<Link> {
        let body = self
            .store
            .find_by_id(LINKS_TABLE, link_uid)
            .await?
            .ok_or_else(|| Error::not_found("relation", link_uid))?;
        decode(body)
    }

    /// Live relations starting at an entity
    pub async fn relations_of(&self, entity_uid: &str) -> Result<Vec<Link>> {
        self.store
            .find_many(LINKS_TABLE, &Filter::all().eq("from", entity_uid))
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    async fn find_links(&self, from: &str, to: &str, name: &str) -> Result<Vec<Value>> {
        self.store
            .find_many(
                LINKS_TABLE,
                &Filter::all().eq("from", from).eq("to", to).eq("name", name),
            )
            .await
    }
}
