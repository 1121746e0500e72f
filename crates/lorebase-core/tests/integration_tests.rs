//! Lorebase Core Integration Tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lorebase_core::domain::document::DocumentStore;
use lorebase_core::domain::graph::{EdgeProps, GraphEdge, GraphNode, GraphStore, NodeProps, Subgraph};
use lorebase_core::infrastructure::{SqliteDocumentStore, SqliteGraphStore};
use lorebase_core::prelude::*;
use lorebase_core::storage::Database;

async fn knowledge_base() -> KnowledgeBase {
    let mut config = Config::default();
    config.cache.eager_replication = false;
    KnowledgeBase::in_memory_with(config).await.unwrap()
}

async fn person(kb: &KnowledgeBase) -> Concept {
    kb.taxonomy()
        .create_top_concept(Concept::new("Person", ConceptType::Person).with_table("entities"), "admin")
        .await
        .unwrap()
}

/// Graph store that fails node creation while `down` is set
struct FlakyGraphStore {
    inner: SqliteGraphStore,
    down: AtomicBool,
    rejected: AtomicUsize,
}

impl FlakyGraphStore {
    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl GraphStore for FlakyGraphStore {
    async fn create_node(&self, label: &str, props: NodeProps) -> Result<i64> {
        if self.down.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(Error::Unavailable("graph store offline".into()));
        }
        self.inner.create_node(label, props).await
    }

    async fn create_edge(&self, from_id: i64, to_id: i64, label: &str, props: EdgeProps) -> Result<i64> {
        self.inner.create_edge(from_id, to_id, label, props).await
    }

    async fn get_node(&self, uid: &str) -> Result<Option<GraphNode>> {
        self.inner.get_node(uid).await
    }

    async fn get_node_by_id(&self, id: i64) -> Result<Option<GraphNode>> {
        self.inner.get_node_by_id(id).await
    }

    async fn find_edge(&self, from_uid: &str, to_uid: &str, name: &str) -> Result<Option<GraphEdge>> {
        self.inner.find_edge(from_uid, to_uid, name).await
    }

    async fn shortest_path(&self, from_uid: &str, to_uid: &str, max_depth: u32) -> Result<Option<Subgraph>> {
        self.inner.shortest_path(from_uid, to_uid, max_depth).await
    }

    async fn neighborhood(&self, uid: &str, label: Option<&str>) -> Result<Subgraph> {
        self.inner.neighborhood(uid, label).await
    }

    async fn delete_node(&self, id: i64, label: &str) -> Result<bool> {
        self.inner.delete_node(id, label).await
    }

    async fn delete_edge(&self, id: i64) -> Result<bool> {
        self.inner.delete_edge(id).await
    }
}

#[tokio::test]
async fn test_concepts_visible_after_creation() {
    let kb = knowledge_base().await;
    let root = person(&kb).await;
    let scholar = kb
        .taxonomy()
        .create_child(&root.uid, Concept::new("Scholar", ConceptType::Person), "admin")
        .await
        .unwrap();
    let poet = kb
        .taxonomy()
        .create_child(&scholar.uid, Concept::new("Poet", ConceptType::Person), "admin")
        .await
        .unwrap();

    for concept in [&root, &scholar, &poet] {
        assert_eq!(kb.taxonomy().get_by_uid(&concept.uid).await.unwrap().name, concept.name);
    }
    assert!(kb.taxonomy().had_child(&root.uid, &poet.uid).await);
    assert!(kb.taxonomy().had_child(&scholar.uid, &poet.uid).await);
    assert!(!kb.taxonomy().had_child(&poet.uid, &root.uid).await);
    assert_eq!(kb.taxonomy().get_by_name("Poet").await.unwrap().uid, poet.uid);

    // Children share the root's partition
    assert_eq!(kb.taxonomy().partition_of(&poet.uid).await.as_str(), "entities");
}

#[tokio::test]
async fn test_attribute_inheritance_by_containment() {
    let kb = knowledge_base().await;
    let born = kb
        .attributes()
        .create(AttributeDefinition::new("Born", "born", AttributeKind::Date), "admin")
        .await
        .unwrap();
    let root = person(&kb).await;
    let child = kb
        .taxonomy()
        .create_child(
            &root.uid,
            Concept::new("Emperor", ConceptType::Person).with_attributes(vec![born.uid.clone()]),
            "admin",
        )
        .await
        .unwrap();

    assert!(kb.taxonomy().had_attribute(&root.uid, "born").await.unwrap());
    assert!(kb.taxonomy().had_attribute(&child.uid, &born.uid).await.unwrap());
    assert!(!kb.taxonomy().had_attribute(&root.uid, "died").await.unwrap());

    // A referenced attribute cannot be removed
    let err = kb.attributes().remove(&born.uid, "admin").await.unwrap_err();
    assert!(matches!(err, Error::Prohibition(_)));
}

#[tokio::test]
async fn test_entity_publish_scenario() {
    let kb = knowledge_base().await;
    let root = person(&kb).await;

    let created = kb
        .entities()
        .create(Entity::new("Zhang San", &root.uid), "alice")
        .await
        .unwrap();
    let fetched = kb.entities().get(&created.uid).await.unwrap();
    assert_eq!(fetched.status, EntityStatus::Idle);
    assert_eq!(fetched.concept, root.uid);

    kb.entities()
        .update_status(&created.uid, EntityStatus::Usable, "alice")
        .await
        .unwrap();
    let record = kb.archive().get_by_entity(&created.uid).await.unwrap().unwrap();
    assert_eq!(record.decode().unwrap().name, "Zhang San");

    // Leaving Usable keeps the last published snapshot
    kb.entities()
        .update_status(&created.uid, EntityStatus::Pending, "alice")
        .await
        .unwrap();
    let published = kb.archive().decode(&created.uid).await.unwrap();
    assert_eq!(published.status, EntityStatus::Usable);
    assert_eq!(kb.archive().list_by_concept(&root.uid).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_archive_update_is_idempotent() {
    let kb = knowledge_base().await;
    let entity = kb.entities().create(Entity::new("Li Si", ""), "a").await.unwrap();
    let record = kb.archive().archive(&entity, "a").await.unwrap();

    let first = kb.archive().update_file(&record, &entity, "a").await.unwrap();
    let second = kb.archive().update_file(&first.record, &entity, "a").await.unwrap();
    assert_eq!(first.record.digest, second.record.digest);
    assert_eq!(first.record.payload, second.record.payload);
    assert!(!second.changed);
}

#[tokio::test]
async fn test_examine_approval_scenario() {
    let kb = knowledge_base().await;
    let root = person(&kb).await;
    let entity = kb
        .entities()
        .create(Entity::new("Old Name", &root.uid), "alice")
        .await
        .unwrap();

    let record = kb
        .examine()
        .propose(&entity.uid, "name", "New Name", ExamineCategory::Base, "editor")
        .await
        .unwrap();
    kb.examine()
        .update_status(&record.uid, ExamineStatus::Free, "moderator")
        .await
        .unwrap();

    let updated = kb.entities().get(&entity.uid).await.unwrap();
    assert_eq!(updated.name, "New Name");
    assert_eq!(updated.status, EntityStatus::Usable);
    assert_eq!(kb.archive().decode(&entity.uid).await.unwrap().name, "New Name");
}

#[tokio::test]
async fn test_duplicate_edge_rejected() {
    let kb = knowledge_base().await;
    let a = kb.entities().create(Entity::new("A", ""), "x").await.unwrap();
    let b = kb.entities().create(Entity::new("B", ""), "x").await.unwrap();
    let node_a = kb.mirror().ensure_node(&a.uid, "A", "entities").await.unwrap();
    let node_b = kb.mirror().ensure_node(&b.uid, "B", "entities").await.unwrap();

    let props = EdgeProps {
        name: "apprentice".into(),
        relation: "mentor".into(),
        direction: Direction::Forward,
    };
    kb.mirror()
        .create_link(&node_a, &node_b, "relation", props.clone())
        .await
        .unwrap();
    let err = kb
        .mirror()
        .create_link(&node_a, &node_b, "relation", props)
        .await
        .unwrap_err();
    assert!(err.is_already_exists());
    assert_eq!(kb.mirror().edge_count().await, 1);

    let path = kb.mirror().get_path(&a.uid, &b.uid).await.unwrap().unwrap();
    assert_eq!(path.nodes.len(), 2);
    assert_eq!(path.edges.len(), 1);
}

#[tokio::test]
async fn test_subgraph_merges_neighbors() {
    let kb = knowledge_base().await;
    let center = kb.entities().create(Entity::new("Center", ""), "x").await.unwrap();
    let left = kb.entities().create(Entity::new("Left", ""), "x").await.unwrap();
    let right = kb.entities().create(Entity::new("Right", ""), "x").await.unwrap();

    kb.create_relation(NewRelation::new(&center.uid, &left.uid, "knows"), "x")
        .await
        .unwrap();
    kb.create_relation(NewRelation::new(&right.uid, &center.uid, "knows"), "x")
        .await
        .unwrap();

    let graph = kb.mirror().get_subgraph(&center.uid).await.unwrap();
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.nodes[0].entity, center.uid);
    assert_eq!(graph.edges.len(), 2);
}

#[tokio::test]
async fn test_concept_removal_guarded_by_live_entities() {
    let kb = knowledge_base().await;
    let root = person(&kb).await;
    let child = kb
        .taxonomy()
        .create_child(&root.uid, Concept::new("Monk", ConceptType::Person), "admin")
        .await
        .unwrap();
    let entity = kb
        .entities()
        .create(Entity::new("Xuanzang", &child.uid), "a")
        .await
        .unwrap();

    let err = kb.taxonomy().remove(&root.uid, "admin").await.unwrap_err();
    assert!(matches!(err, Error::Prohibition(_)));

    kb.entities().remove(&entity.uid, "a").await.unwrap();
    let removed = kb.taxonomy().remove(&root.uid, "admin").await.unwrap();
    assert_eq!(removed.len(), 2);
    assert!(kb.taxonomy().get_top_concepts().await.is_empty());
    assert!(kb.taxonomy().get_by_uid(&child.uid).await.unwrap_err().is_not_found());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_child_same_name() {
    let kb = knowledge_base().await;
    let root = person(&kb).await;
    let taxonomy = kb.taxonomy().clone();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let taxonomy = taxonomy.clone();
        let parent = root.uid.clone();
        handles.push(tokio::spawn(async move {
            taxonomy
                .create_child(&parent, Concept::new("Twin", ConceptType::Person), "admin")
                .await
        }));
    }

    let mut created = 0;
    let mut repeated = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) if e.is_already_exists() => repeated += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(repeated, 1);
    assert_eq!(taxonomy.children(&root.uid).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reconciliation_heals_failed_replication() {
    let db = Database::in_memory().await.unwrap();
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(db.pool().clone()));
    let flaky = Arc::new(FlakyGraphStore {
        inner: SqliteGraphStore::new(db.pool().clone()),
        down: AtomicBool::new(true),
        rejected: AtomicUsize::new(0),
    });
    let graph: Arc<dyn GraphStore> = flaky.clone();

    // Eager replication on: the detached attempt fails and stays queued
    let kb = KnowledgeBase::with_stores(Config::default(), store, graph).await.unwrap();
    let entity = kb.entities().create(Entity::new("Zhang San", ""), "a").await.unwrap();

    for _ in 0..200 {
        if flaky.rejected.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for _ in 0..200 {
        if kb.outbox().pending().await.iter().any(|e| e.attempts > 0) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(kb.outbox().contains(&entity.uid).await);

    let report = kb.reconcile().await.unwrap();
    assert_eq!(report.nodes_created, 0);
    assert!(report.failures >= 1);
    assert_eq!(report.pending, 1);

    flaky.set_down(false);
    let report = kb.reconcile().await.unwrap();
    assert_eq!(report.nodes_created, 1);
    assert_eq!(report.pending, 0);
    assert!(report.is_clean());
    assert!(kb.graph().get_node(&entity.uid).await.unwrap().is_some());

    let report = kb.reconcile().await.unwrap();
    assert_eq!(report.nodes_created, 0);
}

#[tokio::test]
async fn test_relation_edges_rebuilt_by_reconciliation() {
    let db = Database::in_memory().await.unwrap();
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(db.pool().clone()));
    let mut config = Config::default();
    config.cache.eager_replication = false;

    let (a, b) = {
        let kb = KnowledgeBase::with_stores(
            config.clone(),
            store.clone(),
            Arc::new(SqliteGraphStore::new(db.pool().clone())),
        )
        .await
        .unwrap();
        let a = kb.entities().create(Entity::new("A", ""), "x").await.unwrap();
        let b = kb.entities().create(Entity::new("B", ""), "x").await.unwrap();
        kb.create_relation(NewRelation::new(&a.uid, &b.uid, "ally"), "x")
            .await
            .unwrap();
        (a, b)
    };

    // Drop the graph side entirely, as if the graph store were rebuilt
    clear_graph(&db).await;

    let kb = KnowledgeBase::with_stores(config, store, Arc::new(SqliteGraphStore::new(db.pool().clone())))
        .await
        .unwrap();
    let report = kb.reconcile().await.unwrap();
    assert_eq!(report.nodes_created, 2);
    assert_eq!(report.edges_created, 1);
    assert!(kb.mirror().has_edge(&a.uid, &b.uid, "ally").await);
}

async fn clear_graph(db: &Database) {
    sqlx::query("DELETE FROM graph_edges").execute(db.pool()).await.unwrap();
    sqlx::query("DELETE FROM graph_nodes").execute(db.pool()).await.unwrap();
}

#[tokio::test]
async fn test_isolated_instances() {
    let first = knowledge_base().await;
    let second = knowledge_base().await;
    person(&first).await;

    assert_eq!(first.taxonomy().get_top_concepts().await.len(), 1);
    assert!(second.taxonomy().get_top_concepts().await.is_empty());
    // Same name is free in another instance
    person(&second).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_events_on_one_entity() {
    let kb = Arc::new(knowledge_base().await);
    let entity = kb.entities().create(Entity::new("Li Bai", ""), "a").await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let kb = kb.clone();
        let uid = entity.uid.clone();
        handles.push(tokio::spawn(async move {
            kb.entities().add_event(&uid, Event::new(format!("journey {}", i)), "a").await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    kb.entities().evict(&entity.uid).await;
    assert_eq!(kb.entities().events(&entity.uid).await.unwrap().len(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_relations_from_one_source() {
    let kb = Arc::new(knowledge_base().await);
    let source = kb.entities().create(Entity::new("Hub", ""), "a").await.unwrap();
    let mut targets = Vec::new();
    for i in 0..8 {
        targets.push(kb.entities().create(Entity::new(format!("Spoke {}", i), ""), "a").await.unwrap());
    }

    let mut handles = Vec::new();
    for target in &targets {
        let kb = kb.clone();
        let from = source.uid.clone();
        let to = target.uid.clone();
        handles.push(tokio::spawn(async move {
            kb.create_relation(NewRelation::new(&from, &to, "knows"), "a").await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(kb.relations_of(&source.uid).await.unwrap().len(), 8);
    kb.entities().evict(&source.uid).await;
    let stored = kb.entities().get(&source.uid).await.unwrap();
    assert_eq!(stored.relations.len(), 8);
    for target in &targets {
        assert!(kb.mirror().has_edge(&source.uid, &target.uid, "knows").await);
    }
}

#[tokio::test]
async fn test_removing_related_entity_keeps_reconciliation_clean() {
    let kb = knowledge_base().await;
    let a = kb.entities().create(Entity::new("A", ""), "a").await.unwrap();
    let b = kb.entities().create(Entity::new("B", ""), "a").await.unwrap();
    let link = kb
        .create_relation(NewRelation::new(&a.uid, &b.uid, "ally"), "a")
        .await
        .unwrap();
    assert!(kb.reconcile().await.unwrap().is_clean());

    kb.entities().remove(&b.uid, "a").await.unwrap();

    assert!(kb.relations_of(&a.uid).await.unwrap().is_empty());
    assert!(kb.get_relation(&link.uid).await.unwrap_err().is_not_found());
    assert!(kb.entities().get(&a.uid).await.unwrap().relations.is_empty());
    assert!(!kb.mirror().has_edge(&a.uid, &b.uid, "ally").await);

    let first = kb.reconcile().await.unwrap();
    assert!(first.is_clean());
    assert_eq!(first.links_retired, 0);
    assert!(kb.reconcile().await.unwrap().is_clean());
}
