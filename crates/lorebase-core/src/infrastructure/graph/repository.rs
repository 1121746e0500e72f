//! SQLite implementation of the GraphStore
//!
//! Shortest paths are a level-by-level breadth-first search, one edge query
//! per level. Node uniqueness by entity uid and edge uniqueness by
//! `(from, to, name)` are unique indexes.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::domain::graph::{Direction, EdgeProps, GraphEdge, GraphNode, GraphStore, NodeProps, Subgraph};
use crate::error::{Error, Result, is_foreign_key_violation, is_unique_violation};

const EDGE_SELECT: &str = r#"
    SELECT e.id, e.label, e.name, e.relation, e.direction,
           f.uid AS from_uid, t.uid AS to_uid
    FROM graph_edges e
    JOIN graph_nodes f ON f.id = e.from_id
    JOIN graph_nodes t ON t.id = e.to_id
"#;

/// SQLite implementation of the graph store
#[derive(Clone)]
pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    /// Create a new SQLite graph store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn edge_by_id(&self, id: i64) -> Result<Option<GraphEdge>> {
        let row: Option<EdgeRow> = sqlx::query_as(&format!("{} WHERE e.id = ?", EDGE_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(EdgeRow::into_edge).transpose()
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn create_node(&self, label: &str, props: NodeProps) -> Result<i64> {
        let labels = serde_json::to_string(&[label])?;

        let result = sqlx::query("INSERT INTO graph_nodes (uid, name, labels) VALUES (?, ?, ?)")
            .bind(&props.uid)
            .bind(&props.name)
            .bind(&labels)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::already_exists("graph node for entity", &props.uid)
                } else {
                    Error::DatabaseError(e)
                }
            })?;

        let id = result.last_insert_rowid();
        debug!(node_id = id, uid = %props.uid, label = %label, "Node stored");
        Ok(id)
    }

    async fn create_edge(&self, from_id: i64, to_id: i64, label: &str, props: EdgeProps) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO graph_edges (from_id, to_id, label, name, relation, direction)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(from_id)
        .bind(to_id)
        .bind(label)
        .bind(&props.name)
        .bind(&props.relation)
        .bind(props.direction.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::already_exists("graph edge", format!("{} -{}-> {}", from_id, props.name, to_id))
            } else if is_foreign_key_violation(&e) {
                Error::not_found("graph node", format!("{} or {}", from_id, to_id))
            } else {
                Error::DatabaseError(e)
            }
        })?;

        let id = result.last_insert_rowid();
        debug!(edge_id = id, from_id, to_id, name = %props.name, "Edge stored");
        Ok(id)
    }

    async fn get_node(&self, uid: &str) -> Result<Option<GraphNode>> {
        let row: Option<NodeRow> = sqlx::query_as("SELECT id, uid, name, labels FROM graph_nodes WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?;

        row.map(NodeRow::into_node).transpose()
    }

    async fn get_node_by_id(&self, id: i64) -> Result<Option<GraphNode>> {
        let row: Option<NodeRow> = sqlx::query_as("SELECT id, uid, name, labels FROM graph_nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(NodeRow::into_node).transpose()
    }

    async fn find_edge(&self, from_uid: &str, to_uid: &str, name: &str) -> Result<Option<GraphEdge>> {
        let row: Option<EdgeRow> = sqlx::query_as(&format!(
            "{} WHERE f.uid = ? AND t.uid = ? AND e.name = ?",
            EDGE_SELECT
        ))
        .bind(from_uid)
        .bind(to_uid)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(EdgeRow::into_edge).transpose()
    }

    async fn shortest_path(&self, from_uid: &str, to_uid: &str, max_depth: u32) -> Result<Option<Subgraph>> {
        let (Some(start), Some(target)) = (self.get_node(from_uid).await?, self.get_node(to_uid).await?) else {
            return Ok(None);
        };

        // Breadth-first, one query per level; every node is expanded once
        let mut parents: HashMap<i64, Option<(i64, i64)>> = HashMap::from([(start.id, None)]);
        let mut frontier = vec![start.id];
        let mut depth = 0;
        while !parents.contains_key(&target.id) && !frontier.is_empty() && depth < max_depth {
            let ids = serde_json::to_string(&frontier)?;
            let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
                r#"
                SELECT id, from_id, to_id
                FROM graph_edges
                WHERE from_id IN (SELECT value FROM json_each(?))
                    OR to_id IN (SELECT value FROM json_each(?))
                ORDER BY id
                "#,
            )
            .bind(&ids)
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;

            let expanding: HashSet<i64> = frontier.iter().copied().collect();
            let mut next = Vec::new();
            for (edge, from_id, to_id) in rows {
                for (here, there) in [(from_id, to_id), (to_id, from_id)] {
                    if expanding.contains(&here) && !parents.contains_key(&there) {
                        parents.insert(there, Some((here, edge)));
                        next.push(there);
                    }
                }
            }
            frontier = next;
            depth += 1;
        }

        if !parents.contains_key(&target.id) {
            return Ok(None);
        }

        let mut node_ids = vec![target.id];
        let mut edge_ids = Vec::new();
        let mut cursor = target.id;
        while let Some(Some((previous, edge))) = parents.get(&cursor) {
            node_ids.push(*previous);
            edge_ids.push(*edge);
            cursor = *previous;
        }
        node_ids.reverse();
        edge_ids.reverse();

        let mut graph = Subgraph::default();
        for id in node_ids {
            let node = self
                .get_node_by_id(id)
                .await?
                .ok_or_else(|| Error::not_found("graph node", id))?;
            graph.nodes.push(node);
        }
        for id in edge_ids {
            let edge = self
                .edge_by_id(id)
                .await?
                .ok_or_else(|| Error::not_found("graph edge", id))?;
            graph.edges.push(edge);
        }

        debug!(from = %from_uid, to = %to_uid, hops = graph.edges.len(), "Shortest path found");
        Ok(Some(graph))
    }

    async fn neighborhood(&self, uid: &str, label: Option<&str>) -> Result<Subgraph> {
        let center = self
            .get_node(uid)
            .await?
            .ok_or_else(|| Error::not_found("graph node for entity", uid))?;

        let rows: Vec<EdgeRow> = sqlx::query_as(&format!(
            "{} WHERE (e.from_id = ? OR e.to_id = ?) AND (? IS NULL OR e.label = ?) ORDER BY e.id",
            EDGE_SELECT
        ))
        .bind(center.id)
        .bind(center.id)
        .bind(label)
        .bind(label)
        .fetch_all(&self.pool)
        .await?;

        let mut graph = Subgraph::default();
        graph.push_node(center);

        for row in rows {
            let edge = row.into_edge()?;
            let other = if edge.from == uid { &edge.to } else { &edge.from };
            if let Some(node) = self.get_node(other).await? {
                graph.push_node(node);
            }
            graph.push_edge(edge);
        }

        Ok(graph)
    }

    async fn delete_node(&self, id: i64, label: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM graph_nodes
            WHERE id = ?
                AND EXISTS (SELECT 1 FROM json_each(graph_nodes.labels) WHERE value = ?)
            "#,
        )
        .bind(id)
        .bind(label)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_edge(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM graph_edges WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// ========== Row Types ==========

#[derive(Debug, FromRow)]
struct NodeRow {
    id: i64,
    uid: String,
    name: String,
    labels: String,
}

impl NodeRow {
    fn into_node(self) -> Result<GraphNode> {
        let labels: Vec<String> = serde_json::from_str(&self.labels)
            .map_err(|e| Error::Other(format!("Invalid labels on node {}: {}", self.id, e)))?;

        Ok(GraphNode {
            id: self.id,
            name: self.name,
            labels,
            entity: self.uid,
        })
    }
}

#[derive(Debug, FromRow)]
struct EdgeRow {
    id: i64,
    label: String,
    name: String,
    relation: String,
    direction: String,
    from_uid: String,
    to_uid: String,
}

impl EdgeRow {
    fn into_edge(self) -> Result<GraphEdge> {
        let direction = Direction::parse(&self.direction)
            .ok_or_else(|| Error::Other(format!("Invalid edge direction: {}", self.direction)))?;

        Ok(GraphEdge {
            id: self.id,
            name: self.name,
            kind: self.label,
            relation: self.relation,
            direction,
            from: self.from_uid,
            to: self.to_uid,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqliteGraphStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");

        run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        SqliteGraphStore::new(pool)
    }

    async fn node(store: &SqliteGraphStore, uid: &str) -> i64 {
        store
            .create_node(
                "entities",
                NodeProps {
                    uid: uid.into(),
                    name: uid.to_uppercase(),
                },
            )
            .await
            .unwrap()
    }

    async fn edge(store: &SqliteGraphStore, from: i64, to: i64, name: &str) -> i64 {
        store
            .create_edge(
                from,
                to,
                "relation",
                EdgeProps {
                    name: name.into(),
                    relation: "social".into(),
                    direction: Direction::Forward,
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_node() {
        let store = setup_test_db().await;
        let id = node(&store, "e1").await;

        let by_uid = store.get_node("e1").await.unwrap().unwrap();
        assert_eq!(by_uid.id, id);
        assert_eq!(by_uid.name, "E1");
        assert_eq!(by_uid.labels, vec!["entities".to_string()]);

        let by_id = store.get_node_by_id(id).await.unwrap().unwrap();
        assert_eq!(by_id, by_uid);

        assert!(store.get_node("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_node_uid_unique() {
        let store = setup_test_db().await;
        node(&store, "e1").await;

        let err = store
            .create_node(
                "entities",
                NodeProps {
                    uid: "e1".into(),
                    name: "other".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_edge_triple_unique() {
        let store = setup_test_db().await;
        let a = node(&store, "a").await;
        let b = node(&store, "b").await;
        edge(&store, a, b, "friend").await;

        let err = store
            .create_edge(
                a,
                b,
                "relation",
                EdgeProps {
                    name: "friend".into(),
                    relation: "".into(),
                    direction: Direction::Both,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_already_exists());

        let found = store.find_edge("a", "b", "friend").await.unwrap().unwrap();
        assert_eq!(found.from, "a");
        assert_eq!(found.to, "b");
        assert_eq!(found.direction, Direction::Forward);
        assert!(store.find_edge("b", "a", "friend").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_edge_missing_endpoint() {
        let store = setup_test_db().await;
        let a = node(&store, "a").await;

        let err = store
            .create_edge(
                a,
                999,
                "relation",
                EdgeProps {
                    name: "friend".into(),
                    relation: "".into(),
                    direction: Direction::Forward,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_shortest_path() {
        let store = setup_test_db().await;
        let a = node(&store, "a").await;
        let b = node(&store, "b").await;
        let c = node(&store, "c").await;
        let d = node(&store, "d").await;
        node(&store, "island").await;

        // a-b-c-d plus a shortcut a-c
        edge(&store, a, b, "r1").await;
        edge(&store, b, c, "r2").await;
        edge(&store, c, d, "r3").await;
        edge(&store, c, a, "r4").await;

        let path = store.shortest_path("a", "d", 8).await.unwrap().unwrap();
        let uids: Vec<&str> = path.nodes.iter().map(|n| n.entity.as_str()).collect();
        assert_eq!(uids, vec!["a", "c", "d"]);
        assert_eq!(path.edges.len(), 2);
        assert_eq!(path.edges[0].name, "r4");

        let to_self = store.shortest_path("a", "a", 8).await.unwrap().unwrap();
        assert_eq!(to_self.nodes.len(), 1);
        assert!(to_self.edges.is_empty());

        assert!(store.shortest_path("a", "island", 8).await.unwrap().is_none());
        assert!(store.shortest_path("a", "d", 1).await.unwrap().is_none());
        assert!(store.shortest_path("a", "nobody", 8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shortest_path_through_dense_graph() {
        let store = setup_test_db().await;
        let mut clique = Vec::new();
        for i in 0..14 {
            clique.push(node(&store, &format!("k{}", i)).await);
        }
        for (i, from) in clique.iter().enumerate() {
            for (j, to) in clique.iter().enumerate().skip(i + 1) {
                edge(&store, *from, *to, &format!("e{}-{}", i, j)).await;
            }
        }
        let tail = node(&store, "tail").await;
        edge(&store, clique[13], tail, "exit").await;

        let path = store.shortest_path("k0", "tail", 8).await.unwrap().unwrap();
        let uids: Vec<&str> = path.nodes.iter().map(|n| n.entity.as_str()).collect();
        assert_eq!(uids, vec!["k0", "k13", "tail"]);
        assert_eq!(path.edges.len(), 2);
        assert_eq!(path.edges[1].name, "exit");
    }

    #[tokio::test]
    async fn test_neighborhood() {
        let store = setup_test_db().await;
        let a = node(&store, "a").await;
        let b = node(&store, "b").await;
        let c = node(&store, "c").await;
        edge(&store, a, b, "friend").await;
        edge(&store, c, a, "knows").await;
        edge(&store, b, c, "far").await;

        let graph = store.neighborhood("a", None).await.unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.nodes[0].entity, "a");
        assert_eq!(graph.edges.len(), 2);

        let graph = store.neighborhood("a", Some("other")).await.unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert!(graph.edges.is_empty());

        assert!(store.neighborhood("zzz", None).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_node_cascades() {
        let store = setup_test_db().await;
        let a = node(&store, "a").await;
        let b = node(&store, "b").await;
        let e = edge(&store, a, b, "friend").await;

        // Label must match
        assert!(!store.delete_node(a, "places").await.unwrap());
        assert!(store.delete_node(a, "entities").await.unwrap());

        assert!(store.get_node("a").await.unwrap().is_none());
        assert!(!store.delete_edge(e).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_edge() {
        let store = setup_test_db().await;
        let a = node(&store, "a").await;
        let b = node(&store, "b").await;
        let e = edge(&store, a, b, "friend").await;

        assert!(store.delete_edge(e).await.unwrap());
        assert!(store.find_edge("a", "b", "friend").await.unwrap().is_none());
    }
}
