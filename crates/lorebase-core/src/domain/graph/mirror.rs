//! Graph mirror
//!
//! An in-memory index of graph nodes and edges paired with entities. Every
//! write goes to the graph store first and only then into the mirror, so the
//! mirror is always a subset of what the store holds.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::link::{GraphEdge, is_numeric_name};
use super::node::GraphNode;
use super::repository_trait::{EdgeProps, GraphStore, NodeProps, Subgraph};

/// Longest path, in hops, requested from the store
pub const MAX_PATH_DEPTH: u32 = 8;

type Triple = (String, String, String);

#[derive(Debug, Default)]
struct MirrorState {
    nodes: HashMap<i64, GraphNode>,
    /// entity uid -> node id
    by_entity: HashMap<String, i64>,
    edges: HashMap<i64, GraphEdge>,
    /// (from, to, name) -> edge id
    by_triple: HashMap<Triple, i64>,
}

impl MirrorState {
    fn insert_node(&mut self, node: GraphNode) -> bool {
        if self.nodes.contains_key(&node.id) || self.by_entity.contains_key(&node.entity) {
            return false;
        }
        self.by_entity.insert(node.entity.clone(), node.id);
        self.nodes.insert(node.id, node);
        true
    }

    fn insert_edge(&mut self, edge: GraphEdge) -> bool {
        let triple = edge.triple();
        if self.edges.contains_key(&edge.id) || self.by_triple.contains_key(&triple) {
            return false;
        }
        self.by_triple.insert(triple, edge.id);
        self.edges.insert(edge.id, edge);
        true
    }

    fn remove_edge(&mut self, id: i64) -> Option<GraphEdge> {
        let edge = self.edges.remove(&id)?;
        self.by_triple.remove(&edge.triple());
        Some(edge)
    }

    fn node_by_entity(&self, entity: &str) -> Option<&GraphNode> {
        self.by_entity.get(entity).and_then(|id| self.nodes.get(id))
    }
}

/// Shadow copy of the graph store
pub struct GraphMirror {
    store: Arc<dyn GraphStore>,
    state: RwLock<MirrorState>,
}

impl GraphMirror {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            state: RwLock::new(MirrorState::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Create the node for an entity, labeled by its partition table
    ///
    /// Returns `AlreadyExists` when the entity already has a node, either in
    /// the mirror or in the store; in the latter case the store's node is
    /// adopted into the mirror.
    pub async fn create_node_by_entity(&self, entity_uid: &str, name: &str, label: &str) -> Result<GraphNode> {
        if entity_uid.is_empty() {
            return Err(Error::InvalidArgument("entity uid is required".into()));
        }
        if self.state.read().await.by_entity.contains_key(entity_uid) {
            return Err(Error::already_exists("graph node for entity", entity_uid));
        }

        let props = NodeProps {
            uid: entity_uid.to_string(),
            name: name.to_string(),
        };
        let id = match self.store.create_node(label, props).await {
            Ok(id) => id,
            Err(e) if e.is_already_exists() => {
                if let Some(node) = self.store.get_node(entity_uid).await? {
                    self.state.write().await.insert_node(node);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let node = GraphNode {
            id,
            name: name.to_string(),
            labels: vec![label.to_string()],
            entity: entity_uid.to_string(),
        };
        self.state.write().await.insert_node(node.clone());

        info!(entity_uid = %entity_uid, node_id = id, label = %label, "Graph node created");
        Ok(node)
    }

    /// Node of an entity, creating it when neither mirror nor store has one
    pub async fn ensure_node(&self, entity_uid: &str, name: &str, label: &str) -> Result<GraphNode> {
        if let Some(node) = self.resolve_node(entity_uid).await? {
            return Ok(node);
        }
        match self.create_node_by_entity(entity_uid, name, label).await {
            Ok(node) => Ok(node),
            Err(e) if e.is_already_exists() => self
                .node_of(entity_uid)
                .await
                .ok_or_else(|| Error::not_found("graph node for entity", entity_uid)),
            Err(e) => Err(e),
        }
    }

    /// Mirror lookup only
    pub async fn node_of(&self, entity_uid: &str) -> Option<GraphNode> {
        self.state.read().await.node_by_entity(entity_uid).cloned()
    }

    /// Mirror lookup falling back to the store; a store hit is adopted
    pub async fn resolve_node(&self, entity_uid: &str) -> Result<Option<GraphNode>> {
        if let Some(node) = self.node_of(entity_uid).await {
            debug!(entity_uid = %entity_uid, "Graph node mirror hit");
            return Ok(Some(node));
        }
        let node = self.store.get_node(entity_uid).await?;
        if let Some(node) = &node {
            self.state.write().await.insert_node(node.clone());
        }
        Ok(node)
    }

    pub async fn has_edge(&self, from: &str, to: &str, name: &str) -> bool {
        let triple = (from.to_string(), to.to_string(), name.to_string());
        self.state.read().await.by_triple.contains_key(&triple)
    }

    /// Create an edge between two mirrored nodes
    ///
    /// Refuses digit-only names and duplicate `(from, to, name)` triples. The
    /// triple is checked in the mirror first, then in the store.
    pub async fn create_link(
        &self,
        from: &GraphNode,
        to: &GraphNode,
        kind: &str,
        props: EdgeProps,
    ) -> Result<GraphEdge> {
        if props.name.trim().is_empty() {
            return Err(Error::InvalidArgument("relation name is required".into()));
        }
        if is_numeric_name(&props.name) {
            return Err(Error::InvalidArgument(format!(
                "relation name '{}' must not be numeric",
                props.name
            )));
        }
        if self.has_edge(&from.entity, &to.entity, &props.name).await {
            return Err(Error::already_exists(
                "relation",
                format!("{} -{}-> {}", from.entity, props.name, to.entity),
            ));
        }
        if let Some(existing) = self.store.find_edge(&from.entity, &to.entity, &props.name).await? {
            self.state.write().await.insert_edge(existing);
            return Err(Error::already_exists(
                "relation",
                format!("{} -{}-> {}", from.entity, props.name, to.entity),
            ));
        }

        let name = props.name.clone();
        let relation = props.relation.clone();
        let direction = props.direction;
        let id = match self.store.create_edge(from.id, to.id, kind, props).await {
            Ok(id) => id,
            Err(e) if e.is_already_exists() => {
                if let Some(existing) = self.store.find_edge(&from.entity, &to.entity, &name).await? {
                    self.state.write().await.insert_edge(existing);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let edge = GraphEdge {
            id,
            name,
            kind: kind.to_string(),
            relation,
            direction,
            from: from.entity.clone(),
            to: to.entity.clone(),
        };
        self.state.write().await.insert_edge(edge.clone());

        info!(edge_id = id, from = %edge.from, to = %edge.to, name = %edge.name, "Graph edge created");
        Ok(edge)
    }

    /// The entity's node plus everything one hop away
    ///
    /// Results are merged into the mirror; duplicates by id are skipped.
    pub async fn get_subgraph(&self, entity_uid: &str) -> Result<Subgraph> {
        let center = self
            .resolve_node(entity_uid)
            .await?
            .ok_or_else(|| Error::not_found("graph node for entity", entity_uid))?;

        let fetched = self.store.neighborhood(entity_uid, None).await?;

        let mut result = Subgraph::default();
        result.push_node(center);

        let mut state = self.state.write().await;
        for node in fetched.nodes {
            state.insert_node(node.clone());
            result.push_node(node);
        }
        for edge in fetched.edges {
            state.insert_edge(edge.clone());
            result.push_edge(edge);
        }

        debug!(
            entity_uid = %entity_uid,
            nodes = result.nodes.len(),
            edges = result.edges.len(),
            "Subgraph fetched"
        );
        Ok(result)
    }

    /// Shortest path between two entities, computed by the store
    pub async fn get_path(&self, from_uid: &str, to_uid: &str) -> Result<Option<Subgraph>> {
        self.store.shortest_path(from_uid, to_uid, MAX_PATH_DEPTH).await
    }

    /// Delete an entity's node and every edge touching it
    pub async fn remove_node(&self, entity_uid: &str) -> Result<bool> {
        let Some(node) = self.resolve_node(entity_uid).await? else {
            return Ok(false);
        };
        let deleted = self.store.delete_node(node.id, node.label()).await?;

        let mut state = self.state.write().await;
        state.nodes.remove(&node.id);
        state.by_entity.remove(entity_uid);
        let touching: Vec<i64> = state
            .edges
            .values()
            .filter(|e| e.touches(entity_uid))
            .map(|e| e.id)
            .collect();
        for id in touching {
            state.remove_edge(id);
        }

        info!(entity_uid = %entity_uid, node_id = node.id, "Graph node removed");
        Ok(deleted)
    }

    /// Delete an edge by its triple
    pub async fn remove_link(&self, from: &str, to: &str, name: &str) -> Result<bool> {
        let id = {
            let triple = (from.to_string(), to.to_string(), name.to_string());
            self.state.read().await.by_triple.get(&triple).copied()
        };
        let id = match id {
            Some(id) => id,
            None => match self.store.find_edge(from, to, name).await? {
                Some(edge) => edge.id,
                None => return Ok(false),
            },
        };

        let deleted = self.store.delete_edge(id).await?;
        self.state.write().await.remove_edge(id);
        debug!(edge_id = id, "Graph edge removed");
        Ok(deleted)
    }

    pub async fn node_count(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    pub async fn edge_count(&self) -> usize {
        self.state.read().await.edges.len()
    }
}
