//! Graph store collaborator
//!
//! The graph store owns node/edge storage and path finding. The core only
//! issues single-hop and shortest-path reads against it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::link::{Direction, GraphEdge};
use super::node::GraphNode;

/// Properties stored on a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeProps {
    /// Entity uid; unique across the store
    pub uid: String,
    pub name: String,
}

/// Properties stored on an edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeProps {
    pub name: String,
    pub relation: String,
    pub direction: Direction,
}

/// A set of nodes and the edges between them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl Subgraph {
    /// Add a node unless one with the same id is present
    pub fn push_node(&mut self, node: GraphNode) -> bool {
        if self.nodes.iter().any(|n| n.id == node.id) {
            return false;
        }
        self.nodes.push(node);
        true
    }

    /// Add an edge unless one with the same id is present
    pub fn push_edge(&mut self, edge: GraphEdge) -> bool {
        if self.edges.iter().any(|e| e.id == edge.id) {
            return false;
        }
        self.edges.push(edge);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Graph store operations consumed by the mirror
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create a node, returning its native id
    ///
    /// Fails with `AlreadyExists` when a node for the same uid exists.
    async fn create_node(&self, label: &str, props: NodeProps) -> Result<i64>;

    /// Create an edge between two native node ids
    ///
    /// Fails with `AlreadyExists` when the `(from, to, name)` triple exists
    /// and `NotFound` when an endpoint is missing.
    async fn create_edge(&self, from_id: i64, to_id: i64, label: &str, props: EdgeProps) -> Result<i64>;

    /// Look up a node by entity uid
    async fn get_node(&self, uid: &str) -> Result<Option<GraphNode>>;

    /// Look up a node by native id
    async fn get_node_by_id(&self, id: i64) -> Result<Option<GraphNode>>;

    /// Look up an edge by its `(from uid, to uid, name)` triple
    async fn find_edge(&self, from_uid: &str, to_uid: &str, name: &str) -> Result<Option<GraphEdge>>;

    /// Shortest undirected path between two entities, at most `max_depth` hops
    async fn shortest_path(&self, from_uid: &str, to_uid: &str, max_depth: u32) -> Result<Option<Subgraph>>;

    /// Every node and edge within one hop of the entity's node
    ///
    /// `label` restricts the edges to one edge label.
    async fn neighborhood(&self, uid: &str, label: Option<&str>) -> Result<Subgraph>;

    /// Delete a node carrying `label` together with its edges
    async fn delete_node(&self, id: i64, label: &str) -> Result<bool>;

    /// Delete an edge
    async fn delete_edge(&self, id: i64) -> Result<bool>;
}
