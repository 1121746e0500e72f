//! Graph mirror
//!
//! Every entity is paired with at most one node in the graph store and every
//! relation with one edge. `GraphMirror` keeps a local shadow of both so reads
//! do not need a store round trip.

mod link;
mod mirror;
mod node;
mod relation;
mod repository_trait;

pub use link::{Direction, GraphEdge, is_numeric_name};
pub use mirror::{GraphMirror, MAX_PATH_DEPTH};
pub use node::GraphNode;
pub use relation::Link;
pub use repository_trait::{EdgeProps, GraphStore, NodeProps, Subgraph};
