//! Concept taxonomy
//!
//! - `concept`: concept and partition types
//! - `forest`: the arena-backed concept forest
//! - `attribute`: attribute definitions and the global registry
//! - `service`: the synchronized `Taxonomy` service

mod attribute;
mod concept;
mod forest;
mod service;

pub use attribute::{AttributeDefinition, AttributeKind, AttributeRegistry, AttributeUpdate};
pub use concept::{Concept, ConceptType, Partition};
pub use forest::ConceptForest;
pub use service::Taxonomy;
