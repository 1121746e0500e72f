//! Lorebase Core Library
//!
//! This crate provides the core of Lorebase, a curated knowledge base:
//! - Concept taxonomy and attribute registry
//! - Entity cache over a document store, with entity boxes
//! - Graph mirror of entities and relations
//! - Reconciliation of the graph mirror against the document store
//! - Archival of published entities
//! - Moderation (examine) of proposed changes
//! - Storage (SQLite document and graph stores)

pub mod config;
pub mod digest;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod knowledge_base;
pub mod storage;

pub use error::{Error, ErrorKind, Result};
pub use knowledge_base::{KnowledgeBase, NewRelation};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::entity::{Entity, EntityStatus, Event, Word};
    pub use crate::domain::examine::{ExamineCategory, ExamineStatus};
    pub use crate::domain::graph::Direction;
    pub use crate::domain::taxonomy::{AttributeDefinition, AttributeKind, Concept, ConceptType};
    pub use crate::error::{Error, Result};
    pub use crate::knowledge_base::{KnowledgeBase, NewRelation};
}
