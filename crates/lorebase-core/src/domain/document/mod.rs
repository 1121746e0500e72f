//! Document store contract
//!
//! Tables used by the core:
//!
//! - `concepts`, `attributes`: taxonomy
//! - one table per top-level concept plus the default table: entities
//! - `links`: entity relations
//! - `archived`: published snapshots
//! - `examines`: moderation items
//! - `boxes`: saved entity collections

mod repository_trait;

pub use repository_trait::{Clause, Document, DocumentStore, Filter, decode, fields};

pub const CONCEPTS_TABLE: &str = "concepts";
pub const ATTRIBUTES_TABLE: &str = "attributes";
pub const LINKS_TABLE: &str = "links";
pub const ARCHIVED_TABLE: &str = "archived";
pub const EXAMINES_TABLE: &str = "examines";
pub const BOXES_TABLE: &str = "boxes";
