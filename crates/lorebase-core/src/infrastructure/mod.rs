//! Infrastructure layer
//!
//! SQLite implementations of the store traits declared in the domain layer.

pub mod document;
pub mod graph;

pub use document::SqliteDocumentStore;
pub use graph::SqliteGraphStore;
