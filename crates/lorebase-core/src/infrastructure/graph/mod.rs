//! Graph store persistence

mod repository;

pub use repository::SqliteGraphStore;
