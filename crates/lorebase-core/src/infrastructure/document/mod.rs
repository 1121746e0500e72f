//! Document store persistence

mod repository;

pub use repository::SqliteDocumentStore;
