//! Archival of published entities

mod archived;
mod engine;

pub use archived::ArchivedRecord;
pub use engine::{ArchiveEngine, ArchiveUpdate};
