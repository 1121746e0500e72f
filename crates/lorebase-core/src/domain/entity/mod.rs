//! Entities
//!
//! The entity record, its events, the lazily populated entity cache and
//! saved entity boxes.

mod boxes;
mod cache;
#[allow(clippy::module_inception)]
mod entity;
mod event;

pub use boxes::{BoxStore, EntityBox};
pub use cache::EntityCache;
pub use entity::{Entity, EntityStatus, Property, Word};
pub use event::{DateRange, Event, Place, RelationCase};
