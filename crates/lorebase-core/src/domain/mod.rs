//! Domain layer
//!
//! Components, leaf first:
//!
//! - `document`, `graph`: the two store contracts, plus the graph mirror
//! - `taxonomy`: concept forest and attribute registry
//! - `entity`: entities, the entity cache and boxes
//! - `archive`: published snapshots
//! - `examine`: moderation of proposed changes
//! - `reconcile`: outbox, reconciliation pass and its scheduler

pub mod archive;
pub mod document;
pub mod entity;
pub mod examine;
pub mod graph;
pub mod reconcile;
pub mod taxonomy;
