//! Replication outbox
//!
//! Entities whose graph node has not been confirmed yet. Entity creation
//! enqueues; a successful node creation (eager or during reconciliation)
//! acknowledges.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

/// A pending graph-node creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboxEntry {
    pub entity: String,
    pub name: String,
    /// Node label (the entity's partition table)
    pub label: String,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl OutboxEntry {
    pub fn new(entity: impl Into<String>, name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            name: name.into(),
            label: label.into(),
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// In-memory outbox keyed by entity uid
#[derive(Debug, Default)]
pub struct Outbox {
    entries: Mutex<BTreeMap<String, OutboxEntry>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; an existing entry for the entity is replaced
    pub async fn enqueue(&self, entry: OutboxEntry) {
        self.entries.lock().await.insert(entry.entity.clone(), entry);
    }

    /// Drop the entry for an entity, returning whether one existed
    pub async fn ack(&self, entity: &str) -> bool {
        self.entries.lock().await.remove(entity).is_some()
    }

    /// Count a failed attempt
    pub async fn record_failure(&self, entity: &str) {
        if let Some(entry) = self.entries.lock().await.get_mut(entity) {
            entry.attempts += 1;
        }
    }

    /// Snapshot of the pending entries, oldest first
    pub async fn pending(&self) -> Vec<OutboxEntry> {
        let mut entries: Vec<OutboxEntry> = self.entries.lock().await.values().cloned().collect();
        entries.sort_by_key(|e| e.enqueued_at);
        entries
    }

    pub async fn contains(&self, entity: &str) -> bool {
        self.entries.lock().await.contains_key(entity)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
