//! Reconciliation pass
//!
//! A pass runs in three steps:
//!
//! 1. drain the outbox, creating the node of every entity still alive
//! 2. scan every partition for live entities without a node
//! 3. scan the `links` collection for relations without an edge, retiring
//!    links whose endpoint entity no longer exists
//!
//! `AlreadyExists` from the graph store counts as success: the mirror adopts
//! the store's copy. Every other failure is counted and left for the next pass.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::document::{DocumentStore, Filter, LINKS_TABLE, decode};
use crate::domain::entity::{Entity, EntityCache};
use crate::domain::graph::{EdgeProps, GraphMirror, GraphNode, Link};
use crate::domain::taxonomy::Taxonomy;
use crate::error::Result;

use super::outbox::Outbox;

/// Operator recorded on links retired by a pass
const RECONCILE_OPERATOR: &str = "reconciler";

/// Outcome of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub nodes_created: usize,
    pub edges_created: usize,
    pub failures: usize,
    /// Links soft-deleted because an endpoint entity is gone
    pub links_retired: usize,
    /// Outbox entries left after the pass
    pub pending: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failures == 0 && self.pending == 0
    }
}

enum Outcome {
    Created,
    Present,
    Failed,
}

enum Endpoint {
    Ready(GraphNode),
    Gone,
    Unavailable,
}

pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    cache: Arc<EntityCache>,
    taxonomy: Arc<Taxonomy>,
    mirror: Arc<GraphMirror>,
    outbox: Arc<Outbox>,
    /// One pass at a time
    pass: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<EntityCache>,
        taxonomy: Arc<Taxonomy>,
        mirror: Arc<GraphMirror>,
        outbox: Arc<Outbox>,
    ) -> Self {
        Self {
            store,
            cache,
            taxonomy,
            mirror,
            outbox,
            pass: Mutex::new(()),
        }
    }

    /// Run one pass; safe to call repeatedly
    ///
    /// Only a failure to list a partition or the links collection aborts
    /// the pass. Per-item failures are counted in the report.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let _pass = self.pass.lock().await;
        let mut report = ReconcileReport::default();

        self.drain_outbox(&mut report).await;
        self.scan_entities(&mut report).await?;
        self.scan_links(&mut report).await?;

        report.pending = self.outbox.len().await;
        if report.nodes_created > 0 || report.edges_created > 0 || report.failures > 0 || report.links_retired > 0 {
            info!(
                nodes_created = report.nodes_created,
                edges_created = report.edges_created,
                failures = report.failures,
                links_retired = report.links_retired,
                pending = report.pending,
                "Reconciliation pass finished"
            );
        } else {
            debug!(pending = report.pending, "Reconciliation pass found no drift");
        }
        Ok(report)
    }

    async fn drain_outbox(&self, report: &mut ReconcileReport) {
        for entry in self.outbox.pending().await {
            let entity = match self.cache.get(&entry.entity).await {
                Ok(entity) => entity,
                Err(e) if e.is_not_found() => {
                    // Removed before its node was confirmed
                    self.outbox.ack(&entry.entity).await;
                    continue;
                }
                Err(e) => {
                    warn!(entity_uid = %entry.entity, error = %e, "Outbox entry not resolvable");
                    self.outbox.record_failure(&entry.entity).await;
                    report.failures += 1;
                    continue;
                }
            };

            match self.mirror_entity(&entity).await {
                Outcome::Created => report.nodes_created += 1,
                Outcome::Present => {}
                Outcome::Failed => {
                    self.outbox.record_failure(&entry.entity).await;
                    report.failures += 1;
                }
            }
        }
    }

    async fn scan_entities(&self, report: &mut ReconcileReport) -> Result<()> {
        for partition in self.taxonomy.partitions().await {
            for entity in self.cache.scan(&partition).await? {
                if self.mirror.node_of(&entity.uid).await.is_some() {
                    continue;
                }
                match self.mirror_entity(&entity).await {
                    Outcome::Created => report.nodes_created += 1,
                    Outcome::Present => {}
                    Outcome::Failed => report.failures += 1,
                }
            }
        }
        Ok(())
    }

    /// Make sure the entity has a node; acknowledges its outbox entry on success
    async fn mirror_entity(&self, entity: &Entity) -> Outcome {
        match self.mirror.resolve_node(&entity.uid).await {
            Ok(Some(_)) => {
                self.outbox.ack(&entity.uid).await;
                return Outcome::Present;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(entity_uid = %entity.uid, error = %e, "Graph node lookup failed");
                return Outcome::Failed;
            }
        }

        let table = self.cache.table_of(entity).await;
        match self
            .mirror
            .create_node_by_entity(&entity.uid, &entity.name, table.as_str())
            .await
        {
            Ok(_) => {
                self.outbox.ack(&entity.uid).await;
                Outcome::Created
            }
            Err(e) if e.is_already_exists() => {
                self.outbox.ack(&entity.uid).await;
                Outcome::Present
            }
            Err(e) => {
                warn!(entity_uid = %entity.uid, error = %e, "Graph node creation failed");
                Outcome::Failed
            }
        }
    }

    async fn scan_links(&self, report: &mut ReconcileReport) -> Result<()> {
        let rows = self.store.find_many(LINKS_TABLE, &Filter::all()).await?;
        for row in rows {
            let link: Link = match decode(row) {
                Ok(link) => link,
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable link");
                    report.failures += 1;
                    continue;
                }
            };
            if self.mirror.has_edge(&link.from, &link.to, &link.name).await {
                continue;
            }

            let (from, to) = match (self.endpoint(&link.from).await, self.endpoint(&link.to).await) {
                (Endpoint::Ready(from), Endpoint::Ready(to)) => (from, to),
                (Endpoint::Gone, _) | (_, Endpoint::Gone) => {
                    match self.store.soft_delete(LINKS_TABLE, &link.uid, RECONCILE_OPERATOR).await {
                        Ok(()) => {
                            warn!(link_uid = %link.uid, "Retired relation to a removed entity");
                            report.links_retired += 1;
                        }
                        Err(e) => {
                            warn!(link_uid = %link.uid, error = %e, "Dangling relation not retired");
                            report.failures += 1;
                        }
                    }
                    continue;
                }
                _ => {
                    warn!(link_uid = %link.uid, "Relation endpoint has no graph node");
                    report.failures += 1;
                    continue;
                }
            };

            let props = EdgeProps {
                name: link.name.clone(),
                relation: link.relation.clone(),
                direction: link.direction,
            };
            match self.mirror.create_link(&from, &to, &link.kind, props).await {
                Ok(_) => report.edges_created += 1,
                Err(e) if e.is_already_exists() => {}
                Err(e) => {
                    warn!(link_uid = %link.uid, error = %e, "Graph edge creation failed");
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }

    async fn endpoint(&self, entity_uid: &str) -> Endpoint {
        let entity = match self.cache.get(entity_uid).await {
            Ok(entity) => entity,
            Err(e) if e.is_not_found() => return Endpoint::Gone,
            Err(e) => {
                debug!(entity_uid = %entity_uid, error = %e, "Relation endpoint not loadable");
                return Endpoint::Unavailable;
            }
        };
        let table = self.cache.table_of(&entity).await;
        match self.mirror.ensure_node(&entity.uid, &entity.name, table.as_str()).await {
            Ok(node) => Endpoint::Ready(node),
            Err(e) => {
                debug!(entity_uid = %entity_uid, error = %e, "Relation endpoint node missing");
                Endpoint::Unavailable
            }
        }
    }
}
