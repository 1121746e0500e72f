//! Periodic reconciliation
//!
//! Runs [`Reconciler::reconcile`] on a fixed interval in a background task.
//! `stop()` signals the task through a `Notify` and waits up to five seconds
//! for it to finish its current pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

use super::reconciler::{ReconcileReport, Reconciler};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ReconcileScheduler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    shutdown: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    passes: Arc<AtomicU64>,
    last_report: Arc<RwLock<Option<ReconcileReport>>>,
}

impl ReconcileScheduler {
    /// The scheduler does not start until [`start`](Self::start) is called
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            shutdown: Arc::new(Notify::new()),
            handle: None,
            running: Arc::new(AtomicBool::new(false)),
            passes: Arc::new(AtomicU64::new(0)),
            last_report: Arc::new(RwLock::new(None)),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::Prohibition("reconcile scheduler is already running".into()));
        }
        self.running.store(true, Ordering::SeqCst);
        self.shutdown = Arc::new(Notify::new());

        let reconciler = Arc::clone(&self.reconciler);
        let shutdown = Arc::clone(&self.shutdown);
        let running = Arc::clone(&self.running);
        let passes = Arc::clone(&self.passes);
        let last_report = Arc::clone(&self.last_report);
        // tokio::time::interval panics on zero
        let period = self.interval.max(Duration::from_millis(1));

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.notified() => {
                        debug!("Reconcile scheduler received shutdown signal");
                        break;
                    }

                    _ = ticker.tick() => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        match reconciler.reconcile().await {
                            Ok(report) => {
                                *last_report.write().await = Some(report);
                            }
                            Err(e) => warn!(error = %e, "Reconciliation pass aborted"),
                        }
                        passes.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        }));

        info!(interval_ms = period.as_millis() as u64, "Reconcile scheduler started");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::Prohibition("reconcile scheduler is not running".into()));
        }
        self.shutdown.notify_one();

        let Some(handle) = self.handle.take() else {
            self.running.store(false, Ordering::SeqCst);
            return Ok(());
        };
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
            Ok(Ok(())) => {
                self.running.store(false, Ordering::SeqCst);
                info!("Reconcile scheduler stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                error!(error = ?e, "Reconcile scheduler task panicked");
                Ok(())
            }
            Err(_) => Err(Error::Unavailable(format!(
                "reconcile scheduler did not stop within {}ms",
                SHUTDOWN_TIMEOUT.as_millis()
            ))),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Completed passes, including aborted ones
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    pub async fn last_report(&self) -> Option<ReconcileReport> {
        self.last_report.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::archive::ArchiveEngine;
    use crate::domain::document::DocumentStore;
    use crate::domain::entity::{BoxStore, Entity, EntityCache};
    use crate::domain::graph::{GraphMirror, GraphStore};
    use crate::domain::reconcile::Outbox;
    use crate::domain::taxonomy::{AttributeRegistry, Taxonomy};
    use crate::infrastructure::{SqliteDocumentStore, SqliteGraphStore};
    use crate::storage::Database;

    async fn setup() -> (Arc<Reconciler>, Arc<EntityCache>, Arc<GraphMirror>) {
        let db = Database::in_memory().await.unwrap();
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(db.pool().clone()));
        let graph: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(db.pool().clone()));
        let taxonomy = Arc::new(Taxonomy::new(
            store.clone(),
            Arc::new(AttributeRegistry::new(store.clone())),
            "entities",
        ));
        let mirror = Arc::new(GraphMirror::new(graph));
        let outbox = Arc::new(Outbox::new());
        let cache = Arc::new(
            EntityCache::new(
                store.clone(),
                taxonomy.clone(),
                Arc::new(ArchiveEngine::new(store.clone())),
                Arc::new(BoxStore::new(store.clone())),
                mirror.clone(),
                outbox.clone(),
            )
            .with_eager_replication(false),
        );
        let reconciler = Arc::new(Reconciler::new(store, cache.clone(), taxonomy, mirror.clone(), outbox));
        (reconciler, cache, mirror)
    }

    #[tokio::test]
    async fn test_new_scheduler_is_stopped() {
        let (reconciler, _, _) = setup().await;
        let mut scheduler = ReconcileScheduler::new(reconciler, Duration::from_secs(5));
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.interval(), Duration::from_secs(5));
        assert!(scheduler.stop().await.is_err());
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let (reconciler, _, _) = setup().await;
        let mut scheduler = ReconcileScheduler::new(reconciler, Duration::from_millis(10));

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(scheduler.start(), Err(Error::Prohibition(_))));

        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());

        // Restartable
        scheduler.start().unwrap();
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_ticks_heal_drift() {
        let (reconciler, cache, mirror) = setup().await;
        let entity = cache.create(Entity::new("Zhang San", ""), "a").await.unwrap();

        let mut scheduler = ReconcileScheduler::new(reconciler, Duration::from_millis(10));
        scheduler.start().unwrap();
        for _ in 0..200 {
            if mirror.node_of(&entity.uid).await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.stop().await.unwrap();

        assert!(mirror.node_of(&entity.uid).await.is_some());
        assert!(scheduler.passes() >= 1);
        assert!(scheduler.last_report().await.is_some());
    }
}
