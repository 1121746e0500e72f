//! Graph reconciliation
//!
//! Heals drift between the document store and the graph mirror. Pending
//! node creations sit in the outbox until a reconciliation pass (or the
//! eager replication task) confirms them.

mod outbox;
mod reconciler;
mod scheduler;

pub use outbox::{Outbox, OutboxEntry};
pub use reconciler::{ReconcileReport, Reconciler};
pub use scheduler::ReconcileScheduler;
