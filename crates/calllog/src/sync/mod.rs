//! Sync engine for reconciling and scheduling call log windows
//!
//! Reconciliation is idempotent and can be safely retried.

mod reconcile;
mod scheduler;

pub use reconcile::{EXISTENCE_PADDING, ReconcileStats, reconcile};
pub use scheduler::{
    BACKFILL_CHUNK, BackfillReport, CHUNK_PAUSE, PollState, SchedulerOptions, SyncScheduler,
    SyncStats,
};
