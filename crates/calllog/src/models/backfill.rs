//! Persisted progress marker for the one-shot historical backfill

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TimeWindow;

/// Records whether the backfill from a given start has already run
///
/// Stored separately from the call logs so a restarted process does not
/// repeat a completed backfill. Chunks that failed are kept as known gaps
/// for a manual re-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillState {
    /// Configured start of the backfill range
    pub start: DateTime<Utc>,
    /// When every chunk had been attempted (None = not finished)
    pub completed_at: Option<DateTime<Utc>>,
    /// Chunks whose sync failed
    #[serde(default)]
    pub failed_chunks: Vec<TimeWindow>,
}

impl BackfillState {
    /// Mark a backfill from `start` as finished at `completed_at`
    pub fn completed(
        start: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        failed_chunks: Vec<TimeWindow>,
    ) -> Self {
        Self {
            start,
            completed_at: Some(completed_at),
            failed_chunks,
        }
    }

    /// Whether this state covers a backfill configured to begin at `start`
    ///
    /// A finished backfill covers any later start, so a start derived from
    /// the current time does not trigger another run after a restart.
    pub fn is_complete_for(&self, start: DateTime<Utc>) -> bool {
        self.completed_at.is_some() && self.start <= start
    }
}
