//! Storage trait definitions

use std::collections::HashSet;

use crate::error::StoreError;
use crate::models::{BackfillState, Record, SegmentId, TimeWindow};

/// Trait for call log persistence
///
/// Abstracts over storage backends (in-memory, SQLite). Every call is its
/// own unit of work: implementations must not hold a transaction open
/// between calls.
pub trait RecordStore: Send + Sync {
    /// IDs from `ids` already persisted with a start time inside `window`
    fn exists_in_window(
        &self,
        ids: &[SegmentId],
        window: &TimeWindow,
    ) -> Result<HashSet<SegmentId>, StoreError>;

    /// Persist all records atomically. Existing IDs are left untouched.
    ///
    /// Returns the number of rows actually written.
    fn insert_all(&self, records: &[Record]) -> Result<usize, StoreError>;

    /// Get a stored record by ID
    fn get_record(&self, id: SegmentId) -> Result<Option<Record>, StoreError>;

    /// Count stored records
    fn count_records(&self) -> Result<usize, StoreError>;

    /// Load the persisted backfill marker
    fn backfill_state(&self) -> Result<Option<BackfillState>, StoreError>;

    /// Save the backfill marker (upsert)
    fn save_backfill_state(&self, state: &BackfillState) -> Result<(), StoreError>;
}
