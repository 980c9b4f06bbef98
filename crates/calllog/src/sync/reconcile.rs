//! Dedup and upsert of one fetched batch

use chrono::Duration;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

use crate::error::StoreError;
use crate::models::{Record, SegmentId, TimeWindow};
use crate::storage::RecordStore;

/// Padding applied on both sides of a batch's time span for the existence check
pub const EXISTENCE_PADDING: Duration = Duration::days(1);

/// Outcome of reconciling one batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Records written to the store
    pub inserted: usize,
    /// Records dropped as intra-batch duplicates or already stored
    pub skipped: usize,
}

/// Reconcile a batch of fetched records against the store
///
/// This operation is idempotent - reconciling the same batch twice inserts
/// nothing the second time. Steps:
/// 1. Keep the first occurrence of each `SegmentId` (warning on duplicates)
/// 2. Look up which IDs are already stored within the batch's padded span
/// 3. Insert the rest in a single atomic write
pub fn reconcile(store: &dyn RecordStore, records: Vec<Record>) -> Result<ReconcileStats, StoreError> {
    let mut stats = ReconcileStats::default();
    if records.is_empty() {
        return Ok(stats);
    }

    let total = records.len();
    let unique = dedup_first(records);
    stats.skipped = total - unique.len();

    // unique is non-empty because the input was
    let (earliest, latest) = unique.iter().fold(
        (unique[0].start_time, unique[0].start_time),
        |(lo, hi), record| (lo.min(record.start_time), hi.max(record.start_time)),
    );
    let window = TimeWindow::padded(earliest, latest, EXISTENCE_PADDING);

    let ids: Vec<SegmentId> = unique.iter().map(|record| record.segment_id).collect();
    let existing = store.exists_in_window(&ids, &window)?;
    debug!(
        "{} of {} call log IDs already stored within {}",
        existing.len(),
        ids.len(),
        window
    );

    let new_records: Vec<Record> = unique
        .into_iter()
        .filter(|record| !existing.contains(&record.segment_id))
        .collect();
    stats.skipped += existing.len();

    if new_records.is_empty() {
        info!("No new call logs to insert");
        return Ok(stats);
    }

    let attempted = new_records.len();
    stats.inserted = store.insert_all(&new_records)?;
    // Rows stored outside the padded window are ignored by the insert.
    stats.skipped += attempted - stats.inserted;

    info!("Inserted {} new call logs", stats.inserted);
    Ok(stats)
}

/// Drop repeated IDs, keeping the first record seen for each
fn dedup_first(records: Vec<Record>) -> Vec<Record> {
    let mut counts: HashMap<SegmentId, usize> = HashMap::new();
    for record in &records {
        *counts.entry(record.segment_id).or_default() += 1;
    }

    let mut duplicated: Vec<(SegmentId, usize)> = counts
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(id, count)| (*id, *count))
        .collect();
    duplicated.sort();
    for (id, count) in &duplicated {
        warn!("Duplicate SegmentId {} found {} times in batch", id, count);
    }

    let mut seen = HashSet::with_capacity(counts.len());
    records
        .into_iter()
        .filter(|record| seen.insert(record.segment_id))
        .collect()
}
