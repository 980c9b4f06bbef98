//! In-memory storage implementation
//!
//! Used for tests and dry runs. Nothing survives the process.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use super::RecordStore;
use crate::error::StoreError;
use crate::models::{BackfillState, Record, SegmentId, TimeWindow};

/// In-memory implementation of RecordStore
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<SegmentId, Record>>,
    backfill: RwLock<Option<BackfillState>>,
    /// When set, writes fail (simulates an unavailable database)
    fail_writes: AtomicBool,
}

impl InMemoryRecordStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            backfill: RwLock::new(None),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make subsequent `insert_all` calls fail until reset
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn exists_in_window(
        &self,
        ids: &[SegmentId],
        window: &TimeWindow,
    ) -> Result<HashSet<SegmentId>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(ids
            .iter()
            .filter(|id| {
                records
                    .get(*id)
                    .is_some_and(|record| window.contains(record.start_time))
            })
            .copied()
            .collect())
    }

    fn insert_all(&self, records: &[Record]) -> Result<usize, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated write failure".into()));
        }

        let mut stored = self.records.write().map_err(|_| StoreError::Poisoned)?;
        let mut inserted = 0;
        for record in records {
            if !stored.contains_key(&record.segment_id) {
                stored.insert(record.segment_id, record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn get_record(&self, id: SegmentId) -> Result<Option<Record>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(&id).cloned())
    }

    fn count_records(&self) -> Result<usize, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.len())
    }

    fn backfill_state(&self) -> Result<Option<BackfillState>, StoreError> {
        let state = self.backfill.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.clone())
    }

    fn save_backfill_state(&self, state: &BackfillState) -> Result<(), StoreError> {
        let mut current = self.backfill.write().map_err(|_| StoreError::Poisoned)?;
        *current = Some(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_insert_keeps_first_write() {
        let store = InMemoryRecordStore::new();
        let now = Utc::now();

        let first = Record::new(1, now).with_field("Status", "Ringing");
        let second = Record::new(1, now).with_field("Status", "Answered");

        assert_eq!(store.insert_all(&[first]).unwrap(), 1);
        assert_eq!(store.insert_all(&[second]).unwrap(), 0);

        let stored = store.get_record(SegmentId(1)).unwrap().unwrap();
        assert_eq!(stored.field_str("Status"), Some("Ringing"));
    }

    #[test]
    fn test_exists_respects_window() {
        let store = InMemoryRecordStore::new();
        let now = Utc::now();
        store.insert_all(&[Record::new(7, now)]).unwrap();

        let inside = TimeWindow::new(now - Duration::hours(1), now + Duration::hours(1));
        let outside = TimeWindow::new(now + Duration::hours(1), now + Duration::hours(2));

        assert!(store.exists_in_window(&[SegmentId(7)], &inside).unwrap().contains(&SegmentId(7)));
        assert!(store.exists_in_window(&[SegmentId(7)], &outside).unwrap().is_empty());
        assert!(store.exists_in_window(&[SegmentId(8)], &inside).unwrap().is_empty());
    }

    #[test]
    fn test_simulated_write_failure() {
        let store = InMemoryRecordStore::new();
        store.set_fail_writes(true);
        assert!(store.insert_all(&[Record::new(1, Utc::now())]).is_err());
        assert_eq!(store.count_records().unwrap(), 0);
    }
}
