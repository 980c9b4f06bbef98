//! SQLite-based call log storage

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use rusqlite_migration::{M, Migrations};
use serde_json::{Map, Value};

use super::traits::RecordStore;
use crate::error::StoreError;
use crate::models::{BackfillState, Record, SegmentId, TimeWindow};

/// Upper bound on bound parameters per existence query
const MAX_IDS_PER_QUERY: usize = 500;

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- One row per call segment, first write wins
            CREATE TABLE call_logs (
                segment_id INTEGER PRIMARY KEY,
                start_time INTEGER NOT NULL,  -- unix millis, UTC
                main_call_history_id TEXT,
                direction TEXT,
                status TEXT,
                payload TEXT NOT NULL,        -- JSON object
                inserted_at TEXT NOT NULL
            );

            CREATE INDEX idx_call_logs_start_time ON call_logs(start_time);
            "#,
        ),
        // Migration 2: Historical backfill marker
        M::up(
            r#"
            CREATE TABLE backfill_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                start TEXT NOT NULL,
                completed_at TEXT,
                failed_chunks TEXT NOT NULL DEFAULT '[]'
            );
            "#,
        ),
    ])
}

/// SQLite-based record store
///
/// Opens a fresh connection for every call so no transaction outlives a
/// single store operation.
pub struct SqliteRecordStore {
    path: PathBuf,
}

impl SqliteRecordStore {
    /// Open (creating if needed) the database at `db_path` and migrate it
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = db_path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let store = Self { path };
        let mut conn = store.connect()?;

        // WAL is persistent in the database file; readers don't block the writer.
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        migrations().to_latest(&mut conn)?;

        debug!("Opened call log database at {}", store.path.display());
        Ok(store)
    }

    /// Path of the underlying database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        Ok(conn)
    }
}

/// Payload fields copied into their own columns
fn column_text(record: &Record, key: &str) -> Option<String> {
    match record.payload.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn millis_to_utc(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Decode(format!("start_time out of range: {}", millis)))
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("invalid timestamp '{}': {}", raw, e)))
}

impl RecordStore for SqliteRecordStore {
    fn exists_in_window(
        &self,
        ids: &[SegmentId],
        window: &TimeWindow,
    ) -> Result<HashSet<SegmentId>, StoreError> {
        let mut found = HashSet::new();
        if ids.is_empty() {
            return Ok(found);
        }

        let conn = self.connect()?;
        let from = window.from.timestamp_millis();
        let to = window.to.timestamp_millis();

        for batch in ids.chunks(MAX_IDS_PER_QUERY) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT segment_id FROM call_logs
                 WHERE start_time >= ? AND start_time < ? AND segment_id IN ({})",
                placeholders
            );

            let mut values: Vec<i64> = Vec::with_capacity(batch.len() + 2);
            values.push(from);
            values.push(to);
            values.extend(batch.iter().map(SegmentId::as_i64));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, i64>(0))?;
            for id in rows {
                found.insert(SegmentId(id?));
            }
        }

        Ok(found)
    }

    fn insert_all(&self, records: &[Record]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let inserted_at = Utc::now().to_rfc3339();
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO call_logs
                 (segment_id, start_time, main_call_history_id, direction, status, payload, inserted_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )?;

            for record in records {
                let payload =
                    serde_json::to_string(&record.payload).map_err(|source| StoreError::Encode {
                        segment_id: record.segment_id,
                        source,
                    })?;

                inserted += stmt.execute(params![
                    record.segment_id.as_i64(),
                    record.start_time.timestamp_millis(),
                    column_text(record, "MainCallHistoryId"),
                    column_text(record, "Direction"),
                    column_text(record, "Status"),
                    payload,
                    inserted_at,
                ])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn get_record(&self, id: SegmentId) -> Result<Option<Record>, StoreError> {
        let conn = self.connect()?;
        let row: Option<(i64, i64, String)> = conn
            .query_row(
                "SELECT segment_id, start_time, payload FROM call_logs WHERE segment_id = ?",
                [id.as_i64()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((segment_id, start_time, payload)) = row else {
            return Ok(None);
        };

        let payload: Map<String, Value> = serde_json::from_str(&payload)
            .map_err(|e| StoreError::Decode(format!("payload of {}: {}", segment_id, e)))?;

        Ok(Some(Record {
            segment_id: SegmentId(segment_id),
            start_time: millis_to_utc(start_time)?,
            payload,
        }))
    }

    fn count_records(&self) -> Result<usize, StoreError> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM call_logs", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn backfill_state(&self) -> Result<Option<BackfillState>, StoreError> {
        let conn = self.connect()?;
        let row: Option<(String, Option<String>, String)> = conn
            .query_row(
                "SELECT start, completed_at, failed_chunks FROM backfill_state WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((start, completed_at, failed_chunks)) = row else {
            return Ok(None);
        };

        let failed_chunks: Vec<TimeWindow> = serde_json::from_str(&failed_chunks)
            .map_err(|e| StoreError::Decode(format!("failed_chunks: {}", e)))?;

        Ok(Some(BackfillState {
            start: parse_rfc3339(&start)?,
            completed_at: completed_at.as_deref().map(parse_rfc3339).transpose()?,
            failed_chunks,
        }))
    }

    fn save_backfill_state(&self, state: &BackfillState) -> Result<(), StoreError> {
        let conn = self.connect()?;
        let failed_chunks = serde_json::to_string(&state.failed_chunks)
            .map_err(|e| StoreError::Decode(format!("failed_chunks: {}", e)))?;

        conn.execute(
            "INSERT OR REPLACE INTO backfill_state (id, start, completed_at, failed_chunks)
             VALUES (1, ?, ?, ?)",
            params![
                state.start.to_rfc3339(),
                state.completed_at.map(|at| at.to_rfc3339()),
                failed_chunks,
            ],
        )?;

        Ok(())
    }
}
