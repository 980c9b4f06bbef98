//! Live polling and one-shot historical backfill

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use super::reconcile::reconcile;
use crate::cancel::CancelToken;
use crate::error::{StoreError, SyncError};
use crate::models::{BackfillState, TimeWindow};
use crate::pbx::{Endpoint, PageWalker, Walk};
use crate::settings::ApiSettings;
use crate::storage::RecordStore;

/// Length of one backfill chunk
pub const BACKFILL_CHUNK: Duration = Duration::days(1);

/// Pause between consecutive backfill chunks
pub const CHUNK_PAUSE: StdDuration = StdDuration::from_secs(2);

/// Where the live poll loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Fetching,
    Reconciling,
    Sleeping,
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollState::Idle => "idle",
            PollState::Fetching => "fetching",
            PollState::Reconciling => "reconciling",
            PollState::Sleeping => "sleeping",
        };
        f.write_str(name)
    }
}

/// Statistics from one sync run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub window: TimeWindow,
    /// Endpoint that produced the records
    pub source: Endpoint,
    /// Page requests issued
    pub pages: usize,
    /// Records returned by the walk, duplicates included
    pub fetched: usize,
    /// Records newly stored
    pub inserted: usize,
    /// Records dropped as duplicates or already stored
    pub skipped: usize,
}

impl fmt::Display for SyncStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} fetched from {} endpoint in {} pages, {} inserted, {} skipped",
            self.window, self.fetched, self.source, self.pages, self.inserted, self.skipped
        )
    }
}

/// Outcome of a historical backfill
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Chunks the range was split into
    pub chunks: usize,
    /// Chunks that synced successfully
    pub synced: usize,
    /// Chunks whose sync failed
    pub failed: Vec<TimeWindow>,
    /// Records inserted across all chunks
    pub inserted: usize,
    /// Stopped early by cancellation; the backfill is not marked complete
    pub cancelled: bool,
}

/// Timing knobs for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub poll_interval: StdDuration,
    pub lookback: Duration,
    /// Start of the historical backfill, None if disabled
    pub backfill_start: Option<DateTime<Utc>>,
    pub chunk: Duration,
    pub chunk_pause: StdDuration,
}

impl SchedulerOptions {
    pub fn from_settings(settings: &ApiSettings, now: DateTime<Utc>) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            lookback: settings.lookback(),
            backfill_start: settings.backfill_start(now),
            chunk: BACKFILL_CHUNK,
            chunk_pause: CHUNK_PAUSE,
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from_settings(&ApiSettings::default(), Utc::now())
    }
}

/// Drives the page walker and reconciler over time
///
/// Runs the optional backfill once, then polls a trailing lookback window
/// every interval until cancelled. A failed window is logged and left for
/// the next tick; it never stops the loop.
pub struct SyncScheduler {
    walker: PageWalker,
    store: Arc<dyn RecordStore>,
    options: SchedulerOptions,
    state: PollState,
}

impl SyncScheduler {
    pub fn new(walker: PageWalker, store: Arc<dyn RecordStore>, options: SchedulerOptions) -> Self {
        Self {
            walker,
            store,
            options,
            state: PollState::Idle,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Whether a backfill is still due in this process
    pub fn backfill_pending(&self) -> bool {
        self.options.backfill_start.is_some()
    }

    fn set_state(&mut self, state: PollState) {
        if self.state != state {
            debug!("Poll state {} -> {}", self.state, state);
            self.state = state;
        }
    }

    /// Run the backfill (if due) and then poll until cancelled
    pub async fn run(&mut self, cancel: &CancelToken) {
        if let Some(report) = self.run_backfill(Utc::now(), cancel).await
            && report.cancelled
        {
            info!("Sync scheduler stopped during backfill");
            return;
        }

        info!(
            "Polling every {:?} with a {} minute lookback",
            self.options.poll_interval,
            self.options.lookback.num_minutes()
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // Failures are logged inside tick and retried next interval.
            let _ = self.tick(Utc::now(), cancel).await;

            if cancel.sleep(self.options.poll_interval).await {
                break;
            }
            self.set_state(PollState::Idle);
        }

        self.set_state(PollState::Idle);
        info!("Sync scheduler stopped");
    }

    /// One live poll over `[now - lookback, now)`
    ///
    /// Always ends in `Sleeping`, whether or not the window synced.
    pub async fn tick(
        &mut self,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<SyncStats, SyncError> {
        let window = TimeWindow::lookback(now, self.options.lookback);
        info!("Querying call logs for {}", window);

        self.set_state(PollState::Fetching);
        let result = match self.walker.walk(window, cancel).await {
            Ok(walk) => {
                self.set_state(PollState::Reconciling);
                self.persist(walk).await.map_err(SyncError::from)
            }
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(stats) => info!("Live poll {}", stats),
            Err(e) if e.is_cancelled() => info!("Live poll for {} cancelled", window),
            Err(e) => warn!("Live poll for {} failed: {}", window, e),
        }

        self.set_state(PollState::Sleeping);
        result
    }

    /// Walk and reconcile a single window
    pub async fn sync_window(
        &self,
        window: TimeWindow,
        cancel: &CancelToken,
    ) -> Result<SyncStats, SyncError> {
        let walk = self.walker.walk(window, cancel).await?;
        Ok(self.persist(walk).await?)
    }

    /// Backfill `[start, now)` in chunks, once
    ///
    /// Returns None when no backfill is due: disabled, already run in this
    /// process, or already completed by an earlier run from the same or an
    /// earlier start.
    /// A failing chunk is logged and skipped. Unless cancelled, the backfill
    /// is then marked complete (with its failed chunks) and disabled.
    pub async fn run_backfill(
        &mut self,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Option<BackfillReport> {
        let start = self.options.backfill_start?;

        match self.with_store(|store| store.backfill_state()).await {
            Ok(Some(state)) if state.is_complete_for(start) => {
                info!(
                    "Historical backfill from {} already completed; skipping",
                    start
                );
                self.options.backfill_start = None;
                return None;
            }
            Ok(_) => {}
            Err(e) => warn!("Could not read backfill state, running backfill: {}", e),
        }

        let chunks = TimeWindow::chunks(start, now, self.options.chunk);
        info!(
            "Starting historical backfill from {} to {} ({} chunks)",
            start,
            now,
            chunks.len()
        );

        let mut report = BackfillReport {
            chunks: chunks.len(),
            ..BackfillReport::default()
        };

        for (index, chunk) in chunks.iter().enumerate() {
            if cancel.is_cancelled()
                || (index > 0 && cancel.sleep(self.options.chunk_pause).await)
            {
                report.cancelled = true;
                break;
            }

            info!("Backfill chunk {}/{}: {}", index + 1, chunks.len(), chunk);
            match self.sync_window(*chunk, cancel).await {
                Ok(stats) => {
                    info!("Backfill {}", stats);
                    report.synced += 1;
                    report.inserted += stats.inserted;
                }
                Err(e) if e.is_cancelled() => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    warn!("Backfill chunk {} failed, moving on: {}", chunk, e);
                    report.failed.push(*chunk);
                }
            }
        }

        if report.cancelled {
            info!(
                "Historical backfill cancelled after {} of {} chunks",
                report.synced + report.failed.len(),
                report.chunks
            );
            return Some(report);
        }

        self.options.backfill_start = None;
        let state = BackfillState::completed(start, Utc::now(), report.failed.clone());
        if let Err(e) = self.with_store(move |store| store.save_backfill_state(&state)).await {
            warn!("Failed to persist backfill completion: {}", e);
        }

        info!(
            "Historical backfill complete: {} chunks synced, {} failed, {} records inserted",
            report.synced,
            report.failed.len(),
            report.inserted
        );
        Some(report)
    }

    async fn persist(&self, walk: Walk) -> Result<SyncStats, StoreError> {
        let Walk {
            window,
            records,
            source,
            pages,
        } = walk;
        let fetched = records.len();

        let reconciled = self.with_store(move |store| reconcile(store, records)).await?;

        Ok(SyncStats {
            window,
            source,
            pages,
            fetched,
            inserted: reconciled.inserted,
            skipped: reconciled.skipped,
        })
    }

    /// Run a store operation on the blocking pool
    async fn with_store<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RecordStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}
