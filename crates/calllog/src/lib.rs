//! Calllog crate - Incremental sync of PBX call logs
//!
//! This crate provides the sync engine behind the `calllog-sync` service:
//! - Domain models (Record, SegmentId, TimeWindow, Credential)
//! - PBX reporting API client with token caching and a page walker
//! - Bounded retry with exponential backoff
//! - Storage trait abstractions (SQLite and in-memory)
//! - Idempotent dedup/upsert and a live-poll + backfill scheduler
//!
//! HTTP and SQLite calls are blocking; the async parts run them on tokio's
//! blocking pool.

pub mod cancel;
pub mod error;
pub mod models;
pub mod pbx;
pub mod retry;
pub mod settings;
pub mod storage;
pub mod sync;

pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use error::{AuthError, FetchError, StoreError, SyncError};
pub use models::{BackfillState, Credential, Record, SegmentId, TimeWindow};
pub use pbx::{
    Authenticator, CallFilters, Endpoint, PageRequest, PageSource, PageWalker, PbxAuthenticator,
    PbxClient, TokenCache, TokenGrant, Walk, http_agent,
};
pub use retry::{RetryPolicy, Transient};
pub use settings::{ApiSettings, DatabaseSettings, Settings};
pub use storage::{InMemoryRecordStore, RecordStore, SqliteRecordStore};
pub use sync::{
    BackfillReport, PollState, ReconcileStats, SchedulerOptions, SyncScheduler, SyncStats,
    reconcile,
};
