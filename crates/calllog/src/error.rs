//! Error types for the sync engine.
//!
//! Each stage has its own error so callers can tell which part of a sync run
//! failed. All of them are recoverable at the scheduler level: a failed live
//! poll is retried on the next tick and a failed backfill chunk is skipped.

use thiserror::Error;

use crate::models::{SegmentId, TimeWindow};
use crate::retry::Transient;

/// Credential acquisition failed
#[derive(Error, Debug)]
pub enum AuthError {
    /// Settings needed to authenticate are missing
    #[error("Authentication is not configured: {0}")]
    NotConfigured(String),

    /// The request never produced a response
    #[error("Authentication request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: ureq::Error,
    },

    /// The endpoint answered with a non-success status
    #[error("Authentication endpoint {url} returned status {status}")]
    Status { url: String, status: u16 },

    /// The response body could not be decoded
    #[error("Malformed authentication response: {0}")]
    MalformedResponse(String),

    /// The response decoded but carried no usable token
    #[error("Authentication response did not contain an access token")]
    MissingToken,
}

impl Transient for AuthError {
    fn is_transient(&self) -> bool {
        match self {
            AuthError::Request { source, .. } => is_transient_transport(source),
            AuthError::Status { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }
}

/// A page request failed or the walk was interrupted
#[derive(Error, Debug)]
pub enum FetchError {
    /// No credential could be obtained for the request
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The request never produced a response
    #[error("Request to {endpoint} for window {window} failed: {source}")]
    Request {
        endpoint: String,
        window: TimeWindow,
        #[source]
        source: ureq::Error,
    },

    /// The endpoint answered with a non-success status
    #[error("{endpoint} returned status {status} for window {window}: {body}")]
    Status {
        endpoint: String,
        window: TimeWindow,
        status: u16,
        body: String,
    },

    /// The page body could not be decoded
    #[error("Failed to decode page from {endpoint} for window {window}: {message}")]
    Decode {
        endpoint: String,
        window: TimeWindow,
        message: String,
    },

    /// The engine was asked to stop between pages
    #[error("Walk cancelled")]
    Cancelled,

    /// The blocking task running the request did not complete
    #[error("Page fetch task failed: {0}")]
    Task(String),
}

impl Transient for FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Request { source, .. } => is_transient_transport(source),
            FetchError::Status { status, .. } => is_transient_status(*status),
            // The token cache has already retried.
            FetchError::Auth(_) => false,
            _ => false,
        }
    }
}

/// Persistence failed; nothing from the batch was committed
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database migration failed: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("Failed to encode record {segment_id}: {source}")]
    Encode {
        segment_id: SegmentId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode stored data: {0}")]
    Decode(String),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The blocking task running the store call did not complete
    #[error("Store task failed: {0}")]
    Task(String),
}

/// Failure of one sync run (walk + reconcile for a single window)
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// True if the run stopped because cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Fetch(FetchError::Cancelled))
    }
}

/// Network-level failures worth another attempt
fn is_transient_transport(err: &ureq::Error) -> bool {
    matches!(
        err,
        ureq::Error::Io(_)
            | ureq::Error::Timeout(_)
            | ureq::Error::ConnectionFailed
            | ureq::Error::HostNotFound
    )
}

/// Throttling and server-side failures
fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}
