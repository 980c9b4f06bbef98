//! Offset/limit walk over one time window of the call log collection

use log::{info, warn};
use std::fmt;
use std::sync::Arc;

use super::query::CallFilters;
use crate::cancel::CancelToken;
use crate::error::FetchError;
use crate::models::{Record, TimeWindow};
use crate::retry::RetryPolicy;

/// Which collection endpoint a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Primary,
    /// Older data, consulted when the primary endpoint has nothing for a window
    Legacy,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Primary => write!(f, "primary"),
            Endpoint::Legacy => write!(f, "legacy"),
        }
    }
}

/// A single page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub endpoint: Endpoint,
    pub window: TimeWindow,
    pub filters: CallFilters,
    pub skip: usize,
    pub top: usize,
}

/// Transport for page requests
///
/// Implementations block; the walker calls them from the blocking pool.
pub trait PageSource: Send + Sync {
    /// Fetch one page. A missing `value` array is returned as an empty page.
    fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Record>, FetchError>;

    /// Whether a legacy endpoint is available for fallback
    fn has_legacy(&self) -> bool;
}

/// Every record of one window, and where it came from
#[derive(Debug, Clone)]
pub struct Walk {
    pub window: TimeWindow,
    pub records: Vec<Record>,
    pub source: Endpoint,
    /// Page requests issued against `source`
    pub pages: usize,
}

/// Walks a window page by page until the collection is exhausted
pub struct PageWalker {
    source: Arc<dyn PageSource>,
    retry: RetryPolicy,
    page_size: usize,
    filters: CallFilters,
}

impl PageWalker {
    pub const PAGE_SIZE: usize = 100;

    pub fn new(source: Arc<dyn PageSource>) -> Self {
        Self {
            source,
            retry: RetryPolicy::default(),
            page_size: Self::PAGE_SIZE,
            filters: CallFilters::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_filters(mut self, filters: CallFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Walk `window` with the configured filters, starting at the primary endpoint
    pub async fn walk(&self, window: TimeWindow, cancel: &CancelToken) -> Result<Walk, FetchError> {
        self.walk_with(window, Endpoint::Primary, &self.filters, cancel)
            .await
    }

    /// Walk `window` on `endpoint` with explicit filters.
    ///
    /// Always starts from offset 0. If the primary endpoint has nothing on its
    /// first page and a legacy endpoint exists, the window is walked once more
    /// against the legacy endpoint. Any failure discards the pages fetched so far.
    pub async fn walk_with(
        &self,
        window: TimeWindow,
        endpoint: Endpoint,
        filters: &CallFilters,
        cancel: &CancelToken,
    ) -> Result<Walk, FetchError> {
        let walk = self.walk_endpoint(window, endpoint, filters, cancel).await?;

        if walk.records.is_empty() && endpoint == Endpoint::Primary && self.source.has_legacy() {
            info!(
                "No call logs on primary endpoint for {}; trying legacy endpoint",
                window
            );
            return self
                .walk_endpoint(window, Endpoint::Legacy, filters, cancel)
                .await;
        }

        Ok(walk)
    }

    async fn walk_endpoint(
        &self,
        window: TimeWindow,
        endpoint: Endpoint,
        filters: &CallFilters,
        cancel: &CancelToken,
    ) -> Result<Walk, FetchError> {
        let mut records = Vec::new();
        let mut skip = 0;
        let mut pages = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let request = PageRequest {
                endpoint,
                window,
                filters: filters.clone(),
                skip,
                top: self.page_size,
            };
            let page = self.fetch(request).await?;
            pages += 1;

            let count = page.len();
            info!(
                "Retrieved {} call log entries on page {} ({} endpoint)",
                count, pages, endpoint
            );
            records.extend(page);

            if count < self.page_size {
                break;
            }
            skip += self.page_size;
        }

        info!(
            "Total call log entries retrieved for {}: {}",
            window,
            records.len()
        );
        Ok(Walk {
            window,
            records,
            source: endpoint,
            pages,
        })
    }

    async fn fetch(&self, request: PageRequest) -> Result<Vec<Record>, FetchError> {
        let source = Arc::clone(&self.source);
        let retry = self.retry;

        tokio::task::spawn_blocking(move || {
            retry.run(
                || source.fetch_page(&request),
                |err, attempt, delay| {
                    warn!(
                        "Error fetching call logs (attempt {}). Retrying in {:?}: {}",
                        attempt, delay, err
                    );
                },
            )
        })
        .await
        .map_err(|e| FetchError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{CancelHandle, cancel_pair};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Mutex;

    /// In-memory collection split across a primary and an optional legacy endpoint
    #[derive(Default)]
    struct FakeSource {
        primary: Vec<Record>,
        legacy: Option<Vec<Record>>,
        requests: Mutex<Vec<(Endpoint, usize, usize)>>,
        /// Transient failures to return before serving each request
        flaky: Mutex<usize>,
        fail_status: Option<u16>,
        /// Cancelled right after the first page is served
        cancel_after_first: Mutex<Option<CancelHandle>>,
    }

    impl FakeSource {
        fn with_primary(count: i64) -> Self {
            Self {
                primary: records(count),
                ..Self::default()
            }
        }

        fn requests(&self) -> Vec<(Endpoint, usize, usize)> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl PageSource for FakeSource {
        fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Record>, FetchError> {
            {
                let mut flaky = self.flaky.lock().unwrap();
                if *flaky > 0 {
                    *flaky -= 1;
                    return Err(FetchError::Request {
                        endpoint: request.endpoint.to_string(),
                        window: request.window,
                        source: ureq::Error::ConnectionFailed,
                    });
                }
            }

            self.requests
                .lock()
                .unwrap()
                .push((request.endpoint, request.skip, request.top));
            if let Some(handle) = self.cancel_after_first.lock().unwrap().take() {
                handle.cancel();
            }

            if let Some(status) = self.fail_status
                && request.skip > 0
            {
                return Err(FetchError::Status {
                    endpoint: request.endpoint.to_string(),
                    window: request.window,
                    status,
                    body: "boom".into(),
                });
            }

            let all = match request.endpoint {
                Endpoint::Primary => &self.primary,
                Endpoint::Legacy => self.legacy.as_ref().unwrap(),
            };
            Ok(all.iter().skip(request.skip).take(request.top).cloned().collect())
        }

        fn has_legacy(&self) -> bool {
            self.legacy.is_some()
        }
    }

    fn records(count: i64) -> Vec<Record> {
        let base = Utc.with_ymd_and_hms(2025, 4, 19, 12, 0, 0).unwrap();
        (0..count)
            .map(|i| Record::new(1000 - i, base + Duration::seconds(i)))
            .collect()
    }

    fn window() -> TimeWindow {
        let now = Utc::now();
        TimeWindow::new(now - Duration::minutes(30), now)
    }

    fn walker(source: &Arc<FakeSource>) -> PageWalker {
        let source: Arc<dyn PageSource> = source.clone();
        PageWalker::new(source).with_retry(RetryPolicy::new(3, std::time::Duration::ZERO))
    }

    #[tokio::test]
    async fn test_walk_stops_on_short_page() {
        let source = Arc::new(FakeSource::with_primary(250));
        let walk = walker(&source).walk(window(), &CancelToken::never()).await.unwrap();

        assert_eq!(walk.records.len(), 250);
        assert_eq!(walk.pages, 3);
        assert_eq!(walk.source, Endpoint::Primary);
        assert_eq!(
            source.requests(),
            vec![
                (Endpoint::Primary, 0, 100),
                (Endpoint::Primary, 100, 100),
                (Endpoint::Primary, 200, 100),
            ]
        );
    }

    #[tokio::test]
    async fn test_walk_exact_multiple_needs_empty_page() {
        let source = Arc::new(FakeSource::with_primary(200));
        let walk = walker(&source).walk(window(), &CancelToken::never()).await.unwrap();

        assert_eq!(walk.records.len(), 200);
        assert_eq!(walk.pages, 3);
    }

    #[tokio::test]
    async fn test_empty_window_without_legacy() {
        let source = Arc::new(FakeSource::with_primary(0));
        let walk = walker(&source).walk(window(), &CancelToken::never()).await.unwrap();

        assert!(walk.records.is_empty());
        assert_eq!(walk.source, Endpoint::Primary);
        assert_eq!(source.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_legacy_when_primary_empty() {
        let source = Arc::new(FakeSource {
            legacy: Some(records(42)),
            ..FakeSource::default()
        });
        let walk = walker(&source).walk(window(), &CancelToken::never()).await.unwrap();

        assert_eq!(walk.records.len(), 42);
        assert_eq!(walk.source, Endpoint::Legacy);
        assert_eq!(
            source.requests(),
            vec![(Endpoint::Primary, 0, 100), (Endpoint::Legacy, 0, 100)]
        );
    }

    #[tokio::test]
    async fn test_no_fallback_when_primary_has_records() {
        let source = Arc::new(FakeSource {
            primary: records(5),
            legacy: Some(records(42)),
            ..FakeSource::default()
        });
        let walk = walker(&source).walk(window(), &CancelToken::never()).await.unwrap();

        assert_eq!(walk.records.len(), 5);
        assert_eq!(walk.source, Endpoint::Primary);
    }

    #[tokio::test]
    async fn test_transient_page_failure_retried() {
        let source = Arc::new(FakeSource {
            primary: records(10),
            flaky: Mutex::new(2),
            ..FakeSource::default()
        });
        let walk = walker(&source).walk(window(), &CancelToken::never()).await.unwrap();

        assert_eq!(walk.records.len(), 10);
        assert_eq!(source.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_page_aborts_whole_walk() {
        let source = Arc::new(FakeSource {
            primary: records(150),
            fail_status: Some(403),
            ..FakeSource::default()
        });
        let err = walker(&source)
            .walk(window(), &CancelToken::never())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_page() {
        let source = Arc::new(FakeSource::with_primary(10));
        let (handle, token) = cancel_pair();
        handle.cancel();

        let err = walker(&source).walk(window(), &token).await.unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
        assert!(source.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_between_pages() {
        let (handle, token) = cancel_pair();
        let source = Arc::new(FakeSource {
            primary: records(250),
            cancel_after_first: Mutex::new(Some(handle)),
            ..FakeSource::default()
        });

        let err = walker(&source).walk(window(), &token).await.unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
        assert_eq!(source.requests(), vec![(Endpoint::Primary, 0, 100)]);
    }

    #[tokio::test]
    async fn test_every_walk_restarts_at_offset_zero() {
        let source = Arc::new(FakeSource::with_primary(120));
        let walker = walker(&source);

        walker.walk(window(), &CancelToken::never()).await.unwrap();
        walker.walk(window(), &CancelToken::never()).await.unwrap();

        let skips: Vec<usize> = source.requests().iter().map(|(_, skip, _)| *skip).collect();
        assert_eq!(skips, vec![0, 100, 0, 100]);
    }
}
