//! Call log query construction
//!
//! The collection endpoint takes its filters as a function-call style path
//! segment, `Endpoint(key=value,key=value,...)`, followed by OData paging
//! parameters:
//!
//! `{base}{endpoint}(periodFrom=...,hidePcalls=true)?$top=100&$skip=0&$orderby=SegmentId desc`

use chrono::{DateTime, Utc};

use crate::models::TimeWindow;

/// Timestamp format expected by `periodFrom` / `periodTo`
const PERIOD_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Ordering that keeps page boundaries stable while new calls arrive
pub const ORDER_BY: &str = "SegmentId desc";

/// Fixed filter set sent with every page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFilters {
    pub source_type: u32,
    /// Source number filter; `''` matches everything
    pub source_filter: String,
    pub destination_type: u32,
    /// Destination number filter; `''` matches everything
    pub destination_filter: String,
    pub calls_type: u32,
    pub call_time_filter_type: u32,
    pub call_time_filter_from: String,
    pub call_time_filter_to: String,
    /// Suppress partial (still-in-progress) call entries
    pub hide_partial_calls: bool,
}

impl Default for CallFilters {
    fn default() -> Self {
        Self {
            source_type: 0,
            source_filter: "''".to_string(),
            destination_type: 0,
            destination_filter: "''".to_string(),
            calls_type: 0,
            call_time_filter_type: 0,
            call_time_filter_from: "'0:00:0'".to_string(),
            call_time_filter_to: "'0:00:0'".to_string(),
            hide_partial_calls: true,
        }
    }
}

impl CallFilters {
    /// Key/value pairs for a window, in the order the endpoint documents them
    fn params(&self, window: &TimeWindow) -> Vec<(&'static str, String)> {
        vec![
            ("periodFrom", format_period(window.from)),
            ("periodTo", format_period(window.to)),
            ("sourceType", self.source_type.to_string()),
            ("sourceFilter", self.source_filter.clone()),
            ("destinationType", self.destination_type.to_string()),
            ("destinationFilter", self.destination_filter.clone()),
            ("callsType", self.calls_type.to_string()),
            ("callTimeFilterType", self.call_time_filter_type.to_string()),
            ("callTimeFilterFrom", self.call_time_filter_from.clone()),
            ("callTimeFilterTo", self.call_time_filter_to.clone()),
            ("hidePcalls", self.hide_partial_calls.to_string()),
        ]
    }

    /// Filter expression placed in parentheses after the endpoint path
    pub fn expression(&self, window: &TimeWindow) -> String {
        self.params(window)
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, urlencoding::encode(&value)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn format_period(at: DateTime<Utc>) -> String {
    at.format(PERIOD_FORMAT).to_string()
}

/// Full URL for one page of a window
pub fn page_url(
    base_url: &str,
    endpoint: &str,
    filters: &CallFilters,
    window: &TimeWindow,
    skip: usize,
    top: usize,
) -> String {
    format!(
        "{}{}({})?$top={}&$skip={}&$orderby={}",
        base_url.trim_end_matches('/'),
        endpoint,
        filters.expression(window),
        top,
        skip,
        urlencoding::encode(ORDER_BY),
    )
}
