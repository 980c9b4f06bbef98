//! Call log record model
//!
//! A record is one segment of a call as reported by the PBX. Only the
//! segment ID and start time drive sync decisions; everything else is
//! carried through untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Unique identifier for a call segment (PBX `SegmentId`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub i64);

impl SegmentId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for SegmentId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single call log segment retrieved from the remote source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identity of the record
    #[serde(rename = "SegmentId")]
    pub segment_id: SegmentId,
    /// When the segment started
    #[serde(rename = "StartTime", with = "crate::models::timestamp")]
    pub start_time: DateTime<Utc>,
    /// Remaining descriptive fields (parties, durations, status, ...)
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Record {
    /// Create a record with an empty payload
    pub fn new(segment_id: i64, start_time: DateTime<Utc>) -> Self {
        Self {
            segment_id: SegmentId(segment_id),
            start_time,
            payload: Map::new(),
        }
    }

    /// Add a payload field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Look up a string payload field
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_deserialize_keeps_payload() {
        let json = r#"{
            "SegmentId": 42,
            "StartTime": "2025-04-19T12:40:49.123Z",
            "SourceDn": "101",
            "Answered": true,
            "TalkingDuration": "PT1M3S"
        }"#;

        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.segment_id, SegmentId(42));
        assert_eq!(
            record.start_time,
            Utc.with_ymd_and_hms(2025, 4, 19, 12, 40, 49).unwrap()
                + chrono::Duration::milliseconds(123)
        );
        assert_eq!(record.field_str("SourceDn"), Some("101"));
        assert_eq!(record.payload.get("Answered"), Some(&Value::Bool(true)));
        assert!(!record.payload.contains_key("SegmentId"));
    }

    #[test]
    fn test_deserialize_offset_and_naive_times() {
        let with_offset: Record =
            serde_json::from_str(r#"{"SegmentId": 1, "StartTime": "2025-04-19T14:00:00+02:00"}"#)
                .unwrap();
        let naive: Record =
            serde_json::from_str(r#"{"SegmentId": 2, "StartTime": "2025-04-19T12:00:00"}"#).unwrap();

        assert_eq!(with_offset.start_time, naive.start_time);
    }

    #[test]
    fn test_invalid_start_time_rejected() {
        let result = serde_json::from_str::<Record>(r#"{"SegmentId": 1, "StartTime": "yesterday"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_uses_wire_names() {
        let record = Record::new(7, Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap())
            .with_field("Status", "Answered");

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["SegmentId"], 7);
        assert_eq!(value["StartTime"], "2025-01-02T03:04:05.000Z");
        assert_eq!(value["Status"], "Answered");
    }
}
