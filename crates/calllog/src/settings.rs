//! Settings for the sync service
//!
//! Supports loading settings from (in order of priority):
//! 1. The JSON file named by `CALLLOG_SETTINGS`
//! 2. `settings.json` in the config directory (~/.config/calllog/)
//! 3. Runtime environment variables (fallback)
//!
//! The JSON layout keeps the PBX section name and PascalCase keys:
//!
//! ```json
//! {
//!   "3CXApiSettings": { "BaseUrl": "https://pbx.example.com", ... },
//!   "Database": { "Path": "/var/lib/calllog/calllog.db" }
//! }
//! ```

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

/// Settings filename in the config directory
const SETTINGS_FILE: &str = "settings.json";

/// Environment variable naming an explicit settings file
pub const SETTINGS_PATH_ENV: &str = "CALLLOG_SETTINGS";

/// Default database filename in the data directory
const DATABASE_FILE: &str = "calllog.db";

/// Longest accepted `QueryIntervalMinutes` (one day)
pub const MAX_QUERY_INTERVAL_MINUTES: i64 = 24 * 60;

/// Longest accepted `LookbackMinutes` (one week)
pub const MAX_LOOKBACK_MINUTES: i64 = 7 * 24 * 60;

/// Connection and polling settings for the PBX reporting API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApiSettings {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub auth_endpoint: String,
    /// Primary call log collection path
    #[serde(default)]
    pub call_log_endpoint: String,
    /// Collection path serving older data, tried when the primary is empty
    #[serde(default)]
    pub call_log_old_endpoint: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub security_code: Option<String>,
    #[serde(default = "default_query_interval")]
    pub query_interval_minutes: i64,
    #[serde(default = "default_lookback")]
    pub lookback_minutes: i64,
    /// Run the historical backfill before live polling
    #[serde(default)]
    pub get_old_calls: bool,
    /// Start of the backfill range (defaults to one day ago); naive times are UTC
    #[serde(default, deserialize_with = "crate::models::timestamp::option::deserialize")]
    pub start_time_get_old_calls: Option<DateTime<Utc>>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_query_interval() -> i64 {
    15
}

fn default_lookback() -> i64 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth_endpoint: String::new(),
            call_log_endpoint: String::new(),
            call_log_old_endpoint: None,
            username: String::new(),
            password: String::new(),
            security_code: None,
            query_interval_minutes: default_query_interval(),
            lookback_minutes: default_lookback(),
            get_old_calls: false,
            start_time_get_old_calls: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Local persistence settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatabaseSettings {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Complete settings file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(rename = "3CXApiSettings", default)]
    pub api: ApiSettings,
    #[serde(rename = "Database", default)]
    pub database: DatabaseSettings,
}

impl Settings {
    /// Load settings using the following priority:
    /// 1. File named by `CALLLOG_SETTINGS`
    /// 2. JSON file (~/.config/calllog/settings.json)
    /// 3. Runtime environment variables
    ///
    /// Environment variables override individual values in either file.
    pub fn load() -> Result<Self> {
        let mut settings = if let Ok(path) = std::env::var(SETTINGS_PATH_ENV) {
            Self::from_file(Path::new(&path))?
        } else if config::config_exists(SETTINGS_FILE) {
            config::load_json(SETTINGS_FILE)?
        } else {
            Self::default()
        };

        settings.apply_env();
        Ok(settings)
    }

    /// Load settings from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// Parse settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse settings JSON")
    }

    /// Overlay values from `CALLLOG_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        let api = &mut self.api;
        if let Some(v) = var("CALLLOG_BASE_URL") {
            api.base_url = v;
        }
        if let Some(v) = var("CALLLOG_AUTH_ENDPOINT") {
            api.auth_endpoint = v;
        }
        if let Some(v) = var("CALLLOG_ENDPOINT") {
            api.call_log_endpoint = v;
        }
        if let Some(v) = var("CALLLOG_LEGACY_ENDPOINT") {
            api.call_log_old_endpoint = Some(v);
        }
        if let Some(v) = var("CALLLOG_USERNAME") {
            api.username = v;
        }
        if let Some(v) = var("CALLLOG_PASSWORD") {
            api.password = v;
        }
        if let Some(v) = var("CALLLOG_SECURITY_CODE") {
            api.security_code = Some(v);
        }
        if let Some(v) = var("CALLLOG_DB_PATH") {
            self.database.path = Some(PathBuf::from(v));
        }
    }

    /// Reject settings the service cannot run with.
    ///
    /// Called once at startup; a failure here is fatal.
    pub fn validate(&self) -> Result<()> {
        let api = &self.api;
        if api.base_url.trim().is_empty() {
            bail!("BaseUrl is not configured");
        }
        url::Url::parse(&api.base_url)
            .with_context(|| format!("BaseUrl is not a valid URL: {}", api.base_url))?;
        if api.auth_endpoint.trim().is_empty() {
            bail!("AuthEndpoint is not configured");
        }
        if api.call_log_endpoint.trim().is_empty() {
            bail!("CallLogEndpoint is not configured");
        }
        if api.username.is_empty() || api.password.is_empty() {
            bail!("Username and Password must both be configured");
        }
        if !(1..=MAX_QUERY_INTERVAL_MINUTES).contains(&api.query_interval_minutes) {
            bail!(
                "QueryIntervalMinutes must be between 1 and {} (got {})",
                MAX_QUERY_INTERVAL_MINUTES,
                api.query_interval_minutes
            );
        }
        if !(1..=MAX_LOOKBACK_MINUTES).contains(&api.lookback_minutes) {
            bail!(
                "LookbackMinutes must be between 1 and {} (got {})",
                MAX_LOOKBACK_MINUTES,
                api.lookback_minutes
            );
        }
        Ok(())
    }

    /// Database path, falling back to the data directory
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => config::data_path(DATABASE_FILE).context("Could not determine data directory"),
        }
    }
}

impl ApiSettings {
    /// Poll interval, clamped to the range `validate` accepts
    pub fn poll_interval(&self) -> StdDuration {
        let minutes = self.query_interval_minutes.clamp(0, MAX_QUERY_INTERVAL_MINUTES);
        StdDuration::from_secs(minutes as u64 * 60)
    }

    /// Lookback, clamped to the range `validate` accepts
    pub fn lookback(&self) -> Duration {
        Duration::minutes(self.lookback_minutes.clamp(0, MAX_LOOKBACK_MINUTES))
    }

    pub fn request_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.request_timeout_secs)
    }

    /// Legacy endpoint, if one is configured and non-blank
    pub fn legacy_endpoint(&self) -> Option<&str> {
        self.call_log_old_endpoint
            .as_deref()
            .filter(|endpoint| !endpoint.trim().is_empty())
    }

    /// Backfill start if the backfill is enabled
    pub fn backfill_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.get_old_calls
            .then(|| self.start_time_get_old_calls.unwrap_or(now - Duration::days(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    const FULL: &str = r#"{
        "3CXApiSettings": {
            "BaseUrl": "https://pbx.example.com/",
            "AuthEndpoint": "/webclient/api/Login/GetAccessToken",
            "CallLogEndpoint": "/xapi/v1/ReportCallLogData/Pbx.GetCallLogData",
            "CallLogOldEndpoint": "/xapi/v1/ReportCallLogData/Pbx.GetOldCallLogData",
            "Username": "reporter",
            "Password": "hunter2",
            "QueryIntervalMinutes": 5,
            "GetOldCalls": true,
            "StartTimeGetOldCalls": "2025-01-01T00:00:00Z"
        },
        "Database": { "Path": "/tmp/calls.db" }
    }"#;

    #[test]
    fn test_parse_full_settings() {
        let settings = Settings::from_json(FULL).unwrap();
        assert_eq!(settings.api.base_url, "https://pbx.example.com/");
        assert_eq!(settings.api.query_interval_minutes, 5);
        assert_eq!(settings.api.lookback_minutes, 30);
        assert_eq!(
            settings.api.legacy_endpoint(),
            Some("/xapi/v1/ReportCallLogData/Pbx.GetOldCallLogData")
        );
        assert_eq!(settings.database_path().unwrap(), PathBuf::from("/tmp/calls.db"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_json("{}").unwrap();
        assert_eq!(settings.api.query_interval_minutes, 15);
        assert_eq!(settings.api.lookback_minutes, 30);
        assert!(!settings.api.get_old_calls);
        assert_eq!(settings.api.poll_interval(), StdDuration::from_secs(15 * 60));
        assert!(settings.api.backfill_start(Utc::now()).is_none());
    }

    #[test]
    fn test_missing_base_url_is_fatal() {
        let settings = Settings::from_json("{}").unwrap();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("BaseUrl"));
    }

    #[test]
    fn test_invalid_interval_rejected() {
        let mut settings = Settings::from_json(FULL).unwrap();
        settings.api.query_interval_minutes = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_oversized_intervals_rejected() {
        let mut settings = Settings::from_json(FULL).unwrap();
        settings.api.query_interval_minutes = MAX_QUERY_INTERVAL_MINUTES;
        settings.api.lookback_minutes = MAX_LOOKBACK_MINUTES;
        assert!(settings.validate().is_ok());

        settings.api.query_interval_minutes = i64::MAX;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("QueryIntervalMinutes"));
        assert_eq!(
            settings.api.poll_interval(),
            StdDuration::from_secs(MAX_QUERY_INTERVAL_MINUTES as u64 * 60)
        );

        settings.api.query_interval_minutes = 5;
        settings.api.lookback_minutes = i64::MAX;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("LookbackMinutes"));
        assert_eq!(settings.api.lookback(), Duration::minutes(MAX_LOOKBACK_MINUTES));
    }

    #[test]
    fn test_blank_legacy_endpoint_ignored() {
        let mut settings = Settings::from_json(FULL).unwrap();
        settings.api.call_log_old_endpoint = Some("  ".into());
        assert_eq!(settings.api.legacy_endpoint(), None);
    }

    #[test]
    fn test_backfill_start_defaults_to_one_day_ago() {
        let mut api = ApiSettings {
            get_old_calls: true,
            ..ApiSettings::default()
        };
        let now = Utc::now();
        assert_eq!(api.backfill_start(now), Some(now - Duration::days(1)));

        let configured = now - Duration::days(10);
        api.start_time_get_old_calls = Some(configured);
        assert_eq!(api.backfill_start(now), Some(configured));
    }

    #[test]
    fn test_naive_backfill_start_read_as_utc() {
        let settings = Settings::from_json(
            r#"{"3CXApiSettings": {"GetOldCalls": true, "StartTimeGetOldCalls": "2025-01-01T00:00:00"}}"#,
        )
        .unwrap();
        let expected = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(settings.api.start_time_get_old_calls, Some(expected));
        assert_eq!(settings.api.backfill_start(Utc::now()), Some(expected));
    }

    #[test]
    fn test_blank_or_invalid_backfill_start() {
        let blank = Settings::from_json(r#"{"3CXApiSettings": {"StartTimeGetOldCalls": ""}}"#).unwrap();
        assert_eq!(blank.api.start_time_get_old_calls, None);

        let null = Settings::from_json(r#"{"3CXApiSettings": {"StartTimeGetOldCalls": null}}"#).unwrap();
        assert_eq!(null.api.start_time_get_old_calls, None);

        let invalid = Settings::from_json(r#"{"3CXApiSettings": {"StartTimeGetOldCalls": "yesterday"}}"#);
        assert!(invalid.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CALLLOG_BASE_URL", "https://other.example.com"),
            ("CALLLOG_PASSWORD", "from-env"),
            ("CALLLOG_DB_PATH", "/data/calls.db"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::from_json(FULL).unwrap();
        settings.apply_vars(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(settings.api.base_url, "https://other.example.com");
        assert_eq!(settings.api.password, "from-env");
        assert_eq!(settings.api.username, "reporter");
        assert_eq!(settings.database_path().unwrap(), PathBuf::from("/data/calls.db"));
    }
}
