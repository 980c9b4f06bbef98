//! PBX call log HTTP client
//!
//! Fetches single pages of the call log collection.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

use super::api::CallLogPage;
use super::auth::TokenCache;
use super::query::page_url;
use super::walker::{Endpoint, PageRequest, PageSource};
use crate::error::FetchError;
use crate::models::Record;
use crate::settings::ApiSettings;

/// Build the shared HTTP agent.
///
/// Non-success statuses are returned as responses rather than errors so the
/// caller can log the body and classify the status itself.
pub fn http_agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build();
    ureq::Agent::new_with_config(config)
}

/// Client for the call log collection endpoints
pub struct PbxClient {
    agent: ureq::Agent,
    base_url: String,
    primary_endpoint: String,
    legacy_endpoint: Option<String>,
    tokens: Arc<TokenCache>,
}

impl PbxClient {
    pub fn new(settings: &ApiSettings, agent: ureq::Agent, tokens: Arc<TokenCache>) -> Self {
        Self {
            agent,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            primary_endpoint: settings.call_log_endpoint.clone(),
            legacy_endpoint: settings.legacy_endpoint().map(str::to_string),
            tokens,
        }
    }

    fn endpoint_path(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::Primary => &self.primary_endpoint,
            Endpoint::Legacy => self
                .legacy_endpoint
                .as_deref()
                .unwrap_or(&self.primary_endpoint),
        }
    }
}

impl PageSource for PbxClient {
    fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Record>, FetchError> {
        let credential = self.tokens.get_token()?;

        let path = self.endpoint_path(request.endpoint);
        let url = page_url(
            &self.base_url,
            path,
            &request.filters,
            &request.window,
            request.skip,
            request.top,
        );
        info!(
            "Fetching page with skip={}, top={} from {}",
            request.skip, request.top, path
        );

        let mut response = self
            .agent
            .get(&url)
            .header("Authorization", &credential.bearer())
            .call()
            .map_err(|source| FetchError::Request {
                endpoint: path.to_string(),
                window: request.window,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            error!(
                "Failed to fetch call logs from {} for {}. Status: {}, Response: {}",
                path, request.window, status, body
            );
            if status.as_u16() == 401 {
                // Token revoked server-side; next request logs in again.
                self.tokens.invalidate();
            }
            return Err(FetchError::Status {
                endpoint: path.to_string(),
                window: request.window,
                status: status.as_u16(),
                body,
            });
        }

        let page: CallLogPage =
            response
                .body_mut()
                .read_json()
                .map_err(|e| FetchError::Decode {
                    endpoint: path.to_string(),
                    window: request.window,
                    message: e.to_string(),
                })?;

        Ok(page.value.unwrap_or_default())
    }

    fn has_legacy(&self) -> bool {
        self.legacy_endpoint.is_some()
    }
}
