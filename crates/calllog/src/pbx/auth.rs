//! PBX API authentication
//!
//! The PBX issues short-lived bearer tokens from a username/password login.
//! [`TokenCache`] keeps one token and only goes back to the login endpoint
//! when it is about to expire. Uses synchronous HTTP (ureq); callers on an
//! async runtime run it on the blocking pool.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::sync::{Mutex, PoisonError};

use super::api::{AuthRequest, AuthResponse};
use crate::error::AuthError;
use crate::models::Credential;
use crate::retry::RetryPolicy;
use crate::settings::ApiSettings;

/// A freshly issued token and its lifetime in seconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: i64,
}

/// Performs one login round-trip
pub trait Authenticator: Send + Sync {
    fn authenticate(&self) -> Result<TokenGrant, AuthError>;
}

/// Username/password login against the PBX
pub struct PbxAuthenticator {
    agent: ureq::Agent,
    base_url: String,
    auth_endpoint: String,
    username: String,
    password: String,
    security_code: String,
}

impl PbxAuthenticator {
    pub fn new(settings: &ApiSettings, agent: ureq::Agent) -> Self {
        Self {
            agent,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            auth_endpoint: settings.auth_endpoint.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            security_code: settings.security_code.clone().unwrap_or_default(),
        }
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url, self.auth_endpoint)
    }

    fn ensure_configured(&self) -> Result<(), AuthError> {
        let missing = [
            ("BaseUrl", &self.base_url),
            ("AuthEndpoint", &self.auth_endpoint),
            ("Username", &self.username),
            ("Password", &self.password),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect::<Vec<_>>();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuthError::NotConfigured(missing.join(", ")))
        }
    }
}

impl Authenticator for PbxAuthenticator {
    fn authenticate(&self) -> Result<TokenGrant, AuthError> {
        self.ensure_configured()?;

        let url = self.url();
        let request = AuthRequest {
            username: &self.username,
            password: &self.password,
            security_code: &self.security_code,
        };

        let mut response = self
            .agent
            .post(&url)
            .send_json(&request)
            .map_err(|source| AuthError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body: AuthResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;

        let token = body.token.ok_or(AuthError::MissingToken)?;
        match token.access_token {
            Some(access_token) if !access_token.is_empty() => Ok(TokenGrant {
                access_token,
                expires_in: token.expires_in,
            }),
            _ => Err(AuthError::MissingToken),
        }
    }
}

/// Single cached credential with single-flight refresh
///
/// The refresh runs while holding the cache lock, so concurrent callers wait
/// for one login instead of each issuing their own.
pub struct TokenCache {
    authenticator: Box<dyn Authenticator>,
    retry: RetryPolicy,
    margin: Duration,
    credential: Mutex<Option<Credential>>,
}

impl TokenCache {
    /// Tokens are refreshed this long before they actually expire
    pub const SAFETY_MARGIN: Duration = Duration::minutes(5);

    pub fn new(authenticator: impl Authenticator + 'static) -> Self {
        Self {
            authenticator: Box::new(authenticator),
            retry: RetryPolicy::default(),
            margin: Self::SAFETY_MARGIN,
            credential: Mutex::new(None),
        }
    }

    /// Override the retry policy used for logins
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Get a valid credential, logging in again if the cached one is stale
    pub fn get_token(&self) -> Result<Credential, AuthError> {
        self.get_token_with(Utc::now)
    }

    /// Same as [`get_token`](Self::get_token) with a fixed clock
    pub fn get_token_at(&self, now: DateTime<Utc>) -> Result<Credential, AuthError> {
        self.get_token_with(|| now)
    }

    fn get_token_with(&self, now: impl Fn() -> DateTime<Utc>) -> Result<Credential, AuthError> {
        // A refresh that panicked left no partial credential behind.
        let mut cached = self.credential.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(credential) = cached.as_ref()
            && credential.is_valid_at(now(), self.margin)
        {
            debug!("Using existing access token");
            return Ok(credential.clone());
        }

        info!("Requesting new access token");
        let grant = self.retry.run(
            || self.authenticator.authenticate(),
            |err, attempt, delay| {
                warn!(
                    "Error during authentication (attempt {}). Retrying in {:?}: {}",
                    attempt, delay, err
                );
            },
        )?;

        let expires_at = Some(grant.expires_in)
            .filter(|seconds| *seconds > 0)
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                AuthError::MalformedResponse(format!("expires_in out of range: {}", grant.expires_in))
            })?;
        let credential = Credential::new(grant.access_token, expires_at);
        info!(
            "Obtained new access token, valid until {}",
            credential.expires_at - self.margin
        );
        *cached = Some(credential.clone());
        Ok(credential)
    }

    /// Drop the cached credential so the next call logs in again
    pub fn invalidate(&self) {
        *self.credential.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
