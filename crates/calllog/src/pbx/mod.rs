//! PBX reporting API integration
//!
//! This module provides:
//! - Token-caching authentication
//! - Call log page requests over HTTP
//! - A page walker that collects every record of a time window

mod auth;
mod client;
mod query;
mod walker;

pub use auth::{Authenticator, PbxAuthenticator, TokenCache, TokenGrant};
pub use client::{PbxClient, http_agent};
pub use query::{CallFilters, ORDER_BY, page_url};
pub use walker::{Endpoint, PageRequest, PageSource, PageWalker, Walk};

/// PBX API wire types
pub mod api {
    use serde::{Deserialize, Serialize};

    use crate::models::Record;

    /// Login request body
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct AuthRequest<'a> {
        pub username: &'a str,
        pub password: &'a str,
        pub security_code: &'a str,
    }

    /// Login response
    #[derive(Debug, Deserialize)]
    pub struct AuthResponse {
        #[serde(rename = "Status")]
        pub status: Option<String>,
        #[serde(rename = "Token")]
        pub token: Option<TokenInfo>,
    }

    /// Token section of the login response
    #[derive(Debug, Deserialize)]
    pub struct TokenInfo {
        pub token_type: Option<String>,
        #[serde(default)]
        pub expires_in: i64,
        pub access_token: Option<String>,
        pub refresh_token: Option<String>,
    }

    /// One page of the call log collection
    #[derive(Debug, Deserialize)]
    pub struct CallLogPage {
        #[serde(rename = "@odata.context")]
        pub odata_context: Option<String>,
        /// Absent when the window has no calls
        pub value: Option<Vec<Record>>,
    }
}

#[cfg(test)]
mod tests {
    use super::api::*;

    #[test]
    fn test_auth_request_wire_names() {
        let request = AuthRequest {
            username: "reporter",
            password: "secret",
            security_code: "",
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["Username"], "reporter");
        assert_eq!(value["Password"], "secret");
        assert_eq!(value["SecurityCode"], "");
    }

    #[test]
    fn test_parse_auth_response() {
        let json = r#"{
            "Status": "AuthSuccess",
            "Token": {
                "token_type": "Bearer",
                "expires_in": 60,
                "access_token": "eyJhbGciOi",
                "refresh_token": "RdCs"
            },
            "TwoFactorAuth": null
        }"#;

        let response: AuthResponse = serde_json::from_str(json).unwrap();
        let token = response.token.unwrap();
        assert_eq!(token.access_token.as_deref(), Some("eyJhbGciOi"));
        assert_eq!(token.expires_in, 60);
    }

    #[test]
    fn test_parse_empty_page() {
        let page: CallLogPage =
            serde_json::from_str(r#"{"@odata.context": "$metadata#Collection"}"#).unwrap();
        assert!(page.value.is_none());
    }
}
