//! GitHub App API Client
//!
//! The three REST calls needed for an installation token's lifetime:
//! look up the installation for an owner, mint a token, and revoke it again.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::GitHubError;

const API_VERSION: &str = "2022-11-28";
const MEDIA_TYPE: &str = "application/vnd.github+json";
const USER_AGENT: &str = concat!("ghat/", env!("CARGO_PKG_VERSION"));
/// Upper bound for one API call, connect through body
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================
// API Types
// ============================================================

/// Numeric id of a GitHub App installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct InstallationId(pub i64);

impl fmt::Display for InstallationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Deserialize)]
struct Installation {
    id: InstallationId,
}

/// Body of the token mint call; empty fields request the installation defaults
#[derive(Debug, Default, Serialize)]
pub struct AccessTokenRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub permissions: BTreeMap<String, String>,
}

impl From<&Config> for AccessTokenRequest {
    fn from(config: &Config) -> Self {
        Self {
            repositories: config.repositories.clone(),
            permissions: config.permissions.clone(),
        }
    }
}

/// Installation access token
///
/// `Debug` is redacted; use [`AccessToken::secret`] to get at the value.
#[derive(Clone, Deserialize)]
pub struct AccessToken {
    token: String,
    #[serde(default)]
    expires_at: Option<String>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn secret(&self) -> &str {
        &self.token
    }

    /// Expiry reported by GitHub (RFC 3339)
    pub fn expires_at(&self) -> Option<&str> {
        self.expires_at.as_deref()
    }

    fn is_well_formed(&self) -> bool {
        !self.token.is_empty() && !self.token.contains(|c: char| c.is_whitespace() || c.is_control())
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ============================================================
// Client
// ============================================================

/// The GitHub App calls the lifecycle depends on
#[async_trait]
pub trait InstallationApi: Send + Sync {
    /// `GET /users/{owner}/installation`, authenticated as the app
    async fn installation_for_owner(
        &self,
        app_jwt: &str,
        owner: &str,
    ) -> Result<InstallationId, GitHubError>;

    /// `POST /app/installations/{id}/access_tokens`, authenticated as the app
    async fn create_access_token(
        &self,
        app_jwt: &str,
        installation: InstallationId,
        request: &AccessTokenRequest,
    ) -> Result<AccessToken, GitHubError>;

    /// `DELETE /installation/token`, authenticated with the token itself
    async fn revoke_access_token(&self, token: &AccessToken) -> Result<(), GitHubError>;
}

/// reqwest implementation of [`InstallationApi`]
pub struct GitHubClient {
    client: Client,
    base_url: String,
}

impl GitHubClient {
    pub fn new(base_url: &str) -> Result<Self, GitHubError> {
        Self::with_timeout(base_url, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, GitHubError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str, bearer: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, path))
            .bearer_auth(bearer)
            .header(ACCEPT, MEDIA_TYPE)
            .header("X-GitHub-Api-Version", API_VERSION)
    }
}

#[async_trait]
impl InstallationApi for GitHubClient {
    async fn installation_for_owner(
        &self,
        app_jwt: &str,
        owner: &str,
    ) -> Result<InstallationId, GitHubError> {
        debug!(owner = %owner, "Looking up installation");

        let response = self
            .request(Method::GET, &format!("users/{}/installation", owner), app_jwt)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GitHubError::InstallationNotFound {
                owner: owner.to_string(),
                status,
                body,
            });
        }

        let installation: Installation = response
            .json()
            .await
            .map_err(|e| GitHubError::MalformedResponse(format!("installation: {}", e)))?;

        info!(owner = %owner, installation_id = %installation.id, "Found installation");
        Ok(installation.id)
    }

    async fn create_access_token(
        &self,
        app_jwt: &str,
        installation: InstallationId,
        request: &AccessTokenRequest,
    ) -> Result<AccessToken, GitHubError> {
        debug!(
            installation_id = %installation,
            repositories = request.repositories.len(),
            permissions = request.permissions.len(),
            "Requesting installation access token"
        );

        let response = self
            .request(
                Method::POST,
                &format!("app/installations/{}/access_tokens", installation),
                app_jwt,
            )
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(GitHubError::TokenMintFailed { status, body });
        }

        let token: AccessToken = response
            .json()
            .await
            .map_err(|e| GitHubError::MalformedResponse(format!("access token: {}", e)))?;

        if !token.is_well_formed() {
            return Err(GitHubError::MalformedResponse(
                "access token is empty or contains whitespace".to_string(),
            ));
        }

        info!(
            installation_id = %installation,
            expires_at = token.expires_at().unwrap_or("unknown"),
            "Installation access token created"
        );
        Ok(token)
    }

    async fn revoke_access_token(&self, token: &AccessToken) -> Result<(), GitHubError> {
        debug!("Revoking installation access token");

        let response = self
            .request(Method::DELETE, "installation/token", token.secret())
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            return Err(GitHubError::RevokeFailed { status });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_omits_empty_fields() {
        let body = serde_json::to_value(AccessTokenRequest::default()).unwrap();
        assert_eq!(body, serde_json::json!({}));

        let request = AccessTokenRequest {
            repositories: vec!["repo1".to_string()],
            permissions: [("contents".to_string(), "read".to_string())].into(),
        };
        assert_eq!(
            serde_json::to_value(request).unwrap(),
            serde_json::json!({
                "repositories": ["repo1"],
                "permissions": {"contents": "read"}
            })
        );
    }

    #[test]
    fn test_access_token_debug_is_redacted() {
        let token: AccessToken = serde_json::from_str(
            r#"{"token":"ghs_secret","expires_at":"2030-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let debug = format!("{:?}", token);
        assert!(!debug.contains("ghs_secret"));
        assert!(debug.contains("2030-01-01T00:00:00Z"));
        assert_eq!(token.secret(), "ghs_secret");
    }

    #[test]
    fn test_access_token_well_formed() {
        assert!(AccessToken::new("ghs_abc").is_well_formed());
        assert!(!AccessToken::new("").is_well_formed());
        assert!(!AccessToken::new("ghs_abc\n").is_well_formed());
        assert!(!AccessToken::new("ghs abc").is_well_formed());
    }

    #[test]
    fn test_installation_id() {
        let installation: Installation =
            serde_json::from_str(r#"{"id":42,"account":{"login":"octo"}}"#).unwrap();
        assert_eq!(installation.id, InstallationId(42));
        assert_eq!(installation.id.to_string(), "42");
    }
}
