//! Error types
//!
//! One enum per component, plus [`LifecycleError`] which records the stage of the
//! acquire/release sequence an error came from. None of these ever carry a token.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Missing or invalid inputs
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required input was absent or empty
    #[error("input required and not supplied: {0}")]
    Missing(&'static str),

    /// A permission entry did not have the `name:level` shape
    #[error("invalid permission entry {0:?}, expected name:level")]
    InvalidPermission(String),

    /// A signing key coordinate cannot be used in a KMS resource name
    #[error("invalid {field}: {value:?}")]
    InvalidKeyCoordinate { field: &'static str, value: String },

    /// The API base URL is not an http(s) URL
    #[error("invalid base URL: {0:?}")]
    InvalidBaseUrl(String),

    #[error("invalid on_revoke_failure {0:?}, expected warn or fail")]
    InvalidRevokePolicy(String),
}

/// Failures talking to the signing oracle
#[derive(Debug, Error)]
pub enum SigningError {
    /// The oracle client could not be created
    #[error("failed to connect to KMS: {0}")]
    Connect(String),

    /// The sign request was rejected or failed in transit
    #[error("KMS asymmetric sign failed: {0}")]
    Oracle(String),

    /// The sign request did not complete in time
    #[error("KMS asymmetric sign timed out after {0:?}")]
    Timeout(Duration),

    /// The oracle answered with something that is not a usable signature
    #[error("malformed KMS response: {0}")]
    MalformedResponse(String),
}

/// Failures building the signed app assertion
#[derive(Debug, Error)]
pub enum AssertionError {
    #[error("failed to serialize assertion: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Signing(#[from] SigningError),
}

/// Failures calling the GitHub App API
#[derive(Debug, Error)]
pub enum GitHubError {
    /// Connection, TLS, timeout or body read failure
    #[error("request to GitHub failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("installation for {owner} not found ({status}): {body}")]
    InstallationNotFound {
        owner: String,
        status: StatusCode,
        body: String,
    },

    #[error("failed to get token ({status}): {body}")]
    TokenMintFailed { status: StatusCode, body: String },

    #[error("failed to delete token ({status})")]
    RevokeFailed { status: StatusCode },

    #[error("unexpected response from GitHub: {0}")]
    MalformedResponse(String),
}

/// Misuse of the state/output files or a missing hand-off
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The runner did not provide the file this channel writes to
    #[error("{0} environment variable is not set")]
    Unavailable(&'static str),

    #[error("key is empty")]
    InvalidKey,

    /// The value cannot be written; the value itself is never included
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: &'static str },

    #[error("state {0} is not found")]
    NotFound(String),

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An error from one stage of the acquire or release sequence
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to load inputs: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to create signer: {0}")]
    Signer(#[source] SigningError),

    #[error("failed to sign jwt: {0}")]
    Assertion(#[from] AssertionError),

    #[error("failed to close signer: {0}")]
    CloseSigner(#[source] SigningError),

    #[error("failed to create GitHub client: {0}")]
    Client(#[source] GitHubError),

    #[error("failed to get installation: {0}")]
    Installation(#[source] GitHubError),

    #[error("failed to get access token: {0}")]
    Mint(#[source] GitHubError),

    #[error("failed to publish access token: {0}")]
    Publish(#[source] ChannelError),

    #[error("token is not found in state: {0}")]
    MissingToken(#[source] ChannelError),

    #[error("failed to revoke access token: {0}")]
    Revoke(#[source] GitHubError),

    #[error("failed to write workflow command: {0}")]
    Console(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_prefix_in_message() {
        let err = LifecycleError::Mint(GitHubError::TokenMintFailed {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            body: "{\"message\":\"Validation Failed\"}".to_string(),
        });

        assert_eq!(
            err.to_string(),
            "failed to get access token: failed to get token (422 Unprocessable Entity): {\"message\":\"Validation Failed\"}"
        );
    }

    #[test]
    fn test_invalid_value_does_not_echo_value() {
        let err = ChannelError::InvalidValue {
            key: "TOKEN".to_string(),
            reason: "value contains a line break",
        };

        assert_eq!(
            err.to_string(),
            "invalid value for TOKEN: value contains a line break"
        );
    }
}
