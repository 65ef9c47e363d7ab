//! Action Inputs
//!
//! The runner passes action inputs as `INPUT_*` environment variables. Every input is
//! also a command line flag so the binaries can be run by hand. [`Config::resolve`]
//! applies defaults and fallbacks and validates the result once per invocation.

use std::collections::BTreeMap;

use clap::Args;

use crate::error::ConfigError;
use crate::workflow::Env;

pub const DEFAULT_BASE_URL: &str = "https://api.github.com";
pub const DEFAULT_KEY_VERSION: &str = "1";
/// Per-permission inputs, e.g. `INPUT_PERMISSION_CONTENTS=write`
pub const PERMISSION_ENV_PREFIX: &str = "INPUT_PERMISSION_";
/// Fallback for the owner input, set by the runner
pub const REPOSITORY_OWNER_VAR: &str = "GITHUB_REPOSITORY_OWNER";

/// Raw inputs as supplied by flags or the environment
#[derive(Args, Debug, Clone, Default)]
pub struct Inputs {
    /// GitHub App ID
    #[arg(long, env = "INPUT_APP_ID")]
    pub app_id: Option<String>,

    /// Account the app is installed on (defaults to the repository owner)
    #[arg(long, env = "INPUT_OWNER")]
    pub owner: Option<String>,

    /// Repositories the token is scoped to (comma or newline separated)
    #[arg(long, env = "INPUT_REPOSITORIES")]
    pub repositories: Option<String>,

    /// Permissions as name:level pairs (comma or newline separated)
    #[arg(long = "permission", env = "INPUT_PERMISSION")]
    pub permissions: Option<String>,

    /// GitHub API base URL
    #[arg(long, env = "INPUT_BASE_URL")]
    pub base_url: Option<String>,

    /// GCP project holding the signing key
    #[arg(long, env = "INPUT_KMS_PROJECT_ID")]
    pub kms_project_id: Option<String>,

    /// KMS location (e.g. global, us-central1)
    #[arg(long, env = "INPUT_KMS_LOCATION")]
    pub kms_location: Option<String>,

    /// KMS key ring
    #[arg(long, env = "INPUT_KMS_KEYRING_ID")]
    pub kms_keyring_id: Option<String>,

    /// KMS key
    #[arg(long, env = "INPUT_KMS_KEY_ID")]
    pub kms_key_id: Option<String>,

    /// KMS key version
    #[arg(long, env = "INPUT_KMS_KEY_VERSION")]
    pub kms_key_version: Option<String>,
}

/// One asymmetric key version in Cloud KMS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCoordinates {
    pub project_id: String,
    pub location: String,
    pub key_ring_id: String,
    pub key_id: String,
    pub version: String,
}

impl KeyCoordinates {
    /// Full KMS resource name of the key version
    pub fn resource_name(&self) -> String {
        format!(
            "projects/{}/locations/{}/keyRings/{}/cryptoKeys/{}/cryptoKeyVersions/{}",
            self.project_id, self.location, self.key_ring_id, self.key_id, self.version
        )
    }

    /// Reject coordinates that would not form a single resource name
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("kms_project_id", &self.project_id),
            ("kms_location", &self.location),
            ("kms_keyring_id", &self.key_ring_id),
            ("kms_key_id", &self.key_id),
            ("kms_key_version", &self.version),
        ];

        for (field, value) in fields {
            if value.is_empty() || value.contains(|c: char| c == '/' || c.is_whitespace()) {
                return Err(ConfigError::InvalidKeyCoordinate {
                    field,
                    value: value.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Resolved, validated configuration for one invocation
#[derive(Debug, Clone)]
pub struct Config {
    pub app_id: String,
    /// Only minting needs an owner; see [`Config::owner`]
    pub owner: Option<String>,
    pub repositories: Vec<String>,
    /// Permission name (lowercase) to access level
    pub permissions: BTreeMap<String, String>,
    pub base_url: String,
    pub key: KeyCoordinates,
}

impl Config {
    /// Apply defaults and fallbacks from `env`, then validate
    pub fn resolve(inputs: &Inputs, env: &Env) -> Result<Self, ConfigError> {
        let app_id = required(&inputs.app_id, "app_id")?;

        let owner = present(&inputs.owner)
            .or_else(|| env.get(REPOSITORY_OWNER_VAR))
            .map(str::to_string);

        let repositories = present(&inputs.repositories)
            .map(parse_repositories)
            .unwrap_or_default();

        let mut permissions = match present(&inputs.permissions) {
            Some(raw) => parse_permissions(raw)?,
            None => BTreeMap::new(),
        };
        for (name, level) in env.with_prefix(PERMISSION_ENV_PREFIX) {
            permissions.insert(name.to_lowercase(), level.trim().to_string());
        }

        let base_url = present(&inputs.base_url)
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(ConfigError::InvalidBaseUrl(base_url));
        }

        let key = KeyCoordinates {
            project_id: required(&inputs.kms_project_id, "kms_project_id")?,
            location: required(&inputs.kms_location, "kms_location")?,
            key_ring_id: required(&inputs.kms_keyring_id, "kms_keyring_id")?,
            key_id: required(&inputs.kms_key_id, "kms_key_id")?,
            version: present(&inputs.kms_key_version)
                .unwrap_or(DEFAULT_KEY_VERSION)
                .to_string(),
        };
        key.validate()?;

        Ok(Self {
            app_id,
            owner,
            repositories,
            permissions,
            base_url,
            key,
        })
    }

    /// Account the app is installed on, required to mint a token
    pub fn owner(&self) -> Result<&str, ConfigError> {
        self.owner.as_deref().ok_or(ConfigError::Missing("owner"))
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required(value: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
    present(value)
        .map(str::to_string)
        .ok_or(ConfigError::Missing(name))
}

/// Split a comma or newline separated list, dropping blank entries
pub fn parse_repositories(raw: &str) -> Vec<String> {
    raw.split([',', '\n'])
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `name:level` pairs; names are lowercased
pub fn parse_permissions(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut permissions = BTreeMap::new();

    for entry in raw.split([',', '\n']).map(str::trim).filter(|e| !e.is_empty()) {
        let (name, level) = entry
            .split_once(':')
            .map(|(n, l)| (n.trim(), l.trim()))
            .filter(|(n, l)| !n.is_empty() && !l.is_empty())
            .ok_or_else(|| ConfigError::InvalidPermission(entry.to_string()))?;

        permissions.insert(name.to_lowercase(), level.to_string());
    }

    Ok(permissions)
}
