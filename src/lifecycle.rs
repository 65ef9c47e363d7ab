//! Token Lifecycle
//!
//! The two entry points of the action. [`acquire`] runs as the `main` step and
//! [`release`] as the `post` step, in separate processes; the token is handed from
//! one to the other through the step state under the key `token`.
//!
//! Both take the runner and the remote services as arguments so they can be driven
//! entirely in memory; the binaries wire in [`Runner::from_process`] and
//! [`LiveBackends`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use tracing::{info, warn};

use crate::assertion;
use crate::config::{Config, Inputs, KeyCoordinates};
use crate::error::{ConfigError, GitHubError, LifecycleError, SigningError};
use crate::github::{AccessToken, AccessTokenRequest, GitHubClient, InstallationApi};
use crate::signer::{GcpKms, KmsSigner, Signer};
use crate::workflow::Runner;

/// State and output key for the token
pub const TOKEN_KEY: &str = "token";
/// Output key for the token expiry
pub const EXPIRES_AT_KEY: &str = "expires-at";

pub const EXIT_OK: u8 = 0;
pub const EXIT_ERR: u8 = 1;

/// What to do when the `post` step cannot revoke the token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum RevokeFailurePolicy {
    /// Log a warning and let the step succeed; the token expires on its own
    #[default]
    Warn,
    /// Fail the step
    Fail,
}

impl RevokeFailurePolicy {
    /// Parse the raw input; blank means the default, like every other input
    pub fn from_input(raw: Option<&str>) -> Result<Self, ConfigError> {
        match raw.map(str::trim).filter(|v| !v.is_empty()) {
            None => Ok(Self::default()),
            Some(value) => <Self as ValueEnum>::from_str(value, true)
                .map_err(|_| ConfigError::InvalidRevokePolicy(value.to_string())),
        }
    }
}

/// How a release ended when it did not fail
#[derive(Debug)]
pub enum ReleaseOutcome {
    Revoked,
    /// Revocation failed and [`RevokeFailurePolicy::Warn`] let it pass
    RevokeFailed(GitHubError),
}

/// Factories for the remote services, called once Config is known
#[async_trait]
pub trait Backends: Send + Sync {
    async fn signer(&self, key: &KeyCoordinates) -> Result<Box<dyn Signer>, SigningError>;

    fn github(&self, base_url: &str) -> Result<Box<dyn InstallationApi>, GitHubError>;
}

/// Cloud KMS and the GitHub REST API
pub struct LiveBackends;

#[async_trait]
impl Backends for LiveBackends {
    async fn signer(&self, key: &KeyCoordinates) -> Result<Box<dyn Signer>, SigningError> {
        let kms = GcpKms::connect().await?;
        Ok(Box::new(KmsSigner::new(kms, key)))
    }

    fn github(&self, base_url: &str) -> Result<Box<dyn InstallationApi>, GitHubError> {
        Ok(Box::new(GitHubClient::new(base_url)?))
    }
}

/// Mint an installation token and hand it to the rest of the job
pub async fn acquire(
    inputs: &Inputs,
    runner: &Runner,
    backends: &dyn Backends,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    let config = Config::resolve(inputs, runner.env())?;
    let owner = config.owner()?;

    info!(
        app_id = %config.app_id,
        owner = %owner,
        key = %config.key.resource_name(),
        "Generating JWT for GitHub App"
    );
    let signer = backends
        .signer(&config.key)
        .await
        .map_err(LifecycleError::Signer)?;

    // The JWT is the only thing signed, so the session ends here on every path
    let jwt = assertion::build(now, &config.app_id, signer.as_ref()).await;
    let closed = signer.close();
    let jwt = match (jwt, closed) {
        (Ok(jwt), Ok(())) => jwt,
        (Ok(_), Err(e)) => return Err(LifecycleError::CloseSigner(e)),
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                warn!(error = %close_err, "Failed to close signer");
            }
            return Err(e.into());
        }
    };

    let github = backends
        .github(&config.base_url)
        .map_err(LifecycleError::Client)?;

    let token = {
        let _group = runner
            .group("Exchanging JWT for installation access token")
            .map_err(LifecycleError::Console)?;

        let installation = github
            .installation_for_owner(&jwt, owner)
            .await
            .map_err(LifecycleError::Installation)?;

        github
            .create_access_token(&jwt, installation, &AccessTokenRequest::from(&config))
            .await
            .map_err(LifecycleError::Mint)?
    };

    publish(runner, &token)
}

/// Mask, save and output the token; outside of Actions just print it
fn publish(runner: &Runner, token: &AccessToken) -> Result<(), LifecycleError> {
    if !runner.is_actions() {
        runner
            .print(token.secret())
            .map_err(LifecycleError::Console)?;
        info!("Token generated successfully");
        return Ok(());
    }

    runner
        .add_mask(token.secret())
        .map_err(LifecycleError::Console)?;

    let channel = runner.channel();
    channel
        .persist(TOKEN_KEY, token.secret())
        .map_err(LifecycleError::Publish)?;
    channel
        .set_output(TOKEN_KEY, token.secret())
        .map_err(LifecycleError::Publish)?;
    if let Some(expires_at) = token.expires_at() {
        channel
            .set_output(EXPIRES_AT_KEY, expires_at)
            .map_err(LifecycleError::Publish)?;
    }

    info!("Installation access token is available as the `token` output");
    Ok(())
}

/// Revoke the token saved by [`acquire`]
pub async fn release(
    inputs: &Inputs,
    runner: &Runner,
    backends: &dyn Backends,
    policy: RevokeFailurePolicy,
) -> Result<ReleaseOutcome, LifecycleError> {
    let token = runner
        .channel()
        .retrieve(TOKEN_KEY)
        .map_err(LifecycleError::MissingToken)?;
    if runner.is_actions() {
        runner.add_mask(&token).map_err(LifecycleError::Console)?;
    }

    let config = Config::resolve(inputs, runner.env())?;
    let github = backends
        .github(&config.base_url)
        .map_err(LifecycleError::Client)?;

    match github.revoke_access_token(&AccessToken::new(token)).await {
        Ok(()) => {
            runner
                .notice("Successfully deleted installation access token")
                .map_err(LifecycleError::Console)?;
            Ok(ReleaseOutcome::Revoked)
        }
        Err(e) => match policy {
            RevokeFailurePolicy::Warn => {
                warn!(error = %e, "Failed to revoke installation access token");
                Ok(ReleaseOutcome::RevokeFailed(e))
            }
            RevokeFailurePolicy::Fail => Err(LifecycleError::Revoke(e)),
        },
    }
}

/// Process exit status for the result of an entry point
pub fn exit_status<T>(result: &Result<T, LifecycleError>) -> u8 {
    match result {
        Ok(_) => EXIT_OK,
        Err(_) => EXIT_ERR,
    }
}
