//! GitHub App Installation Tokens for CI
//!
//! Issues a short-lived installation access token inside a workflow run and revokes it
//! when the run finishes. The GitHub App JWT is signed by Cloud KMS, so the private key
//! never leaves the HSM.
//!
//! ## Binaries
//!
//! - `get-token`: sign a JWT, exchange it for an installation token and hand the token
//!   to later steps (state, output, mask)
//! - `revoke-token`: read the token back from the step state and revoke it
//!
//! The two binaries run as separate processes (the action's `main` and `post` steps).
//! The only thing they share is the runner's state file, which `get-token` appends to
//! and the runner replays into `revoke-token`'s environment as `STATE_*` variables.
//!
//! ## Example Pipeline
//!
//! ```bash
//! # Outside of Actions the token is printed to stdout
//! TOKEN=$(get-token \
//!   --app-id 123456 \
//!   --owner lornu-ai \
//!   --repositories lornu.ai \
//!   --permission contents:read \
//!   --kms-project-id gcp-lornu-ai \
//!   --kms-location global \
//!   --kms-keyring-id github-apps \
//!   --kms-key-id ci-bot)
//!
//! STATE_TOKEN=$TOKEN revoke-token \
//!   --app-id 123456 \
//!   --kms-project-id gcp-lornu-ai \
//!   --kms-location global \
//!   --kms-keyring-id github-apps \
//!   --kms-key-id ci-bot
//! ```

pub mod assertion;
pub mod channel;
pub mod config;
pub mod error;
pub mod github;
pub mod lifecycle;
pub mod signer;
pub mod workflow;

pub use config::{Config, Inputs, KeyCoordinates};
pub use error::{
    AssertionError, ChannelError, ConfigError, GitHubError, LifecycleError, SigningError,
};
pub use github::{AccessToken, GitHubClient, InstallationApi, InstallationId};
pub use lifecycle::{Backends, LiveBackends, ReleaseOutcome, RevokeFailurePolicy};
pub use signer::{KmsSigner, Signer};
pub use workflow::{Env, Runner};
