//! GitHub App Installation Token Revoker
//!
//! Runs as the action's `post` step: reads the token that `get-token` saved to the
//! step state (`STATE_TOKEN`) and revokes it.
//!
//! ## Usage
//! ```bash
//! # Post step (inputs are the same as for get-token)
//! revoke-token
//!
//! # Fail the step when GitHub refuses the revocation
//! INPUT_ON_REVOKE_FAILURE=fail revoke-token
//!
//! # By hand
//! STATE_TOKEN=ghs_xxx revoke-token --app-id 123456 --owner lornu-ai ...
//! ```

use std::process::ExitCode;

use clap::Parser;
use ghat::config::Inputs;
use ghat::error::LifecycleError;
use ghat::lifecycle::{self, LiveBackends, RevokeFailurePolicy};
use ghat::workflow::{self, Runner};
use tracing::error;

/// GitHub App Installation Token Revoker
#[derive(Parser, Debug)]
#[command(name = "revoke-token")]
#[command(about = "Revoke the installation access token saved by get-token")]
#[command(version)]
struct Args {
    #[command(flatten)]
    inputs: Inputs,

    /// What to do when the revoke call fails: warn (default) or fail
    #[arg(long, env = "INPUT_ON_REVOKE_FAILURE")]
    on_revoke_failure: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let runner = Runner::from_process();

    if let Err(e) = workflow::init_logging(runner.env()) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    let result = match RevokeFailurePolicy::from_input(args.on_revoke_failure.as_deref()) {
        Ok(policy) => lifecycle::release(&args.inputs, &runner, &LiveBackends, policy).await,
        Err(e) => Err(LifecycleError::from(e)),
    };
    if let Err(e) = &result {
        error!("{}", e);
    }

    ExitCode::from(lifecycle::exit_status(&result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(args: &Args) -> RevokeFailurePolicy {
        RevokeFailurePolicy::from_input(args.on_revoke_failure.as_deref()).unwrap()
    }

    #[test]
    fn test_on_revoke_failure() {
        // The runner exports inputs the workflow leaves unset as empty strings
        std::env::set_var("INPUT_ON_REVOKE_FAILURE", "");
        let from_empty_env = Args::try_parse_from(["revoke-token"]);
        std::env::remove_var("INPUT_ON_REVOKE_FAILURE");

        assert_eq!(policy(&from_empty_env.unwrap()), RevokeFailurePolicy::Warn);

        let args = Args::try_parse_from(["revoke-token", "--on-revoke-failure", "fail"]).unwrap();
        assert_eq!(policy(&args), RevokeFailurePolicy::Fail);
    }
}
