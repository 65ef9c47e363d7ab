//! GitHub App Installation Token Generator
//!
//! Signs a GitHub App JWT with a Cloud KMS key, exchanges it for an installation
//! access token and hands the token to the rest of the job.
//!
//! Under GitHub Actions the token is masked, saved to the step state for
//! `revoke-token`, and published as the `token` output. Anywhere else it is printed
//! to stdout.
//!
//! ## Usage
//! ```bash
//! # With command line arguments
//! get-token \
//!   --app-id 123456 \
//!   --owner lornu-ai \
//!   --permission contents:read,pull_requests:write \
//!   --kms-project-id gcp-lornu-ai \
//!   --kms-location global \
//!   --kms-keyring-id github-apps \
//!   --kms-key-id ci-bot
//!
//! # With action inputs
//! INPUT_APP_ID=123456 \
//! INPUT_OWNER=lornu-ai \
//! INPUT_KMS_PROJECT_ID=gcp-lornu-ai \
//! INPUT_KMS_LOCATION=global \
//! INPUT_KMS_KEYRING_ID=github-apps \
//! INPUT_KMS_KEY_ID=ci-bot \
//! get-token
//! ```

use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use ghat::config::Inputs;
use ghat::lifecycle::{self, LiveBackends};
use ghat::workflow::{self, Runner};
use tracing::error;

/// GitHub App Installation Token Generator
#[derive(Parser, Debug)]
#[command(name = "get-token")]
#[command(about = "Generate a GitHub App installation access token signed with Cloud KMS")]
#[command(version)]
struct Args {
    #[command(flatten)]
    inputs: Inputs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let runner = Runner::from_process();

    if let Err(e) = workflow::init_logging(runner.env()) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    let result = lifecycle::acquire(&args.inputs, &runner, &LiveBackends, Utc::now()).await;
    if let Err(e) = &result {
        error!("{}", e);
    }

    ExitCode::from(lifecycle::exit_status(&result))
}
