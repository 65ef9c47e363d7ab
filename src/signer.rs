//! Cloud KMS Signer
//!
//! Signs the GitHub App JWT with an asymmetric key held in Google Cloud KMS.
//! Only the SHA-256 digest of the payload is sent; the private key never leaves KMS.
//! Authentication uses Application Default Credentials (ADC):
//! - Local: `gcloud auth application-default login`
//! - Actions: `google-github-actions/auth` (Workload Identity Federation)

use std::time::Duration;

use async_trait::async_trait;
use gcloud_sdk::google::cloud::kms::v1::key_management_service_client::KeyManagementServiceClient;
use gcloud_sdk::google::cloud::kms::v1::{digest, AsymmetricSignRequest, Digest as KmsDigest};
use gcloud_sdk::{GoogleApi, GoogleAuthMiddleware};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::KeyCoordinates;
use crate::error::SigningError;

const KMS_ENDPOINT: &str = "https://cloudkms.googleapis.com";
/// Upper bound for one sign call
pub const SIGN_TIMEOUT: Duration = Duration::from_secs(10);

/// Detached-signature capability used to sign the app JWT
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `payload`, returning the raw signature bytes
    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SigningError>;

    /// Release the session; the signer cannot be used afterwards
    fn close(self: Box<Self>) -> Result<(), SigningError>;
}

/// Result of one `AsymmetricSign` call
#[derive(Debug, Clone)]
pub struct SignResponse {
    pub signature: Vec<u8>,
    /// Key version that produced the signature
    pub name: String,
}

/// Transport to the KMS `AsymmetricSign` RPC
#[async_trait]
pub trait KmsBackend: Send + Sync {
    async fn asymmetric_sign(
        &self,
        key_name: &str,
        sha256_digest: &[u8],
    ) -> Result<SignResponse, SigningError>;

    fn close(self) -> Result<(), SigningError>
    where
        Self: Sized;
}

/// [`Signer`] backed by one KMS key version
pub struct KmsSigner<B> {
    backend: B,
    key_name: String,
}

impl<B: KmsBackend> KmsSigner<B> {
    pub fn new(backend: B, key: &KeyCoordinates) -> Self {
        Self {
            backend,
            key_name: key.resource_name(),
        }
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }
}

#[async_trait]
impl<B: KmsBackend + 'static> Signer for KmsSigner<B> {
    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SigningError> {
        let digest = Sha256::digest(payload);

        debug!(key = %self.key_name, "Requesting signature from KMS");
        let response = self
            .backend
            .asymmetric_sign(&self.key_name, digest.as_slice())
            .await?;

        if !response.name.is_empty() && response.name != self.key_name {
            return Err(SigningError::MalformedResponse(format!(
                "signed by {} instead of {}",
                response.name, self.key_name
            )));
        }
        if response.signature.is_empty() {
            return Err(SigningError::MalformedResponse(
                "empty signature".to_string(),
            ));
        }

        Ok(response.signature)
    }

    fn close(self: Box<Self>) -> Result<(), SigningError> {
        let this = *self;
        debug!(key = %this.key_name, "Closing KMS session");
        this.backend.close()
    }
}

/// Cloud KMS over gRPC
pub struct GcpKms {
    client: GoogleApi<KeyManagementServiceClient<GoogleAuthMiddleware>>,
}

impl GcpKms {
    /// Create a KMS client using Application Default Credentials (ADC)
    pub async fn connect() -> Result<Self, SigningError> {
        debug!("Initializing KMS client");

        let client =
            GoogleApi::from_function(KeyManagementServiceClient::new, KMS_ENDPOINT, None)
                .await
                .map_err(|e| SigningError::Connect(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl KmsBackend for GcpKms {
    async fn asymmetric_sign(
        &self,
        key_name: &str,
        sha256_digest: &[u8],
    ) -> Result<SignResponse, SigningError> {
        let request = AsymmetricSignRequest {
            name: key_name.to_string(),
            digest: Some(KmsDigest {
                digest: Some(digest::Digest::Sha256(sha256_digest.to_vec().into())),
            }),
            ..Default::default()
        };

        let mut client = self.client.get();
        let response = tokio::time::timeout(SIGN_TIMEOUT, client.asymmetric_sign(request))
            .await
            .map_err(|_| SigningError::Timeout(SIGN_TIMEOUT))?
            .map_err(|status| SigningError::Oracle(status.to_string()))?
            .into_inner();

        Ok(SignResponse {
            signature: response.signature.to_vec(),
            name: response.name,
        })
    }

    fn close(self) -> Result<(), SigningError> {
        // Dropping the client shuts down its channel and token refresh
        drop(self.client);
        Ok(())
    }
}
