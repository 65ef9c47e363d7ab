//! GitHub App JWT
//!
//! Builds the short-lived JWT that authenticates as the GitHub App. Header and claims
//! are encoded locally; the signature comes from a [`Signer`], so no key material is
//! needed here.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AssertionError;
use crate::signer::Signer;

/// Seconds `iat` is backdated to tolerate clock skew
pub const CLOCK_SKEW_SECS: i64 = 60;
/// Seconds the JWT stays valid (GitHub allows at most 10 minutes)
pub const LIFETIME_SECS: i64 = 600;

/// JWT header
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssertionHeader {
    pub typ: String,
    pub alg: String,
}

impl Default for AssertionHeader {
    fn default() -> Self {
        Self {
            typ: "token".to_string(),
            alg: "RS256".to_string(),
        }
    }
}

/// JWT claims for GitHub App authentication
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppClaims {
    /// Issued at time (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer (GitHub App ID)
    pub iss: String,
}

impl AppClaims {
    pub fn issued_at(now: DateTime<Utc>, issuer: &str) -> Self {
        let now = now.timestamp();
        Self {
            iat: now - CLOCK_SKEW_SECS,
            exp: now + LIFETIME_SECS,
            iss: issuer.to_string(),
        }
    }
}

/// `base64url(header).base64url(claims)`
pub fn unsigned(now: DateTime<Utc>, issuer: &str) -> Result<String, AssertionError> {
    let header = serde_json::to_vec(&AssertionHeader::default())?;
    let claims = serde_json::to_vec(&AppClaims::issued_at(now, issuer))?;

    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(claims)
    ))
}

/// Build and sign a JWT valid from `now - 60s` to `now + 600s`
pub async fn build(
    now: DateTime<Utc>,
    issuer: &str,
    signer: &dyn Signer,
) -> Result<String, AssertionError> {
    let unsigned = unsigned(now, issuer)?;
    let signature = signer.sign(unsigned.as_bytes()).await?;

    Ok(format!("{}.{}", unsigned, URL_SAFE_NO_PAD.encode(signature)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SigningError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct FixedSigner {
        payloads: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Signer for FixedSigner {
        async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SigningError> {
            self.payloads.lock().unwrap().push(payload.to_vec());
            Ok(vec![0xde, 0xad, 0xbe, 0xef])
        }

        fn close(self: Box<Self>) -> Result<(), SigningError> {
            Ok(())
        }
    }

    struct FailingSigner;

    #[async_trait]
    impl Signer for FailingSigner {
        async fn sign(&self, _payload: &[u8]) -> Result<Vec<u8>, SigningError> {
            Err(SigningError::Oracle("permission denied".to_string()))
        }

        fn close(self: Box<Self>) -> Result<(), SigningError> {
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn decode<T: serde::de::DeserializeOwned>(part: &str) -> T {
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(part).unwrap()).unwrap()
    }

    #[test]
    fn test_unsigned_is_reproducible() {
        let first = unsigned(now(), "12345").unwrap();
        let second = unsigned(now(), "12345").unwrap();
        assert_eq!(first, second);

        let (header, claims) = first.split_once('.').unwrap();
        assert_eq!(
            header,
            URL_SAFE_NO_PAD.encode(r#"{"typ":"token","alg":"RS256"}"#)
        );
        assert_eq!(
            claims,
            URL_SAFE_NO_PAD.encode(r#"{"iat":1699999940,"exp":1700000600,"iss":"12345"}"#)
        );
    }

    #[test]
    fn test_claims_window() {
        let claims: AppClaims = decode(unsigned(now(), "12345").unwrap().split('.').nth(1).unwrap());

        assert_eq!(claims.iat, now().timestamp() - 60);
        assert_eq!(claims.exp, now().timestamp() + 600);
        assert!(claims.exp > claims.iat);
        assert_eq!(claims.iss, "12345");
    }

    #[tokio::test]
    async fn test_build_signs_unsigned_part() {
        let signer = FixedSigner {
            payloads: Mutex::new(Vec::new()),
        };

        let jwt = build(now(), "12345", &signer).await.unwrap();

        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], "3q2-7w");
        assert!(!jwt.contains('='));

        let expected = unsigned(now(), "12345").unwrap();
        assert_eq!(
            signer.payloads.lock().unwrap().as_slice(),
            &[expected.into_bytes()]
        );
    }

    #[tokio::test]
    async fn test_build_header_is_valid_jws() {
        let signer = FixedSigner {
            payloads: Mutex::new(Vec::new()),
        };
        let jwt = build(now(), "12345", &signer).await.unwrap();

        let header = jsonwebtoken::decode_header(&jwt).unwrap();
        assert_eq!(header.alg, jsonwebtoken::Algorithm::RS256);
        assert_eq!(header.typ.as_deref(), Some("token"));
    }

    #[tokio::test]
    async fn test_build_propagates_signing_error() {
        let err = build(now(), "12345", &FailingSigner).await.unwrap_err();

        assert!(matches!(
            err,
            AssertionError::Signing(SigningError::Oracle(_))
        ));
    }
}
