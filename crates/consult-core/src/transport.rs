//! Media transport credentials
//!
//! The media relay itself is external. This module defines the seam the
//! admission gate calls to obtain a short-lived channel credential, plus a
//! self-contained HMAC-SHA256 issuer for deployments where the relay
//! verifies tokens with a shared secret.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use crate::types::ParticipantRole;
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// What the transport needs to mint a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRequest {
    pub channel_name: String,
    pub uid: u32,
    pub role: ParticipantRole,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCredential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Worth retrying
    #[error("transport temporarily unavailable: {0}")]
    Transient(String),

    #[error("transport rejected request: {0}")]
    Rejected(String),

    #[error("invalid media token: {0}")]
    InvalidToken(String),
}

#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn issue_credential(
        &self,
        request: &CredentialRequest,
    ) -> std::result::Result<MediaCredential, TransportError>;
}

/// Stable non-zero 32-bit transport uid for a user id
pub fn uid_for(user_id: &str) -> u32 {
    let digest = Sha256::digest(user_id.as_bytes());
    let uid = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    if uid == 0 {
        1
    } else {
        uid
    }
}

/// Ask the transport for a credential, bounding each attempt by `timeout`.
///
/// Transient failures and timeouts are retried `retries` more times;
/// rejections are not. Exhaustion maps to `ServiceUnavailable`.
pub async fn issue_with_retry(
    transport: &Arc<dyn MediaTransport>,
    request: &CredentialRequest,
    timeout: StdDuration,
    retries: u32,
) -> Result<MediaCredential> {
    let attempts = retries + 1;
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match tokio::time::timeout(timeout, transport.issue_credential(request)).await {
            Ok(Ok(credential)) => return Ok(credential),
            Ok(Err(TransportError::Transient(reason))) => {
                warn!(
                    "⚠️ Credential request for {} failed (attempt {}/{}): {}",
                    request.channel_name, attempt, attempts, reason
                );
                last_error = reason;
            }
            Ok(Err(e)) => {
                warn!("❌ Credential request for {} rejected: {}", request.channel_name, e);
                return Err(Error::ServiceUnavailable(e.to_string()));
            }
            Err(_) => {
                warn!(
                    "⚠️ Credential request for {} timed out after {:?} (attempt {}/{})",
                    request.channel_name, timeout, attempt, attempts
                );
                last_error = format!("timed out after {:?}", timeout);
            }
        }
    }

    Err(Error::ServiceUnavailable(format!(
        "media transport unavailable: {}",
        last_error
    )))
}

/// Claims embedded in an HMAC media token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    pub channel: String,
    pub uid: u32,
    pub role: ParticipantRole,
    pub exp: i64,
}

/// Issues `<payload>.<signature>` tokens, both parts base64url
pub struct HmacTokenIssuer {
    secret: Vec<u8>,
    app_id: Option<String>,
}

impl HmacTokenIssuer {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref().to_vec();
        if secret.is_empty() {
            return Err(Error::config("media secret must not be empty"));
        }
        Ok(Self {
            secret,
            app_id: None,
        })
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    fn mac(&self) -> std::result::Result<HmacSha256, TransportError> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| TransportError::Rejected(format!("bad key: {}", e)))
    }

    pub fn sign(&self, claims: &MediaClaims) -> std::result::Result<String, TransportError> {
        let payload = serde_json::to_vec(claims)
            .map_err(|e| TransportError::Rejected(format!("encode claims: {}", e)))?;
        let payload = URL_SAFE_NO_PAD.encode(payload);

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", payload, signature))
    }

    /// Check signature and expiry, returning the embedded claims
    pub fn verify(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<MediaClaims, TransportError> {
        let (payload, signature) = token
            .split_once('.')
            .ok_or_else(|| TransportError::InvalidToken("malformed".to_string()))?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TransportError::InvalidToken("bad signature encoding".to_string()))?;
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TransportError::InvalidToken("signature mismatch".to_string()))?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TransportError::InvalidToken("bad payload encoding".to_string()))?;
        let claims: MediaClaims = serde_json::from_slice(&payload)
            .map_err(|e| TransportError::InvalidToken(e.to_string()))?;

        if claims.exp <= now.timestamp() {
            return Err(TransportError::InvalidToken("expired".to_string()));
        }
        Ok(claims)
    }
}

#[async_trait]
impl MediaTransport for HmacTokenIssuer {
    async fn issue_credential(
        &self,
        request: &CredentialRequest,
    ) -> std::result::Result<MediaCredential, TransportError> {
        let claims = MediaClaims {
            app: self.app_id.clone(),
            channel: request.channel_name.clone(),
            uid: request.uid,
            role: request.role,
            exp: request.expires_at.timestamp(),
        };
        Ok(MediaCredential {
            token: self.sign(&claims)?,
            expires_at: request.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request() -> CredentialRequest {
        CredentialRequest {
            channel_name: "consult-b1".to_string(),
            uid: uid_for("alice"),
            role: ParticipantRole::Client,
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    #[test]
    fn test_uid_is_stable_and_distinct() {
        assert_eq!(uid_for("alice"), uid_for("alice"));
        assert_ne!(uid_for("alice"), uid_for("bob"));
        assert_ne!(uid_for(""), 0);
    }

    #[tokio::test]
    async fn test_app_id_is_embedded() {
        let issuer = HmacTokenIssuer::new("secret").unwrap().with_app_id("consult-prod");
        let credential = issuer.issue_credential(&request()).await.unwrap();
        let claims = issuer.verify(&credential.token, Utc::now()).unwrap();
        assert_eq!(claims.app.as_deref(), Some("consult-prod"));
    }

    #[tokio::test]
    async fn test_hmac_token_verifies() {
        let issuer = HmacTokenIssuer::new("secret").unwrap();
        let credential = issuer.issue_credential(&request()).await.unwrap();

        let claims = issuer.verify(&credential.token, Utc::now()).unwrap();
        assert_eq!(claims.channel, "consult-b1");
        assert_eq!(claims.role, ParticipantRole::Client);

        let other = HmacTokenIssuer::new("other").unwrap();
        assert!(other.verify(&credential.token, Utc::now()).is_err());
        assert!(issuer
            .verify(&credential.token, Utc::now() + Duration::hours(2))
            .is_err());
    }

    struct Flaky {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MediaTransport for Flaky {
        async fn issue_credential(
            &self,
            request: &CredentialRequest,
        ) -> std::result::Result<MediaCredential, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(TransportError::Transient("blip".to_string()));
            }
            Ok(MediaCredential {
                token: "ok".to_string(),
                expires_at: request.expires_at,
            })
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_one_failure() {
        let flaky = Arc::new(Flaky {
            failures: AtomicU32::new(1),
            calls: AtomicU32::new(0),
        });
        let transport: Arc<dyn MediaTransport> = flaky.clone();
        let credential = issue_with_retry(&transport, &request(), StdDuration::from_secs(1), 1)
            .await
            .unwrap();
        assert_eq!(credential.token, "ok");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_service_unavailable() {
        let transport: Arc<dyn MediaTransport> = Arc::new(Flaky {
            failures: AtomicU32::new(5),
            calls: AtomicU32::new(0),
        });
        let result = issue_with_retry(&transport, &request(), StdDuration::from_secs(1), 1).await;
        assert!(matches!(result, Err(Error::ServiceUnavailable(_))));
    }

    struct Hanging;

    #[async_trait]
    impl MediaTransport for Hanging {
        async fn issue_credential(
            &self,
            _request: &CredentialRequest,
        ) -> std::result::Result<MediaCredential, TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_service_unavailable() {
        let transport: Arc<dyn MediaTransport> = Arc::new(Hanging);
        let result =
            issue_with_retry(&transport, &request(), StdDuration::from_secs(10), 1).await;
        assert!(matches!(result, Err(Error::ServiceUnavailable(_))));
    }
}
