//! Identity resolution
//!
//! The engine never authenticates anyone itself. An [`IdentityProvider`]
//! turns an opaque bearer credential into a stable user id; everything else
//! (roles on a booking, access checks) is derived from that id.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Role granting access to operational endpoints such as a manual sweep
pub const ADMIN_ROLE: &str = "admin";

/// An authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer credential, failing with `Unauthenticated`
    async fn resolve(&self, credential: &str) -> Result<Identity>;
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    /// HS256 shared secret
    pub secret: String,
    pub token_ttl_secs: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: "consult".to_string(),
            audience: "consult-api".to_string(),
            secret: "change-me-jwt-secret-0123456789".to_string(),
            token_ttl_secs: 3600,
        }
    }
}

/// Claims carried by identity tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// HS256 JWT identity provider
pub struct JwtIdentityProvider {
    config: JwtConfig,
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    header: Header,
}

impl JwtIdentityProvider {
    pub fn new(config: JwtConfig) -> Result<Self> {
        if config.secret.is_empty() {
            return Err(Error::config("JWT secret must not be empty"));
        }
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        Ok(Self {
            config,
            encoding_key: Arc::new(encoding_key),
            decoding_key: Arc::new(decoding_key),
            header: Header::new(Algorithm::HS256),
        })
    }

    /// Issue a token for `identity`; used by tests and local tooling
    pub fn issue_token(&self, identity: &Identity) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = IdentityClaims {
            iss: self.config.issuer.clone(),
            sub: identity.user_id.clone(),
            aud: self.config.audience.clone(),
            exp: now + self.config.token_ttl_secs,
            iat: now,
            jti: Uuid::new_v4().to_string(),
            roles: identity.roles.clone(),
        };

        encode(&self.header, &claims, &self.encoding_key)
            .map_err(|e| Error::internal(format!("failed to sign token: {}", e)))
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.header.alg);
        validation.set_issuer(&[self.config.issuer.clone()]);
        validation.set_audience(&[self.config.audience.clone()]);
        validation.validate_exp = true;
        validation
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn resolve(&self, credential: &str) -> Result<Identity> {
        let token_data = decode::<IdentityClaims>(credential, &self.decoding_key, &self.validation())
            .map_err(|e| Error::Unauthenticated(e.to_string()))?;

        let claims = token_data.claims;
        if claims.sub.is_empty() {
            return Err(Error::Unauthenticated("token has no subject".to_string()));
        }

        Ok(Identity {
            user_id: claims.sub,
            roles: claims.roles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issue_and_resolve() {
        let provider = JwtIdentityProvider::new(JwtConfig::default()).unwrap();
        let identity = Identity::new("alice").with_role(ADMIN_ROLE);
        let token = provider.issue_token(&identity).unwrap();

        let resolved = provider.resolve(&token).await.unwrap();
        assert_eq!(resolved, identity);
        assert!(resolved.is_admin());
    }

    #[tokio::test]
    async fn test_rejects_foreign_signature() {
        let ours = JwtIdentityProvider::new(JwtConfig::default()).unwrap();
        let theirs = JwtIdentityProvider::new(JwtConfig {
            secret: "another-secret-entirely-0000".to_string(),
            ..Default::default()
        })
        .unwrap();

        let token = theirs.issue_token(&Identity::new("mallory")).unwrap();
        assert!(matches!(
            ours.resolve(&token).await,
            Err(Error::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_garbage() {
        let provider = JwtIdentityProvider::new(JwtConfig::default()).unwrap();
        assert!(matches!(
            provider.resolve("not-a-jwt").await,
            Err(Error::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_expired() {
        let provider = JwtIdentityProvider::new(JwtConfig {
            token_ttl_secs: -600,
            ..Default::default()
        })
        .unwrap();
        let token = provider.issue_token(&Identity::new("bob")).unwrap();
        assert!(provider.resolve(&token).await.is_err());
    }
}
