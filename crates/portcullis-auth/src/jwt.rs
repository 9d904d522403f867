//! JWT access tokens
//!
//! [`JwtAccessTokenIssuer`] is the default [`AccessTokenIssuer`]. It looks up
//! the session by the digest of the presented refresh token, checks that the
//! session is still live, and signs [`AccessTokenClaims`] for its user.
//! HS256, HS384, HS512, RS256 and ES256 are supported.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use portcullis_providers::ConfigError;
use portcullis_store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::claims::AccessTokenClaims;
use crate::config::AuthConfig;
use crate::error::{ApiError, ApiResult};
use crate::session::AccessTokenIssuer;
use crate::tokens::{parse_token_digest, SecretTokenKind};

/// Configuration for signing and validating access tokens.
#[derive(Clone)]
pub struct JwtConfig {
    /// Secret key for HMAC algorithms
    pub secret: Option<String>,

    /// Private key (PEM) for RSA/EC algorithms
    pub private_key: Option<String>,

    /// Public key (PEM) for RSA/EC algorithms
    pub public_key: Option<String>,

    /// Algorithm to use
    pub algorithm: JwtAlgorithm,

    /// Token issuer
    pub issuer: String,

    /// Token audience; empty means no `aud` claim
    pub audience: Vec<String>,

    /// Access token duration
    pub access_token_duration: Duration,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_duration", &self.access_token_duration)
            .finish()
    }
}

impl JwtConfig {
    /// HS256 configuration from the core configuration.
    pub fn from_auth_config(config: &AuthConfig) -> Self {
        Self {
            secret: Some(config.access_token_secret.clone()),
            private_key: None,
            public_key: None,
            algorithm: JwtAlgorithm::HS256,
            issuer: config.access_token_issuer.clone(),
            audience: Vec::new(),
            access_token_duration: config.access_token_ttl(),
        }
    }
}

/// Supported JWT algorithms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JwtAlgorithm {
    /// HMAC using SHA-256
    HS256,
    /// HMAC using SHA-384
    HS384,
    /// HMAC using SHA-512
    HS512,
    /// RSASSA-PKCS1-v1_5 using SHA-256
    RS256,
    /// ECDSA using P-256 and SHA-256
    ES256,
}

impl From<JwtAlgorithm> for Algorithm {
    fn from(alg: JwtAlgorithm) -> Self {
        match alg {
            JwtAlgorithm::HS256 => Algorithm::HS256,
            JwtAlgorithm::HS384 => Algorithm::HS384,
            JwtAlgorithm::HS512 => Algorithm::HS512,
            JwtAlgorithm::RS256 => Algorithm::RS256,
            JwtAlgorithm::ES256 => Algorithm::ES256,
        }
    }
}

fn invalid_key(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

/// Signs access tokens for live sessions.
pub struct JwtAccessTokenIssuer {
    store: Arc<dyn Store>,
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for JwtAccessTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAccessTokenIssuer")
            .field("config", &self.config)
            .field("encoding_key", &"[REDACTED]")
            .field("decoding_key", &"[REDACTED]")
            .finish()
    }
}

impl JwtAccessTokenIssuer {
    /// Create an issuer reading sessions from `store`.
    pub fn new(store: Arc<dyn Store>, config: JwtConfig) -> Result<Self, ConfigError> {
        let encoding_key = Self::create_encoding_key(&config)?;
        let decoding_key = Self::create_decoding_key(&config)?;

        Ok(Self {
            store,
            config,
            encoding_key,
            decoding_key,
        })
    }

    fn create_encoding_key(config: &JwtConfig) -> Result<EncodingKey, ConfigError> {
        match config.algorithm {
            JwtAlgorithm::HS256 | JwtAlgorithm::HS384 | JwtAlgorithm::HS512 => {
                let secret = config
                    .secret
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| invalid_key("secret", "required for HMAC"))?;
                Ok(EncodingKey::from_secret(secret.as_bytes()))
            }
            JwtAlgorithm::RS256 => {
                let key = config
                    .private_key
                    .as_ref()
                    .ok_or_else(|| invalid_key("private_key", "required for RSA"))?;
                EncodingKey::from_rsa_pem(key.as_bytes())
                    .map_err(|e| invalid_key("private_key", format!("invalid RSA private key: {}", e)))
            }
            JwtAlgorithm::ES256 => {
                let key = config
                    .private_key
                    .as_ref()
                    .ok_or_else(|| invalid_key("private_key", "required for EC"))?;
                EncodingKey::from_ec_pem(key.as_bytes())
                    .map_err(|e| invalid_key("private_key", format!("invalid EC private key: {}", e)))
            }
        }
    }

    fn create_decoding_key(config: &JwtConfig) -> Result<DecodingKey, ConfigError> {
        match config.algorithm {
            JwtAlgorithm::HS256 | JwtAlgorithm::HS384 | JwtAlgorithm::HS512 => {
                let secret = config
                    .secret
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| invalid_key("secret", "required for HMAC"))?;
                Ok(DecodingKey::from_secret(secret.as_bytes()))
            }
            JwtAlgorithm::RS256 => {
                let key = config
                    .public_key
                    .as_ref()
                    .ok_or_else(|| invalid_key("public_key", "required for RSA"))?;
                DecodingKey::from_rsa_pem(key.as_bytes())
                    .map_err(|e| invalid_key("public_key", format!("invalid RSA public key: {}", e)))
            }
            JwtAlgorithm::ES256 => {
                let key = config
                    .public_key
                    .as_ref()
                    .ok_or_else(|| invalid_key("public_key", "required for EC"))?;
                DecodingKey::from_ec_pem(key.as_bytes())
                    .map_err(|e| invalid_key("public_key", format!("invalid EC public key: {}", e)))
            }
        }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    /// Sign `claims`.
    pub fn encode_claims(&self, claims: &AccessTokenClaims) -> ApiResult<String> {
        let header = Header::new(self.config.algorithm.into());
        encode(&header, claims, &self.encoding_key).map_err(|e| ApiError::internal("encode access token", e))
    }

    /// Validate and decode an access token.
    pub fn validate_access_token(&self, token: &str) -> ApiResult<AccessTokenClaims> {
        let mut validation = Validation::new(self.config.algorithm.into());
        validation.set_issuer(&[&self.config.issuer]);
        if self.config.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.config.audience);
        }

        decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ApiError::unauthenticated("access token expired")
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    ApiError::unauthenticated("invalid access token signature")
                }
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => {
                    ApiError::unauthenticated("invalid access token issuer")
                }
                jsonwebtoken::errors::ErrorKind::InvalidAudience => {
                    ApiError::unauthenticated("invalid access token audience")
                }
                _ => ApiError::unauthenticated("malformed access token"),
            })
    }
}

#[async_trait]
impl AccessTokenIssuer for JwtAccessTokenIssuer {
    #[instrument(skip(self, refresh_token))]
    async fn issue_access_token(&self, refresh_token: &str) -> ApiResult<String> {
        let digest = parse_token_digest(SecretTokenKind::SessionRefreshToken, refresh_token)
            .map_err(|_| ApiError::unauthenticated("invalid refresh token"))?;

        let (session, user) = {
            let mut tx = self.store.begin().await?;
            let session = tx
                .get_session_by_refresh_token_sha256(&digest)
                .await?
                .filter(|s| s.is_live(Utc::now()))
                .ok_or_else(|| ApiError::unauthenticated("invalid refresh token"))?;
            let user = tx
                .get_user(session.user_id)
                .await?
                .filter(|u| u.is_active())
                .ok_or_else(|| ApiError::unauthenticated("invalid refresh token"))?;
            (session, user)
        };

        let claims = AccessTokenClaims::new(
            &session,
            &user,
            self.config.issuer.clone(),
            self.config.access_token_duration,
        )
        .with_audience(self.config.audience.clone());

        debug!(session_id = %session.id, "Access token minted");
        self.encode_claims(&claims)
    }
}
