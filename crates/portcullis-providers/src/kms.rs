//! Key management.
//!
//! Tenant OAuth client secrets are stored as ciphertext produced by a Vault
//! transit key. Plaintext is only ever held in a [`SecretString`] for the
//! length of one code redemption.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::config::KmsConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::retry::{with_retry_if, RetryConfig};

/// Decrypts secrets sealed by a named key.
#[async_trait]
pub trait KeyManagement: Send + Sync {
    /// Decrypt `ciphertext` with `key`.
    async fn decrypt(&self, key: &str, ciphertext: &[u8]) -> ProviderResult<SecretString>;
}

#[derive(Serialize)]
struct DecryptRequest<'a> {
    ciphertext: &'a str,
}

#[derive(Deserialize)]
struct DecryptResponse {
    data: DecryptData,
}

#[derive(Deserialize)]
struct DecryptData {
    plaintext: String,
}

/// [`KeyManagement`] backed by a Vault transit engine.
#[derive(Clone)]
pub struct VaultTransitKms {
    client: Client,
    config: KmsConfig,
    retry: RetryConfig,
}

impl VaultTransitKms {
    /// Create a client for the configured transit engine.
    pub fn new(config: KmsConfig, timeout: std::time::Duration) -> ProviderResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            config,
            retry: RetryConfig::default(),
        })
    }

    /// Override the retry policy.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl KeyManagement for VaultTransitKms {
    #[instrument(skip(self, ciphertext))]
    async fn decrypt(&self, key: &str, ciphertext: &[u8]) -> ProviderResult<SecretString> {
        let ciphertext = std::str::from_utf8(ciphertext)
            .map_err(|_| ProviderError::InvalidResponse("ciphertext is not utf-8".into()))?;
        let url = self
            .config
            .url(&format!("v1/{}/decrypt/{}", self.config.transit_mount, key));
        let url = url.as_str();

        let response: DecryptResponse = with_retry_if(
            &self.retry,
            || async move {
                let response = self
                    .client
                    .post(url)
                    .header("X-Vault-Token", self.config.token.expose_secret().as_str())
                    .json(&DecryptRequest { ciphertext })
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    let message = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    warn!("Vault error ({}): {}", status.as_u16(), message);
                    return Err(ProviderError::ApiError {
                        status: status.as_u16(),
                        message,
                    });
                }

                response
                    .json::<DecryptResponse>()
                    .await
                    .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
            },
            ProviderError::is_transient,
        )
        .await?;

        let plaintext = STANDARD
            .decode(response.data.plaintext)
            .map_err(|e| ProviderError::InvalidResponse(format!("plaintext is not base64: {}", e)))?;
        let plaintext = String::from_utf8(plaintext)
            .map_err(|_| ProviderError::InvalidResponse("plaintext is not utf-8".into()))?;

        Ok(SecretString::new(plaintext))
    }
}
