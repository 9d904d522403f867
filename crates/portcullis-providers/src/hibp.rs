//! Breached-password lookups.
//!
//! Uses the k-anonymity range API: only the first five hex characters of the
//! password's SHA-1 digest leave the process.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use sha1::{Digest, Sha1};
use tracing::{debug, instrument, warn};

use crate::config::HibpConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::retry::{with_retry_if, RetryConfig};

/// Checks candidate passwords against known breach corpora.
#[async_trait]
pub trait BreachedPasswordChecker: Send + Sync {
    /// Whether `password` appears in a known breach.
    async fn is_compromised(&self, password: &SecretString) -> ProviderResult<bool>;
}

/// [`BreachedPasswordChecker`] backed by a Have I Been Pwned range API.
#[derive(Clone)]
pub struct HibpClient {
    client: Client,
    config: HibpConfig,
    retry: RetryConfig,
}

impl HibpClient {
    /// Create a client with the given request timeout.
    pub fn new(config: HibpConfig, timeout: std::time::Duration) -> ProviderResult<Self> {
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

    async fn range(&self, prefix: &str) -> ProviderResult<String> {
        let url = format!("{}/range/{}", self.config.base_url.trim_end_matches('/'), prefix);
        let url = url.as_str();

        with_retry_if(
            &self.retry,
            || async move {
                let response = self
                    .client
                    .get(url)
                    .header("Add-Padding", "true")
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    let message = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    warn!("Range API error ({}): {}", status.as_u16(), message);
                    return Err(ProviderError::ApiError {
                        status: status.as_u16(),
                        message,
                    });
                }

                Ok(response.text().await?)
            },
            ProviderError::is_transient,
        )
        .await
    }
}

/// Uppercase hex SHA-1 of `password`.
fn sha1_hex(password: &str) -> String {
    Sha1::digest(password.as_bytes())
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect()
}

/// Whether `suffix` appears with a non-zero count in a range response body.
fn range_contains(body: &str, suffix: &str) -> bool {
    body.lines().any(|line| {
        let mut parts = line.trim().splitn(2, ':');
        match (parts.next(), parts.next()) {
            (Some(candidate), Some(count)) => {
                candidate.eq_ignore_ascii_case(suffix)
                    && count.trim().parse::<u64>().map(|n| n > 0).unwrap_or(false)
            }
            _ => false,
        }
    })
}

#[async_trait]
impl BreachedPasswordChecker for HibpClient {
    #[instrument(skip(self, password))]
    async fn is_compromised(&self, password: &SecretString) -> ProviderResult<bool> {
        if !self.config.enabled {
            return Ok(false);
        }

        let digest = sha1_hex(password.expose_secret());
        let (prefix, suffix) = digest.split_at(5);
        let body = self.range(prefix).await?;
        let compromised = range_contains(&body, suffix);

        debug!(compromised, "Breached password lookup complete");
        Ok(compromised)
    }
}
