//! OAuth and OpenID Connect client.
//!
//! One client serves every provider. A [`ProviderSpec`] says which endpoints
//! to call and how to read the provider's profile response; the platform
//! specs come from [`ProviderConfig`](crate::ProviderConfig) and OIDC specs
//! come from discovery.

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, HttpRequest,
    HttpResponse, RedirectUrl, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::ProviderEndpoints;
use crate::error::{ProviderError, ProviderResult};
use crate::retry::{with_retry_if, RetryConfig};

const USER_AGENT: &str = concat!("portcullis/", env!("CARGO_PKG_VERSION"));

/// How to interpret a provider's profile responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityProviderKind {
    Google,
    Microsoft,
    Github,
    Oidc,
}

/// Endpoints, scopes and profile format of one identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    /// Profile format.
    pub kind: IdentityProviderKind,

    /// Provider endpoints.
    pub endpoints: ProviderEndpoints,

    /// Scopes requested on the authorize URL.
    pub scopes: Vec<String>,
}

/// Client credentials used for one code redemption.
#[derive(Debug, Clone)]
pub struct OAuthApp {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
}

/// Identity asserted by a provider after code redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemedIdentity {
    /// Stable provider-side user id.
    pub subject: String,

    /// Email address on the account.
    pub email: String,

    /// Whether the provider vouches for the email.
    pub email_verified: bool,

    /// Display name.
    pub display_name: Option<String>,

    /// Profile picture URL.
    pub profile_picture_url: Option<String>,

    /// Google Workspace hosted domain.
    pub hosted_domain: Option<String>,
}

/// OAuth operations against identity providers.
#[async_trait]
pub trait OAuthClient: Send + Sync {
    /// Authorization URL carrying `state`.
    fn authorize_url(
        &self,
        spec: &ProviderSpec,
        client_id: &str,
        redirect_uri: &str,
        state: &str,
    ) -> ProviderResult<String>;

    /// Redeem `code` and fetch the user's identity.
    async fn redeem_code(
        &self,
        spec: &ProviderSpec,
        app: &OAuthApp,
        code: &str,
    ) -> ProviderResult<RedeemedIdentity>;

    /// Fetch an OIDC discovery document and turn it into a spec.
    async fn discover(&self, configuration_url: &str) -> ProviderResult<ProviderSpec>;
}

/// HTTP [`OAuthClient`] built on `oauth2` and `reqwest`.
#[derive(Clone)]
pub struct HttpOAuthClient {
    /// HTTP client instance.
    client: Client,

    /// Retry policy for idempotent requests.
    retry: RetryConfig,
}

impl std::fmt::Debug for HttpOAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpOAuthClient")
            .field("retry", &self.retry)
            .finish()
    }
}

impl HttpOAuthClient {
    /// Create a client with the given request timeout.
    pub fn new(timeout: Duration) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            retry: RetryConfig::default(),
        })
    }

    /// Override the retry policy.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn basic_client(
        spec: &ProviderSpec,
        client_id: &str,
        client_secret: Option<&SecretString>,
        redirect_uri: &str,
    ) -> ProviderResult<BasicClient> {
        let auth_url = AuthUrl::new(spec.endpoints.authorize_url.clone())
            .map_err(|e| ProviderError::Configuration(format!("authorize url: {}", e)))?;
        let token_url = TokenUrl::new(spec.endpoints.token_url.clone())
            .map_err(|e| ProviderError::Configuration(format!("token url: {}", e)))?;
        let redirect_url = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|e| ProviderError::Configuration(format!("redirect uri: {}", e)))?;

        Ok(BasicClient::new(
            ClientId::new(client_id.to_string()),
            client_secret.map(|s| ClientSecret::new(s.expose_secret().clone())),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::RequestBody)
        .set_redirect_uri(redirect_url))
    }

    async fn get_json<T>(&self, url: &str, access_token: Option<&str>) -> ProviderResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        with_retry_if(
            &self.retry,
            || async move {
                let mut request = self.client.get(url).header("Accept", "application/json");
                if let Some(token) = access_token {
                    request = request.bearer_auth(token);
                }
                let response = request.send().await?;
                handle_response(response).await
            },
            ProviderError::is_transient,
        )
        .await
    }

    /// Token endpoint transport over the configured client.
    ///
    /// Server errors are returned as [`ProviderError::ApiError`] so they never
    /// reach the token response parser. `status` receives the HTTP status of
    /// whatever response did arrive.
    async fn send_token_request(
        &self,
        request: HttpRequest,
        status: &AtomicU16,
    ) -> ProviderResult<HttpResponse> {
        let response = self
            .client
            .request(request.method, request.url.as_str())
            .headers(request.headers)
            .body(request.body)
            .send()
            .await?;

        let status_code = response.status();
        status.store(status_code.as_u16(), Ordering::Relaxed);
        if status_code.is_server_error() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!("Token endpoint error ({}): {}", status_code.as_u16(), message);
            return Err(ProviderError::ApiError {
                status: status_code.as_u16(),
                message,
            });
        }

        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse {
            status_code,
            headers,
            body,
        })
    }

    async fn fetch_identity(
        &self,
        spec: &ProviderSpec,
        access_token: &str,
    ) -> ProviderResult<RedeemedIdentity> {
        let userinfo_url = &spec.endpoints.userinfo_url;
        match spec.kind {
            IdentityProviderKind::Google => {
                let info: GoogleUserinfo = self.get_json(userinfo_url, Some(access_token)).await?;
                Ok(RedeemedIdentity {
                    subject: info.sub,
                    email: info.email,
                    email_verified: info.email_verified,
                    display_name: info.name,
                    profile_picture_url: info.picture,
                    hosted_domain: info.hd,
                })
            }
            IdentityProviderKind::Microsoft => {
                let info: OidcUserinfo = self.get_json(userinfo_url, Some(access_token)).await?;
                let email = info
                    .email
                    .ok_or_else(|| ProviderError::InvalidResponse("microsoft account has no email".into()))?;
                // Microsoft does not vouch for the mutable email claim.
                Ok(RedeemedIdentity {
                    subject: info.sub,
                    email,
                    email_verified: false,
                    display_name: info.name,
                    profile_picture_url: info.picture,
                    hosted_domain: None,
                })
            }
            IdentityProviderKind::Github => {
                let user: GithubUser = self.get_json(userinfo_url, Some(access_token)).await?;
                let emails_url = spec.endpoints.emails_url.as_deref().ok_or_else(|| {
                    ProviderError::Configuration("github emails url is not configured".into())
                })?;
                let emails: Vec<GithubEmail> = self.get_json(emails_url, Some(access_token)).await?;
                let primary = emails
                    .into_iter()
                    .find(|e| e.primary)
                    .ok_or_else(|| ProviderError::InvalidResponse("github account has no primary email".into()))?;

                Ok(RedeemedIdentity {
                    subject: user.id.to_string(),
                    email: primary.email,
                    email_verified: primary.verified,
                    display_name: user.name.or(Some(user.login)),
                    profile_picture_url: user.avatar_url,
                    hosted_domain: None,
                })
            }
            IdentityProviderKind::Oidc => {
                let info: OidcUserinfo = self.get_json(userinfo_url, Some(access_token)).await?;
                let email = info
                    .email
                    .ok_or_else(|| ProviderError::InvalidResponse("oidc userinfo has no email".into()))?;
                Ok(RedeemedIdentity {
                    subject: info.sub,
                    email,
                    email_verified: info.email_verified.unwrap_or(false),
                    display_name: info.name,
                    profile_picture_url: info.picture,
                    hosted_domain: None,
                })
            }
        }
    }
}

#[async_trait]
impl OAuthClient for HttpOAuthClient {
    fn authorize_url(
        &self,
        spec: &ProviderSpec,
        client_id: &str,
        redirect_uri: &str,
        state: &str,
    ) -> ProviderResult<String> {
        let client = Self::basic_client(spec, client_id, None, redirect_uri)?;
        let state = state.to_string();
        let (url, _) = client
            .authorize_url(move || CsrfToken::new(state))
            .add_scopes(spec.scopes.iter().cloned().map(Scope::new))
            .url();
        Ok(url.to_string())
    }

    #[instrument(skip(self, app, code), fields(kind = ?spec.kind, client_id = %app.client_id))]
    async fn redeem_code(
        &self,
        spec: &ProviderSpec,
        app: &OAuthApp,
        code: &str,
    ) -> ProviderResult<RedeemedIdentity> {
        let client = Self::basic_client(spec, &app.client_id, Some(&app.client_secret), &app.redirect_uri)?;

        let status = AtomicU16::new(0);
        let token = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(|request| self.send_token_request(request, &status))
            .await
            .map_err(|e| {
                let status = status.load(Ordering::Relaxed);
                let refused = (400..500).contains(&status);
                match e {
                    RequestTokenError::ServerResponse(resp) => ProviderError::CodeRejected(resp.to_string()),
                    RequestTokenError::Request(e) => e,
                    RequestTokenError::Parse(e, _) if refused => ProviderError::CodeRejected(e.to_string()),
                    RequestTokenError::Other(message) if refused => ProviderError::CodeRejected(message),
                    RequestTokenError::Parse(e, _) => {
                        ProviderError::InvalidResponse(format!("token response ({}): {}", status, e))
                    }
                    RequestTokenError::Other(message) => ProviderError::InvalidResponse(message),
                }
            })?;

        debug!("Authorization code redeemed");
        let identity = self.fetch_identity(spec, token.access_token().secret()).await?;
        if identity.subject.is_empty() {
            warn!("Provider returned an empty subject");
            return Err(ProviderError::InvalidResponse("empty subject".into()));
        }
        Ok(identity)
    }

    #[instrument(skip(self))]
    async fn discover(&self, configuration_url: &str) -> ProviderResult<ProviderSpec> {
        let document: DiscoveryDocument = self.get_json(configuration_url, None).await?;
        let userinfo_url = document.userinfo_endpoint.ok_or_else(|| {
            ProviderError::InvalidResponse("discovery document has no userinfo_endpoint".into())
        })?;

        debug!(issuer = %document.issuer, "OIDC discovery document loaded");
        Ok(ProviderSpec {
            kind: IdentityProviderKind::Oidc,
            endpoints: ProviderEndpoints {
                authorize_url: document.authorization_endpoint,
                token_url: document.token_endpoint,
                userinfo_url,
                emails_url: None,
            },
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
        })
    }
}

async fn handle_response<T>(response: reqwest::Response) -> ProviderResult<T>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();

    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        warn!("Identity provider error ({}): {}", status.as_u16(), message);
        return Err(ProviderError::ApiError {
            status: status.as_u16(),
            message,
        });
    }

    response
        .json()
        .await
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct GoogleUserinfo {
    sub: String,
    email: String,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
    picture: Option<String>,
    hd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OidcUserinfo {
    sub: String,
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
    picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: u64,
    login: String,
    name: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    userinfo_endpoint: Option<String>,
}
