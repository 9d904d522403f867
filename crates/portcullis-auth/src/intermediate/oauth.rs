//! OAuth redirect and code redemption for social providers and OIDC
//! connections.

use async_trait::async_trait;
use portcullis_audit::IntermediateSessionEvent;
use portcullis_model::{
    IntermediateSession, LoginMethod, OAuthProvider, OAuthTarget, Organization, VerifiedEmail,
};
use portcullis_providers::{OAuthApp, ProviderError, ProviderSpec, RedeemedIdentity};
use portcullis_store::Transaction;
use secrecy::SecretString;
use tracing::{info, instrument, warn};

use super::policy::{check_organization, load, persist, Loaded};
use super::{IntermediateContext, IntermediateService};
use crate::error::{ApiError, ApiResult};
use crate::tokens::{digest_matches, parse_token_digest, SecretToken, SecretTokenKind};
use crate::two_phase::{run_two_phase, TwoPhase};

/// Where the provider spec comes from.
enum SpecSource {
    Known(ProviderSpec),
    Discover(String),
}

/// Client secret for a redemption.
enum ClientSecret {
    Platform(SecretString),
    Sealed(Vec<u8>),
}

/// Client, endpoints and organization resolved for one target.
struct ResolvedClient {
    spec: SpecSource,
    client_id: String,
    client_secret: ClientSecret,
    redirect_uri: String,
    /// Organization that owns the OIDC connection
    organization: Option<Organization>,
}

impl IntermediateService {
    /// Authorization URL for `target`, storing a fresh state on the session.
    ///
    /// `redirect_url` is the tenant callback; it is required whenever the
    /// project configured its own client for the provider, and for OIDC.
    #[instrument(
        skip(self, ctx, target, redirect_url),
        fields(intermediate_session_id = %ctx.intermediate_session_id, oauth_target = ?target)
    )]
    pub async fn get_oauth_redirect_url(
        &self,
        ctx: &IntermediateContext,
        target: OAuthTarget,
        redirect_url: Option<&str>,
    ) -> ApiResult<String> {
        let step = IssueRedirect {
            service: self,
            ctx,
            target,
            redirect_url,
        };
        run_two_phase(self.store.as_ref(), ctx.deadline, &step).await
    }

    /// Redeem an authorization `code` returned with `state` for `target`.
    #[instrument(
        skip(self, ctx, target, code, state, redirect_url),
        fields(intermediate_session_id = %ctx.intermediate_session_id, oauth_target = ?target)
    )]
    pub async fn redeem_oauth_code(
        &self,
        ctx: &IntermediateContext,
        target: OAuthTarget,
        code: &str,
        state: &str,
        redirect_url: Option<&str>,
    ) -> ApiResult<IntermediateSession> {
        let step = RedeemCode {
            service: self,
            ctx,
            target,
            code,
            state,
            redirect_url,
        };
        run_two_phase(self.store.as_ref(), ctx.deadline, &step).await
    }

    /// Resolve the client and gates for `target` on a loaded session.
    async fn resolve_client(
        &self,
        tx: &mut dyn Transaction,
        loaded: &Loaded,
        target: OAuthTarget,
        redirect_url: Option<&str>,
    ) -> ApiResult<ResolvedClient> {
        let tenant_redirect = || {
            redirect_url
                .map(str::to_string)
                .ok_or_else(|| ApiError::invalid_argument("redirect_url is required for this oauth client"))
        };

        match target {
            OAuthTarget::Provider { provider } => {
                loaded.require_method(provider.login_method())?;
                let spec = SpecSource::Known(self.providers.provider_spec(provider));

                match loaded.project.oauth_client(provider) {
                    Some(tenant) => Ok(ResolvedClient {
                        spec,
                        client_id: tenant.client_id.clone(),
                        client_secret: ClientSecret::Sealed(tenant.client_secret_ciphertext.clone()),
                        redirect_uri: tenant_redirect()?,
                        organization: None,
                    }),
                    None => {
                        let app = self.providers.platform_app(provider);
                        Ok(ResolvedClient {
                            spec,
                            client_id: app.client_id.clone(),
                            client_secret: ClientSecret::Platform(app.client_secret.clone()),
                            redirect_uri: app.redirect_uri.clone(),
                            organization: None,
                        })
                    }
                }
            }
            OAuthTarget::OidcConnection { connection_id } => {
                loaded.require_method(LoginMethod::Oidc)?;
                let connection = tx
                    .get_oidc_connection(loaded.project.id, connection_id)
                    .await?
                    .ok_or_else(|| ApiError::not_found("oidc connection"))?;
                let organization = tx
                    .get_organization(loaded.project.id, connection.organization_id)
                    .await?
                    .ok_or_else(|| ApiError::not_found("organization"))?;
                check_organization(&organization, LoginMethod::Oidc)?;
                if loaded
                    .session
                    .organization_id
                    .is_some_and(|bound| bound != organization.id)
                {
                    return Err(ApiError::invalid_argument(
                        "oidc connection belongs to a different organization",
                    ));
                }

                Ok(ResolvedClient {
                    spec: SpecSource::Discover(connection.configuration_url),
                    client_id: connection.client_id,
                    client_secret: ClientSecret::Sealed(connection.client_secret_ciphertext),
                    redirect_uri: tenant_redirect()?,
                    organization: Some(organization),
                })
            }
        }
    }

    async fn provider_spec(&self, source: &SpecSource) -> ApiResult<ProviderSpec> {
        match source {
            SpecSource::Known(spec) => Ok(spec.clone()),
            SpecSource::Discover(configuration_url) => self
                .oauth
                .discover(configuration_url)
                .await
                .map_err(|e| ApiError::from_provider("discover oidc configuration", e)),
        }
    }
}

/// Provider refusals are the caller's fault; anything else is ours.
fn redemption_error(err: ProviderError) -> ApiError {
    let refused = match &err {
        ProviderError::CodeRejected(_) => true,
        ProviderError::ApiError { status, .. } => (400..500).contains(status),
        _ => false,
    };
    if refused {
        warn!(error = %err, "OAuth code redemption refused");
        ApiError::invalid_argument("failed to redeem oauth code")
    } else {
        ApiError::from_provider("redeem oauth code", err)
    }
}

// ============================================================================
// Redirect
// ============================================================================

struct IssueRedirect<'a> {
    service: &'a IntermediateService,
    ctx: &'a IntermediateContext,
    target: OAuthTarget,
    redirect_url: Option<&'a str>,
}

#[async_trait]
impl<'a> TwoPhase for IssueRedirect<'a> {
    type Snapshot = ResolvedClient;
    type Fetched = ProviderSpec;
    type Output = String;

    async fn read(&self, tx: &mut dyn Transaction) -> ApiResult<ResolvedClient> {
        let loaded = load(tx, self.ctx).await?;
        self.service
            .resolve_client(tx, &loaded, self.target, self.redirect_url)
            .await
    }

    async fn fetch(&self, client: &ResolvedClient) -> ApiResult<ProviderSpec> {
        self.service.provider_spec(&client.spec).await
    }

    async fn write(
        &self,
        tx: &mut dyn Transaction,
        client: ResolvedClient,
        spec: ProviderSpec,
    ) -> ApiResult<String> {
        let loaded = load(tx, self.ctx).await?;
        // Re-check gates the tenant may have changed during discovery.
        self.service
            .resolve_client(tx, &loaded, self.target, self.redirect_url)
            .await?;
        let mut session = loaded.session;

        let state = SecretToken::generate(SecretTokenKind::OAuthState);
        let url = self
            .service
            .oauth
            .authorize_url(&spec, &client.client_id, &client.redirect_uri, state.plaintext())
            .map_err(|e| ApiError::from_provider("build authorize url", e))?;

        session.oauth_state_sha256 = Some(state.sha256().to_vec());
        session.oauth_state_target = Some(self.target);

        let event = IntermediateSessionEvent::OAuthRedirectIssued {
            intermediate_session_id: session.id,
            target: self.target,
        };
        persist(tx, self.ctx, &session, event).await?;

        Ok(url)
    }
}

// ============================================================================
// Redemption
// ============================================================================

struct RedeemCode<'a> {
    service: &'a IntermediateService,
    ctx: &'a IntermediateContext,
    target: OAuthTarget,
    code: &'a str,
    state: &'a str,
    redirect_url: Option<&'a str>,
}

struct RedeemPlan {
    state_sha256: Vec<u8>,
    client: ResolvedClient,
}

fn invalid_state() -> ApiError {
    ApiError::invalid_argument("invalid oauth state")
}

#[async_trait]
impl<'a> TwoPhase for RedeemCode<'a> {
    type Snapshot = RedeemPlan;
    type Fetched = RedeemedIdentity;
    type Output = IntermediateSession;

    async fn read(&self, tx: &mut dyn Transaction) -> ApiResult<RedeemPlan> {
        let loaded = load(tx, self.ctx).await?;

        let state_sha256 =
            parse_token_digest(SecretTokenKind::OAuthState, self.state).map_err(|_| invalid_state())?;
        if !digest_matches(loaded.session.oauth_state_sha256.as_deref(), &state_sha256)
            || loaded.session.oauth_state_target != Some(self.target)
        {
            return Err(invalid_state());
        }

        let client = self
            .service
            .resolve_client(tx, &loaded, self.target, self.redirect_url)
            .await?;
        Ok(RedeemPlan {
            state_sha256,
            client,
        })
    }

    async fn fetch(&self, plan: &RedeemPlan) -> ApiResult<RedeemedIdentity> {
        let client_secret = match &plan.client.client_secret {
            ClientSecret::Platform(secret) => secret.clone(),
            ClientSecret::Sealed(ciphertext) => self
                .service
                .kms
                .decrypt(&self.service.providers.kms.oauth_client_secret_key, ciphertext)
                .await
                .map_err(|e| ApiError::from_provider("decrypt oauth client secret", e))?,
        };
        let spec = self.service.provider_spec(&plan.client.spec).await?;

        let app = OAuthApp {
            client_id: plan.client.client_id.clone(),
            client_secret,
            redirect_uri: plan.client.redirect_uri.clone(),
        };
        self.service
            .oauth
            .redeem_code(&spec, &app, self.code)
            .await
            .map_err(redemption_error)
    }

    async fn write(
        &self,
        tx: &mut dyn Transaction,
        plan: RedeemPlan,
        identity: RedeemedIdentity,
    ) -> ApiResult<IntermediateSession> {
        let mut loaded = load(tx, self.ctx).await?;
        if !digest_matches(loaded.session.oauth_state_sha256.as_deref(), &plan.state_sha256) {
            return Err(ApiError::failed_precondition("oauth state already used"));
        }
        loaded.session.oauth_state_sha256 = None;
        loaded.session.oauth_state_target = None;

        loaded.bind_email(&identity.email)?;

        match self.target {
            OAuthTarget::Provider { provider } => {
                record_provider_identity(tx, &mut loaded, provider, &identity).await?;
            }
            OAuthTarget::OidcConnection { connection_id } => {
                let organization = plan
                    .client
                    .organization
                    .as_ref()
                    .ok_or_else(|| ApiError::internal_message("oidc redemption without organization"))?;
                loaded.bind_organization(organization)?;
                loaded.session.verified_oidc_connection_id = Some(connection_id);
            }
        }

        let mut session = loaded.session;
        if identity.display_name.is_some() {
            session.display_name = identity.display_name.clone();
        }
        if identity.profile_picture_url.is_some() {
            session.profile_picture_url = identity.profile_picture_url.clone();
        }
        session.fix_primary_auth_factor(self.target.primary_auth_factor());

        let event = IntermediateSessionEvent::OAuthCodeRedeemed {
            intermediate_session_id: session.id,
            target: self.target,
            email: identity.email.clone(),
            email_verified: identity.email_verified,
        };
        persist(tx, self.ctx, &session, event).await?;

        info!(oauth_target = ?self.target, email_verified = identity.email_verified, "OAuth code redeemed");
        Ok(session)
    }
}

async fn record_provider_identity(
    tx: &mut dyn Transaction,
    loaded: &mut Loaded,
    provider: OAuthProvider,
    identity: &RedeemedIdentity,
) -> ApiResult<()> {
    loaded
        .session
        .set_provider_subject(provider, identity.subject.clone());
    if provider == OAuthProvider::Google {
        loaded.session.google_hosted_domain = identity.hosted_domain.clone();
    }

    if identity.email_verified {
        let verified = VerifiedEmail::from_provider(
            loaded.project.id,
            identity.email.clone(),
            provider,
            identity.subject.clone(),
        );
        tx.upsert_verified_email(&verified).await?;
    }
    Ok(())
}
