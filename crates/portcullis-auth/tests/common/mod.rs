//! Shared fixture for the intermediate session tests.
//!
//! The store is the in-memory backend; identity providers, key management,
//! the breach database, email delivery and SAML validation are fakes that
//! record what they were asked to do.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Duration;
use portcullis_auth::{
    AuthConfig, Collaborators, CredentialMatcher, IntermediateContext, IntermediateService,
    JwtAccessTokenIssuer, JwtConfig, SamlAssertion, SamlAssertionValidator, SamlRejected,
};
use portcullis_model::{
    IntermediateSession, LoginMethods, Organization, Project, SamlConnection, User,
};
use portcullis_providers::{
    BreachedPasswordChecker, EmailMessage, EmailSender, IdentityProviderKind, KeyManagement,
    OAuthApp, OAuthClient, ProviderConfig, ProviderEndpoints, ProviderError, ProviderResult,
    ProviderSpec, RedeemedIdentity,
};
use portcullis_store::{MemoryStore, Store};
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, Mutex};

pub const BCRYPT_COST: u32 = 4;
pub const LOCKOUT_ATTEMPTS: i32 = 3;
pub const PASSWORD: &str = "correct horse battery staple";
pub const BREACHED_PASSWORD: &str = "password123";
pub const VALID_SAML_RESPONSE: &str = "PHNhbWxwOlJlc3BvbnNlPg==";

pub fn secret(s: &str) -> SecretString {
    SecretString::new(s.to_string())
}

/// The `state` query parameter of an authorize URL.
pub fn state_from(url: &str) -> String {
    url.split("state=")
        .nth(1)
        .and_then(|rest| rest.split('&').next())
        .expect("authorize url carries a state")
        .to_string()
}

// ============================================================================
// Fakes
// ============================================================================

/// One `redeem_code` call.
#[derive(Debug, Clone)]
pub struct Redemption {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub code: String,
}

/// OAuth client answering every redemption with a configured identity.
///
/// The code `"bad-code"` is refused the way a provider refuses a reused code.
#[derive(Default)]
pub struct FakeOAuthClient {
    identity: Mutex<Option<RedeemedIdentity>>,
    redemptions: Mutex<Vec<Redemption>>,
    consume_state: Mutex<Option<(MemoryStore, IntermediateContext)>>,
}

impl FakeOAuthClient {
    pub fn set_identity(&self, identity: RedeemedIdentity) {
        *self.identity.lock().unwrap() = Some(identity);
    }

    pub fn redemptions(&self) -> Vec<Redemption> {
        self.redemptions.lock().unwrap().clone()
    }

    /// Clear the session's OAuth state while the code is being redeemed,
    /// as a concurrent redemption of the same state would.
    pub fn consume_state_during_redeem(&self, store: MemoryStore, ctx: &IntermediateContext) {
        *self.consume_state.lock().unwrap() = Some((store, *ctx));
    }

    async fn clear_state(store: &MemoryStore, ctx: &IntermediateContext) {
        let mut tx = store.begin().await.unwrap();
        let mut session = tx
            .get_intermediate_session(ctx.project_id, ctx.intermediate_session_id)
            .await
            .unwrap()
            .unwrap();
        session.oauth_state_sha256 = None;
        session.oauth_state_target = None;
        tx.update_intermediate_session(&session).await.unwrap();
        tx.commit().await.unwrap();
    }
}

#[async_trait]
impl OAuthClient for FakeOAuthClient {
    fn authorize_url(
        &self,
        spec: &ProviderSpec,
        client_id: &str,
        redirect_uri: &str,
        state: &str,
    ) -> ProviderResult<String> {
        Ok(format!(
            "{}?client_id={}&redirect_uri={}&state={}",
            spec.endpoints.authorize_url, client_id, redirect_uri, state
        ))
    }

    async fn redeem_code(
        &self,
        _spec: &ProviderSpec,
        app: &OAuthApp,
        code: &str,
    ) -> ProviderResult<RedeemedIdentity> {
        self.redemptions.lock().unwrap().push(Redemption {
            client_id: app.client_id.clone(),
            client_secret: app.client_secret.expose_secret().clone(),
            redirect_uri: app.redirect_uri.clone(),
            code: code.to_string(),
        });

        if code == "bad-code" {
            return Err(ProviderError::CodeRejected("invalid_grant".to_string()));
        }
        let consume = self.consume_state.lock().unwrap().take();
        if let Some((store, ctx)) = consume {
            Self::clear_state(&store, &ctx).await;
        }
        self.identity
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ProviderError::InvalidResponse("no identity configured".to_string()))
    }

    async fn discover(&self, configuration_url: &str) -> ProviderResult<ProviderSpec> {
        let issuer = configuration_url.trim_end_matches("/.well-known/openid-configuration");
        Ok(ProviderSpec {
            kind: IdentityProviderKind::Oidc,
            endpoints: ProviderEndpoints::rooted_at(issuer),
            scopes: vec!["openid".to_string(), "email".to_string()],
        })
    }
}

/// Key management that "decrypts" by prefixing the ciphertext.
pub struct FakeKms;

#[async_trait]
impl KeyManagement for FakeKms {
    async fn decrypt(&self, _key: &str, ciphertext: &[u8]) -> ProviderResult<SecretString> {
        Ok(secret(&format!("plain:{}", String::from_utf8_lossy(ciphertext))))
    }
}

/// Breach database containing only [`BREACHED_PASSWORD`].
pub struct FakeBreachChecker;

#[async_trait]
impl BreachedPasswordChecker for FakeBreachChecker {
    async fn is_compromised(&self, password: &SecretString) -> ProviderResult<bool> {
        Ok(password.expose_secret() == BREACHED_PASSWORD)
    }
}

/// Email sender that keeps every message.
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingEmailSender {
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Code carried by the most recent message.
    pub fn last_code(&self) -> String {
        let sent = self.sent.lock().unwrap();
        let body = &sent.last().expect("an email was sent").body;
        body.split("code is: ")
            .nth(1)
            .and_then(|rest| rest.lines().next())
            .expect("email carries a code")
            .trim()
            .to_string()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, message: &EmailMessage) -> ProviderResult<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// SAML validator accepting only [`VALID_SAML_RESPONSE`].
#[derive(Default)]
pub struct FakeSamlValidator {
    email: Mutex<Option<String>>,
}

impl FakeSamlValidator {
    pub fn set_email(&self, email: &str) {
        *self.email.lock().unwrap() = Some(email.to_string());
    }
}

#[async_trait]
impl SamlAssertionValidator for FakeSamlValidator {
    async fn validate(
        &self,
        _connection: &SamlConnection,
        saml_response: &str,
    ) -> Result<SamlAssertion, SamlRejected> {
        if saml_response != VALID_SAML_RESPONSE {
            return Err(SamlRejected("signature does not verify".to_string()));
        }
        let email = self
            .email
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SamlRejected("assertion has no email".to_string()))?;
        Ok(SamlAssertion { email })
    }
}

// ============================================================================
// Fixture
// ============================================================================

/// A seeded project and organization plus a service wired to fakes.
pub struct TestFixture {
    pub store: MemoryStore,
    pub oauth: Arc<FakeOAuthClient>,
    pub email: Arc<RecordingEmailSender>,
    pub saml: Arc<FakeSamlValidator>,
    pub jwt: Arc<JwtAccessTokenIssuer>,
    pub service: IntermediateService,
    pub project: Project,
    pub organization: Organization,
}

impl TestFixture {
    /// Project and organization with every login method enabled.
    pub async fn new() -> Self {
        let project = Project::new("Acme").with_login_methods(LoginMethods::all());
        let organization =
            Organization::new(project.id, "Acme Engineering").with_login_methods(LoginMethods::all());
        Self::seeded(project, organization).await
    }

    pub async fn seeded(project: Project, organization: Organization) -> Self {
        let store = MemoryStore::new();
        store.insert_project(project.clone()).await;
        store.insert_organization(organization.clone()).await;

        let mut config = AuthConfig::default();
        config.access_token_secret = "test-secret-key-for-jwt-signing-minimum-32-chars".to_string();
        config.bcrypt_cost = BCRYPT_COST;

        let shared: Arc<dyn Store> = Arc::new(store.clone());
        let jwt = Arc::new(
            JwtAccessTokenIssuer::new(shared.clone(), JwtConfig::from_auth_config(&config)).unwrap(),
        );
        let oauth = Arc::new(FakeOAuthClient::default());
        let email = Arc::new(RecordingEmailSender::default());
        let saml = Arc::new(FakeSamlValidator::default());

        let collaborators = Collaborators {
            store: shared,
            oauth: oauth.clone(),
            kms: Arc::new(FakeKms),
            breach_checker: Arc::new(FakeBreachChecker),
            email_sender: email.clone(),
            saml_validator: saml.clone(),
            access_tokens: jwt.clone(),
        };
        let service = IntermediateService::new(collaborators, ProviderConfig::default(), config)
            .with_matcher(CredentialMatcher::new(
                LOCKOUT_ATTEMPTS,
                Duration::minutes(10),
                BCRYPT_COST,
            ));

        Self {
            store,
            oauth,
            email,
            saml,
            jwt,
            service,
            project,
            organization,
        }
    }

    /// Fresh intermediate session bound to nothing.
    pub async fn intermediate(&self) -> IntermediateContext {
        let session = IntermediateSession::new(self.project.id, Duration::minutes(15));
        let ctx = IntermediateContext::new(self.project.id, session.id);
        self.store.insert_intermediate_session(session).await;
        ctx
    }

    /// Fresh intermediate session bound to the fixture's organization.
    pub async fn intermediate_in_org(&self) -> IntermediateContext {
        let session = IntermediateSession::new(self.project.id, Duration::minutes(15))
            .with_organization(self.organization.id);
        let ctx = IntermediateContext::new(self.project.id, session.id);
        self.store.insert_intermediate_session(session).await;
        ctx
    }

    /// Seed a user in the fixture's organization with [`PASSWORD`].
    pub async fn user_with_password(&self, email: &str) -> User {
        self.user_with_password_in(self.organization.id, email).await
    }

    pub async fn user_with_password_in(&self, organization_id: uuid::Uuid, email: &str) -> User {
        let hash = bcrypt::hash(PASSWORD, BCRYPT_COST).unwrap();
        let user = User::new(organization_id, email).with_password_bcrypt(hash);
        self.store.insert_user(user.clone()).await;
        user
    }

    /// Run an email challenge for `email` to completion.
    pub async fn verify_email(&self, ctx: &IntermediateContext, email: &str) -> IntermediateSession {
        self.service
            .issue_email_verification_challenge(ctx, email)
            .await
            .unwrap();
        let code = self.email.last_code();
        self.service.verify_email_challenge(ctx, &code).await.unwrap()
    }

    /// Names of every audit event, oldest first.
    pub async fn audit_event_names(&self) -> Vec<String> {
        self.store
            .audit_log_events()
            .await
            .into_iter()
            .map(|event| event.event_name)
            .collect()
    }
}
