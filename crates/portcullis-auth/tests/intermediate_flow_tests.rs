//! End-to-end tests for intermediate session login flows.
//!
//! Each test drives [`IntermediateService`] against the in-memory store and
//! inspects the store afterwards; no transaction is open while inspecting.
//!
//! Flows covered:
//! 1. email challenge, password registration and exchange for a new user
//! 2. direct password login, lockout and audit atomicity
//! 3. password reset codes
//! 4. OAuth redirect and redemption for platform, tenant and OIDC clients
//! 5. SAML assertion redemption
//! 6. exchange gates: single use, expiry, MFA and identity conflicts

mod common;

use chrono::{Duration, Utc};
use common::*;
use portcullis_auth::tokens::parse_token_digest;
use portcullis_auth::{ApiError, ErrorKind, SecretToken, SecretTokenKind};
use portcullis_model::{
    IntermediateSession, LoginMethod, LoginMethods, OAuthClientCredentials, OAuthProvider,
    OAuthTarget, OidcConnection, Organization, PrimaryAuthFactor, Project, SamlConnection,
};
use portcullis_providers::RedeemedIdentity;

fn google_identity(subject: &str, email: &str) -> RedeemedIdentity {
    RedeemedIdentity {
        subject: subject.to_string(),
        email: email.to_string(),
        email_verified: true,
        display_name: Some("Ada Lovelace".to_string()),
        profile_picture_url: Some("https://example.com/ada.png".to_string()),
        hosted_domain: Some("acme.test".to_string()),
    }
}

// ============================================================================
// Email and password registration
// ============================================================================

#[tokio::test]
async fn test_register_password_and_exchange_creates_user() {
    let fx = TestFixture::new().await;
    let ctx = fx.intermediate_in_org().await;

    let session = fx.verify_email(&ctx, "ada@acme.test").await;
    assert!(session.email_verification_challenge_completed);
    assert_eq!(session.primary_auth_factor, Some(PrimaryAuthFactor::Email));

    let session = fx.service.register_password(&ctx, &secret(PASSWORD)).await.unwrap();
    assert!(session.new_user_password_bcrypt.is_some());
    assert!(!session.password_verified);

    let session = fx.service.verify_password(&ctx, None, &secret(PASSWORD)).await.unwrap();
    assert!(session.password_verified);
    assert_eq!(session.primary_auth_factor, Some(PrimaryAuthFactor::Email));

    let exchanged = fx
        .service
        .exchange_intermediate_session_for_session(&ctx)
        .await
        .unwrap();
    assert!(exchanged.user_created);
    assert_eq!(exchanged.user.email, "ada@acme.test");
    assert_eq!(exchanged.user.organization_id, fx.organization.id);
    assert_eq!(exchanged.session.primary_auth_factor, PrimaryAuthFactor::Email);

    let stored = fx.store.user(exchanged.user.id).await.unwrap();
    assert!(bcrypt::verify(PASSWORD, stored.password_bcrypt.as_deref().unwrap()).unwrap());

    let sessions = fx.store.sessions().await;
    assert_eq!(sessions.len(), 1);
    let digest = parse_token_digest(SecretTokenKind::SessionRefreshToken, &exchanged.refresh_token).unwrap();
    assert_eq!(sessions[0].refresh_token_sha256, digest);
    assert_ne!(sessions[0].refresh_token_sha256, exchanged.refresh_token.as_bytes());

    let claims = fx.jwt.validate_access_token(&exchanged.access_token).unwrap();
    assert_eq!(claims.user_id(), Some(exchanged.user.id));
    assert_eq!(claims.session_id(), Some(exchanged.session.id));

    let names = fx.audit_event_names().await;
    assert_eq!(
        names,
        vec![
            "intermediate_sessions.email_verification_challenge_issued",
            "intermediate_sessions.email_verified",
            "intermediate_sessions.password_registered",
            "intermediate_sessions.password_verified",
            "sessions.create",
        ]
    );
}

#[tokio::test]
async fn test_password_becomes_primary_factor_when_email_arrives_verified() {
    let fx = TestFixture::new().await;
    let mut session = IntermediateSession::new(fx.project.id, Duration::minutes(15))
        .with_organization(fx.organization.id)
        .with_email("ada@acme.test");
    session.email_verification_challenge_completed = true;
    let ctx = portcullis_auth::IntermediateContext::new(fx.project.id, session.id);
    fx.store.insert_intermediate_session(session).await;

    fx.service.register_password(&ctx, &secret(PASSWORD)).await.unwrap();
    let session = fx.service.verify_password(&ctx, None, &secret(PASSWORD)).await.unwrap();
    assert_eq!(session.primary_auth_factor, Some(PrimaryAuthFactor::Password));

    let exchanged = fx
        .service
        .exchange_intermediate_session_for_session(&ctx)
        .await
        .unwrap();
    assert!(!exchanged.refresh_token.is_empty());
    assert_eq!(exchanged.session.primary_auth_factor, PrimaryAuthFactor::Password);
}

#[tokio::test]
async fn test_wrong_email_code_is_rejected() {
    let fx = TestFixture::new().await;
    let ctx = fx.intermediate().await;
    fx.service
        .issue_email_verification_challenge(&ctx, "ada@acme.test")
        .await
        .unwrap();

    let wrong = SecretToken::generate(SecretTokenKind::EmailVerificationChallengeCode);
    let err = fx
        .service
        .verify_email_challenge(&ctx, wrong.plaintext())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let session = fx.store.intermediate_session(ctx.intermediate_session_id).await.unwrap();
    assert!(!session.email_verification_challenge_completed);
}

#[tokio::test]
async fn test_email_challenge_refuses_a_different_email() {
    let fx = TestFixture::new().await;
    let ctx = fx.intermediate().await;
    fx.service
        .issue_email_verification_challenge(&ctx, "ada@acme.test")
        .await
        .unwrap();

    let err = fx
        .service
        .issue_email_verification_challenge(&ctx, "mallory@acme.test")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn test_email_quota_exceeded_rolls_back() {
    let project = Project::new("Acme")
        .with_login_methods(LoginMethods::all())
        .with_email_quota_daily(1);
    let organization = Organization::new(project.id, "Acme").with_login_methods(LoginMethods::all());
    let fx = TestFixture::seeded(project, organization).await;

    let first = fx.intermediate().await;
    fx.service
        .issue_email_verification_challenge(&first, "ada@acme.test")
        .await
        .unwrap();

    let second = fx.intermediate().await;
    let err = fx
        .service
        .issue_email_verification_challenge(&second, "grace@acme.test")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::FailedPrecondition(_)));

    let usage = fx
        .store
        .email_quota_daily_usage(fx.project.id, Utc::now().date_naive())
        .await;
    assert_eq!(usage, 1);
    assert_eq!(fx.email.sent().len(), 1);

    let session = fx.store.intermediate_session(second.intermediate_session_id).await.unwrap();
    assert!(session.email.is_none());
}

#[tokio::test]
async fn test_register_password_twice_fails() {
    let fx = TestFixture::new().await;
    let ctx = fx.intermediate_in_org().await;
    fx.verify_email(&ctx, "ada@acme.test").await;

    fx.service.register_password(&ctx, &secret(PASSWORD)).await.unwrap();
    let err = fx
        .service
        .register_password(&ctx, &secret("another long password"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
}

#[tokio::test]
async fn test_register_password_rejects_breached_and_short_passwords() {
    let fx = TestFixture::new().await;
    let ctx = fx.intermediate_in_org().await;
    fx.verify_email(&ctx, "ada@acme.test").await;

    let err = fx
        .service
        .register_password(&ctx, &secret(BREACHED_PASSWORD))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::PasswordCompromised));

    let err = fx.service.register_password(&ctx, &secret("short")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let session = fx.store.intermediate_session(ctx.intermediate_session_id).await.unwrap();
    assert!(session.new_user_password_bcrypt.is_none());
}

#[tokio::test]
async fn test_password_only_tenant_registers_and_exchanges() {
    let methods = LoginMethods::default().with(LoginMethod::Password);
    let project = Project::new("Acme").with_login_methods(methods);
    let organization = Organization::new(project.id, "Acme").with_login_methods(methods);
    let fx = TestFixture::seeded(project, organization).await;
    let ctx = fx.intermediate_in_org().await;

    let session = fx.verify_email(&ctx, "ada@acme.test").await;
    assert!(session.email_verification_challenge_completed);
    assert_eq!(session.primary_auth_factor, None);

    fx.service.register_password(&ctx, &secret(PASSWORD)).await.unwrap();
    let session = fx.service.verify_password(&ctx, None, &secret(PASSWORD)).await.unwrap();
    assert_eq!(session.primary_auth_factor, Some(PrimaryAuthFactor::Password));

    let exchanged = fx
        .service
        .exchange_intermediate_session_for_session(&ctx)
        .await
        .unwrap();
    assert!(exchanged.user_created);
    assert_eq!(exchanged.session.primary_auth_factor, PrimaryAuthFactor::Password);
}

#[tokio::test]
async fn test_email_challenge_needs_email_or_password_login() {
    let methods = LoginMethods::default().with(LoginMethod::Google);
    let project = Project::new("Acme").with_login_methods(methods);
    let organization = Organization::new(project.id, "Acme").with_login_methods(methods);
    let fx = TestFixture::seeded(project, organization).await;
    let ctx = fx.intermediate_in_org().await;

    let err = fx
        .service
        .issue_email_verification_challenge(&ctx, "ada@acme.test")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert!(fx.email.sent().is_empty());
}

#[tokio::test]
async fn test_register_password_needs_verified_email() {
    let fx = TestFixture::new().await;
    let ctx = fx.intermediate_in_org().await;

    let err = fx.service.register_password(&ctx, &secret(PASSWORD)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
}

// ============================================================================
// Password login
// ============================================================================

#[tokio::test]
async fn test_direct_password_login_binds_user() {
    let fx = TestFixture::new().await;
    let user = fx.user_with_password("ada@acme.test").await;
    let ctx = fx.intermediate().await;

    let session = fx
        .service
        .verify_password(&ctx, Some("ada@acme.test"), &secret(PASSWORD))
        .await
        .unwrap();
    assert_eq!(session.organization_id, Some(fx.organization.id));
    assert_eq!(session.email.as_deref(), Some("ada@acme.test"));
    assert!(session.password_verified);
    assert_eq!(session.primary_auth_factor, Some(PrimaryAuthFactor::Password));

    let exchanged = fx
        .service
        .exchange_intermediate_session_for_session(&ctx)
        .await
        .unwrap();
    assert!(!exchanged.user_created);
    assert_eq!(exchanged.user.id, user.id);
}

#[tokio::test]
async fn test_direct_login_needs_exactly_one_candidate() {
    let fx = TestFixture::new().await;

    let ctx = fx.intermediate().await;
    let err = fx
        .service
        .verify_password(&ctx, Some("nobody@acme.test"), &secret(PASSWORD))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::PasswordsUnavailableForEmail));

    let other = Organization::new(fx.project.id, "Acme Sales").with_login_methods(LoginMethods::all());
    fx.store.insert_organization(other.clone()).await;
    fx.user_with_password("ada@acme.test").await;
    fx.user_with_password_in(other.id, "ada@acme.test").await;

    let ctx = fx.intermediate().await;
    let err = fx
        .service
        .verify_password(&ctx, Some("ada@acme.test"), &secret(PASSWORD))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::PasswordsUnavailableForEmail));
}

#[tokio::test]
async fn test_repeated_mismatches_lock_the_user_out() {
    let fx = TestFixture::new().await;
    let user = fx.user_with_password("ada@acme.test").await;
    let ctx = fx.intermediate().await;

    for _ in 0..LOCKOUT_ATTEMPTS - 1 {
        let err = fx
            .service
            .verify_password(&ctx, Some("ada@acme.test"), &secret("wrong password"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::IncorrectPassword));
    }
    let stored = fx.store.user(user.id).await.unwrap();
    assert_eq!(stored.failed_password_attempts, LOCKOUT_ATTEMPTS - 1);

    let err = fx
        .service
        .verify_password(&ctx, Some("ada@acme.test"), &secret("wrong password"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);

    // Correct password during the lockout is still refused.
    let err = fx
        .service
        .verify_password(&ctx, Some("ada@acme.test"), &secret(PASSWORD))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);

    let stored = fx.store.user(user.id).await.unwrap();
    assert!(stored.is_locked_out(Utc::now()));
    assert_eq!(stored.failed_password_attempts, 0);

    let names = fx.audit_event_names().await;
    let failed = names.iter().filter(|n| *n == "users.password_attempt_failed").count();
    assert_eq!(failed as i32, LOCKOUT_ATTEMPTS - 1);
    assert_eq!(names.last().map(String::as_str), Some("users.password_locked_out"));

    let session = fx.store.intermediate_session(ctx.intermediate_session_id).await.unwrap();
    assert!(!session.password_verified);
    assert!(session.organization_id.is_none());
}

#[tokio::test]
async fn test_failed_audit_write_rolls_back_attempt_counter() {
    let fx = TestFixture::new().await;
    let user = fx.user_with_password("ada@acme.test").await;
    let ctx = fx.intermediate().await;

    fx.store.fail_audit_writes(true);
    let err = fx
        .service
        .verify_password(&ctx, Some("ada@acme.test"), &secret("wrong password"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    fx.store.fail_audit_writes(false);

    let stored = fx.store.user(user.id).await.unwrap();
    assert_eq!(stored.failed_password_attempts, 0);
    assert!(fx.store.audit_log_events().await.is_empty());
}

#[tokio::test]
async fn test_successful_login_resets_attempt_counter() {
    let fx = TestFixture::new().await;
    let user = fx.user_with_password("ada@acme.test").await;
    let ctx = fx.intermediate().await;

    fx.service
        .verify_password(&ctx, Some("ada@acme.test"), &secret("wrong password"))
        .await
        .unwrap_err();
    fx.service
        .verify_password(&ctx, Some("ada@acme.test"), &secret(PASSWORD))
        .await
        .unwrap();

    let stored = fx.store.user(user.id).await.unwrap();
    assert_eq!(stored.failed_password_attempts, 0);
}

#[tokio::test]
async fn test_password_login_disabled_for_project() {
    let project = Project::new("Acme").with_login_methods(LoginMethods::default().with(LoginMethod::Email));
    let organization = Organization::new(project.id, "Acme").with_login_methods(LoginMethods::all());
    let fx = TestFixture::seeded(project, organization).await;
    fx.user_with_password("ada@acme.test").await;
    let ctx = fx.intermediate().await;

    let err = fx
        .service
        .verify_password(&ctx, Some("ada@acme.test"), &secret(PASSWORD))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
}

// ============================================================================
// Password reset
// ============================================================================

#[tokio::test]
async fn test_reset_code_allows_replacing_password_once() {
    let fx = TestFixture::new().await;
    let user = fx.user_with_password("ada@acme.test").await;
    let ctx = fx.intermediate_in_org().await;
    fx.verify_email(&ctx, "ada@acme.test").await;

    let err = fx
        .service
        .register_password(&ctx, &secret("a brand new password"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);

    fx.service.issue_password_reset_code(&ctx).await.unwrap();
    let code = fx.email.last_code();
    let session = fx.service.verify_password_reset_code(&ctx, &code).await.unwrap();
    assert!(session.password_reset_code_verified);
    assert!(session.password_reset_code_sha256.is_none());

    let err = fx
        .service
        .verify_password_reset_code(&ctx, &code)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);

    fx.service
        .register_password(&ctx, &secret("a brand new password"))
        .await
        .unwrap();
    let exchanged = fx
        .service
        .exchange_intermediate_session_for_session(&ctx)
        .await
        .unwrap();
    assert_eq!(exchanged.user.id, user.id);

    let stored = fx.store.user(user.id).await.unwrap();
    let hash = stored.password_bcrypt.unwrap();
    assert!(bcrypt::verify("a brand new password", &hash).unwrap());
    assert!(!bcrypt::verify(PASSWORD, &hash).unwrap());
}

#[tokio::test]
async fn test_wrong_reset_code_is_rejected() {
    let fx = TestFixture::new().await;
    fx.user_with_password("ada@acme.test").await;
    let ctx = fx.intermediate_in_org().await;
    fx.verify_email(&ctx, "ada@acme.test").await;
    fx.service.issue_password_reset_code(&ctx).await.unwrap();

    let wrong = SecretToken::generate(SecretTokenKind::PasswordResetCode);
    let err = fx
        .service
        .verify_password_reset_code(&ctx, wrong.plaintext())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

// ============================================================================
// OAuth
// ============================================================================

#[tokio::test]
async fn test_google_login_and_exchange() {
    let fx = TestFixture::new().await;
    let ctx = fx.intermediate_in_org().await;
    let target = OAuthTarget::from(OAuthProvider::Google);

    let url = fx.service.get_oauth_redirect_url(&ctx, target, None).await.unwrap();
    assert!(url.contains("google-oauth-callback"));
    let state = state_from(&url);

    fx.oauth.set_identity(google_identity("g-123", "ada@acme.test"));
    let session = fx
        .service
        .redeem_oauth_code(&ctx, target, "good-code", &state, None)
        .await
        .unwrap();
    assert_eq!(session.google_user_id.as_deref(), Some("g-123"));
    assert_eq!(session.google_hosted_domain.as_deref(), Some("acme.test"));
    assert_eq!(session.email.as_deref(), Some("ada@acme.test"));
    assert_eq!(session.primary_auth_factor, Some(PrimaryAuthFactor::Google));
    assert!(session.oauth_state_sha256.is_none());

    let exchanged = fx
        .service
        .exchange_intermediate_session_for_session(&ctx)
        .await
        .unwrap();
    assert!(exchanged.user_created);
    assert_eq!(exchanged.user.google_user_id.as_deref(), Some("g-123"));
    assert_eq!(exchanged.user.display_name.as_deref(), Some("Ada Lovelace"));

    let verified = fx.store.verified_emails().await;
    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].email, "ada@acme.test");
}

#[tokio::test]
async fn test_oauth_state_is_single_use() {
    let fx = TestFixture::new().await;
    let ctx = fx.intermediate().await;
    let target = OAuthTarget::from(OAuthProvider::Github);
    fx.oauth.set_identity(google_identity("42", "ada@acme.test"));

    let url = fx.service.get_oauth_redirect_url(&ctx, target, None).await.unwrap();
    let state = state_from(&url);
    fx.service
        .redeem_oauth_code(&ctx, target, "good-code", &state, None)
        .await
        .unwrap();

    let err = fx
        .service
        .redeem_oauth_code(&ctx, target, "good-code", &state, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(fx.oauth.redemptions().len(), 1);
}

#[tokio::test]
async fn test_oauth_state_must_match_target_and_value() {
    let fx = TestFixture::new().await;
    let ctx = fx.intermediate().await;
    fx.oauth.set_identity(google_identity("g-123", "ada@acme.test"));

    let url = fx
        .service
        .get_oauth_redirect_url(&ctx, OAuthProvider::Google.into(), None)
        .await
        .unwrap();
    let state = state_from(&url);

    let err = fx
        .service
        .redeem_oauth_code(&ctx, OAuthProvider::Microsoft.into(), "good-code", &state, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let forged = SecretToken::generate(SecretTokenKind::OAuthState);
    let err = fx
        .service
        .redeem_oauth_code(&ctx, OAuthProvider::Google.into(), "good-code", forged.plaintext(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    assert!(fx.oauth.redemptions().is_empty());
}

#[tokio::test]
async fn test_repeat_provider_logins_keep_one_verified_email() {
    let fx = TestFixture::new().await;
    let target = OAuthTarget::from(OAuthProvider::Google);
    fx.oauth.set_identity(google_identity("g-123", "ada@acme.test"));

    for _ in 0..3 {
        let ctx = fx.intermediate().await;
        let url = fx.service.get_oauth_redirect_url(&ctx, target, None).await.unwrap();
        fx.service
            .redeem_oauth_code(&ctx, target, "good-code", &state_from(&url), None)
            .await
            .unwrap();
    }

    let verified = fx.store.verified_emails().await;
    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].provider_subject.as_deref(), Some("g-123"));
}

#[tokio::test]
async fn test_newer_redirect_supersedes_earlier_state() {
    let fx = TestFixture::new().await;
    let ctx = fx.intermediate().await;
    let target = OAuthTarget::from(OAuthProvider::Google);
    fx.oauth.set_identity(google_identity("g-123", "ada@acme.test"));

    let first = fx.service.get_oauth_redirect_url(&ctx, target, None).await.unwrap();
    let second = fx.service.get_oauth_redirect_url(&ctx, target, None).await.unwrap();
    assert_ne!(state_from(&first), state_from(&second));

    let err = fx
        .service
        .redeem_oauth_code(&ctx, target, "good-code", &state_from(&first), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(fx.oauth.redemptions().is_empty());

    let session = fx
        .service
        .redeem_oauth_code(&ctx, target, "good-code", &state_from(&second), None)
        .await
        .unwrap();
    assert_eq!(session.google_user_id.as_deref(), Some("g-123"));
}

#[tokio::test]
async fn test_state_consumed_during_redemption_fails_write() {
    let fx = TestFixture::new().await;
    let ctx = fx.intermediate().await;
    let target = OAuthTarget::from(OAuthProvider::Google);
    fx.oauth.set_identity(google_identity("g-123", "ada@acme.test"));

    let url = fx.service.get_oauth_redirect_url(&ctx, target, None).await.unwrap();
    fx.oauth.consume_state_during_redeem(fx.store.clone(), &ctx);

    let err = fx
        .service
        .redeem_oauth_code(&ctx, target, "good-code", &state_from(&url), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert_eq!(fx.oauth.redemptions().len(), 1);

    let session = fx.store.intermediate_session(ctx.intermediate_session_id).await.unwrap();
    assert!(session.google_user_id.is_none());
    assert_eq!(session.primary_auth_factor, None);
    assert!(!fx
        .audit_event_names()
        .await
        .contains(&"intermediate_sessions.oauth_code_redeemed".to_string()));
}

#[tokio::test]
async fn test_rejected_code_is_invalid_argument() {
    let fx = TestFixture::new().await;
    let ctx = fx.intermediate().await;
    let target = OAuthTarget::from(OAuthProvider::Google);

    let url = fx.service.get_oauth_redirect_url(&ctx, target, None).await.unwrap();
    let err = fx
        .service
        .redeem_oauth_code(&ctx, target, "bad-code", &state_from(&url), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let session = fx.store.intermediate_session(ctx.intermediate_session_id).await.unwrap();
    assert!(session.google_user_id.is_none());
}

#[tokio::test]
async fn test_disabled_provider_is_refused() {
    let project = Project::new("Acme").with_login_methods(LoginMethods::default().with(LoginMethod::Password));
    let organization = Organization::new(project.id, "Acme").with_login_methods(LoginMethods::all());
    let fx = TestFixture::seeded(project, organization).await;
    let ctx = fx.intermediate().await;

    let err = fx
        .service
        .get_oauth_redirect_url(&ctx, OAuthProvider::Google.into(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert!(fx.store.audit_log_events().await.is_empty());
}

#[tokio::test]
async fn test_tenant_client_secret_is_decrypted_for_redemption() {
    let project = Project::new("Acme")
        .with_login_methods(LoginMethods::all())
        .with_oauth_client(
            OAuthProvider::Github,
            OAuthClientCredentials::new("tenant-client", b"sealed-secret".to_vec()),
        );
    let organization = Organization::new(project.id, "Acme").with_login_methods(LoginMethods::all());
    let fx = TestFixture::seeded(project, organization).await;
    let ctx = fx.intermediate().await;
    let target = OAuthTarget::from(OAuthProvider::Github);

    let err = fx.service.get_oauth_redirect_url(&ctx, target, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let callback = "https://login.acme.test/github/callback";
    let url = fx
        .service
        .get_oauth_redirect_url(&ctx, target, Some(callback))
        .await
        .unwrap();
    assert!(url.contains("client_id=tenant-client"));

    fx.oauth.set_identity(google_identity("42", "ada@acme.test"));
    fx.service
        .redeem_oauth_code(&ctx, target, "good-code", &state_from(&url), Some(callback))
        .await
        .unwrap();

    let redemption = &fx.oauth.redemptions()[0];
    assert_eq!(redemption.client_id, "tenant-client");
    assert_eq!(redemption.client_secret, "plain:sealed-secret");
    assert_eq!(redemption.redirect_uri, callback);
}

#[tokio::test]
async fn test_oidc_connection_binds_organization() {
    let fx = TestFixture::new().await;
    let connection = OidcConnection::new(
        fx.organization.id,
        "https://idp.acme.test/.well-known/openid-configuration",
        "oidc-client",
        b"sealed".to_vec(),
    );
    fx.store.insert_oidc_connection(connection.clone()).await;
    let ctx = fx.intermediate().await;
    let target = OAuthTarget::OidcConnection {
        connection_id: connection.id,
    };
    let callback = "https://login.acme.test/oidc/callback";

    let url = fx
        .service
        .get_oauth_redirect_url(&ctx, target, Some(callback))
        .await
        .unwrap();
    assert!(url.starts_with("https://idp.acme.test/authorize"));

    let mut identity = google_identity("oidc-sub", "ada@acme.test");
    identity.hosted_domain = None;
    fx.oauth.set_identity(identity);
    let session = fx
        .service
        .redeem_oauth_code(&ctx, target, "good-code", &state_from(&url), Some(callback))
        .await
        .unwrap();
    assert_eq!(session.organization_id, Some(fx.organization.id));
    assert_eq!(session.verified_oidc_connection_id, Some(connection.id));
    assert_eq!(session.primary_auth_factor, Some(PrimaryAuthFactor::Oidc));

    let exchanged = fx
        .service
        .exchange_intermediate_session_for_session(&ctx)
        .await
        .unwrap();
    assert_eq!(exchanged.session.primary_auth_factor, PrimaryAuthFactor::Oidc);
}

// ============================================================================
// SAML
// ============================================================================

#[tokio::test]
async fn test_saml_assertion_binds_organization_and_exchanges() {
    let fx = TestFixture::new().await;
    let connection = SamlConnection::new(fx.organization.id);
    fx.store.insert_saml_connection(connection.clone()).await;
    fx.saml.set_email("ada@acme.test");
    let ctx = fx.intermediate().await;

    let session = fx
        .service
        .redeem_saml_assertion(&ctx, connection.id, VALID_SAML_RESPONSE)
        .await
        .unwrap();
    assert_eq!(session.organization_id, Some(fx.organization.id));
    assert_eq!(session.verified_saml_connection_id, Some(connection.id));
    assert_eq!(session.email.as_deref(), Some("ada@acme.test"));

    let exchanged = fx
        .service
        .exchange_intermediate_session_for_session(&ctx)
        .await
        .unwrap();
    assert!(exchanged.user_created);
    assert_eq!(exchanged.session.primary_auth_factor, PrimaryAuthFactor::Saml);
}

#[tokio::test]
async fn test_saml_rejections() {
    let fx = TestFixture::new().await;
    let connection = SamlConnection::new(fx.organization.id);
    fx.store.insert_saml_connection(connection.clone()).await;
    fx.saml.set_email("ada@acme.test");
    let ctx = fx.intermediate().await;

    let err = fx
        .service
        .redeem_saml_assertion(&ctx, connection.id, "forged")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = fx
        .service
        .redeem_saml_assertion(&ctx, uuid::Uuid::now_v7(), VALID_SAML_RESPONSE)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ============================================================================
// Exchange
// ============================================================================

#[tokio::test]
async fn test_exchange_happens_at_most_once() {
    let fx = TestFixture::new().await;
    let ctx = fx.intermediate_in_org().await;
    fx.verify_email(&ctx, "ada@acme.test").await;

    fx.service
        .exchange_intermediate_session_for_session(&ctx)
        .await
        .unwrap();
    let err = fx
        .service
        .exchange_intermediate_session_for_session(&ctx)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);

    let err = fx
        .service
        .issue_email_verification_challenge(&ctx, "ada@acme.test")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert_eq!(fx.store.sessions().await.len(), 1);
}

#[tokio::test]
async fn test_expired_intermediate_session_is_unauthenticated() {
    let fx = TestFixture::new().await;
    let session = IntermediateSession::new(fx.project.id, Duration::minutes(-1));
    let ctx = portcullis_auth::IntermediateContext::new(fx.project.id, session.id);
    fx.store.insert_intermediate_session(session).await;

    let err = fx
        .service
        .issue_email_verification_challenge(&ctx, "ada@acme.test")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
}

#[tokio::test]
async fn test_exchange_needs_organization_and_factor() {
    let fx = TestFixture::new().await;

    let ctx = fx.intermediate().await;
    fx.verify_email(&ctx, "ada@acme.test").await;
    let err = fx
        .service
        .exchange_intermediate_session_for_session(&ctx)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);

    let ctx = fx.intermediate_in_org().await;
    let err = fx
        .service
        .exchange_intermediate_session_for_session(&ctx)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
}

#[tokio::test]
async fn test_exchange_requires_second_factor_when_organization_demands_it() {
    let project = Project::new("Acme").with_login_methods(LoginMethods::all());
    let organization = Organization::new(project.id, "Acme")
        .with_login_methods(LoginMethods::all())
        .with_require_mfa(true);
    let fx = TestFixture::seeded(project, organization).await;
    let ctx = fx.intermediate_in_org().await;
    fx.verify_email(&ctx, "ada@acme.test").await;

    let err = fx
        .service
        .exchange_intermediate_session_for_session(&ctx)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert!(fx.store.sessions().await.is_empty());
}

#[tokio::test]
async fn test_exchange_refuses_conflicting_provider_subject() {
    let fx = TestFixture::new().await;
    let existing = portcullis_model::User::new(fx.organization.id, "ada@acme.test")
        .with_provider_subject(OAuthProvider::Google, "g-original");
    fx.store.insert_user(existing).await;

    let ctx = fx.intermediate_in_org().await;
    let target = OAuthTarget::from(OAuthProvider::Google);
    let url = fx.service.get_oauth_redirect_url(&ctx, target, None).await.unwrap();
    fx.oauth.set_identity(google_identity("g-other", "ada@acme.test"));
    fx.service
        .redeem_oauth_code(&ctx, target, "good-code", &state_from(&url), None)
        .await
        .unwrap();

    let err = fx
        .service
        .exchange_intermediate_session_for_session(&ctx)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert!(fx.store.sessions().await.is_empty());
}

#[tokio::test]
async fn test_exchange_fails_atomically_when_audit_write_fails() {
    let fx = TestFixture::new().await;
    let ctx = fx.intermediate_in_org().await;
    fx.verify_email(&ctx, "ada@acme.test").await;

    fx.store.fail_audit_writes(true);
    let err = fx
        .service
        .exchange_intermediate_session_for_session(&ctx)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    fx.store.fail_audit_writes(false);

    assert!(fx.store.sessions().await.is_empty());
    assert!(fx.store.users_in_organization(fx.organization.id).await.is_empty());
    let session = fx.store.intermediate_session(ctx.intermediate_session_id).await.unwrap();
    assert!(!session.is_exchanged());
}
