//! PostgreSQL store backed by sqlx
//!
//! Intermediate sessions and users are read `FOR UPDATE` so that concurrent
//! requests against the same session or the same account serialize on the
//! row lock instead of overwriting each other.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use portcullis_audit::AuditLogEvent;
use portcullis_model::{
    IntermediateSession, LoginMethods, OAuthClientCredentials, OAuthProvider, OAuthTarget,
    OidcConnection, Organization, PrimaryAuthFactor, Project, SamlConnection, Session, User,
    VerifiedEmail,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Postgres;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{Store, Transaction};

/// PostgreSQL [`Store`] implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore").finish_non_exhaustive()
    }
}

impl PgStore {
    /// Connect a pool to `database_url`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        info!(max_connections, "Connecting to PostgreSQL");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;

        info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

fn conflict_or_database(entity: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |err| match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict { entity },
        _ => StoreError::from(err),
    }
}

fn corrupt(entity: &'static str, message: impl ToString) -> StoreError {
    StoreError::Corrupt {
        entity,
        message: message.to_string(),
    }
}

// ============================================================================
// Rows
// ============================================================================

#[derive(sqlx::FromRow)]
struct LoginMethodsRow {
    log_in_with_password: bool,
    log_in_with_google: bool,
    log_in_with_microsoft: bool,
    log_in_with_github: bool,
    log_in_with_email: bool,
    log_in_with_saml: bool,
    log_in_with_oidc: bool,
    log_in_with_authenticator_app: bool,
    log_in_with_passkey: bool,
}

impl From<LoginMethodsRow> for LoginMethods {
    fn from(row: LoginMethodsRow) -> Self {
        Self {
            password: row.log_in_with_password,
            google: row.log_in_with_google,
            microsoft: row.log_in_with_microsoft,
            github: row.log_in_with_github,
            email: row.log_in_with_email,
            saml: row.log_in_with_saml,
            oidc: row.log_in_with_oidc,
            authenticator_app: row.log_in_with_authenticator_app,
            passkey: row.log_in_with_passkey,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: Uuid,
    display_name: String,
    logins_disabled: bool,
    #[sqlx(flatten)]
    login_methods: LoginMethodsRow,
    google_oauth_client_id: Option<String>,
    google_oauth_client_secret_ciphertext: Option<Vec<u8>>,
    microsoft_oauth_client_id: Option<String>,
    microsoft_oauth_client_secret_ciphertext: Option<Vec<u8>>,
    github_oauth_client_id: Option<String>,
    github_oauth_client_secret_ciphertext: Option<Vec<u8>>,
    email_quota_daily: Option<i64>,
    email_send_from_domain: String,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
}

fn oauth_client(id: Option<String>, secret: Option<Vec<u8>>) -> Option<OAuthClientCredentials> {
    match (id, secret) {
        (Some(client_id), Some(client_secret_ciphertext)) => Some(OAuthClientCredentials {
            client_id,
            client_secret_ciphertext,
        }),
        _ => None,
    }
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            display_name: row.display_name,
            logins_disabled: row.logins_disabled,
            login_methods: row.login_methods.into(),
            google_oauth_client: oauth_client(
                row.google_oauth_client_id,
                row.google_oauth_client_secret_ciphertext,
            ),
            microsoft_oauth_client: oauth_client(
                row.microsoft_oauth_client_id,
                row.microsoft_oauth_client_secret_ciphertext,
            ),
            github_oauth_client: oauth_client(
                row.github_oauth_client_id,
                row.github_oauth_client_secret_ciphertext,
            ),
            email_quota_daily: row.email_quota_daily,
            email_send_from_domain: row.email_send_from_domain,
            create_time: row.create_time,
            update_time: row.update_time,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrganizationRow {
    id: Uuid,
    project_id: Uuid,
    display_name: String,
    logins_disabled: bool,
    #[sqlx(flatten)]
    login_methods: LoginMethodsRow,
    require_mfa: bool,
    domains: Vec<String>,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            display_name: row.display_name,
            logins_disabled: row.logins_disabled,
            login_methods: row.login_methods.into(),
            require_mfa: row.require_mfa,
            domains: row.domains,
            create_time: row.create_time,
            update_time: row.update_time,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    organization_id: Uuid,
    email: String,
    password_bcrypt: Option<String>,
    google_user_id: Option<String>,
    microsoft_user_id: Option<String>,
    github_user_id: Option<String>,
    failed_password_attempts: i32,
    password_lockout_expire_time: Option<DateTime<Utc>>,
    is_owner: bool,
    display_name: Option<String>,
    profile_picture_url: Option<String>,
    deactivate_time: Option<DateTime<Utc>>,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            email: row.email,
            password_bcrypt: row.password_bcrypt,
            google_user_id: row.google_user_id,
            microsoft_user_id: row.microsoft_user_id,
            github_user_id: row.github_user_id,
            failed_password_attempts: row.failed_password_attempts,
            password_lockout_expire_time: row.password_lockout_expire_time,
            is_owner: row.is_owner,
            display_name: row.display_name,
            profile_picture_url: row.profile_picture_url,
            deactivate_time: row.deactivate_time,
            create_time: row.create_time,
            update_time: row.update_time,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SamlConnectionRow {
    id: Uuid,
    organization_id: Uuid,
    is_primary: bool,
    idp_redirect_url: Option<String>,
    idp_entity_id: Option<String>,
    idp_x509_certificate: Option<String>,
    create_time: DateTime<Utc>,
}

impl From<SamlConnectionRow> for SamlConnection {
    fn from(row: SamlConnectionRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            primary: row.is_primary,
            idp_redirect_url: row.idp_redirect_url,
            idp_entity_id: row.idp_entity_id,
            idp_x509_certificate: row.idp_x509_certificate,
            create_time: row.create_time,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OidcConnectionRow {
    id: Uuid,
    organization_id: Uuid,
    is_primary: bool,
    configuration_url: String,
    client_id: String,
    client_secret_ciphertext: Vec<u8>,
    create_time: DateTime<Utc>,
}

impl From<OidcConnectionRow> for OidcConnection {
    fn from(row: OidcConnectionRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            primary: row.is_primary,
            configuration_url: row.configuration_url,
            client_id: row.client_id,
            client_secret_ciphertext: row.client_secret_ciphertext,
            create_time: row.create_time,
        }
    }
}

#[derive(sqlx::FromRow)]
struct IntermediateSessionRow {
    id: Uuid,
    project_id: Uuid,
    organization_id: Option<Uuid>,
    email: Option<String>,
    email_verification_challenge_completed: bool,
    email_verification_challenge_sha256: Option<Vec<u8>>,
    password_verified: bool,
    passkey_verified: bool,
    authenticator_app_verified: bool,
    primary_auth_factor: Option<String>,
    oauth_state_sha256: Option<Vec<u8>>,
    oauth_state_target: Option<Json<OAuthTarget>>,
    google_user_id: Option<String>,
    google_hosted_domain: Option<String>,
    microsoft_user_id: Option<String>,
    github_user_id: Option<String>,
    verified_saml_connection_id: Option<Uuid>,
    verified_oidc_connection_id: Option<Uuid>,
    display_name: Option<String>,
    profile_picture_url: Option<String>,
    password_reset_code_sha256: Option<Vec<u8>>,
    password_reset_code_verified: bool,
    new_user_password_bcrypt: Option<String>,
    create_time: DateTime<Utc>,
    expire_time: DateTime<Utc>,
    exchange_time: Option<DateTime<Utc>>,
}

impl TryFrom<IntermediateSessionRow> for IntermediateSession {
    type Error = StoreError;

    fn try_from(row: IntermediateSessionRow) -> Result<Self, Self::Error> {
        let primary_auth_factor = row
            .primary_auth_factor
            .map(|f| f.parse::<PrimaryAuthFactor>())
            .transpose()
            .map_err(|e| corrupt("intermediate session", e))?;

        Ok(Self {
            id: row.id,
            project_id: row.project_id,
            organization_id: row.organization_id,
            email: row.email,
            email_verification_challenge_completed: row.email_verification_challenge_completed,
            email_verification_challenge_sha256: row.email_verification_challenge_sha256,
            password_verified: row.password_verified,
            passkey_verified: row.passkey_verified,
            authenticator_app_verified: row.authenticator_app_verified,
            primary_auth_factor,
            oauth_state_sha256: row.oauth_state_sha256,
            oauth_state_target: row.oauth_state_target.map(|Json(t)| t),
            google_user_id: row.google_user_id,
            google_hosted_domain: row.google_hosted_domain,
            microsoft_user_id: row.microsoft_user_id,
            github_user_id: row.github_user_id,
            verified_saml_connection_id: row.verified_saml_connection_id,
            verified_oidc_connection_id: row.verified_oidc_connection_id,
            display_name: row.display_name,
            profile_picture_url: row.profile_picture_url,
            password_reset_code_sha256: row.password_reset_code_sha256,
            password_reset_code_verified: row.password_reset_code_verified,
            new_user_password_bcrypt: row.new_user_password_bcrypt,
            create_time: row.create_time,
            expire_time: row.expire_time,
            exchange_time: row.exchange_time,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    refresh_token_sha256: Vec<u8>,
    primary_auth_factor: String,
    impersonator_user_id: Option<Uuid>,
    create_time: DateTime<Utc>,
    expire_time: DateTime<Utc>,
    last_active_time: DateTime<Utc>,
    revoked: bool,
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            refresh_token_sha256: row.refresh_token_sha256,
            primary_auth_factor: row
                .primary_auth_factor
                .parse()
                .map_err(|e| corrupt("session", e))?,
            impersonator_user_id: row.impersonator_user_id,
            create_time: row.create_time,
            expire_time: row.expire_time,
            last_active_time: row.last_active_time,
            revoked: row.revoked,
        })
    }
}

fn provider_column(provider: OAuthProvider) -> &'static str {
    match provider {
        OAuthProvider::Google => "google_user_id",
        OAuthProvider::Microsoft => "microsoft_user_id",
        OAuthProvider::Github => "github_user_id",
    }
}

// ============================================================================
// Transaction
// ============================================================================

#[async_trait]
impl Transaction for PgTransaction {
    async fn get_project(&mut self, project_id: Uuid) -> StoreResult<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Project::from))
    }

    async fn get_organization(
        &mut self,
        project_id: Uuid,
        organization_id: Uuid,
    ) -> StoreResult<Option<Organization>> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            "SELECT * FROM organizations WHERE id = $1 AND project_id = $2",
        )
        .bind(organization_id)
        .bind(project_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Organization::from))
    }

    async fn get_saml_connection(
        &mut self,
        project_id: Uuid,
        connection_id: Uuid,
    ) -> StoreResult<Option<SamlConnection>> {
        let row = sqlx::query_as::<_, SamlConnectionRow>(
            r"
            SELECT saml_connections.*
            FROM saml_connections
            JOIN organizations ON organizations.id = saml_connections.organization_id
            WHERE saml_connections.id = $1 AND organizations.project_id = $2
            ",
        )
        .bind(connection_id)
        .bind(project_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(SamlConnection::from))
    }

    async fn get_oidc_connection(
        &mut self,
        project_id: Uuid,
        connection_id: Uuid,
    ) -> StoreResult<Option<OidcConnection>> {
        let row = sqlx::query_as::<_, OidcConnectionRow>(
            r"
            SELECT oidc_connections.*
            FROM oidc_connections
            JOIN organizations ON organizations.id = oidc_connections.organization_id
            WHERE oidc_connections.id = $1 AND organizations.project_id = $2
            ",
        )
        .bind(connection_id)
        .bind(project_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(OidcConnection::from))
    }

    async fn get_intermediate_session(
        &mut self,
        project_id: Uuid,
        intermediate_session_id: Uuid,
    ) -> StoreResult<Option<IntermediateSession>> {
        let row = sqlx::query_as::<_, IntermediateSessionRow>(
            "SELECT * FROM intermediate_sessions WHERE id = $1 AND project_id = $2 FOR UPDATE",
        )
        .bind(intermediate_session_id)
        .bind(project_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(IntermediateSession::try_from).transpose()
    }

    async fn update_intermediate_session(&mut self, session: &IntermediateSession) -> StoreResult<()> {
        let result = sqlx::query(
            r"
            UPDATE intermediate_sessions SET
                organization_id = $2,
                email = $3,
                email_verification_challenge_completed = $4,
                email_verification_challenge_sha256 = $5,
                password_verified = $6,
                passkey_verified = $7,
                authenticator_app_verified = $8,
                primary_auth_factor = $9,
                oauth_state_sha256 = $10,
                oauth_state_target = $11,
                google_user_id = $12,
                google_hosted_domain = $13,
                microsoft_user_id = $14,
                github_user_id = $15,
                verified_saml_connection_id = $16,
                verified_oidc_connection_id = $17,
                display_name = $18,
                profile_picture_url = $19,
                password_reset_code_sha256 = $20,
                password_reset_code_verified = $21,
                new_user_password_bcrypt = $22,
                exchange_time = $23
            WHERE id = $1
            ",
        )
        .bind(session.id)
        .bind(session.organization_id)
        .bind(session.email.as_deref())
        .bind(session.email_verification_challenge_completed)
        .bind(session.email_verification_challenge_sha256.as_deref())
        .bind(session.password_verified)
        .bind(session.passkey_verified)
        .bind(session.authenticator_app_verified)
        .bind(session.primary_auth_factor.map(|f| f.as_str()))
        .bind(session.oauth_state_sha256.as_deref())
        .bind(session.oauth_state_target.map(Json))
        .bind(session.google_user_id.as_deref())
        .bind(session.google_hosted_domain.as_deref())
        .bind(session.microsoft_user_id.as_deref())
        .bind(session.github_user_id.as_deref())
        .bind(session.verified_saml_connection_id)
        .bind(session.verified_oidc_connection_id)
        .bind(session.display_name.as_deref())
        .bind(session.profile_picture_url.as_deref())
        .bind(session.password_reset_code_sha256.as_deref())
        .bind(session.password_reset_code_verified)
        .bind(session.new_user_password_bcrypt.as_deref())
        .bind(session.exchange_time)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "intermediate session",
            });
        }
        Ok(())
    }

    async fn get_user(&mut self, user_id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(User::from))
    }

    async fn get_user_by_email(
        &mut self,
        organization_id: Uuid,
        email: &str,
    ) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r"
            SELECT * FROM users
            WHERE organization_id = $1 AND email = $2 AND deactivate_time IS NULL
            FOR UPDATE
            ",
        )
        .bind(organization_id)
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(User::from))
    }

    async fn get_user_by_provider_subject(
        &mut self,
        organization_id: Uuid,
        provider: OAuthProvider,
        subject: &str,
    ) -> StoreResult<Option<User>> {
        let query = format!(
            "SELECT * FROM users WHERE organization_id = $1 AND {} = $2 AND deactivate_time IS NULL FOR UPDATE",
            provider_column(provider)
        );
        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(organization_id)
            .bind(subject)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(User::from))
    }

    async fn list_password_login_candidates(
        &mut self,
        project_id: Uuid,
        email: &str,
    ) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            r"
            SELECT users.*
            FROM users
            JOIN organizations ON organizations.id = users.organization_id
            WHERE organizations.project_id = $1
              AND users.email = $2
              AND users.password_bcrypt IS NOT NULL
              AND users.deactivate_time IS NULL
              AND NOT organizations.logins_disabled
              AND organizations.log_in_with_password
            ORDER BY users.id
            FOR UPDATE OF users
            ",
        )
        .bind(project_id)
        .bind(email)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn create_user(&mut self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO users (
                id, organization_id, email, password_bcrypt, google_user_id, microsoft_user_id,
                github_user_id, failed_password_attempts, password_lockout_expire_time, is_owner,
                display_name, profile_picture_url, deactivate_time, create_time, update_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ",
        )
        .bind(user.id)
        .bind(user.organization_id)
        .bind(&user.email)
        .bind(user.password_bcrypt.as_deref())
        .bind(user.google_user_id.as_deref())
        .bind(user.microsoft_user_id.as_deref())
        .bind(user.github_user_id.as_deref())
        .bind(user.failed_password_attempts)
        .bind(user.password_lockout_expire_time)
        .bind(user.is_owner)
        .bind(user.display_name.as_deref())
        .bind(user.profile_picture_url.as_deref())
        .bind(user.deactivate_time)
        .bind(user.create_time)
        .bind(user.update_time)
        .execute(&mut *self.tx)
        .await
        .map_err(conflict_or_database("user"))?;
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> StoreResult<()> {
        let result = sqlx::query(
            r"
            UPDATE users SET
                email = $2,
                password_bcrypt = $3,
                google_user_id = $4,
                microsoft_user_id = $5,
                github_user_id = $6,
                failed_password_attempts = $7,
                password_lockout_expire_time = $8,
                display_name = $9,
                profile_picture_url = $10,
                update_time = $11
            WHERE id = $1
            ",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(user.password_bcrypt.as_deref())
        .bind(user.google_user_id.as_deref())
        .bind(user.microsoft_user_id.as_deref())
        .bind(user.github_user_id.as_deref())
        .bind(user.failed_password_attempts)
        .bind(user.password_lockout_expire_time)
        .bind(user.display_name.as_deref())
        .bind(user.profile_picture_url.as_deref())
        .bind(user.update_time)
        .execute(&mut *self.tx)
        .await
        .map_err(conflict_or_database("user"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "user" });
        }
        Ok(())
    }

    async fn upsert_verified_email(&mut self, verified_email: &VerifiedEmail) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO verified_emails (id, project_id, email, provider, provider_subject, create_time)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (project_id, email, (coalesce(provider, '')), (coalesce(provider_subject, '')))
            DO NOTHING
            ",
        )
        .bind(verified_email.id)
        .bind(verified_email.project_id)
        .bind(&verified_email.email)
        .bind(verified_email.provider.map(|p| p.as_str()))
        .bind(verified_email.provider_subject.as_deref())
        .bind(verified_email.create_time)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn is_email_verified_by_provider(
        &mut self,
        project_id: Uuid,
        email: &str,
        provider: OAuthProvider,
        subject: &str,
    ) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS (
                SELECT 1 FROM verified_emails
                WHERE project_id = $1 AND email = $2 AND provider = $3 AND provider_subject = $4
            )
            ",
        )
        .bind(project_id)
        .bind(email)
        .bind(provider.as_str())
        .bind(subject)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn increment_email_quota_daily_usage(
        &mut self,
        project_id: Uuid,
        date: NaiveDate,
    ) -> StoreResult<i64> {
        let usage: i64 = sqlx::query_scalar(
            r"
            INSERT INTO project_email_quota_daily_usage (project_id, date, quota_usage)
            VALUES ($1, $2, 1)
            ON CONFLICT (project_id, date)
            DO UPDATE SET quota_usage = project_email_quota_daily_usage.quota_usage + 1
            RETURNING quota_usage
            ",
        )
        .bind(project_id)
        .bind(date)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(usage)
    }

    async fn create_session(&mut self, session: &Session) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO sessions (
                id, user_id, refresh_token_sha256, primary_auth_factor, impersonator_user_id,
                create_time, expire_time, last_active_time, revoked
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.refresh_token_sha256)
        .bind(session.primary_auth_factor.as_str())
        .bind(session.impersonator_user_id)
        .bind(session.create_time)
        .bind(session.expire_time)
        .bind(session.last_active_time)
        .bind(session.revoked)
        .execute(&mut *self.tx)
        .await
        .map_err(conflict_or_database("session"))?;
        Ok(())
    }

    async fn get_session_by_refresh_token_sha256(
        &mut self,
        refresh_token_sha256: &[u8],
    ) -> StoreResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE refresh_token_sha256 = $1",
        )
        .bind(refresh_token_sha256)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Session::try_from).transpose()
    }

    async fn create_audit_log_event(&mut self, event: &AuditLogEvent) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO audit_log_events (
                id, project_id, organization_id, actor_type, actor, resource_type, resource_id,
                event_name, event_time, event_details
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(event.id)
        .bind(event.project_id)
        .bind(event.organization_id)
        .bind(event.actor.kind())
        .bind(Json(&event.actor))
        .bind(event.resource_type.map(|r| r.as_str()))
        .bind(event.resource_id)
        .bind(&event.event_name)
        .bind(event.event_time)
        .bind(&event.event_details)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
