//! Store and transaction traits

use async_trait::async_trait;
use chrono::NaiveDate;
use portcullis_audit::AuditLogEvent;
use portcullis_model::{
    IntermediateSession, OAuthProvider, OidcConnection, Organization, Project, SamlConnection,
    Session, User, VerifiedEmail,
};
use uuid::Uuid;

use crate::error::StoreResult;

/// Source of transactions.
#[async_trait]
pub trait Store: Send + Sync {
    /// Begin a transaction.
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>>;
}

/// A unit of work against the store.
///
/// Dropping a transaction without calling [`Transaction::commit`] discards
/// every write made through it.
#[async_trait]
pub trait Transaction: Send {
    // ------------------------------------------------------------------
    // Tenants
    // ------------------------------------------------------------------

    async fn get_project(&mut self, project_id: Uuid) -> StoreResult<Option<Project>>;

    /// Organization `organization_id`, only if it belongs to `project_id`.
    async fn get_organization(
        &mut self,
        project_id: Uuid,
        organization_id: Uuid,
    ) -> StoreResult<Option<Organization>>;

    /// SAML connection `connection_id`, only if its organization belongs to
    /// `project_id`.
    async fn get_saml_connection(
        &mut self,
        project_id: Uuid,
        connection_id: Uuid,
    ) -> StoreResult<Option<SamlConnection>>;

    /// OIDC connection `connection_id`, only if its organization belongs to
    /// `project_id`.
    async fn get_oidc_connection(
        &mut self,
        project_id: Uuid,
        connection_id: Uuid,
    ) -> StoreResult<Option<OidcConnection>>;

    // ------------------------------------------------------------------
    // Intermediate sessions
    // ------------------------------------------------------------------

    /// Load and lock an intermediate session of `project_id`.
    async fn get_intermediate_session(
        &mut self,
        project_id: Uuid,
        intermediate_session_id: Uuid,
    ) -> StoreResult<Option<IntermediateSession>>;

    /// Overwrite an intermediate session.
    async fn update_intermediate_session(&mut self, session: &IntermediateSession) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    async fn get_user(&mut self, user_id: Uuid) -> StoreResult<Option<User>>;

    /// Active user of `organization_id` with `email`.
    async fn get_user_by_email(
        &mut self,
        organization_id: Uuid,
        email: &str,
    ) -> StoreResult<Option<User>>;

    /// Active user of `organization_id` linked to `subject` at `provider`.
    async fn get_user_by_provider_subject(
        &mut self,
        organization_id: Uuid,
        provider: OAuthProvider,
        subject: &str,
    ) -> StoreResult<Option<User>>;

    /// Active users with a password and `email`, across every organization
    /// of `project_id` whose logins and password login are enabled.
    async fn list_password_login_candidates(
        &mut self,
        project_id: Uuid,
        email: &str,
    ) -> StoreResult<Vec<User>>;

    /// Insert a user. Fails with a conflict when the email is taken in the
    /// organization.
    async fn create_user(&mut self, user: &User) -> StoreResult<()>;

    async fn update_user(&mut self, user: &User) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Verified emails
    // ------------------------------------------------------------------

    /// Record a verified email. A row for the same project, email, provider
    /// and subject already present is kept as is.
    async fn upsert_verified_email(&mut self, verified_email: &VerifiedEmail) -> StoreResult<()>;

    /// Whether `provider` attested `email` for `subject` in `project_id`.
    async fn is_email_verified_by_provider(
        &mut self,
        project_id: Uuid,
        email: &str,
        provider: OAuthProvider,
        subject: &str,
    ) -> StoreResult<bool>;

    // ------------------------------------------------------------------
    // Email quota
    // ------------------------------------------------------------------

    /// Atomically add one to the project's email usage for `date` and
    /// return the new total.
    async fn increment_email_quota_daily_usage(
        &mut self,
        project_id: Uuid,
        date: NaiveDate,
    ) -> StoreResult<i64>;

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    async fn create_session(&mut self, session: &Session) -> StoreResult<()>;

    async fn get_session_by_refresh_token_sha256(
        &mut self,
        refresh_token_sha256: &[u8],
    ) -> StoreResult<Option<Session>>;

    // ------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------

    async fn create_audit_log_event(&mut self, event: &AuditLogEvent) -> StoreResult<()>;

    /// Make every write in this transaction durable.
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
