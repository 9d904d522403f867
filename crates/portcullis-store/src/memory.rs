//! In-memory store
//!
//! Suitable for single-process deployments and tests. Transactions are
//! serialized: a transaction holds the store lock from `begin` until it is
//! committed or dropped, and works on a private copy of the tables that
//! replaces the shared copy on commit.

use async_trait::async_trait;
use chrono::NaiveDate;
use portcullis_audit::AuditLogEvent;
use portcullis_model::{
    IntermediateSession, OAuthProvider, OidcConnection, Organization, Project, SamlConnection,
    Session, User, VerifiedEmail,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{Store, Transaction};

#[derive(Debug, Clone, Default)]
struct Tables {
    projects: HashMap<Uuid, Project>,
    organizations: HashMap<Uuid, Organization>,
    users: HashMap<Uuid, User>,
    verified_emails: Vec<VerifiedEmail>,
    intermediate_sessions: HashMap<Uuid, IntermediateSession>,
    sessions: HashMap<Uuid, Session>,
    saml_connections: HashMap<Uuid, SamlConnection>,
    oidc_connections: HashMap<Uuid, OidcConnection>,
    email_quota_daily_usage: HashMap<(Uuid, NaiveDate), i64>,
    audit_log_events: Vec<AuditLogEvent>,
}

impl Tables {
    fn organization_in_project(&self, project_id: Uuid, organization_id: Uuid) -> Option<&Organization> {
        self.organizations
            .get(&organization_id)
            .filter(|org| org.project_id == project_id)
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_audit_writes: AtomicBool,
}

/// In-memory [`Store`] implementation.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Faults>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every audit write fail until reset.
    ///
    /// Lets tests prove that a failed audit write rolls back the mutation it
    /// belongs to.
    pub fn fail_audit_writes(&self, fail: bool) {
        self.faults.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Seeding and inspection
    // ------------------------------------------------------------------

    pub async fn insert_project(&self, project: Project) {
        self.tables.lock().await.projects.insert(project.id, project);
    }

    pub async fn insert_organization(&self, organization: Organization) {
        self.tables
            .lock()
            .await
            .organizations
            .insert(organization.id, organization);
    }

    pub async fn insert_user(&self, user: User) {
        self.tables.lock().await.users.insert(user.id, user);
    }

    pub async fn insert_intermediate_session(&self, session: IntermediateSession) {
        self.tables
            .lock()
            .await
            .intermediate_sessions
            .insert(session.id, session);
    }

    pub async fn insert_saml_connection(&self, connection: SamlConnection) {
        self.tables
            .lock()
            .await
            .saml_connections
            .insert(connection.id, connection);
    }

    pub async fn insert_oidc_connection(&self, connection: OidcConnection) {
        self.tables
            .lock()
            .await
            .oidc_connections
            .insert(connection.id, connection);
    }

    pub async fn user(&self, user_id: Uuid) -> Option<User> {
        self.tables.lock().await.users.get(&user_id).cloned()
    }

    pub async fn users_in_organization(&self, organization_id: Uuid) -> Vec<User> {
        self.tables
            .lock()
            .await
            .users
            .values()
            .filter(|u| u.organization_id == organization_id)
            .cloned()
            .collect()
    }

    pub async fn intermediate_session(&self, id: Uuid) -> Option<IntermediateSession> {
        self.tables.lock().await.intermediate_sessions.get(&id).cloned()
    }

    pub async fn sessions(&self) -> Vec<Session> {
        self.tables.lock().await.sessions.values().cloned().collect()
    }

    pub async fn verified_emails(&self) -> Vec<VerifiedEmail> {
        self.tables.lock().await.verified_emails.clone()
    }

    /// Audit events in insertion order.
    pub async fn audit_log_events(&self) -> Vec<AuditLogEvent> {
        self.tables.lock().await.audit_log_events.clone()
    }

    pub async fn email_quota_daily_usage(&self, project_id: Uuid, date: NaiveDate) -> i64 {
        self.tables
            .lock()
            .await
            .email_quota_daily_usage
            .get(&(project_id, date))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            faults: self.faults.clone(),
        }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    faults: Arc<Faults>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get_project(&mut self, project_id: Uuid) -> StoreResult<Option<Project>> {
        Ok(self.working.projects.get(&project_id).cloned())
    }

    async fn get_organization(
        &mut self,
        project_id: Uuid,
        organization_id: Uuid,
    ) -> StoreResult<Option<Organization>> {
        Ok(self
            .working
            .organization_in_project(project_id, organization_id)
            .cloned())
    }

    async fn get_saml_connection(
        &mut self,
        project_id: Uuid,
        connection_id: Uuid,
    ) -> StoreResult<Option<SamlConnection>> {
        let tables = &self.working;
        Ok(tables
            .saml_connections
            .get(&connection_id)
            .filter(|c| tables.organization_in_project(project_id, c.organization_id).is_some())
            .cloned())
    }

    async fn get_oidc_connection(
        &mut self,
        project_id: Uuid,
        connection_id: Uuid,
    ) -> StoreResult<Option<OidcConnection>> {
        let tables = &self.working;
        Ok(tables
            .oidc_connections
            .get(&connection_id)
            .filter(|c| tables.organization_in_project(project_id, c.organization_id).is_some())
            .cloned())
    }

    async fn get_intermediate_session(
        &mut self,
        project_id: Uuid,
        intermediate_session_id: Uuid,
    ) -> StoreResult<Option<IntermediateSession>> {
        Ok(self
            .working
            .intermediate_sessions
            .get(&intermediate_session_id)
            .filter(|s| s.project_id == project_id)
            .cloned())
    }

    async fn update_intermediate_session(&mut self, session: &IntermediateSession) -> StoreResult<()> {
        match self.working.intermediate_sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "intermediate session",
            }),
        }
    }

    async fn get_user(&mut self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.working.users.get(&user_id).cloned())
    }

    async fn get_user_by_email(
        &mut self,
        organization_id: Uuid,
        email: &str,
    ) -> StoreResult<Option<User>> {
        Ok(self
            .working
            .users
            .values()
            .find(|u| u.organization_id == organization_id && u.email == email && u.is_active())
            .cloned())
    }

    async fn get_user_by_provider_subject(
        &mut self,
        organization_id: Uuid,
        provider: OAuthProvider,
        subject: &str,
    ) -> StoreResult<Option<User>> {
        Ok(self
            .working
            .users
            .values()
            .find(|u| {
                u.organization_id == organization_id
                    && u.is_active()
                    && u.provider_subject(provider) == Some(subject)
            })
            .cloned())
    }

    async fn list_password_login_candidates(
        &mut self,
        project_id: Uuid,
        email: &str,
    ) -> StoreResult<Vec<User>> {
        let tables = &self.working;
        let mut users: Vec<User> = tables
            .users
            .values()
            .filter(|u| u.email == email && u.is_active() && u.password_bcrypt.is_some())
            .filter(|u| {
                tables
                    .organization_in_project(project_id, u.organization_id)
                    .map(|org| !org.logins_disabled && org.login_methods.password)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn create_user(&mut self, user: &User) -> StoreResult<()> {
        let taken = self
            .working
            .users
            .values()
            .any(|u| u.organization_id == user.organization_id && u.email == user.email);
        if taken || self.working.users.contains_key(&user.id) {
            return Err(StoreError::Conflict { entity: "user" });
        }
        self.working.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> StoreResult<()> {
        match self.working.users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound { entity: "user" }),
        }
    }

    async fn upsert_verified_email(&mut self, verified_email: &VerifiedEmail) -> StoreResult<()> {
        let exists = self.working.verified_emails.iter().any(|v| {
            v.project_id == verified_email.project_id
                && v.email == verified_email.email
                && v.provider == verified_email.provider
                && v.provider_subject == verified_email.provider_subject
        });
        if !exists {
            self.working.verified_emails.push(verified_email.clone());
        }
        Ok(())
    }

    async fn is_email_verified_by_provider(
        &mut self,
        project_id: Uuid,
        email: &str,
        provider: OAuthProvider,
        subject: &str,
    ) -> StoreResult<bool> {
        Ok(self.working.verified_emails.iter().any(|v| {
            v.project_id == project_id
                && v.email == email
                && v.provider == Some(provider)
                && v.provider_subject.as_deref() == Some(subject)
        }))
    }

    async fn increment_email_quota_daily_usage(
        &mut self,
        project_id: Uuid,
        date: NaiveDate,
    ) -> StoreResult<i64> {
        let usage = self
            .working
            .email_quota_daily_usage
            .entry((project_id, date))
            .or_insert(0);
        *usage += 1;
        Ok(*usage)
    }

    async fn create_session(&mut self, session: &Session) -> StoreResult<()> {
        if self.working.sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict { entity: "session" });
        }
        self.working.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session_by_refresh_token_sha256(
        &mut self,
        refresh_token_sha256: &[u8],
    ) -> StoreResult<Option<Session>> {
        Ok(self
            .working
            .sessions
            .values()
            .find(|s| s.refresh_token_sha256 == refresh_token_sha256)
            .cloned())
    }

    async fn create_audit_log_event(&mut self, event: &AuditLogEvent) -> StoreResult<()> {
        if self.faults.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(StoreError::database("injected audit log write failure"));
        }
        self.working.audit_log_events.push(event.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction { mut guard, working, .. } = *self;
        *guard = working;
        debug!("memory transaction committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use portcullis_audit::Actor;
    use portcullis_model::{LoginMethod, LoginMethods};

    async fn seeded() -> (MemoryStore, Project, Organization) {
        let store = MemoryStore::new();
        let project = Project::new("Acme");
        let org = Organization::new(project.id, "Acme Eng")
            .with_login_methods(LoginMethods::default().with(LoginMethod::Password));
        store.insert_project(project.clone()).await;
        store.insert_organization(org.clone()).await;
        (store, project, org)
    }

    #[tokio::test]
    async fn test_commit_persists_writes() {
        let (store, _, org) = seeded().await;
        let user = User::new(org.id, "a@example.com");

        let mut tx = store.begin().await.unwrap();
        tx.create_user(&user).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store.user(user.id).await.is_some());
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let (store, _, org) = seeded().await;
        let user = User::new(org.id, "a@example.com");

        {
            let mut tx = store.begin().await.unwrap();
            tx.create_user(&user).await.unwrap();
        }

        assert!(store.user(user.id).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let (store, _, org) = seeded().await;
        store.insert_user(User::new(org.id, "a@example.com")).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx.create_user(&User::new(org.id, "a@example.com")).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_organization_scoped_to_project() {
        let (store, _, org) = seeded().await;
        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_organization(Uuid::now_v7(), org.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_password_login_candidates_respect_org_policy() {
        let (store, project, org) = seeded().await;
        let mut closed = Organization::new(project.id, "Closed");
        closed.logins_disabled = true;
        store.insert_organization(closed.clone()).await;

        store
            .insert_user(User::new(org.id, "a@example.com").with_password_bcrypt("h"))
            .await;
        store
            .insert_user(User::new(closed.id, "a@example.com").with_password_bcrypt("h"))
            .await;
        store.insert_user(User::new(org.id, "b@example.com")).await;

        let mut tx = store.begin().await.unwrap();
        let found = tx
            .list_password_login_candidates(project.id, "a@example.com")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].organization_id, org.id);

        let none = tx
            .list_password_login_candidates(project.id, "b@example.com")
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_deactivated_users_not_matched() {
        let (store, _, org) = seeded().await;
        let mut user = User::new(org.id, "a@example.com");
        user.deactivate_time = Some(Utc::now());
        store.insert_user(user).await;

        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_user_by_email(org.id, "a@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_verified_email_upsert_keeps_one_row_per_attestation() {
        let (store, project, _) = seeded().await;
        let google = |subject: &str| {
            VerifiedEmail::from_provider(project.id, "a@example.com", OAuthProvider::Google, subject)
        };

        let mut tx = store.begin().await.unwrap();
        tx.upsert_verified_email(&google("g-1")).await.unwrap();
        tx.upsert_verified_email(&google("g-1")).await.unwrap();
        tx.upsert_verified_email(&google("g-2")).await.unwrap();
        tx.upsert_verified_email(&VerifiedEmail::from_email_challenge(project.id, "a@example.com"))
            .await
            .unwrap();
        tx.upsert_verified_email(&VerifiedEmail::from_email_challenge(project.id, "a@example.com"))
            .await
            .unwrap();
        assert!(tx
            .is_email_verified_by_provider(project.id, "a@example.com", OAuthProvider::Google, "g-2")
            .await
            .unwrap());
        tx.commit().await.unwrap();

        assert_eq!(store.verified_emails().await.len(), 3);
    }

    #[tokio::test]
    async fn test_email_quota_increments() {
        let (store, project, _) = seeded().await;
        let today = Utc::now().date_naive();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.increment_email_quota_daily_usage(project.id, today).await.unwrap(), 1);
        assert_eq!(tx.increment_email_quota_daily_usage(project.id, today).await.unwrap(), 2);
        tx.commit().await.unwrap();

        assert_eq!(store.email_quota_daily_usage(project.id, today).await, 2);
    }

    #[tokio::test]
    async fn test_injected_audit_failure() {
        let (store, project, _) = seeded().await;
        store.fail_audit_writes(true);

        let session = IntermediateSession::new(project.id, Duration::minutes(15));
        let event = AuditLogEvent::new(
            project.id,
            Actor::IntermediateSession { intermediate_session_id: session.id },
            "intermediate_sessions.test",
            serde_json::json!({}),
        );

        let mut tx = store.begin().await.unwrap();
        assert!(tx.create_audit_log_event(&event).await.is_err());
        drop(tx);

        store.fail_audit_writes(false);
        assert!(store.audit_log_events().await.is_empty());
    }
}
