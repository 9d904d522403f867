//! Sessions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::intermediate::PrimaryAuthFactor;

/// A long-lived user session.
///
/// Only the SHA-256 digest of the refresh token is stored; the plaintext is
/// handed to the caller once, when the session is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: Uuid,

    /// The authenticated user
    pub user_id: Uuid,

    /// SHA-256 digest of the refresh token
    #[serde(skip_serializing)]
    pub refresh_token_sha256: Vec<u8>,

    /// Credential type that authenticated the session
    pub primary_auth_factor: PrimaryAuthFactor,

    /// Set when a staff member is acting as the user
    pub impersonator_user_id: Option<Uuid>,

    /// When the session was created
    pub create_time: DateTime<Utc>,

    /// When the session expires
    pub expire_time: DateTime<Utc>,

    /// When the session was last refreshed
    pub last_active_time: DateTime<Utc>,

    /// Whether the session was revoked
    #[serde(default)]
    pub revoked: bool,
}

impl Session {
    /// Creates a session for `user_id` valid for `ttl`.
    pub fn new(
        user_id: Uuid,
        refresh_token_sha256: Vec<u8>,
        primary_auth_factor: PrimaryAuthFactor,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            refresh_token_sha256,
            primary_auth_factor,
            impersonator_user_id: None,
            create_time: now,
            expire_time: now + ttl,
            last_active_time: now,
            revoked: false,
        }
    }

    /// Whether the session can still be refreshed at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expire_time > now
    }
}
