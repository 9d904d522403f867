//! SAML assertion redemption.

use async_trait::async_trait;
use portcullis_audit::IntermediateSessionEvent;
use portcullis_model::{IntermediateSession, LoginMethod, Organization, PrimaryAuthFactor, SamlConnection};
use portcullis_store::Transaction;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::policy::{check_organization, load, persist, Loaded};
use super::{IntermediateContext, IntermediateService};
use crate::error::{ApiError, ApiResult};
use crate::saml::SamlAssertion;
use crate::two_phase::{run_two_phase, TwoPhase};

impl IntermediateService {
    /// Accept a `SAMLResponse` posted for `connection_id`.
    #[instrument(
        skip(self, ctx, saml_response),
        fields(intermediate_session_id = %ctx.intermediate_session_id)
    )]
    pub async fn redeem_saml_assertion(
        &self,
        ctx: &IntermediateContext,
        connection_id: Uuid,
        saml_response: &str,
    ) -> ApiResult<IntermediateSession> {
        let step = RedeemAssertion {
            service: self,
            ctx,
            connection_id,
            saml_response,
        };
        run_two_phase(self.store.as_ref(), ctx.deadline, &step).await
    }
}

struct RedeemAssertion<'a> {
    service: &'a IntermediateService,
    ctx: &'a IntermediateContext,
    connection_id: Uuid,
    saml_response: &'a str,
}

struct SamlTarget {
    connection: SamlConnection,
    organization: Organization,
}

impl RedeemAssertion<'_> {
    async fn resolve(&self, tx: &mut dyn Transaction, loaded: &Loaded) -> ApiResult<SamlTarget> {
        loaded.require_method(LoginMethod::Saml)?;
        let connection = tx
            .get_saml_connection(loaded.project.id, self.connection_id)
            .await?
            .ok_or_else(|| ApiError::not_found("saml connection"))?;
        let organization = tx
            .get_organization(loaded.project.id, connection.organization_id)
            .await?
            .ok_or_else(|| ApiError::not_found("organization"))?;
        check_organization(&organization, LoginMethod::Saml)?;

        if loaded
            .session
            .organization_id
            .is_some_and(|bound| bound != organization.id)
        {
            return Err(ApiError::invalid_argument(
                "saml connection belongs to a different organization",
            ));
        }
        Ok(SamlTarget {
            connection,
            organization,
        })
    }
}

#[async_trait]
impl<'a> TwoPhase for RedeemAssertion<'a> {
    type Snapshot = SamlTarget;
    type Fetched = SamlAssertion;
    type Output = IntermediateSession;

    async fn read(&self, tx: &mut dyn Transaction) -> ApiResult<SamlTarget> {
        let loaded = load(tx, self.ctx).await?;
        self.resolve(tx, &loaded).await
    }

    async fn fetch(&self, target: &SamlTarget) -> ApiResult<SamlAssertion> {
        self.service
            .saml_validator
            .validate(&target.connection, self.saml_response)
            .await
            .map_err(|e| {
                warn!(saml_connection_id = %target.connection.id, error = %e, "SAML assertion rejected");
                ApiError::invalid_argument(e.to_string())
            })
    }

    async fn write(
        &self,
        tx: &mut dyn Transaction,
        _target: SamlTarget,
        assertion: SamlAssertion,
    ) -> ApiResult<IntermediateSession> {
        let mut loaded = load(tx, self.ctx).await?;
        let target = self.resolve(tx, &loaded).await?;

        loaded.bind_email(&assertion.email)?;
        loaded.bind_organization(&target.organization)?;

        let mut session = loaded.session;
        session.verified_saml_connection_id = Some(target.connection.id);
        session.fix_primary_auth_factor(PrimaryAuthFactor::Saml);

        let event = IntermediateSessionEvent::SamlAssertionRedeemed {
            intermediate_session_id: session.id,
            saml_connection_id: target.connection.id,
            email: assertion.email,
        };
        persist(tx, self.ctx, &session, event).await?;

        info!(saml_connection_id = %target.connection.id, "SAML assertion redeemed");
        Ok(session)
    }
}
