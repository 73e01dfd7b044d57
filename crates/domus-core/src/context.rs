use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::ActorRole;
use crate::error::{LifecycleError, Result};
use crate::models::{Claim, Property};

/// Who is acting, in which role, and which calendar day the request runs on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestContext {
    pub actor_id: Uuid,
    pub role: ActorRole,
    pub today: NaiveDate,
}

impl RequestContext {
    pub fn new(actor_id: Uuid, role: ActorRole, today: NaiveDate) -> Self {
        Self {
            actor_id,
            role,
            today,
        }
    }

    pub fn system(today: NaiveDate) -> Self {
        Self::new(Uuid::nil(), ActorRole::System, today)
    }

    pub fn require_role(&self, allowed: &[ActorRole], action: &str) -> Result<()> {
        if allowed.contains(&self.role) {
            return Ok(());
        }
        Err(LifecycleError::Unauthorized(format!(
            "{} may not {action}",
            self.role
        )))
    }

    pub fn is_claim_client(&self, claim: &Claim) -> bool {
        self.role == ActorRole::Client && self.actor_id == claim.client_id
    }

    pub fn is_property_owner(&self, property: &Property) -> bool {
        self.role == ActorRole::Owner && self.actor_id == property.owner_id
    }

    /// The claim's client, or one of the listed staff roles.
    pub fn require_client_or(
        &self,
        claim: &Claim,
        staff: &[ActorRole],
        action: &str,
    ) -> Result<()> {
        if self.is_claim_client(claim) {
            return Ok(());
        }
        self.require_role(staff, action)
    }

    /// Staff, the claim's client, or the owner of the claimed property.
    pub fn require_viewer(&self, claim: &Claim, property: &Property) -> Result<()> {
        if self.role.is_staff() || self.is_claim_client(claim) || self.is_property_owner(property)
        {
            return Ok(());
        }
        Err(LifecycleError::Unauthorized(format!(
            "{} {} is not a party to claim {}",
            self.role, self.actor_id, claim.id
        )))
    }
}

pub const CONTRACT_EDITORS: &[ActorRole] = &[ActorRole::Manager, ActorRole::GeneralManager];
pub const CONTRACT_LOCKERS: &[ActorRole] = &[ActorRole::GeneralManager];
pub const PAYMENT_CONFIRMERS: &[ActorRole] = &[ActorRole::Accountant, ActorRole::GeneralManager];
pub const INVOICE_GENERATORS: &[ActorRole] = &[
    ActorRole::Accountant,
    ActorRole::Manager,
    ActorRole::GeneralManager,
    ActorRole::System,
];
pub const WARNING_SENDERS: &[ActorRole] = &[
    ActorRole::Accountant,
    ActorRole::Manager,
    ActorRole::GeneralManager,
];
pub const AUTOMATIC_WARNING_WRITERS: &[ActorRole] = &[ActorRole::System, ActorRole::Accountant];
pub const PROOF_UPLOADERS: &[ActorRole] = &[ActorRole::Accountant];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::{Availability, ClaimSource, ClaimType};
    use chrono::Utc;

    fn claim(client_id: Uuid) -> Claim {
        Claim {
            id: Uuid::new_v4(),
            client_id,
            property_id: Uuid::new_v4(),
            claim_type: ClaimType::Rent,
            claim_source: ClaimSource::RentalPropertyManagement,
            claimed_at: Utc::now(),
            final_status: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn role_gate_rejects_other_roles() {
        let ctx = RequestContext::new(Uuid::new_v4(), ActorRole::Manager, today());
        assert!(ctx.require_role(CONTRACT_EDITORS, "save contract").is_ok());
        let err = ctx.require_role(CONTRACT_LOCKERS, "lock contract").unwrap_err();
        assert!(matches!(err, LifecycleError::Unauthorized(_)));
    }

    #[test]
    fn only_own_client_passes_client_gate() {
        let client_id = Uuid::new_v4();
        let claim = claim(client_id);
        let own = RequestContext::new(client_id, ActorRole::Client, today());
        let stranger = RequestContext::new(Uuid::new_v4(), ActorRole::Client, today());

        assert!(own.require_client_or(&claim, &[], "upload proof").is_ok());
        assert!(stranger.require_client_or(&claim, &[], "upload proof").is_err());
    }

    #[test]
    fn owners_view_claims_on_their_property() {
        let owner_id = Uuid::new_v4();
        let claim = claim(Uuid::new_v4());
        let property = Property {
            id: claim.property_id,
            owner_id,
            address: "12 Harbour Road".to_string(),
            availability: Availability::Reserved,
        };

        let owner = RequestContext::new(owner_id, ActorRole::Owner, today());
        let other_owner = RequestContext::new(Uuid::new_v4(), ActorRole::Owner, today());
        let agent = RequestContext::new(Uuid::new_v4(), ActorRole::FieldAgent, today());

        assert!(owner.require_viewer(&claim, &property).is_ok());
        assert!(agent.require_viewer(&claim, &property).is_ok());
        assert!(other_owner.require_viewer(&claim, &property).is_err());
    }
}
