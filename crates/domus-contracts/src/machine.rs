//! Lock/sign state machine for rental contracts.
//!
//! ```text
//! Unlocked ──lock──▶ AwaitingSignature ──sign×2──▶ Signed
//!    ▲                     │                          │
//!    └──────unlock─────────┘                          unlock
//!                                                     ▼
//!          new row ◀──renew── UnlockedForExtension (signatures kept)
//! ```
//!
//! Every transition checks the acting role and the current phase and refuses
//! with an explicit error instead of silently doing nothing.

use chrono::{DateTime, Months, NaiveDate, Utc};
use domus_core::context::{CONTRACT_EDITORS, CONTRACT_LOCKERS};
use domus_core::{
    Claim, ContractParties, ContractPhase, ContractStatus, ContractTerms, LifecycleError,
    PaymentFrequency, Property, RentalContract, RequestContext, Result, RevisionUnit,
    SignatoryParty, Termination,
};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::template::{ContractTemplate, TemplateValues};

const ENTITY: &str = "contract";

/// Terms a freshly created contract starts from until a manager edits them.
pub fn default_terms(today: NaiveDate) -> ContractTerms {
    ContractTerms {
        start_date: today,
        end_date: today
            .checked_add_months(Months::new(12))
            .unwrap_or(today),
        monthly_amount: Decimal::ZERO,
        payment_frequency: PaymentFrequency::Monthly,
        grace_period_days: 5,
        penalty_rate: Decimal::ZERO,
        notice_period_months: 1,
        revision_frequency: 1,
        revision_unit: RevisionUnit::Year,
    }
}

pub fn validate_terms(terms: &ContractTerms) -> Result<()> {
    if terms.end_date <= terms.start_date {
        return Err(LifecycleError::InvalidInput(
            "end_date must be after start_date".to_string(),
        ));
    }
    if terms.monthly_amount <= Decimal::ZERO {
        return Err(LifecycleError::InvalidInput(
            "monthly_amount must be positive".to_string(),
        ));
    }
    if terms.penalty_rate < Decimal::ZERO {
        return Err(LifecycleError::InvalidInput(
            "penalty_rate must not be negative".to_string(),
        ));
    }
    if terms.grace_period_days < 0 || terms.notice_period_months < 0 {
        return Err(LifecycleError::InvalidInput(
            "grace_period_days and notice_period_months must not be negative".to_string(),
        ));
    }
    if terms.revision_frequency < 1 {
        return Err(LifecycleError::InvalidInput(
            "revision_frequency must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// `today + revision_frequency revision_unit`.
pub fn next_revision_date(today: NaiveDate, terms: &ContractTerms) -> Option<NaiveDate> {
    let per_unit = match terms.revision_unit {
        RevisionUnit::Month => 1,
        RevisionUnit::Year => 12,
    };
    let months = u32::try_from(terms.revision_frequency).ok()?.checked_mul(per_unit)?;
    today.checked_add_months(Months::new(months))
}

fn render(
    template: &ContractTemplate,
    parties: &ContractParties,
    terms: &ContractTerms,
    today: NaiveDate,
) -> String {
    template.render(&TemplateValues {
        parties,
        terms,
        contract_date: today,
    })
}

/// A pending, unlocked, unsigned contract for a claim whose reservation was confirmed.
pub fn new_pending_contract(
    claim_id: Uuid,
    today: NaiveDate,
    template: &ContractTemplate,
    parties: &ContractParties,
    now: DateTime<Utc>,
) -> RentalContract {
    let terms = default_terms(today);
    let contract_body = render(template, parties, &terms, today);
    RentalContract {
        id: Uuid::new_v4(),
        claim_id,
        status: ContractStatus::Pending,
        terms,
        locked: false,
        next_revision_date: None,
        client_signature: None,
        client_signed_at: None,
        owner_signature: None,
        owner_signed_at: None,
        signing_meeting_at: None,
        actual_end_date: None,
        termination_type: None,
        termination_reason: None,
        contract_body,
        created_at: now,
        updated_at: now,
    }
}

fn refuse(action: &'static str, contract: &RentalContract) -> LifecycleError {
    LifecycleError::invalid_transition(ENTITY, action, contract.phase())
}

/// Persists new terms and re-renders the body. Signatures are left as they are.
pub fn save(
    contract: &mut RentalContract,
    ctx: &RequestContext,
    terms: ContractTerms,
    template: &ContractTemplate,
    parties: &ContractParties,
    now: DateTime<Utc>,
) -> Result<()> {
    ctx.require_role(CONTRACT_EDITORS, "save contracts")?;
    if !matches!(
        contract.phase(),
        ContractPhase::Unlocked | ContractPhase::UnlockedForExtension
    ) {
        return Err(refuse("save", contract));
    }
    validate_terms(&terms)?;

    contract.contract_body = render(template, parties, &terms, ctx.today);
    contract.terms = terms;
    contract.updated_at = now;
    Ok(())
}

pub fn lock(contract: &mut RentalContract, ctx: &RequestContext, now: DateTime<Utc>) -> Result<()> {
    ctx.require_role(CONTRACT_LOCKERS, "lock contracts")?;
    if contract.phase() != ContractPhase::Unlocked {
        return Err(refuse("lock", contract));
    }
    validate_terms(&contract.terms)?;

    contract.next_revision_date = next_revision_date(ctx.today, &contract.terms);
    contract.locked = true;
    contract.updated_at = now;
    Ok(())
}

/// Reopens a locked contract for correction, or a signed one for extension.
pub fn unlock(contract: &mut RentalContract, ctx: &RequestContext, now: DateTime<Utc>) -> Result<()> {
    ctx.require_role(CONTRACT_LOCKERS, "unlock contracts")?;
    if !matches!(
        contract.phase(),
        ContractPhase::AwaitingSignature | ContractPhase::Signed
    ) {
        return Err(refuse("unlock", contract));
    }

    contract.locked = false;
    contract.next_revision_date = None;
    contract.updated_at = now;
    Ok(())
}

pub fn restore_from_template(
    contract: &mut RentalContract,
    ctx: &RequestContext,
    template: &ContractTemplate,
    parties: &ContractParties,
    now: DateTime<Utc>,
) -> Result<()> {
    ctx.require_role(CONTRACT_EDITORS, "restore contracts")?;
    if contract.phase() != ContractPhase::Unlocked {
        return Err(refuse("restore", contract));
    }

    contract.contract_body = render(template, parties, &contract.terms, ctx.today);
    contract.updated_at = now;
    Ok(())
}

/// Which side of the contract the acting user signs for.
pub fn signatory_for(
    ctx: &RequestContext,
    claim: &Claim,
    property: &Property,
) -> Result<SignatoryParty> {
    if ctx.is_claim_client(claim) {
        Ok(SignatoryParty::Client)
    } else if ctx.is_property_owner(property) {
        Ok(SignatoryParty::Owner)
    } else {
        Err(LifecycleError::Unauthorized(format!(
            "{} {} cannot sign the contract for claim {}",
            ctx.role, ctx.actor_id, claim.id
        )))
    }
}

/// Records one party's signature. Returns `true` when this completed the signing round.
pub fn sign(
    contract: &mut RentalContract,
    party: SignatoryParty,
    signature: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    if contract.phase() != ContractPhase::AwaitingSignature {
        return Err(refuse("sign", contract));
    }
    let signature = signature.trim();
    if signature.is_empty() {
        return Err(LifecycleError::InvalidInput("signature is required".to_string()));
    }

    match party {
        SignatoryParty::Client if contract.client_signed() => {
            return Err(LifecycleError::invalid_transition(
                ENTITY,
                "sign",
                "already signed by the client",
            ));
        }
        SignatoryParty::Owner if contract.owner_signed() => {
            return Err(LifecycleError::invalid_transition(
                ENTITY,
                "sign",
                "already signed by the owner",
            ));
        }
        SignatoryParty::Client => {
            contract.client_signature = Some(signature.to_string());
            contract.client_signed_at = Some(now);
        }
        SignatoryParty::Owner => {
            contract.owner_signature = Some(signature.to_string());
            contract.owner_signed_at = Some(now);
        }
    }
    contract.updated_at = now;

    if contract.fully_signed() {
        contract.status = ContractStatus::Active;
        return Ok(true);
    }
    Ok(false)
}

/// Closes an extension: the current row is superseded and a fresh unsigned
/// row carrying the edited terms starts a new signing round.
pub fn renew(
    contract: &mut RentalContract,
    ctx: &RequestContext,
    template: &ContractTemplate,
    parties: &ContractParties,
    now: DateTime<Utc>,
) -> Result<RentalContract> {
    ctx.require_role(CONTRACT_EDITORS, "renew contracts")?;
    if contract.phase() != ContractPhase::UnlockedForExtension {
        return Err(refuse("renew", contract));
    }
    validate_terms(&contract.terms)?;

    contract.status = ContractStatus::Superseded;
    contract.updated_at = now;

    let terms = contract.terms.clone();
    let contract_body = render(template, parties, &terms, ctx.today);
    Ok(RentalContract {
        id: Uuid::new_v4(),
        claim_id: contract.claim_id,
        status: ContractStatus::Pending,
        terms,
        locked: false,
        next_revision_date: None,
        client_signature: None,
        client_signed_at: None,
        owner_signature: None,
        owner_signed_at: None,
        signing_meeting_at: None,
        actual_end_date: None,
        termination_type: None,
        termination_reason: None,
        contract_body,
        created_at: now,
        updated_at: now,
    })
}

pub fn schedule_signing_meeting(
    contract: &mut RentalContract,
    ctx: &RequestContext,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()> {
    ctx.require_role(CONTRACT_EDITORS, "schedule signing meetings")?;
    if matches!(
        contract.phase(),
        ContractPhase::Signed | ContractPhase::Terminated
    ) {
        return Err(refuse("schedule a signing meeting for", contract));
    }
    if at < now {
        return Err(LifecycleError::InvalidInput(
            "signing meeting must be in the future".to_string(),
        ));
    }

    contract.signing_meeting_at = Some(at);
    contract.updated_at = now;
    Ok(())
}

pub fn terminate(
    contract: &mut RentalContract,
    ctx: &RequestContext,
    termination: &Termination,
    effective_end: NaiveDate,
    now: DateTime<Utc>,
) -> Result<()> {
    ctx.require_role(CONTRACT_EDITORS, "terminate contracts")?;
    if contract.phase() == ContractPhase::Terminated {
        return Err(refuse("terminate", contract));
    }

    contract.actual_end_date = Some(effective_end);
    contract.termination_type = Some(termination.termination_type);
    contract.termination_reason = termination
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .map(str::to_string);
    contract.status = ContractStatus::Terminated;
    contract.updated_at = now;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use domus_core::{ActorRole, TerminationType};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    fn ctx(role: ActorRole) -> RequestContext {
        RequestContext::new(Uuid::new_v4(), role, today())
    }

    fn parties() -> ContractParties {
        ContractParties {
            client_name: "Grace Wanjiru".to_string(),
            owner_name: "Samuel Kiptoo".to_string(),
            property_address: "Apartment 3B, Lavington Court".to_string(),
        }
    }

    fn template() -> ContractTemplate {
        ContractTemplate::parse("{{CLIENT_NAME}} pays {{MONTHLY_AMOUNT}} until {{END_DATE}}")
            .unwrap()
    }

    fn edited_terms() -> ContractTerms {
        ContractTerms {
            monthly_amount: Decimal::new(45_000, 0),
            ..default_terms(today())
        }
    }

    fn drafted() -> RentalContract {
        let mut contract =
            new_pending_contract(Uuid::new_v4(), today(), &template(), &parties(), Utc::now());
        save(
            &mut contract,
            &ctx(ActorRole::Manager),
            edited_terms(),
            &template(),
            &parties(),
            Utc::now(),
        )
        .unwrap();
        contract
    }

    fn signed() -> RentalContract {
        let mut contract = drafted();
        lock(&mut contract, &ctx(ActorRole::GeneralManager), Utc::now()).unwrap();
        sign(&mut contract, SignatoryParty::Client, "sig-client", Utc::now()).unwrap();
        sign(&mut contract, SignatoryParty::Owner, "sig-owner", Utc::now()).unwrap();
        contract
    }

    #[test]
    fn new_contract_is_pending_unlocked_and_unsigned() {
        let contract =
            new_pending_contract(Uuid::new_v4(), today(), &template(), &parties(), Utc::now());
        assert_eq!(contract.status, ContractStatus::Pending);
        assert_eq!(contract.phase(), ContractPhase::Unlocked);
        assert!(!contract.any_signature());
        assert!(contract.contract_body.starts_with("Grace Wanjiru pays 0.00"));
    }

    #[test]
    fn save_rerenders_body() {
        let contract = drafted();
        assert_eq!(contract.terms.monthly_amount, Decimal::new(45_000, 0));
        assert_eq!(
            contract.contract_body,
            "Grace Wanjiru pays 45000.00 until 15/01/2025"
        );
    }

    #[test]
    fn save_is_rejected_while_locked() {
        let mut contract = drafted();
        lock(&mut contract, &ctx(ActorRole::GeneralManager), Utc::now()).unwrap();
        let before = contract.clone();

        let mut terms = edited_terms();
        terms.monthly_amount = Decimal::new(1, 0);
        let err = save(
            &mut contract,
            &ctx(ActorRole::GeneralManager),
            terms,
            &template(),
            &parties(),
            Utc::now(),
        )
        .unwrap_err();

        assert!(matches!(err, LifecycleError::InvalidStateTransition { .. }));
        assert_eq!(contract, before);
    }

    #[test]
    fn save_rejects_invalid_terms() {
        let mut contract = drafted();
        let mut terms = edited_terms();
        terms.end_date = terms.start_date;
        let err = save(
            &mut contract,
            &ctx(ActorRole::Manager),
            terms,
            &template(),
            &parties(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidInput(_)));
    }

    #[test]
    fn only_general_manager_locks() {
        let mut contract = drafted();
        let err = lock(&mut contract, &ctx(ActorRole::Manager), Utc::now()).unwrap_err();
        assert!(matches!(err, LifecycleError::Unauthorized(_)));
        assert!(!contract.locked);
    }

    #[test]
    fn lock_requires_priced_terms() {
        let mut contract =
            new_pending_contract(Uuid::new_v4(), today(), &template(), &parties(), Utc::now());
        let err = lock(&mut contract, &ctx(ActorRole::GeneralManager), Utc::now()).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidInput(_)));
    }

    #[test]
    fn lock_sets_next_revision_date() {
        let mut contract = drafted();
        lock(&mut contract, &ctx(ActorRole::GeneralManager), Utc::now()).unwrap();
        assert!(contract.locked);
        assert_eq!(
            contract.next_revision_date,
            NaiveDate::from_ymd_opt(2025, 1, 15)
        );
        assert_eq!(contract.phase(), ContractPhase::AwaitingSignature);
    }

    #[test]
    fn next_revision_date_in_months() {
        let terms = ContractTerms {
            revision_frequency: 6,
            revision_unit: RevisionUnit::Month,
            ..edited_terms()
        };
        assert_eq!(
            next_revision_date(NaiveDate::from_ymd_opt(2024, 8, 31).unwrap(), &terms),
            NaiveDate::from_ymd_opt(2025, 2, 28)
        );
    }

    #[test]
    fn lock_is_refused_once_anyone_has_signed() {
        let mut contract = signed();
        unlock(&mut contract, &ctx(ActorRole::GeneralManager), Utc::now()).unwrap();
        let err = lock(&mut contract, &ctx(ActorRole::GeneralManager), Utc::now()).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidStateTransition { .. }));
    }

    #[test]
    fn unlock_clears_revision_date_only() {
        let mut contract = drafted();
        lock(&mut contract, &ctx(ActorRole::GeneralManager), Utc::now()).unwrap();
        unlock(&mut contract, &ctx(ActorRole::GeneralManager), Utc::now()).unwrap();
        assert!(!contract.locked);
        assert!(contract.next_revision_date.is_none());
        assert_eq!(contract.phase(), ContractPhase::Unlocked);

        let err = unlock(&mut contract, &ctx(ActorRole::GeneralManager), Utc::now()).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidStateTransition { .. }));
    }

    #[test]
    fn signing_both_sides_activates_contract() {
        let mut contract = drafted();
        lock(&mut contract, &ctx(ActorRole::GeneralManager), Utc::now()).unwrap();

        assert!(!sign(&mut contract, SignatoryParty::Owner, "owner", Utc::now()).unwrap());
        let err = sign(&mut contract, SignatoryParty::Owner, "again", Utc::now()).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidStateTransition { .. }));

        assert!(sign(&mut contract, SignatoryParty::Client, "client", Utc::now()).unwrap());
        assert_eq!(contract.status, ContractStatus::Active);
        assert_eq!(contract.phase(), ContractPhase::Signed);
    }

    #[test]
    fn signing_requires_a_locked_contract() {
        let mut contract = drafted();
        let err = sign(&mut contract, SignatoryParty::Client, "client", Utc::now()).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidStateTransition { .. }));
    }

    #[test]
    fn extension_keeps_signatures_through_resave() {
        let mut contract = signed();
        unlock(&mut contract, &ctx(ActorRole::GeneralManager), Utc::now()).unwrap();
        assert_eq!(contract.phase(), ContractPhase::UnlockedForExtension);

        let mut terms = contract.terms.clone();
        terms.end_date = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        save(
            &mut contract,
            &ctx(ActorRole::Manager),
            terms,
            &template(),
            &parties(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(contract.client_signature.as_deref(), Some("sig-client"));
        assert_eq!(contract.owner_signature.as_deref(), Some("sig-owner"));
        assert_eq!(
            contract.terms.end_date,
            NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()
        );
    }

    #[test]
    fn restore_is_refused_for_signed_contracts() {
        let mut contract = signed();
        unlock(&mut contract, &ctx(ActorRole::GeneralManager), Utc::now()).unwrap();
        let err = restore_from_template(
            &mut contract,
            &ctx(ActorRole::Manager),
            &template(),
            &parties(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidStateTransition { .. }));
    }

    #[test]
    fn restore_overwrites_edited_body() {
        let mut contract = drafted();
        contract.contract_body = "hand edited".to_string();
        restore_from_template(
            &mut contract,
            &ctx(ActorRole::Manager),
            &template(),
            &parties(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(
            contract.contract_body,
            "Grace Wanjiru pays 45000.00 until 15/01/2025"
        );
    }

    #[test]
    fn renew_supersedes_and_starts_unsigned_row() {
        let mut contract = signed();
        unlock(&mut contract, &ctx(ActorRole::GeneralManager), Utc::now()).unwrap();

        let renewed = renew(
            &mut contract,
            &ctx(ActorRole::Manager),
            &template(),
            &parties(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(contract.status, ContractStatus::Superseded);
        assert!(contract.fully_signed());
        assert_ne!(renewed.id, contract.id);
        assert_eq!(renewed.claim_id, contract.claim_id);
        assert_eq!(renewed.terms, contract.terms);
        assert_eq!(renewed.phase(), ContractPhase::Unlocked);
        assert!(!renewed.any_signature());
    }

    #[test]
    fn renew_requires_extension_phase() {
        let mut contract = drafted();
        let err = renew(
            &mut contract,
            &ctx(ActorRole::Manager),
            &template(),
            &parties(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidStateTransition { .. }));
    }

    #[test]
    fn terminated_contract_refuses_further_changes() {
        let mut contract = signed();
        let termination = Termination {
            termination_type: TerminationType::Mutual,
            reason: Some("  tenant relocating ".to_string()),
        };
        terminate(
            &mut contract,
            &ctx(ActorRole::Manager),
            &termination,
            today(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(contract.phase(), ContractPhase::Terminated);
        assert_eq!(contract.termination_reason.as_deref(), Some("tenant relocating"));
        assert!(unlock(&mut contract, &ctx(ActorRole::GeneralManager), Utc::now()).is_err());
        assert!(
            terminate(
                &mut contract,
                &ctx(ActorRole::Manager),
                &termination,
                today(),
                Utc::now()
            )
            .is_err()
        );
    }

    #[test]
    fn meetings_must_be_in_the_future() {
        let mut contract = drafted();
        let now = Utc::now();
        let err = schedule_signing_meeting(
            &mut contract,
            &ctx(ActorRole::Manager),
            now - chrono::Duration::hours(1),
            now,
        )
        .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidInput(_)));

        let at = now + chrono::Duration::days(2);
        schedule_signing_meeting(&mut contract, &ctx(ActorRole::Manager), at, now).unwrap();
        assert_eq!(contract.signing_meeting_at, Some(at));
    }
}
