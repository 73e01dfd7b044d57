//! Termination notices tied to a contract's notice period.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use domus_core::context::CONTRACT_EDITORS;
use domus_core::{
    Claim, LifecycleError, NoticeStatus, RentNotice, RentalContract, RequestContext, Result,
};
use uuid::Uuid;

/// A notice month is counted as a flat 30 days, not a calendar month.
pub const DAYS_PER_NOTICE_MONTH: i64 = 30;

/// Date the contract ends under a notice sent at `sent_at`.
pub fn notice_effective_end(
    sent_at: DateTime<Utc>,
    notice_period_months: i32,
    immediate_termination: bool,
) -> NaiveDate {
    let sent_on = sent_at.date_naive();
    if immediate_termination {
        return sent_on;
    }
    sent_on + Duration::days(i64::from(notice_period_months.max(0)) * DAYS_PER_NOTICE_MONTH)
}

pub fn active_notice(notices: &[RentNotice]) -> Option<&RentNotice> {
    notices
        .iter()
        .filter(|notice| notice.status == NoticeStatus::Active)
        .max_by_key(|notice| notice.sent_at)
}

pub fn ensure_notice_allowed(contract: &RentalContract, notices: &[RentNotice]) -> Result<()> {
    if contract.is_terminated() || !contract.locked {
        return Err(LifecycleError::invalid_transition(
            "contract",
            "send a notice for",
            contract.phase(),
        ));
    }
    if let Some(active) = active_notice(notices) {
        return Err(LifecycleError::invalid_transition(
            "notice",
            "send",
            format!("notice {} is still active", active.id),
        ));
    }
    Ok(())
}

pub fn new_notice(
    ctx: &RequestContext,
    claim: &Claim,
    contract: &RentalContract,
    message: &str,
    immediate_termination: bool,
    now: DateTime<Utc>,
) -> Result<RentNotice> {
    ctx.require_client_or(claim, CONTRACT_EDITORS, "send notices")?;
    let message = message.trim();
    if message.is_empty() {
        return Err(LifecycleError::InvalidInput(
            "notice message is required".to_string(),
        ));
    }

    Ok(RentNotice {
        id: Uuid::new_v4(),
        claim_id: claim.id,
        contract_id: contract.id,
        sent_by: ctx.actor_id,
        sender_role: ctx.role,
        message: message.to_string(),
        immediate_termination,
        status: NoticeStatus::Active,
        sent_at: now,
        cancelled_at: None,
    })
}

/// Withdraws a notice. The row stays, marked cancelled.
pub fn cancel_notice(
    notice: &mut RentNotice,
    ctx: &RequestContext,
    now: DateTime<Utc>,
) -> Result<()> {
    let is_sender = ctx.actor_id == notice.sent_by && ctx.role == notice.sender_role;
    if !is_sender {
        ctx.require_role(CONTRACT_EDITORS, "cancel notices sent by others")?;
    }
    if notice.status != NoticeStatus::Active {
        return Err(LifecycleError::invalid_transition(
            "notice",
            "cancel",
            notice.status,
        ));
    }

    notice.status = NoticeStatus::Cancelled;
    notice.cancelled_at = Some(now);
    Ok(())
}

/// End date recorded when a contract is terminated: the active notice's
/// effective end if there is one, otherwise today.
pub fn termination_end_date(
    contract: &RentalContract,
    notices: &[RentNotice],
    today: NaiveDate,
) -> NaiveDate {
    active_notice(notices)
        .map(|notice| {
            notice_effective_end(
                notice.sent_at,
                contract.terms.notice_period_months,
                notice.immediate_termination,
            )
        })
        .unwrap_or(today)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use domus_core::{
        ActorRole, ClaimSource, ClaimType, ContractStatus, ContractTerms, PaymentFrequency,
        RevisionUnit,
    };
    use rust_decimal::Decimal;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn claim() -> Claim {
        Claim {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            claim_type: ClaimType::Rent,
            claim_source: ClaimSource::RentalPropertyManagement,
            claimed_at: Utc::now(),
            final_status: None,
        }
    }

    fn locked_contract(claim: &Claim) -> RentalContract {
        RentalContract {
            id: Uuid::new_v4(),
            claim_id: claim.id,
            status: ContractStatus::Active,
            terms: ContractTerms {
                start_date: date(2024, 1, 1),
                end_date: date(2024, 12, 31),
                monthly_amount: Decimal::new(70_000, 0),
                payment_frequency: PaymentFrequency::Monthly,
                grace_period_days: 5,
                penalty_rate: Decimal::ZERO,
                notice_period_months: 2,
                revision_frequency: 1,
                revision_unit: RevisionUnit::Year,
            },
            locked: true,
            next_revision_date: Some(date(2025, 1, 1)),
            client_signature: Some("client".to_string()),
            client_signed_at: Some(Utc::now()),
            owner_signature: Some("owner".to_string()),
            owner_signed_at: Some(Utc::now()),
            signing_meeting_at: None,
            actual_end_date: None,
            termination_type: None,
            termination_reason: None,
            contract_body: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn client_ctx(claim: &Claim) -> RequestContext {
        RequestContext::new(claim.client_id, ActorRole::Client, date(2024, 5, 1))
    }

    #[test]
    fn effective_end_uses_thirty_day_months() {
        let sent_at = Utc.with_ymd_and_hms(2024, 1, 31, 10, 0, 0).unwrap();
        assert_eq!(notice_effective_end(sent_at, 1, false), date(2024, 3, 1));
        assert_eq!(notice_effective_end(sent_at, 3, false), date(2024, 4, 30));
        assert_eq!(notice_effective_end(sent_at, 3, true), date(2024, 1, 31));
    }

    #[test]
    fn client_can_send_notice_on_locked_contract() {
        let claim = claim();
        let contract = locked_contract(&claim);
        ensure_notice_allowed(&contract, &[]).unwrap();

        let notice = new_notice(
            &client_ctx(&claim),
            &claim,
            &contract,
            "Moving out at the end of June",
            false,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(notice.status, NoticeStatus::Active);
        assert_eq!(notice.sender_role, ActorRole::Client);
    }

    #[test]
    fn notice_needs_locked_live_contract() {
        let claim = claim();
        let mut contract = locked_contract(&claim);
        contract.locked = false;
        assert!(ensure_notice_allowed(&contract, &[]).is_err());

        contract.locked = true;
        contract.actual_end_date = Some(date(2024, 6, 30));
        assert!(ensure_notice_allowed(&contract, &[]).is_err());
    }

    #[test]
    fn only_one_active_notice_at_a_time() {
        let claim = claim();
        let contract = locked_contract(&claim);
        let mut notice =
            new_notice(&client_ctx(&claim), &claim, &contract, "leaving", false, Utc::now())
                .unwrap();

        let err = ensure_notice_allowed(&contract, std::slice::from_ref(&notice)).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidStateTransition { .. }));

        cancel_notice(&mut notice, &client_ctx(&claim), Utc::now()).unwrap();
        ensure_notice_allowed(&contract, &[notice]).unwrap();
    }

    #[test]
    fn strangers_cannot_send_or_cancel() {
        let claim = claim();
        let contract = locked_contract(&claim);
        let stranger = RequestContext::new(Uuid::new_v4(), ActorRole::Client, date(2024, 5, 1));
        assert!(new_notice(&stranger, &claim, &contract, "x", false, Utc::now()).is_err());

        let mut notice =
            new_notice(&client_ctx(&claim), &claim, &contract, "leaving", false, Utc::now())
                .unwrap();
        let err = cancel_notice(&mut notice, &stranger, Utc::now()).unwrap_err();
        assert!(matches!(err, LifecycleError::Unauthorized(_)));

        let manager = RequestContext::new(Uuid::new_v4(), ActorRole::Manager, date(2024, 5, 1));
        cancel_notice(&mut notice, &manager, Utc::now()).unwrap();
        assert_eq!(notice.status, NoticeStatus::Cancelled);
        assert!(notice.cancelled_at.is_some());
    }

    #[test]
    fn sender_id_under_another_role_cannot_cancel() {
        let claim = claim();
        let contract = locked_contract(&claim);
        let mut notice =
            new_notice(&client_ctx(&claim), &claim, &contract, "leaving", false, Utc::now())
                .unwrap();

        let other_role =
            RequestContext::new(claim.client_id, ActorRole::Accountant, date(2024, 5, 1));
        let err = cancel_notice(&mut notice, &other_role, Utc::now()).unwrap_err();
        assert!(matches!(err, LifecycleError::Unauthorized(_)));
        assert_eq!(notice.status, NoticeStatus::Active);
    }

    #[test]
    fn cancelled_notice_cannot_be_cancelled_again() {
        let claim = claim();
        let contract = locked_contract(&claim);
        let mut notice =
            new_notice(&client_ctx(&claim), &claim, &contract, "leaving", false, Utc::now())
                .unwrap();
        cancel_notice(&mut notice, &client_ctx(&claim), Utc::now()).unwrap();
        let err = cancel_notice(&mut notice, &client_ctx(&claim), Utc::now()).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidStateTransition { .. }));
    }

    #[test]
    fn termination_date_follows_active_notice() {
        let claim = claim();
        let contract = locked_contract(&claim);
        let sent_at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let notice = new_notice(&client_ctx(&claim), &claim, &contract, "leaving", false, sent_at)
            .unwrap();

        assert_eq!(
            termination_end_date(&contract, &[notice], date(2024, 5, 2)),
            date(2024, 6, 30)
        );
        assert_eq!(
            termination_end_date(&contract, &[], date(2024, 5, 2)),
            date(2024, 5, 2)
        );
    }
}
