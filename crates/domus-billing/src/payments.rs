//! Claim payment rules: uploads, confirmation and its side effects.

use chrono::{DateTime, Utc};
use domus_core::{
    Claim, ClaimPayment, ClaimSource, LifecycleError, PaymentStatus, PaymentType, Result,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What confirming a payment will do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfirmationPlan {
    AlreadyConfirmed,
    Confirm {
        ensure_contract: bool,
        mark_property_unavailable: bool,
    },
}

/// Payment types that must be confirmed before a claim moves on to contracting.
pub const PREREQUISITE_PAYMENTS: [PaymentType; 2] = [PaymentType::Deposit, PaymentType::Claim];

pub fn plan_payment_confirmation(payment: &ClaimPayment, claim: &Claim) -> Result<ConfirmationPlan> {
    if payment.status == PaymentStatus::Confirmed {
        return Ok(ConfirmationPlan::AlreadyConfirmed);
    }

    if !payment.has_invoice() || !payment.has_proof() {
        let missing = match (payment.has_invoice(), payment.has_proof()) {
            (false, false) => "invoice and payment proof",
            (false, true) => "invoice",
            _ => "payment proof",
        };
        return Err(LifecycleError::MissingPrerequisite(format!(
            "{} payment {} has no {missing}",
            payment.payment_type, payment.id
        )));
    }

    let takes_property_off_market = payment.payment_type == PaymentType::Claim
        && claim.claim_source == ClaimSource::RentalPropertyManagement;

    Ok(ConfirmationPlan::Confirm {
        ensure_contract: takes_property_off_market,
        mark_property_unavailable: takes_property_off_market,
    })
}

pub fn apply_payment_confirmation(payment: &mut ClaimPayment, actor_id: Uuid, now: DateTime<Utc>) {
    payment.status = PaymentStatus::Confirmed;
    payment.confirmed_by = Some(actor_id);
    payment.confirmed_at = Some(now);
    payment.updated_at = now;
}

pub fn record_payment_invoice(
    payment: &mut ClaimPayment,
    path: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let path = checked_upload(payment, path, "attach invoice to")?;
    payment.invoice_path = Some(path);
    payment.updated_at = now;
    Ok(())
}

pub fn record_payment_proof(payment: &mut ClaimPayment, path: &str, now: DateTime<Utc>) -> Result<()> {
    let path = checked_upload(payment, path, "attach proof to")?;
    payment.proof_path = Some(path);
    payment.updated_at = now;
    Ok(())
}

fn checked_upload(payment: &ClaimPayment, path: &str, action: &'static str) -> Result<String> {
    if payment.status == PaymentStatus::Confirmed {
        return Err(LifecycleError::invalid_transition(
            "payment",
            action,
            "confirmed",
        ));
    }
    let path = path.trim();
    if path.is_empty() {
        return Err(LifecycleError::InvalidInput("file path is required".to_string()));
    }
    Ok(path.to_string())
}

/// True once every deposit/claim payment recorded for the claim is confirmed.
pub fn prerequisites_confirmed(payments: &[ClaimPayment]) -> bool {
    let mut prerequisites = payments
        .iter()
        .filter(|payment| PREREQUISITE_PAYMENTS.contains(&payment.payment_type))
        .peekable();

    prerequisites.peek().is_some()
        && prerequisites.all(|payment| payment.status == PaymentStatus::Confirmed)
}
