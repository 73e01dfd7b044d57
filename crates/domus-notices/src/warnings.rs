//! Payment warnings: when they may be sent and which ones are still relevant.

use chrono::{DateTime, NaiveDate, Utc};
use domus_core::{
    LifecycleError, ManualWarningDenial, RecurringInvoice, RentWarning, Result, WarningType,
};
use uuid::Uuid;

/// Automatic reminders a claim must have received before a final warning.
pub const REQUIRED_AUTOMATIC_WARNINGS: usize = 2;

fn count_of(claim_id: Uuid, warnings: &[RentWarning], warning_type: WarningType) -> usize {
    warnings
        .iter()
        .filter(|warning| warning.claim_id == claim_id && warning.warning_type == warning_type)
        .count()
}

/// A manual ("final") warning needs an unpaid invoice past its due date with no
/// proof uploaded, no earlier manual warning on the claim, and at least
/// [`REQUIRED_AUTOMATIC_WARNINGS`] automatic ones.
pub fn manual_warning_eligibility(
    invoice: &RecurringInvoice,
    claim_warnings: &[RentWarning],
    today: NaiveDate,
) -> std::result::Result<(), ManualWarningDenial> {
    if invoice.is_confirmed() {
        return Err(ManualWarningDenial::AlreadyPaid);
    }
    if invoice.due_date >= today {
        return Err(ManualWarningDenial::NotYetDue);
    }
    if invoice.has_proof() {
        return Err(ManualWarningDenial::ProofUploaded);
    }
    if count_of(invoice.claim_id, claim_warnings, WarningType::Manual) > 0 {
        return Err(ManualWarningDenial::ManualWarningAlreadySent);
    }
    let automatic = count_of(invoice.claim_id, claim_warnings, WarningType::Automatic);
    if automatic < REQUIRED_AUTOMATIC_WARNINGS {
        return Err(ManualWarningDenial::InsufficientAutomaticWarnings { found: automatic });
    }
    Ok(())
}

pub fn last_automatic_warning(
    invoice_id: Uuid,
    warnings: &[RentWarning],
) -> Option<DateTime<Utc>> {
    warnings
        .iter()
        .filter(|warning| {
            warning.invoice_id == Some(invoice_id) && warning.warning_type == WarningType::Automatic
        })
        .map(|warning| warning.sent_at)
        .max()
}

/// Whether the reminder sweep should issue another automatic warning.
pub fn automatic_warning_due(
    invoice: &RecurringInvoice,
    last_automatic: Option<DateTime<Utc>>,
    today: NaiveDate,
    interval_days: i64,
) -> bool {
    if invoice.is_confirmed()
        || !invoice.recurring_active
        || invoice.has_proof()
        || invoice.due_date >= today
    {
        return false;
    }
    match last_automatic {
        None => true,
        Some(sent_at) => (today - sent_at.date_naive()).num_days() >= interval_days,
    }
}

pub fn automatic_warning_message(invoice: &RecurringInvoice) -> String {
    format!(
        "Rent of {:.2} for {} to {} was due on {} and has not been received.",
        invoice.amount,
        invoice.start_period_date.format("%d/%m/%Y"),
        invoice.end_period_date.format("%d/%m/%Y"),
        invoice.due_date.format("%d/%m/%Y"),
    )
}

pub fn new_warning(
    invoice: &RecurringInvoice,
    warning_type: WarningType,
    message: &str,
    sent_by: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<RentWarning> {
    let message = message.trim();
    let message = if message.is_empty() {
        match warning_type {
            WarningType::Automatic => automatic_warning_message(invoice),
            WarningType::Manual => {
                return Err(LifecycleError::InvalidInput(
                    "a manual warning needs a message".to_string(),
                ));
            }
        }
    } else {
        message.to_string()
    };

    Ok(RentWarning {
        id: Uuid::new_v4(),
        claim_id: invoice.claim_id,
        invoice_id: Some(invoice.id),
        warning_type,
        message,
        sent_by,
        sent_at: now,
    })
}

/// Drops warnings whose invoice already has a payment proof. The warnings
/// themselves are kept in storage; this only decides what is shown.
pub fn visible_warnings(
    warnings: Vec<RentWarning>,
    invoices: &[RecurringInvoice],
) -> Vec<RentWarning> {
    warnings
        .into_iter()
        .filter(|warning| {
            let Some(invoice_id) = warning.invoice_id else {
                return true;
            };
            !invoices
                .iter()
                .any(|invoice| invoice.id == invoice_id && invoice.has_proof())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use domus_core::PaymentStatus;
    use rust_decimal::Decimal;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn overdue_invoice() -> RecurringInvoice {
        RecurringInvoice {
            id: Uuid::new_v4(),
            claim_id: Uuid::new_v4(),
            contract_id: Uuid::new_v4(),
            invoice_date: date(2024, 3, 1),
            start_period_date: date(2024, 3, 1),
            end_period_date: date(2024, 3, 31),
            due_date: date(2024, 3, 8),
            amount: Decimal::new(60_000, 0),
            payment_status: PaymentStatus::Pending,
            recurring_active: true,
            invoice_path: None,
            proof_path: None,
            confirmed_by: None,
            confirmed_at: None,
            created_at: Utc::now(),
        }
    }

    fn warning(invoice: &RecurringInvoice, warning_type: WarningType) -> RentWarning {
        new_warning(invoice, warning_type, "reminder", None, Utc::now()).unwrap()
    }

    fn today() -> NaiveDate {
        date(2024, 3, 20)
    }

    fn eligible_setup() -> (RecurringInvoice, Vec<RentWarning>) {
        let invoice = overdue_invoice();
        let warnings = vec![
            warning(&invoice, WarningType::Automatic),
            warning(&invoice, WarningType::Automatic),
        ];
        (invoice, warnings)
    }

    #[test]
    fn manual_warning_allowed_when_every_condition_holds() {
        let (invoice, warnings) = eligible_setup();
        assert_eq!(manual_warning_eligibility(&invoice, &warnings, today()), Ok(()));
    }

    #[test]
    fn paid_invoice_denies_manual_warning() {
        let (mut invoice, warnings) = eligible_setup();
        invoice.payment_status = PaymentStatus::Confirmed;
        assert_eq!(
            manual_warning_eligibility(&invoice, &warnings, today()),
            Err(ManualWarningDenial::AlreadyPaid)
        );
    }

    #[test]
    fn invoice_not_past_due_denies_manual_warning() {
        let (invoice, warnings) = eligible_setup();
        assert_eq!(
            manual_warning_eligibility(&invoice, &warnings, invoice.due_date),
            Err(ManualWarningDenial::NotYetDue)
        );
    }

    #[test]
    fn uploaded_proof_denies_manual_warning() {
        let (mut invoice, warnings) = eligible_setup();
        invoice.proof_path = Some("proofs/march.pdf".to_string());
        assert_eq!(
            manual_warning_eligibility(&invoice, &warnings, today()),
            Err(ManualWarningDenial::ProofUploaded)
        );
    }

    #[test]
    fn existing_manual_warning_denies_another() {
        let (invoice, mut warnings) = eligible_setup();
        warnings.push(warning(&invoice, WarningType::Manual));
        assert_eq!(
            manual_warning_eligibility(&invoice, &warnings, today()),
            Err(ManualWarningDenial::ManualWarningAlreadySent)
        );
    }

    #[test]
    fn fewer_than_two_automatic_warnings_denies_manual_warning() {
        let (invoice, mut warnings) = eligible_setup();
        warnings.pop();
        assert_eq!(
            manual_warning_eligibility(&invoice, &warnings, today()),
            Err(ManualWarningDenial::InsufficientAutomaticWarnings { found: 1 })
        );
    }

    #[test]
    fn warnings_on_other_claims_do_not_count() {
        let (invoice, _) = eligible_setup();
        let other = overdue_invoice();
        let warnings = vec![
            warning(&other, WarningType::Automatic),
            warning(&other, WarningType::Automatic),
        ];
        assert_eq!(
            manual_warning_eligibility(&invoice, &warnings, today()),
            Err(ManualWarningDenial::InsufficientAutomaticWarnings { found: 0 })
        );
    }

    #[test]
    fn manual_warning_needs_a_message() {
        let invoice = overdue_invoice();
        let err = new_warning(&invoice, WarningType::Manual, " ", None, Utc::now()).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidInput(_)));

        let automatic =
            new_warning(&invoice, WarningType::Automatic, "", None, Utc::now()).unwrap();
        assert!(automatic.message.contains("08/03/2024"));
    }

    #[test]
    fn automatic_warnings_respect_interval() {
        let invoice = overdue_invoice();
        assert!(automatic_warning_due(&invoice, None, today(), 7));

        let sent_at = date(2024, 3, 10).and_hms_opt(9, 0, 0).unwrap().and_utc();
        assert!(!automatic_warning_due(&invoice, Some(sent_at), date(2024, 3, 13), 7));
        assert!(automatic_warning_due(&invoice, Some(sent_at), date(2024, 3, 17), 7));
    }

    #[test]
    fn automatic_warning_skips_paid_proven_or_future_invoices() {
        let mut invoice = overdue_invoice();
        assert!(!automatic_warning_due(&invoice, None, invoice.due_date, 7));

        invoice.proof_path = Some("proof.pdf".to_string());
        assert!(!automatic_warning_due(&invoice, None, today(), 7));

        invoice.proof_path = None;
        invoice.recurring_active = false;
        assert!(!automatic_warning_due(&invoice, None, today(), 7));
    }

    #[test]
    fn last_automatic_warning_picks_latest_for_invoice() {
        let invoice = overdue_invoice();
        let mut older = warning(&invoice, WarningType::Automatic);
        older.sent_at -= Duration::days(10);
        let newer = warning(&invoice, WarningType::Automatic);
        let manual = warning(&invoice, WarningType::Manual);

        let last = last_automatic_warning(invoice.id, &[older, newer.clone(), manual]);
        assert_eq!(last, Some(newer.sent_at));
        assert_eq!(last_automatic_warning(Uuid::new_v4(), &[]), None);
    }

    #[test]
    fn warnings_hide_once_proof_is_uploaded() {
        let mut invoice = overdue_invoice();
        let other = overdue_invoice();
        let warnings = vec![
            warning(&invoice, WarningType::Automatic),
            warning(&other, WarningType::Automatic),
        ];

        let shown = visible_warnings(warnings.clone(), &[invoice.clone(), other.clone()]);
        assert_eq!(shown.len(), 2);

        invoice.proof_path = Some("proof.pdf".to_string());
        let shown = visible_warnings(warnings.clone(), &[invoice.clone(), other.clone()]);
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].invoice_id, Some(other.id));
        assert_eq!(warnings.len(), 2);
    }
}
