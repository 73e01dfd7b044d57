//! Recurring rent invoices derived from contract terms.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use domus_core::{
    ContractTerms, LifecycleError, PaymentStatus, RecurringInvoice, Result,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One billing period of a contract, before it is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvoicePeriod {
    pub invoice_date: NaiveDate,
    pub start_period_date: NaiveDate,
    pub end_period_date: NaiveDate,
    pub due_date: NaiveDate,
    pub amount: Decimal,
}

/// Billing periods from `start_date` (inclusive) to `end_date` (exclusive), one
/// every `payment_frequency` months.
///
/// Each step is computed from the start date rather than from the previous
/// step, so a contract starting on the 31st keeps billing on the last day of
/// shorter months without drifting.
pub fn invoice_schedule(terms: &ContractTerms) -> Vec<InvoicePeriod> {
    let interval = terms.payment_frequency.interval_months();
    let amount = terms.monthly_amount * Decimal::from(interval);
    let grace = Duration::days(i64::from(terms.grace_period_days.max(0)));

    let mut periods = Vec::new();
    for step in 0.. {
        let Some(date) = terms
            .start_date
            .checked_add_months(Months::new(step * interval))
        else {
            break;
        };
        if date >= terms.end_date {
            break;
        }

        let last_month = date
            .checked_add_months(Months::new(interval - 1))
            .unwrap_or(date);

        periods.push(InvoicePeriod {
            invoice_date: date,
            start_period_date: date,
            end_period_date: end_of_month(last_month),
            due_date: date + grace,
            amount,
        });
    }

    periods
}

/// Last calendar day of the month `date` falls in.
pub fn end_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };

    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first_of_next| first_of_next.pred_opt())
        .unwrap_or(date)
}

pub fn build_invoices(
    claim_id: Uuid,
    contract_id: Uuid,
    periods: &[InvoicePeriod],
    now: DateTime<Utc>,
) -> Vec<RecurringInvoice> {
    periods
        .iter()
        .map(|period| RecurringInvoice {
            id: Uuid::new_v4(),
            claim_id,
            contract_id,
            invoice_date: period.invoice_date,
            start_period_date: period.start_period_date,
            end_period_date: period.end_period_date,
            due_date: period.due_date,
            amount: period.amount,
            payment_status: PaymentStatus::Pending,
            recurring_active: true,
            invoice_path: None,
            proof_path: None,
            confirmed_by: None,
            confirmed_at: None,
            created_at: now,
        })
        .collect()
}

/// Generation is one-shot per contract; a second run is refused rather than merged.
/// A renewed contract of the same claim starts with no invoices of its own.
pub fn ensure_not_generated(contract_id: Uuid, claim_invoices: &[RecurringInvoice]) -> Result<()> {
    let existing = claim_invoices
        .iter()
        .filter(|invoice| invoice.contract_id == contract_id)
        .count();
    if existing == 0 {
        return Ok(());
    }
    Err(LifecycleError::AlreadyExists {
        entity: "recurring invoices",
        detail: format!("contract {contract_id} already has {existing} invoice(s)"),
    })
}

/// Drops the periods an earlier contract of the same claim still bills, so a
/// renewed lease picks up after the last period its predecessor covers.
pub fn unbilled_periods(
    periods: Vec<InvoicePeriod>,
    contract_id: Uuid,
    claim_invoices: &[RecurringInvoice],
) -> Vec<InvoicePeriod> {
    let billed_until = claim_invoices
        .iter()
        .filter(|invoice| {
            invoice.contract_id != contract_id
                && (invoice.recurring_active || invoice.is_confirmed())
        })
        .map(|invoice| invoice.end_period_date)
        .max();

    match billed_until {
        Some(until) => periods
            .into_iter()
            .filter(|period| period.start_period_date > until)
            .collect(),
        None => periods,
    }
}

/// The invoice a client or accountant should act on next: the earliest unpaid
/// active invoice by due date, otherwise the latest confirmed one.
pub fn current_invoice(invoices: &[RecurringInvoice]) -> Option<&RecurringInvoice> {
    invoices
        .iter()
        .filter(|invoice| !invoice.is_confirmed() && invoice.recurring_active)
        .min_by_key(|invoice| (invoice.due_date, invoice.invoice_date))
        .or_else(|| {
            invoices
                .iter()
                .filter(|invoice| invoice.is_confirmed())
                .max_by_key(|invoice| invoice.invoice_date)
        })
}

pub fn record_invoice_proof(invoice: &mut RecurringInvoice, path: &str) -> Result<()> {
    if invoice.is_confirmed() {
        return Err(LifecycleError::invalid_transition(
            "invoice",
            "attach proof to",
            "confirmed",
        ));
    }
    let path = path.trim();
    if path.is_empty() {
        return Err(LifecycleError::InvalidInput("file path is required".to_string()));
    }
    invoice.proof_path = Some(path.to_string());
    Ok(())
}

/// Returns `true` when the invoice was already confirmed and nothing should change.
pub fn plan_invoice_confirmation(invoice: &RecurringInvoice) -> Result<bool> {
    if invoice.is_confirmed() {
        return Ok(true);
    }
    if !invoice.recurring_active {
        return Err(LifecycleError::invalid_transition(
            "invoice",
            "confirm",
            "inactive",
        ));
    }
    if !invoice.has_proof() {
        return Err(LifecycleError::MissingPrerequisite(format!(
            "invoice {} has no payment proof",
            invoice.id
        )));
    }
    Ok(false)
}

pub fn apply_invoice_confirmation(
    invoice: &mut RecurringInvoice,
    actor_id: Uuid,
    now: DateTime<Utc>,
) {
    invoice.payment_status = PaymentStatus::Confirmed;
    invoice.confirmed_by = Some(actor_id);
    invoice.confirmed_at = Some(now);
}

/// Stops billing for unpaid periods that start after the contract ended.
/// Returns the ids of the invoices it switched off.
pub fn deactivate_after(invoices: &mut [RecurringInvoice], actual_end: NaiveDate) -> Vec<Uuid> {
    invoices
        .iter_mut()
        .filter(|invoice| {
            invoice.recurring_active
                && !invoice.is_confirmed()
                && invoice.start_period_date > actual_end
        })
        .map(|invoice| {
            invoice.recurring_active = false;
            invoice.id
        })
        .collect()
}

/// Stops billing a superseded contract for unpaid periods that start after it
/// was renewed. Returns the ids of the invoices it switched off.
pub fn deactivate_superseded(
    invoices: &mut [RecurringInvoice],
    contract_id: Uuid,
    renewed_on: NaiveDate,
) -> Vec<Uuid> {
    invoices
        .iter_mut()
        .filter(|invoice| {
            invoice.contract_id == contract_id
                && invoice.recurring_active
                && !invoice.is_confirmed()
                && invoice.start_period_date > renewed_on
        })
        .map(|invoice| {
            invoice.recurring_active = false;
            invoice.id
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use domus_core::{PaymentFrequency, RevisionUnit};

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn terms(frequency: PaymentFrequency) -> ContractTerms {
        ContractTerms {
            start_date: date(2024, 1, 1),
            end_date: date(2024, 12, 31),
            monthly_amount: Decimal::new(120_000, 2),
            payment_frequency: frequency,
            grace_period_days: 7,
            penalty_rate: Decimal::new(5, 2),
            notice_period_months: 2,
            revision_frequency: 1,
            revision_unit: RevisionUnit::Year,
        }
    }

    #[test]
    fn monthly_contract_yields_twelve_invoices() {
        let periods = invoice_schedule(&terms(PaymentFrequency::Monthly));

        assert_eq!(periods.len(), 12);
        for (index, period) in periods.iter().enumerate() {
            assert_eq!(period.start_period_date, date(2024, index as u32 + 1, 1));
            assert_eq!(period.invoice_date, period.start_period_date);
            assert_eq!(period.due_date, period.start_period_date + Duration::days(7));
            assert_eq!(period.amount, Decimal::new(120_000, 2));
            assert_eq!(period.end_period_date, end_of_month(period.start_period_date));
        }
        assert_eq!(periods[1].end_period_date, date(2024, 2, 29));
    }

    #[test]
    fn quarterly_contract_yields_four_invoices_ending_on_quarter_month_end() {
        let periods = invoice_schedule(&terms(PaymentFrequency::Quarterly));

        assert_eq!(periods.len(), 4);
        let expected_ends = [
            date(2024, 3, 31),
            date(2024, 6, 30),
            date(2024, 9, 30),
            date(2024, 12, 31),
        ];
        for (period, expected_end) in periods.iter().zip(expected_ends) {
            assert_eq!(period.amount, Decimal::new(360_000, 2));
            assert_eq!(period.end_period_date, expected_end);
            assert_eq!(period.due_date, period.start_period_date + Duration::days(7));
        }
    }

    #[test]
    fn yearly_contract_bills_twelve_months_at_once() {
        let periods = invoice_schedule(&terms(PaymentFrequency::Yearly));

        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].amount, Decimal::new(1_440_000, 2));
        assert_eq!(periods[0].end_period_date, date(2024, 12, 31));
    }

    #[test]
    fn due_date_ignores_month_length() {
        let mut terms = terms(PaymentFrequency::Monthly);
        terms.start_date = date(2024, 1, 31);
        terms.grace_period_days = 5;

        let periods = invoice_schedule(&terms);
        assert_eq!(periods[0].due_date, date(2024, 2, 5));
        assert_eq!(periods[1].start_period_date, date(2024, 2, 29));
        assert_eq!(periods[1].due_date, date(2024, 3, 5));
        assert_eq!(periods[2].start_period_date, date(2024, 3, 31));
    }

    #[test]
    fn end_date_is_exclusive() {
        let mut terms = terms(PaymentFrequency::Monthly);
        terms.end_date = date(2024, 4, 1);
        assert_eq!(invoice_schedule(&terms).len(), 3);

        terms.end_date = terms.start_date;
        assert!(invoice_schedule(&terms).is_empty());
    }

    #[test]
    fn end_of_month_handles_december_and_leap_years() {
        assert_eq!(end_of_month(date(2023, 12, 5)), date(2023, 12, 31));
        assert_eq!(end_of_month(date(2023, 2, 10)), date(2023, 2, 28));
        assert_eq!(end_of_month(date(2024, 2, 10)), date(2024, 2, 29));
    }

    fn generated(frequency: PaymentFrequency) -> Vec<RecurringInvoice> {
        let periods = invoice_schedule(&terms(frequency));
        build_invoices(Uuid::new_v4(), Uuid::new_v4(), &periods, Utc::now())
    }

    #[test]
    fn built_invoices_start_pending_and_active() {
        let invoices = generated(PaymentFrequency::Quarterly);
        assert!(invoices.iter().all(|invoice| {
            invoice.payment_status == PaymentStatus::Pending && invoice.recurring_active
        }));
    }

    #[test]
    fn second_generation_is_refused() {
        let invoices = generated(PaymentFrequency::Monthly);
        assert!(ensure_not_generated(Uuid::new_v4(), &[]).is_ok());
        let err = ensure_not_generated(invoices[0].contract_id, &invoices).unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyExists { .. }));
    }

    #[test]
    fn renewed_contract_may_generate_its_own_invoices() {
        let invoices = generated(PaymentFrequency::Monthly);
        assert!(ensure_not_generated(Uuid::new_v4(), &invoices).is_ok());
    }

    #[test]
    fn renewed_schedule_starts_after_last_billed_period() {
        let mut invoices = generated(PaymentFrequency::Monthly);
        let renewed_id = Uuid::new_v4();
        let mut renewed_terms = terms(PaymentFrequency::Monthly);
        renewed_terms.end_date = date(2025, 12, 31);
        let periods = invoice_schedule(&renewed_terms);
        assert_eq!(periods.len(), 24);

        let remaining = unbilled_periods(periods.clone(), renewed_id, &invoices);
        assert_eq!(remaining.len(), 12);
        assert_eq!(remaining[0].start_period_date, date(2025, 1, 1));

        let superseded_id = invoices[0].contract_id;
        let switched = deactivate_superseded(&mut invoices, superseded_id, date(2024, 8, 15));
        assert_eq!(switched.len(), 4);
        let remaining = unbilled_periods(periods, renewed_id, &invoices);
        assert_eq!(remaining[0].start_period_date, date(2024, 9, 1));
        assert_eq!(remaining.len(), 16);
    }

    #[test]
    fn superseding_leaves_paid_and_other_contracts_alone() {
        let mut invoices = generated(PaymentFrequency::Monthly);
        apply_invoice_confirmation(&mut invoices[11], Uuid::new_v4(), Utc::now());

        let switched = deactivate_superseded(&mut invoices, Uuid::new_v4(), date(2024, 1, 1));
        assert!(switched.is_empty());

        let contract_id = invoices[0].contract_id;
        let switched = deactivate_superseded(&mut invoices, contract_id, date(2024, 1, 1));
        assert_eq!(switched.len(), 10);
        assert!(invoices[0].recurring_active);
        assert!(invoices[11].recurring_active);
    }

    #[test]
    fn current_invoice_is_earliest_unpaid() {
        let mut invoices = generated(PaymentFrequency::Monthly);
        invoices.reverse();
        assert_eq!(current_invoice(&invoices).unwrap().invoice_date, date(2024, 1, 1));

        let staff = Uuid::new_v4();
        for invoice in invoices.iter_mut().filter(|i| i.invoice_date < date(2024, 4, 1)) {
            apply_invoice_confirmation(invoice, staff, Utc::now());
        }
        assert_eq!(current_invoice(&invoices).unwrap().invoice_date, date(2024, 4, 1));
    }

    #[test]
    fn current_invoice_falls_back_to_latest_confirmed() {
        let mut invoices = generated(PaymentFrequency::Quarterly);
        for invoice in invoices.iter_mut() {
            apply_invoice_confirmation(invoice, Uuid::new_v4(), Utc::now());
        }
        assert_eq!(current_invoice(&invoices).unwrap().invoice_date, date(2024, 10, 1));
        assert!(current_invoice(&[]).is_none());
    }

    #[test]
    fn invoice_confirmation_needs_proof_and_is_idempotent() {
        let mut invoices = generated(PaymentFrequency::Monthly);
        let invoice = &mut invoices[0];

        let err = plan_invoice_confirmation(invoice).unwrap_err();
        assert!(matches!(err, LifecycleError::MissingPrerequisite(_)));

        record_invoice_proof(invoice, "proofs/jan.pdf").unwrap();
        assert!(!plan_invoice_confirmation(invoice).unwrap());
        apply_invoice_confirmation(invoice, Uuid::new_v4(), Utc::now());
        assert!(plan_invoice_confirmation(invoice).unwrap());
    }

    #[test]
    fn termination_switches_off_later_unpaid_invoices() {
        let mut invoices = generated(PaymentFrequency::Monthly);
        apply_invoice_confirmation(&mut invoices[0], Uuid::new_v4(), Utc::now());

        let switched = deactivate_after(&mut invoices, date(2024, 6, 15));
        assert_eq!(switched.len(), 6);
        assert!(invoices[5].recurring_active);
        assert!(!invoices[6].recurring_active);
        assert!(invoices[0].recurring_active);
        assert_eq!(current_invoice(&invoices).unwrap().invoice_date, date(2024, 2, 1));
    }
}
