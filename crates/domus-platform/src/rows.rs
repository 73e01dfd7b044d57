//! Row mapping and single-table statements used by [`crate::PgLedger`].
//!
//! Every function takes a `PgConnection` borrowed from the caller's transaction,
//! so each business operation still commits or rolls back as a whole.

use std::str::FromStr;

use domus_core::{
    Availability, Claim, ClaimPayment, ContractParties, ContractTerms, FinalStatus,
    LifecycleError, PaymentFrequency, Property, RecurringInvoice, RentNotice, RentWarning,
    RentalContract, Result,
};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";

const CLAIM_COLUMNS: &str =
    "id, client_id, property_id, claim_type, claim_source, claimed_at, final_status";
const PROPERTY_COLUMNS: &str = "id, owner_id, address, availability";
const PAYMENT_COLUMNS: &str = "id, claim_id, payment_type, invoice_path, proof_path, status, \
     confirmed_by, confirmed_at, created_at, updated_at";
const CONTRACT_COLUMNS: &str = "id, claim_id, status, start_date, end_date, monthly_amount, \
     payment_frequency, grace_period_days, penalty_rate, notice_period_months, \
     revision_frequency, revision_unit, locked, next_revision_date, client_signature, \
     client_signed_at, owner_signature, owner_signed_at, signing_meeting_at, actual_end_date, \
     termination_type, termination_reason, contract_body, created_at, updated_at";
const INVOICE_COLUMNS: &str = "id, claim_id, contract_id, invoice_date, start_period_date, \
     end_period_date, due_date, amount, payment_status, recurring_active, invoice_path, \
     proof_path, confirmed_by, confirmed_at, created_at";
const WARNING_COLUMNS: &str =
    "id, claim_id, invoice_id, warning_type, message, sent_by, sent_at";
const NOTICE_COLUMNS: &str = "id, claim_id, contract_id, sent_by, sender_role, message, \
     immediate_termination, status, sent_at, cancelled_at";

pub(crate) fn db_error(err: sqlx::Error) -> LifecycleError {
    LifecycleError::storage(err)
}

/// Maps a unique-index violation on insert to `AlreadyExists`.
pub(crate) fn insert_error(entity: &'static str, err: sqlx::Error) -> LifecycleError {
    let duplicate = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION);
    if duplicate {
        return LifecycleError::AlreadyExists {
            entity,
            detail: err.to_string(),
        };
    }
    db_error(err)
}

fn suffix(for_update: bool) -> &'static str {
    if for_update { " FOR UPDATE" } else { "" }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column).map_err(db_error)
}

fn parse<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: FromStr<Err = LifecycleError>,
{
    let raw: String = get(row, column)?;
    raw.parse().map_err(|err: LifecycleError| {
        LifecycleError::storage(anyhow::anyhow!("column {column}: {err}"))
    })
}

fn parse_opt<T>(row: &PgRow, column: &str) -> Result<Option<T>>
where
    T: FromStr<Err = LifecycleError>,
{
    let raw: Option<String> = get(row, column)?;
    raw.map(|value| {
        value.parse().map_err(|err: LifecycleError| {
            LifecycleError::storage(anyhow::anyhow!("column {column}: {err}"))
        })
    })
    .transpose()
}

fn claim_from_row(row: &PgRow) -> Result<Claim> {
    Ok(Claim {
        id: get(row, "id")?,
        client_id: get(row, "client_id")?,
        property_id: get(row, "property_id")?,
        claim_type: parse(row, "claim_type")?,
        claim_source: parse(row, "claim_source")?,
        claimed_at: get(row, "claimed_at")?,
        final_status: parse_opt(row, "final_status")?,
    })
}

fn property_from_row(row: &PgRow) -> Result<Property> {
    Ok(Property {
        id: get(row, "id")?,
        owner_id: get(row, "owner_id")?,
        address: get(row, "address")?,
        availability: parse(row, "availability")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<ClaimPayment> {
    Ok(ClaimPayment {
        id: get(row, "id")?,
        claim_id: get(row, "claim_id")?,
        payment_type: parse(row, "payment_type")?,
        invoice_path: get(row, "invoice_path")?,
        proof_path: get(row, "proof_path")?,
        status: parse(row, "status")?,
        confirmed_by: get(row, "confirmed_by")?,
        confirmed_at: get(row, "confirmed_at")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn contract_from_row(row: &PgRow) -> Result<RentalContract> {
    let frequency: String = get(row, "payment_frequency")?;
    Ok(RentalContract {
        id: get(row, "id")?,
        claim_id: get(row, "claim_id")?,
        status: parse(row, "status")?,
        terms: ContractTerms {
            start_date: get(row, "start_date")?,
            end_date: get(row, "end_date")?,
            monthly_amount: get(row, "monthly_amount")?,
            payment_frequency: PaymentFrequency::from_stored(&frequency),
            grace_period_days: get(row, "grace_period_days")?,
            penalty_rate: get(row, "penalty_rate")?,
            notice_period_months: get(row, "notice_period_months")?,
            revision_frequency: get(row, "revision_frequency")?,
            revision_unit: parse(row, "revision_unit")?,
        },
        locked: get(row, "locked")?,
        next_revision_date: get(row, "next_revision_date")?,
        client_signature: get(row, "client_signature")?,
        client_signed_at: get(row, "client_signed_at")?,
        owner_signature: get(row, "owner_signature")?,
        owner_signed_at: get(row, "owner_signed_at")?,
        signing_meeting_at: get(row, "signing_meeting_at")?,
        actual_end_date: get(row, "actual_end_date")?,
        termination_type: parse_opt(row, "termination_type")?,
        termination_reason: get(row, "termination_reason")?,
        contract_body: get(row, "contract_body")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn invoice_from_row(row: &PgRow) -> Result<RecurringInvoice> {
    Ok(RecurringInvoice {
        id: get(row, "id")?,
        claim_id: get(row, "claim_id")?,
        contract_id: get(row, "contract_id")?,
        invoice_date: get(row, "invoice_date")?,
        start_period_date: get(row, "start_period_date")?,
        end_period_date: get(row, "end_period_date")?,
        due_date: get(row, "due_date")?,
        amount: get(row, "amount")?,
        payment_status: parse(row, "payment_status")?,
        recurring_active: get(row, "recurring_active")?,
        invoice_path: get(row, "invoice_path")?,
        proof_path: get(row, "proof_path")?,
        confirmed_by: get(row, "confirmed_by")?,
        confirmed_at: get(row, "confirmed_at")?,
        created_at: get(row, "created_at")?,
    })
}

fn warning_from_row(row: &PgRow) -> Result<RentWarning> {
    Ok(RentWarning {
        id: get(row, "id")?,
        claim_id: get(row, "claim_id")?,
        invoice_id: get(row, "invoice_id")?,
        warning_type: parse(row, "warning_type")?,
        message: get(row, "message")?,
        sent_by: get(row, "sent_by")?,
        sent_at: get(row, "sent_at")?,
    })
}

fn notice_from_row(row: &PgRow) -> Result<RentNotice> {
    Ok(RentNotice {
        id: get(row, "id")?,
        claim_id: get(row, "claim_id")?,
        contract_id: get(row, "contract_id")?,
        sent_by: get(row, "sent_by")?,
        sender_role: parse(row, "sender_role")?,
        message: get(row, "message")?,
        immediate_termination: get(row, "immediate_termination")?,
        status: parse(row, "status")?,
        sent_at: get(row, "sent_at")?,
        cancelled_at: get(row, "cancelled_at")?,
    })
}

pub(crate) async fn client_exists(conn: &mut PgConnection, client_id: Uuid) -> Result<bool> {
    let row = sqlx::query("SELECT 1 AS present FROM clients WHERE id = $1")
        .bind(client_id)
        .fetch_optional(conn)
        .await
        .map_err(db_error)?;
    Ok(row.is_some())
}

pub(crate) async fn fetch_claim(
    conn: &mut PgConnection,
    claim_id: Uuid,
    for_update: bool,
) -> Result<Claim> {
    let sql = format!(
        "SELECT {CLAIM_COLUMNS} FROM client_claims WHERE id = $1{}",
        suffix(for_update)
    );
    let row = sqlx::query(&sql)
        .bind(claim_id)
        .fetch_optional(conn)
        .await
        .map_err(db_error)?
        .ok_or_else(|| LifecycleError::not_found("claim", claim_id))?;
    claim_from_row(&row)
}

pub(crate) async fn fetch_property(
    conn: &mut PgConnection,
    property_id: Uuid,
    for_update: bool,
) -> Result<Property> {
    let sql = format!(
        "SELECT {PROPERTY_COLUMNS} FROM properties WHERE id = $1{}",
        suffix(for_update)
    );
    let row = sqlx::query(&sql)
        .bind(property_id)
        .fetch_optional(conn)
        .await
        .map_err(db_error)?
        .ok_or_else(|| LifecycleError::not_found("property", property_id))?;
    property_from_row(&row)
}

pub(crate) async fn fetch_parties(
    conn: &mut PgConnection,
    claim: &Claim,
    property: &Property,
) -> Result<ContractParties> {
    let row = sqlx::query(
        r#"
        SELECT c.full_name AS client_name, o.full_name AS owner_name
        FROM clients c
        CROSS JOIN owners o
        WHERE c.id = $1 AND o.id = $2
        "#,
    )
    .bind(claim.client_id)
    .bind(property.owner_id)
    .fetch_optional(conn)
    .await
    .map_err(db_error)?
    .ok_or_else(|| LifecycleError::not_found("contract parties for claim", claim.id))?;

    Ok(ContractParties {
        client_name: get(&row, "client_name")?,
        owner_name: get(&row, "owner_name")?,
        property_address: property.address.clone(),
    })
}

pub(crate) async fn insert_claim(conn: &mut PgConnection, claim: &Claim) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO client_claims (
            id, client_id, property_id, claim_type, claim_source, claimed_at, final_status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(claim.id)
    .bind(claim.client_id)
    .bind(claim.property_id)
    .bind(claim.claim_type.as_str())
    .bind(claim.claim_source.as_str())
    .bind(claim.claimed_at)
    .bind(claim.final_status.map(|status| status.as_str()))
    .execute(conn)
    .await
    .map_err(|err| insert_error("claim", err))?;
    Ok(())
}

pub(crate) async fn set_claim_status(
    conn: &mut PgConnection,
    claim_id: Uuid,
    status: FinalStatus,
) -> Result<()> {
    sqlx::query("UPDATE client_claims SET final_status = $2 WHERE id = $1")
        .bind(claim_id)
        .bind(status.as_str())
        .execute(conn)
        .await
        .map_err(db_error)?;
    Ok(())
}

pub(crate) async fn set_availability(
    conn: &mut PgConnection,
    property_id: Uuid,
    availability: Availability,
) -> Result<()> {
    sqlx::query("UPDATE properties SET availability = $2 WHERE id = $1")
        .bind(property_id)
        .bind(availability.as_str())
        .execute(conn)
        .await
        .map_err(db_error)?;
    Ok(())
}

pub(crate) async fn fetch_payment(
    conn: &mut PgConnection,
    payment_id: Uuid,
    for_update: bool,
) -> Result<ClaimPayment> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM rental_claim_payments WHERE id = $1{}",
        suffix(for_update)
    );
    let row = sqlx::query(&sql)
        .bind(payment_id)
        .fetch_optional(conn)
        .await
        .map_err(db_error)?
        .ok_or_else(|| LifecycleError::not_found("payment", payment_id))?;
    payment_from_row(&row)
}

pub(crate) async fn claim_payments(
    conn: &mut PgConnection,
    claim_id: Uuid,
) -> Result<Vec<ClaimPayment>> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM rental_claim_payments WHERE claim_id = $1 \
         ORDER BY created_at, payment_type"
    );
    let rows = sqlx::query(&sql)
        .bind(claim_id)
        .fetch_all(conn)
        .await
        .map_err(db_error)?;
    rows.iter().map(payment_from_row).collect()
}

pub(crate) async fn insert_payment(conn: &mut PgConnection, payment: &ClaimPayment) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO rental_claim_payments (
            id, claim_id, payment_type, invoice_path, proof_path, status,
            confirmed_by, confirmed_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(payment.id)
    .bind(payment.claim_id)
    .bind(payment.payment_type.as_str())
    .bind(&payment.invoice_path)
    .bind(&payment.proof_path)
    .bind(payment.status.as_str())
    .bind(payment.confirmed_by)
    .bind(payment.confirmed_at)
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(conn)
    .await
    .map_err(|err| insert_error("payment", err))?;
    Ok(())
}

pub(crate) async fn update_payment(conn: &mut PgConnection, payment: &ClaimPayment) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE rental_claim_payments
        SET invoice_path = $2, proof_path = $3, status = $4,
            confirmed_by = $5, confirmed_at = $6, updated_at = $7
        WHERE id = $1
        "#,
    )
    .bind(payment.id)
    .bind(&payment.invoice_path)
    .bind(&payment.proof_path)
    .bind(payment.status.as_str())
    .bind(payment.confirmed_by)
    .bind(payment.confirmed_at)
    .bind(payment.updated_at)
    .execute(conn)
    .await
    .map_err(db_error)?;
    Ok(())
}

/// The claim's contract row that has not been superseded, if any.
pub(crate) async fn current_contract(
    conn: &mut PgConnection,
    claim_id: Uuid,
    for_update: bool,
) -> Result<Option<RentalContract>> {
    let sql = format!(
        "SELECT {CONTRACT_COLUMNS} FROM rental_contracts \
         WHERE claim_id = $1 AND status <> 'superseded'{}",
        suffix(for_update)
    );
    let row = sqlx::query(&sql)
        .bind(claim_id)
        .fetch_optional(conn)
        .await
        .map_err(db_error)?;
    row.as_ref().map(contract_from_row).transpose()
}

pub(crate) async fn require_contract(
    conn: &mut PgConnection,
    claim_id: Uuid,
    for_update: bool,
) -> Result<RentalContract> {
    current_contract(conn, claim_id, for_update)
        .await?
        .ok_or_else(|| LifecycleError::not_found("contract for claim", claim_id))
}

pub(crate) async fn insert_contract(
    conn: &mut PgConnection,
    contract: &RentalContract,
) -> Result<()> {
    let terms = &contract.terms;
    sqlx::query(
        r#"
        INSERT INTO rental_contracts (
            id, claim_id, status, start_date, end_date, monthly_amount, payment_frequency,
            grace_period_days, penalty_rate, notice_period_months, revision_frequency,
            revision_unit, locked, next_revision_date, client_signature, client_signed_at,
            owner_signature, owner_signed_at, signing_meeting_at, actual_end_date,
            termination_type, termination_reason, contract_body, created_at, updated_at
        )
        VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
            $18, $19, $20, $21, $22, $23, $24, $25
        )
        "#,
    )
    .bind(contract.id)
    .bind(contract.claim_id)
    .bind(contract.status.as_str())
    .bind(terms.start_date)
    .bind(terms.end_date)
    .bind(terms.monthly_amount)
    .bind(terms.payment_frequency.as_str())
    .bind(terms.grace_period_days)
    .bind(terms.penalty_rate)
    .bind(terms.notice_period_months)
    .bind(terms.revision_frequency)
    .bind(terms.revision_unit.as_str())
    .bind(contract.locked)
    .bind(contract.next_revision_date)
    .bind(&contract.client_signature)
    .bind(contract.client_signed_at)
    .bind(&contract.owner_signature)
    .bind(contract.owner_signed_at)
    .bind(contract.signing_meeting_at)
    .bind(contract.actual_end_date)
    .bind(contract.termination_type.map(|kind| kind.as_str()))
    .bind(&contract.termination_reason)
    .bind(&contract.contract_body)
    .bind(contract.created_at)
    .bind(contract.updated_at)
    .execute(conn)
    .await
    .map_err(|err| insert_error("contract", err))?;
    Ok(())
}

pub(crate) async fn update_contract(
    conn: &mut PgConnection,
    contract: &RentalContract,
) -> Result<()> {
    let terms = &contract.terms;
    sqlx::query(
        r#"
        UPDATE rental_contracts
        SET status = $2, start_date = $3, end_date = $4, monthly_amount = $5,
            payment_frequency = $6, grace_period_days = $7, penalty_rate = $8,
            notice_period_months = $9, revision_frequency = $10, revision_unit = $11,
            locked = $12, next_revision_date = $13, client_signature = $14,
            client_signed_at = $15, owner_signature = $16, owner_signed_at = $17,
            signing_meeting_at = $18, actual_end_date = $19, termination_type = $20,
            termination_reason = $21, contract_body = $22, updated_at = $23
        WHERE id = $1
        "#,
    )
    .bind(contract.id)
    .bind(contract.status.as_str())
    .bind(terms.start_date)
    .bind(terms.end_date)
    .bind(terms.monthly_amount)
    .bind(terms.payment_frequency.as_str())
    .bind(terms.grace_period_days)
    .bind(terms.penalty_rate)
    .bind(terms.notice_period_months)
    .bind(terms.revision_frequency)
    .bind(terms.revision_unit.as_str())
    .bind(contract.locked)
    .bind(contract.next_revision_date)
    .bind(&contract.client_signature)
    .bind(contract.client_signed_at)
    .bind(&contract.owner_signature)
    .bind(contract.owner_signed_at)
    .bind(contract.signing_meeting_at)
    .bind(contract.actual_end_date)
    .bind(contract.termination_type.map(|kind| kind.as_str()))
    .bind(&contract.termination_reason)
    .bind(&contract.contract_body)
    .bind(contract.updated_at)
    .execute(conn)
    .await
    .map_err(db_error)?;
    Ok(())
}

pub(crate) async fn fetch_invoice(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    for_update: bool,
) -> Result<RecurringInvoice> {
    let sql = format!(
        "SELECT {INVOICE_COLUMNS} FROM rental_recurring_invoices WHERE id = $1{}",
        suffix(for_update)
    );
    let row = sqlx::query(&sql)
        .bind(invoice_id)
        .fetch_optional(conn)
        .await
        .map_err(db_error)?
        .ok_or_else(|| LifecycleError::not_found("invoice", invoice_id))?;
    invoice_from_row(&row)
}

pub(crate) async fn claim_invoices(
    conn: &mut PgConnection,
    claim_id: Uuid,
    for_update: bool,
) -> Result<Vec<RecurringInvoice>> {
    let sql = format!(
        "SELECT {INVOICE_COLUMNS} FROM rental_recurring_invoices WHERE claim_id = $1 \
         ORDER BY invoice_date{}",
        suffix(for_update)
    );
    let rows = sqlx::query(&sql)
        .bind(claim_id)
        .fetch_all(conn)
        .await
        .map_err(db_error)?;
    rows.iter().map(invoice_from_row).collect()
}

/// Unpaid, active invoices already past their due date, oldest first.
pub(crate) async fn overdue_invoices(
    conn: &mut PgConnection,
    today: chrono::NaiveDate,
) -> Result<Vec<RecurringInvoice>> {
    let sql = format!(
        "SELECT {INVOICE_COLUMNS} FROM rental_recurring_invoices \
         WHERE payment_status = 'pending' AND recurring_active AND due_date < $1 \
         ORDER BY due_date FOR UPDATE"
    );
    let rows = sqlx::query(&sql)
        .bind(today)
        .fetch_all(conn)
        .await
        .map_err(db_error)?;
    rows.iter().map(invoice_from_row).collect()
}

pub(crate) async fn insert_invoice(
    conn: &mut PgConnection,
    invoice: &RecurringInvoice,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO rental_recurring_invoices (
            id, claim_id, contract_id, invoice_date, start_period_date, end_period_date,
            due_date, amount, payment_status, recurring_active, invoice_path, proof_path,
            confirmed_by, confirmed_at, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(invoice.id)
    .bind(invoice.claim_id)
    .bind(invoice.contract_id)
    .bind(invoice.invoice_date)
    .bind(invoice.start_period_date)
    .bind(invoice.end_period_date)
    .bind(invoice.due_date)
    .bind(invoice.amount)
    .bind(invoice.payment_status.as_str())
    .bind(invoice.recurring_active)
    .bind(&invoice.invoice_path)
    .bind(&invoice.proof_path)
    .bind(invoice.confirmed_by)
    .bind(invoice.confirmed_at)
    .bind(invoice.created_at)
    .execute(conn)
    .await
    .map_err(|err| insert_error("recurring invoices", err))?;
    Ok(())
}

pub(crate) async fn update_invoice(
    conn: &mut PgConnection,
    invoice: &RecurringInvoice,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE rental_recurring_invoices
        SET payment_status = $2, recurring_active = $3, invoice_path = $4, proof_path = $5,
            confirmed_by = $6, confirmed_at = $7
        WHERE id = $1
        "#,
    )
    .bind(invoice.id)
    .bind(invoice.payment_status.as_str())
    .bind(invoice.recurring_active)
    .bind(&invoice.invoice_path)
    .bind(&invoice.proof_path)
    .bind(invoice.confirmed_by)
    .bind(invoice.confirmed_at)
    .execute(conn)
    .await
    .map_err(db_error)?;
    Ok(())
}

pub(crate) async fn claim_warnings(
    conn: &mut PgConnection,
    claim_id: Uuid,
) -> Result<Vec<RentWarning>> {
    let sql =
        format!("SELECT {WARNING_COLUMNS} FROM rent_warnings WHERE claim_id = $1 ORDER BY sent_at");
    let rows = sqlx::query(&sql)
        .bind(claim_id)
        .fetch_all(conn)
        .await
        .map_err(db_error)?;
    rows.iter().map(warning_from_row).collect()
}

pub(crate) async fn automatic_warnings_for(
    conn: &mut PgConnection,
    invoice_ids: &[Uuid],
) -> Result<Vec<RentWarning>> {
    let sql = format!(
        "SELECT {WARNING_COLUMNS} FROM rent_warnings \
         WHERE warning_type = 'automatic' AND invoice_id = ANY($1)"
    );
    let rows = sqlx::query(&sql)
        .bind(invoice_ids)
        .fetch_all(conn)
        .await
        .map_err(db_error)?;
    rows.iter().map(warning_from_row).collect()
}

pub(crate) async fn insert_warning(conn: &mut PgConnection, warning: &RentWarning) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO rent_warnings (id, claim_id, invoice_id, warning_type, message, sent_by, sent_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(warning.id)
    .bind(warning.claim_id)
    .bind(warning.invoice_id)
    .bind(warning.warning_type.as_str())
    .bind(&warning.message)
    .bind(warning.sent_by)
    .bind(warning.sent_at)
    .execute(conn)
    .await
    .map_err(|err| insert_error("warning", err))?;
    Ok(())
}

pub(crate) async fn claim_notices(
    conn: &mut PgConnection,
    claim_id: Uuid,
    for_update: bool,
) -> Result<Vec<RentNotice>> {
    let sql = format!(
        "SELECT {NOTICE_COLUMNS} FROM rent_notices WHERE claim_id = $1 ORDER BY sent_at{}",
        suffix(for_update)
    );
    let rows = sqlx::query(&sql)
        .bind(claim_id)
        .fetch_all(conn)
        .await
        .map_err(db_error)?;
    rows.iter().map(notice_from_row).collect()
}

pub(crate) async fn fetch_notice(conn: &mut PgConnection, notice_id: Uuid) -> Result<RentNotice> {
    let sql = format!("SELECT {NOTICE_COLUMNS} FROM rent_notices WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(notice_id)
        .fetch_optional(conn)
        .await
        .map_err(db_error)?
        .ok_or_else(|| LifecycleError::not_found("notice", notice_id))?;
    notice_from_row(&row)
}

pub(crate) async fn insert_notice(conn: &mut PgConnection, notice: &RentNotice) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO rent_notices (
            id, claim_id, contract_id, sent_by, sender_role, message,
            immediate_termination, status, sent_at, cancelled_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(notice.id)
    .bind(notice.claim_id)
    .bind(notice.contract_id)
    .bind(notice.sent_by)
    .bind(notice.sender_role.as_str())
    .bind(&notice.message)
    .bind(notice.immediate_termination)
    .bind(notice.status.as_str())
    .bind(notice.sent_at)
    .bind(notice.cancelled_at)
    .execute(conn)
    .await
    .map_err(|err| insert_error("active notice", err))?;
    Ok(())
}

pub(crate) async fn update_notice(conn: &mut PgConnection, notice: &RentNotice) -> Result<()> {
    sqlx::query("UPDATE rent_notices SET status = $2, cancelled_at = $3 WHERE id = $1")
        .bind(notice.id)
        .bind(notice.status.as_str())
        .bind(notice.cancelled_at)
        .execute(conn)
        .await
        .map_err(db_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_stay_storage_errors() {
        let err = insert_error("recurring invoices", sqlx::Error::RowNotFound);
        assert!(matches!(err, LifecycleError::Storage(_)));
    }

    #[test]
    fn locking_suffix_only_when_requested() {
        assert_eq!(suffix(true), " FOR UPDATE");
        assert_eq!(suffix(false), "");
    }
}
