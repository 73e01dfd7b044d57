//! Postgres-backed [`LifecycleStore`].
//!
//! Each operation runs in one transaction: rows it mutates are read with
//! `FOR UPDATE`, the pure rules from the domain crates decide the outcome, and
//! the writes commit together. Returning early drops the transaction, which
//! rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domus_billing::{ConfirmationPlan, invoices, payments};
use domus_contracts::{ContractTemplate, machine};
use domus_core::context::{
    AUTOMATIC_WARNING_WRITERS, INVOICE_GENERATORS, PAYMENT_CONFIRMERS, PROOF_UPLOADERS,
    WARNING_SENDERS,
};
use domus_core::{
    ActorRole, Availability, Claim, ClaimOverview, ClaimPayment, ConfirmOutcome,
    ConfirmationEffects, ContractParties, ContractPhase, ContractTerms, FinalStatus,
    LifecycleError, LifecycleStore, NewClaim, Property, RecurringInvoice, RentNotice, RentWarning,
    RentalContract, RequestContext, Result, Termination, WarningType,
};
use domus_notices::{notices, warnings};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::rows::{self, db_error};

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
    template: ContractTemplate,
}

impl PgLedger {
    pub fn new(pool: PgPool, template: ContractTemplate) -> Self {
        Self { pool, template }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(db_error)
    }

    /// Loads the claim, its property and the locked current contract, checks
    /// the caller may see the claim, then applies `transition` and persists.
    async fn update_contract<F>(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
        transition: F,
    ) -> Result<RentalContract>
    where
        F: FnOnce(&mut RentalContract, &ContractTemplate, &ContractParties) -> Result<()> + Send,
    {
        let mut tx = self.begin().await?;
        let (claim, property) = claim_with_property(&mut tx, claim_id, false).await?;
        ctx.require_viewer(&claim, &property)?;
        let parties = rows::fetch_parties(&mut tx, &claim, &property).await?;
        let mut contract = rows::require_contract(&mut tx, claim_id, true).await?;

        transition(&mut contract, &self.template, &parties)?;

        rows::update_contract(&mut tx, &contract).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(contract)
    }
}

async fn claim_with_property(
    conn: &mut PgConnection,
    claim_id: Uuid,
    for_update: bool,
) -> Result<(Claim, Property)> {
    let claim = rows::fetch_claim(conn, claim_id, for_update).await?;
    let property = rows::fetch_property(conn, claim.property_id, for_update).await?;
    Ok((claim, property))
}

fn sender(ctx: &RequestContext) -> Option<Uuid> {
    (ctx.role != ActorRole::System).then_some(ctx.actor_id)
}

#[async_trait]
impl LifecycleStore for PgLedger {
    async fn create_claim(&self, ctx: &RequestContext, claim: NewClaim) -> Result<Claim> {
        ctx.require_role(&[ActorRole::Client], "reserve properties")?;
        let mut tx = self.begin().await?;
        if !rows::client_exists(&mut tx, ctx.actor_id).await? {
            return Err(LifecycleError::not_found("client", ctx.actor_id));
        }
        let property = rows::fetch_property(&mut tx, claim.property_id, true).await?;
        if property.availability != Availability::Available {
            return Err(LifecycleError::invalid_transition(
                "property",
                "reserve",
                property.availability,
            ));
        }

        let now = Utc::now();
        let created = Claim {
            id: Uuid::new_v4(),
            client_id: ctx.actor_id,
            property_id: property.id,
            claim_type: claim.claim_type,
            claim_source: claim.claim_source,
            claimed_at: now,
            final_status: Some(FinalStatus::Pending),
        };
        rows::insert_claim(&mut tx, &created).await?;
        for payment_type in payments::PREREQUISITE_PAYMENTS {
            let payment = ClaimPayment::pending(created.id, payment_type, now);
            rows::insert_payment(&mut tx, &payment).await?;
        }
        rows::set_availability(&mut tx, property.id, Availability::Reserved).await?;

        tx.commit().await.map_err(db_error)?;
        info!(claim_id = %created.id, property_id = %property.id, "claim created");
        Ok(created)
    }

    async fn claim_overview(&self, ctx: &RequestContext, claim_id: Uuid) -> Result<ClaimOverview> {
        let mut tx = self.begin().await?;
        let (claim, property) = claim_with_property(&mut tx, claim_id, false).await?;
        ctx.require_viewer(&claim, &property)?;

        let claim_payments = rows::claim_payments(&mut tx, claim_id).await?;
        let contract = rows::current_contract(&mut tx, claim_id, false).await?;
        let claim_invoices = rows::claim_invoices(&mut tx, claim_id, false).await?;
        let claim_notices = rows::claim_notices(&mut tx, claim_id, false).await?;
        tx.commit().await.map_err(db_error)?;

        let active_notice = notices::active_notice(&claim_notices).cloned();
        let notice_effective_end = match (&active_notice, &contract) {
            (Some(notice), Some(contract)) => Some(notices::notice_effective_end(
                notice.sent_at,
                contract.terms.notice_period_months,
                notice.immediate_termination,
            )),
            _ => None,
        };

        Ok(ClaimOverview {
            prerequisites_confirmed: payments::prerequisites_confirmed(&claim_payments),
            claim,
            payments: claim_payments,
            contract_phase: contract.as_ref().map(RentalContract::phase),
            current_invoice: invoices::current_invoice(&claim_invoices).cloned(),
            active_notice,
            notice_effective_end,
        })
    }

    async fn upload_payment_invoice(
        &self,
        ctx: &RequestContext,
        payment_id: Uuid,
        path: &str,
    ) -> Result<ClaimPayment> {
        ctx.require_role(PAYMENT_CONFIRMERS, "issue payment invoices")?;
        let mut tx = self.begin().await?;
        let mut payment = rows::fetch_payment(&mut tx, payment_id, true).await?;

        payments::record_payment_invoice(&mut payment, path, Utc::now())?;

        rows::update_payment(&mut tx, &payment).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(payment)
    }

    async fn upload_payment_proof(
        &self,
        ctx: &RequestContext,
        payment_id: Uuid,
        path: &str,
    ) -> Result<ClaimPayment> {
        let mut tx = self.begin().await?;
        let mut payment = rows::fetch_payment(&mut tx, payment_id, true).await?;
        let claim = rows::fetch_claim(&mut tx, payment.claim_id, false).await?;
        ctx.require_client_or(&claim, PROOF_UPLOADERS, "upload payment proofs")?;

        payments::record_payment_proof(&mut payment, path, Utc::now())?;

        rows::update_payment(&mut tx, &payment).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(payment)
    }

    async fn confirm_payment(
        &self,
        ctx: &RequestContext,
        payment_id: Uuid,
    ) -> Result<ConfirmOutcome<ClaimPayment>> {
        ctx.require_role(PAYMENT_CONFIRMERS, "confirm payments")?;
        let mut tx = self.begin().await?;
        let mut payment = rows::fetch_payment(&mut tx, payment_id, true).await?;
        let (claim, property) = claim_with_property(&mut tx, payment.claim_id, true).await?;

        let (ensure_contract, mark_property_unavailable) =
            match payments::plan_payment_confirmation(&payment, &claim)? {
                ConfirmationPlan::AlreadyConfirmed => {
                    return Ok(ConfirmOutcome::AlreadyConfirmed { record: payment });
                }
                ConfirmationPlan::Confirm {
                    ensure_contract,
                    mark_property_unavailable,
                } => (ensure_contract, mark_property_unavailable),
            };

        let now = Utc::now();
        payments::apply_payment_confirmation(&mut payment, ctx.actor_id, now);
        rows::update_payment(&mut tx, &payment).await?;

        let mut effects = ConfirmationEffects::default();
        if ensure_contract && rows::current_contract(&mut tx, claim.id, true).await?.is_none() {
            let parties = rows::fetch_parties(&mut tx, &claim, &property).await?;
            let contract =
                machine::new_pending_contract(claim.id, ctx.today, &self.template, &parties, now);
            rows::insert_contract(&mut tx, &contract).await?;
            effects.contract_created = Some(contract.id);
        }
        if mark_property_unavailable {
            rows::set_availability(&mut tx, property.id, Availability::Unavailable).await?;
            effects.property_unavailable = true;
        }

        tx.commit().await.map_err(db_error)?;
        info!(
            payment_id = %payment.id,
            claim_id = %claim.id,
            payment_type = %payment.payment_type,
            "payment confirmed"
        );
        Ok(ConfirmOutcome::Confirmed {
            record: payment,
            effects,
        })
    }

    async fn contract(&self, ctx: &RequestContext, claim_id: Uuid) -> Result<RentalContract> {
        let mut tx = self.begin().await?;
        let (claim, property) = claim_with_property(&mut tx, claim_id, false).await?;
        ctx.require_viewer(&claim, &property)?;
        let contract = rows::require_contract(&mut tx, claim_id, false).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(contract)
    }

    async fn save_contract(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
        terms: ContractTerms,
    ) -> Result<RentalContract> {
        self.update_contract(ctx, claim_id, |contract, template, parties| {
            machine::save(contract, ctx, terms, template, parties, Utc::now())
        })
        .await
    }

    async fn lock_contract(&self, ctx: &RequestContext, claim_id: Uuid) -> Result<RentalContract> {
        let contract = self
            .update_contract(ctx, claim_id, |contract, _, _| {
                machine::lock(contract, ctx, Utc::now())
            })
            .await?;
        info!(claim_id = %claim_id, contract_id = %contract.id, "contract locked");
        Ok(contract)
    }

    async fn unlock_contract(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
    ) -> Result<RentalContract> {
        self.update_contract(ctx, claim_id, |contract, _, _| {
            machine::unlock(contract, ctx, Utc::now())
        })
        .await
    }

    async fn restore_contract_from_template(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
    ) -> Result<RentalContract> {
        self.update_contract(ctx, claim_id, |contract, template, parties| {
            machine::restore_from_template(contract, ctx, template, parties, Utc::now())
        })
        .await
    }

    async fn sign_contract(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
        signature: &str,
    ) -> Result<RentalContract> {
        let mut tx = self.begin().await?;
        let (claim, property) = claim_with_property(&mut tx, claim_id, false).await?;
        let party = machine::signatory_for(ctx, &claim, &property)?;
        let mut contract = rows::require_contract(&mut tx, claim_id, true).await?;

        let completed = machine::sign(&mut contract, party, signature, Utc::now())?;

        rows::update_contract(&mut tx, &contract).await?;
        tx.commit().await.map_err(db_error)?;
        info!(claim_id = %claim_id, party = %party, completed, "contract signed");
        Ok(contract)
    }

    async fn renew_contract(&self, ctx: &RequestContext, claim_id: Uuid) -> Result<RentalContract> {
        let mut tx = self.begin().await?;
        let (claim, property) = claim_with_property(&mut tx, claim_id, false).await?;
        let parties = rows::fetch_parties(&mut tx, &claim, &property).await?;
        let mut contract = rows::require_contract(&mut tx, claim_id, true).await?;

        let renewed = machine::renew(&mut contract, ctx, &self.template, &parties, Utc::now())?;

        rows::update_contract(&mut tx, &contract).await?;
        rows::insert_contract(&mut tx, &renewed).await?;
        let mut claim_invoices = rows::claim_invoices(&mut tx, claim_id, true).await?;
        let deactivated =
            invoices::deactivate_superseded(&mut claim_invoices, contract.id, ctx.today);
        for invoice in claim_invoices
            .iter()
            .filter(|invoice| deactivated.contains(&invoice.id))
        {
            rows::update_invoice(&mut tx, invoice).await?;
        }
        tx.commit().await.map_err(db_error)?;
        info!(
            claim_id = %claim_id,
            superseded = %contract.id,
            contract_id = %renewed.id,
            deactivated_invoices = deactivated.len(),
            "contract renewed"
        );
        Ok(renewed)
    }

    async fn schedule_signing_meeting(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<RentalContract> {
        self.update_contract(ctx, claim_id, |contract, _, _| {
            machine::schedule_signing_meeting(contract, ctx, at, Utc::now())
        })
        .await
    }

    async fn terminate_contract(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
        termination: Termination,
    ) -> Result<RentalContract> {
        let mut tx = self.begin().await?;
        let (claim, property) = claim_with_property(&mut tx, claim_id, true).await?;
        let mut contract = rows::require_contract(&mut tx, claim_id, true).await?;
        let claim_notices = rows::claim_notices(&mut tx, claim_id, true).await?;
        let effective_end = notices::termination_end_date(&contract, &claim_notices, ctx.today);

        machine::terminate(&mut contract, ctx, &termination, effective_end, Utc::now())?;

        rows::update_contract(&mut tx, &contract).await?;
        let mut claim_invoices = rows::claim_invoices(&mut tx, claim_id, true).await?;
        let deactivated = invoices::deactivate_after(&mut claim_invoices, effective_end);
        for invoice in claim_invoices
            .iter()
            .filter(|invoice| deactivated.contains(&invoice.id))
        {
            rows::update_invoice(&mut tx, invoice).await?;
        }
        rows::set_claim_status(&mut tx, claim.id, FinalStatus::Completed).await?;
        rows::set_availability(&mut tx, property.id, Availability::Available).await?;

        tx.commit().await.map_err(db_error)?;
        info!(
            claim_id = %claim_id,
            actual_end_date = %effective_end,
            deactivated_invoices = deactivated.len(),
            "contract terminated"
        );
        Ok(contract)
    }

    async fn generate_invoices(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
    ) -> Result<Vec<RecurringInvoice>> {
        ctx.require_role(INVOICE_GENERATORS, "generate invoices")?;
        let mut tx = self.begin().await?;
        rows::fetch_claim(&mut tx, claim_id, true).await?;
        let contract = rows::require_contract(&mut tx, claim_id, false).await?;
        if contract.phase() != ContractPhase::Signed {
            return Err(LifecycleError::invalid_transition(
                "contract",
                "generate invoices for",
                contract.phase(),
            ));
        }
        let existing = rows::claim_invoices(&mut tx, claim_id, false).await?;
        invoices::ensure_not_generated(contract.id, &existing)?;

        let periods = invoices::unbilled_periods(
            invoices::invoice_schedule(&contract.terms),
            contract.id,
            &existing,
        );
        let generated = invoices::build_invoices(claim_id, contract.id, &periods, Utc::now());
        for invoice in &generated {
            rows::insert_invoice(&mut tx, invoice).await?;
        }

        tx.commit().await.map_err(db_error)?;
        info!(claim_id = %claim_id, count = generated.len(), "recurring invoices generated");
        Ok(generated)
    }

    async fn invoices(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
    ) -> Result<Vec<RecurringInvoice>> {
        let mut tx = self.begin().await?;
        let (claim, property) = claim_with_property(&mut tx, claim_id, false).await?;
        ctx.require_viewer(&claim, &property)?;
        let claim_invoices = rows::claim_invoices(&mut tx, claim_id, false).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(claim_invoices)
    }

    async fn upload_invoice_proof(
        &self,
        ctx: &RequestContext,
        invoice_id: Uuid,
        path: &str,
    ) -> Result<RecurringInvoice> {
        let mut tx = self.begin().await?;
        let mut invoice = rows::fetch_invoice(&mut tx, invoice_id, true).await?;
        let claim = rows::fetch_claim(&mut tx, invoice.claim_id, false).await?;
        ctx.require_client_or(&claim, PROOF_UPLOADERS, "upload payment proofs")?;

        invoices::record_invoice_proof(&mut invoice, path)?;

        rows::update_invoice(&mut tx, &invoice).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(invoice)
    }

    async fn confirm_invoice_payment(
        &self,
        ctx: &RequestContext,
        invoice_id: Uuid,
    ) -> Result<ConfirmOutcome<RecurringInvoice>> {
        ctx.require_role(PAYMENT_CONFIRMERS, "confirm payments")?;
        let mut tx = self.begin().await?;
        let mut invoice = rows::fetch_invoice(&mut tx, invoice_id, true).await?;

        if invoices::plan_invoice_confirmation(&invoice)? {
            return Ok(ConfirmOutcome::AlreadyConfirmed { record: invoice });
        }
        invoices::apply_invoice_confirmation(&mut invoice, ctx.actor_id, Utc::now());

        rows::update_invoice(&mut tx, &invoice).await?;
        tx.commit().await.map_err(db_error)?;
        info!(invoice_id = %invoice.id, claim_id = %invoice.claim_id, "invoice payment confirmed");
        Ok(ConfirmOutcome::Confirmed {
            record: invoice,
            effects: ConfirmationEffects::default(),
        })
    }

    async fn record_automatic_warning(
        &self,
        ctx: &RequestContext,
        invoice_id: Uuid,
        message: &str,
    ) -> Result<RentWarning> {
        ctx.require_role(AUTOMATIC_WARNING_WRITERS, "record automatic warnings")?;
        let mut tx = self.begin().await?;
        let invoice = rows::fetch_invoice(&mut tx, invoice_id, true).await?;

        let warning = warnings::new_warning(
            &invoice,
            WarningType::Automatic,
            message,
            sender(ctx),
            Utc::now(),
        )?;

        rows::insert_warning(&mut tx, &warning).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(warning)
    }

    async fn send_manual_warning(
        &self,
        ctx: &RequestContext,
        invoice_id: Uuid,
        message: &str,
    ) -> Result<RentWarning> {
        ctx.require_role(WARNING_SENDERS, "send manual warnings")?;
        let mut tx = self.begin().await?;
        let invoice = rows::fetch_invoice(&mut tx, invoice_id, true).await?;
        // Serializes concurrent manual warnings for the same claim.
        rows::fetch_claim(&mut tx, invoice.claim_id, true).await?;
        let claim_warnings = rows::claim_warnings(&mut tx, invoice.claim_id).await?;

        warnings::manual_warning_eligibility(&invoice, &claim_warnings, ctx.today)
            .map_err(LifecycleError::NotPermitted)?;
        let warning = warnings::new_warning(
            &invoice,
            WarningType::Manual,
            message,
            Some(ctx.actor_id),
            Utc::now(),
        )?;

        rows::insert_warning(&mut tx, &warning).await?;
        tx.commit().await.map_err(db_error)?;
        info!(invoice_id = %invoice.id, claim_id = %invoice.claim_id, "manual warning sent");
        Ok(warning)
    }

    async fn visible_warnings(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
    ) -> Result<Vec<RentWarning>> {
        let mut tx = self.begin().await?;
        let (claim, property) = claim_with_property(&mut tx, claim_id, false).await?;
        ctx.require_viewer(&claim, &property)?;
        let claim_warnings = rows::claim_warnings(&mut tx, claim_id).await?;
        let claim_invoices = rows::claim_invoices(&mut tx, claim_id, false).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(warnings::visible_warnings(claim_warnings, &claim_invoices))
    }

    async fn issue_automatic_warnings(
        &self,
        ctx: &RequestContext,
        interval_days: i64,
    ) -> Result<Vec<RentWarning>> {
        ctx.require_role(AUTOMATIC_WARNING_WRITERS, "issue automatic warnings")?;
        let mut tx = self.begin().await?;
        let overdue = rows::overdue_invoices(&mut tx, ctx.today).await?;
        let invoice_ids: Vec<Uuid> = overdue.iter().map(|invoice| invoice.id).collect();
        let previous = rows::automatic_warnings_for(&mut tx, &invoice_ids).await?;
        let now = Utc::now();

        let mut issued = Vec::new();
        for invoice in &overdue {
            let last = warnings::last_automatic_warning(invoice.id, &previous);
            if !warnings::automatic_warning_due(invoice, last, ctx.today, interval_days) {
                continue;
            }
            let warning =
                warnings::new_warning(invoice, WarningType::Automatic, "", sender(ctx), now)?;
            rows::insert_warning(&mut tx, &warning).await?;
            issued.push(warning);
        }

        tx.commit().await.map_err(db_error)?;
        Ok(issued)
    }

    async fn send_notice(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
        message: &str,
        immediate_termination: bool,
    ) -> Result<RentNotice> {
        let mut tx = self.begin().await?;
        let claim = rows::fetch_claim(&mut tx, claim_id, true).await?;
        let contract = rows::require_contract(&mut tx, claim_id, false).await?;

        let notice = notices::new_notice(
            ctx,
            &claim,
            &contract,
            message,
            immediate_termination,
            Utc::now(),
        )?;
        let claim_notices = rows::claim_notices(&mut tx, claim_id, true).await?;
        notices::ensure_notice_allowed(&contract, &claim_notices)?;

        rows::insert_notice(&mut tx, &notice).await?;
        tx.commit().await.map_err(db_error)?;
        info!(
            claim_id = %claim_id,
            notice_id = %notice.id,
            immediate = notice.immediate_termination,
            "notice sent"
        );
        Ok(notice)
    }

    async fn cancel_notice(&self, ctx: &RequestContext, notice_id: Uuid) -> Result<RentNotice> {
        let mut tx = self.begin().await?;
        let mut notice = rows::fetch_notice(&mut tx, notice_id).await?;

        notices::cancel_notice(&mut notice, ctx, Utc::now())?;

        rows::update_notice(&mut tx, &notice).await?;
        tx.commit().await.map_err(db_error)?;
        info!(claim_id = %notice.claim_id, notice_id = %notice.id, "notice cancelled");
        Ok(notice)
    }
}
