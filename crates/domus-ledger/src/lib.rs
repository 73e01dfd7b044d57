//! In-process [`LifecycleStore`] guarded by a single lock.
//!
//! Each operation holds the write lock for its whole duration and only writes
//! back after every guard has passed, which gives the same all-or-nothing
//! behaviour the Postgres store gets from a transaction.

mod state;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domus_billing::{invoices, payments, ConfirmationPlan};
use domus_contracts::{machine, ContractTemplate};
use domus_core::context::{
    AUTOMATIC_WARNING_WRITERS, INVOICE_GENERATORS, PAYMENT_CONFIRMERS, PROOF_UPLOADERS,
    WARNING_SENDERS,
};
use domus_core::{
    ActorRole, Availability, Claim, ClaimOverview, ClaimPayment, ConfirmOutcome,
    ConfirmationEffects, ContractParties, ContractPhase, ContractTerms, FinalStatus, LifecycleError,
    LifecycleStore, NewClaim, Property, RecurringInvoice, RentNotice, RentWarning,
    RentalContract, RequestContext, Result, Termination, WarningType,
};
use domus_notices::{notices, warnings};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::state::LedgerState;

pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
    template: ContractTemplate,
}

impl InMemoryLedger {
    pub fn new(template: ContractTemplate) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            template,
        }
    }

    pub async fn register_client(&self, full_name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state
            .write()
            .await
            .clients
            .insert(id, full_name.to_string());
        id
    }

    pub async fn register_owner(&self, full_name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state
            .write()
            .await
            .owners
            .insert(id, full_name.to_string());
        id
    }

    /// Lists a vetted property as available for claims.
    pub async fn register_property(&self, owner_id: Uuid, address: &str) -> Result<Property> {
        let mut state = self.state.write().await;
        if !state.owners.contains_key(&owner_id) {
            return Err(LifecycleError::not_found("owner", owner_id));
        }
        let property = Property {
            id: Uuid::new_v4(),
            owner_id,
            address: address.to_string(),
            availability: Availability::Available,
        };
        state.properties.insert(property.id, property.clone());
        Ok(property)
    }

    pub async fn property(&self, property_id: Uuid) -> Result<Property> {
        self.state.read().await.property(property_id).cloned()
    }

    /// Every warning stored for a claim, including ones no longer shown.
    pub async fn stored_warnings(&self, claim_id: Uuid) -> Vec<RentWarning> {
        self.state.read().await.claim_warnings(claim_id)
    }

    /// Every contract row for a claim, superseded ones included.
    pub async fn contract_history(&self, claim_id: Uuid) -> Vec<RentalContract> {
        self.state
            .read()
            .await
            .contracts
            .iter()
            .filter(|contract| contract.claim_id == claim_id)
            .cloned()
            .collect()
    }

    async fn update_contract<F>(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
        transition: F,
    ) -> Result<RentalContract>
    where
        F: FnOnce(&mut RentalContract, &ContractTemplate, &ContractParties) -> Result<()> + Send,
    {
        let mut state = self.state.write().await;
        let (claim, property) = state.claim_with_property(claim_id)?;
        ctx.require_viewer(&claim, &property)?;
        let parties = state.parties(&claim, &property)?;
        let (index, mut contract) = state.current_contract(claim_id)?;

        transition(&mut contract, &self.template, &parties)?;

        state.contracts[index] = contract.clone();
        Ok(contract)
    }
}

#[async_trait]
impl LifecycleStore for InMemoryLedger {
    async fn create_claim(&self, ctx: &RequestContext, claim: NewClaim) -> Result<Claim> {
        ctx.require_role(&[ActorRole::Client], "reserve properties")?;
        let mut state = self.state.write().await;
        if !state.clients.contains_key(&ctx.actor_id) {
            return Err(LifecycleError::not_found("client", ctx.actor_id));
        }
        let property = state.property(claim.property_id)?.clone();
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

        for payment_type in payments::PREREQUISITE_PAYMENTS {
            let payment = ClaimPayment::pending(created.id, payment_type, now);
            state.payments.insert(payment.id, payment);
        }
        if let Some(listed) = state.properties.get_mut(&property.id) {
            listed.availability = Availability::Reserved;
        }
        state.claims.insert(created.id, created.clone());

        Ok(created)
    }

    async fn claim_overview(&self, ctx: &RequestContext, claim_id: Uuid) -> Result<ClaimOverview> {
        let state = self.state.read().await;
        let (claim, property) = state.claim_with_property(claim_id)?;
        ctx.require_viewer(&claim, &property)?;

        let claim_payments = state.claim_payments(claim_id);
        let contract = state
            .contract_index(claim_id)
            .map(|index| state.contracts[index].clone());
        let claim_invoices = state.claim_invoices(claim_id);
        let active_notice = notices::active_notice(&state.claim_notices(claim_id)).cloned();
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
        let mut state = self.state.write().await;
        let mut payment = state.payment(payment_id)?.clone();

        payments::record_payment_invoice(&mut payment, path, Utc::now())?;

        state.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn upload_payment_proof(
        &self,
        ctx: &RequestContext,
        payment_id: Uuid,
        path: &str,
    ) -> Result<ClaimPayment> {
        let mut state = self.state.write().await;
        let mut payment = state.payment(payment_id)?.clone();
        let claim = state.claim(payment.claim_id)?;
        ctx.require_client_or(claim, PROOF_UPLOADERS, "upload payment proofs")?;

        payments::record_payment_proof(&mut payment, path, Utc::now())?;

        state.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn confirm_payment(
        &self,
        ctx: &RequestContext,
        payment_id: Uuid,
    ) -> Result<ConfirmOutcome<ClaimPayment>> {
        ctx.require_role(PAYMENT_CONFIRMERS, "confirm payments")?;
        let mut state = self.state.write().await;
        let mut payment = state.payment(payment_id)?.clone();
        let (claim, property) = state.claim_with_property(payment.claim_id)?;

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
        let new_contract = if ensure_contract && state.contract_index(claim.id).is_none() {
            let parties = state.parties(&claim, &property)?;
            Some(machine::new_pending_contract(
                claim.id,
                ctx.today,
                &self.template,
                &parties,
                now,
            ))
        } else {
            None
        };

        payments::apply_payment_confirmation(&mut payment, ctx.actor_id, now);
        state.payments.insert(payment.id, payment.clone());

        let mut effects = ConfirmationEffects::default();
        if let Some(contract) = new_contract {
            effects.contract_created = Some(contract.id);
            state.contracts.push(contract);
        }
        if mark_property_unavailable {
            if let Some(listed) = state.properties.get_mut(&property.id) {
                listed.availability = Availability::Unavailable;
                effects.property_unavailable = true;
            }
        }

        Ok(ConfirmOutcome::Confirmed {
            record: payment,
            effects,
        })
    }

    async fn contract(&self, ctx: &RequestContext, claim_id: Uuid) -> Result<RentalContract> {
        let state = self.state.read().await;
        let (claim, property) = state.claim_with_property(claim_id)?;
        ctx.require_viewer(&claim, &property)?;
        Ok(state.current_contract(claim_id)?.1)
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
        self.update_contract(ctx, claim_id, |contract, _, _| {
            machine::lock(contract, ctx, Utc::now())
        })
        .await
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
        let mut state = self.state.write().await;
        let (claim, property) = state.claim_with_property(claim_id)?;
        let party = machine::signatory_for(ctx, &claim, &property)?;
        let (index, mut contract) = state.current_contract(claim_id)?;

        machine::sign(&mut contract, party, signature, Utc::now())?;

        state.contracts[index] = contract.clone();
        Ok(contract)
    }

    async fn renew_contract(&self, ctx: &RequestContext, claim_id: Uuid) -> Result<RentalContract> {
        let mut state = self.state.write().await;
        let (claim, property) = state.claim_with_property(claim_id)?;
        let parties = state.parties(&claim, &property)?;
        let (index, mut contract) = state.current_contract(claim_id)?;

        let renewed = machine::renew(&mut contract, ctx, &self.template, &parties, Utc::now())?;

        let mut claim_invoices = state.claim_invoices(claim_id);
        invoices::deactivate_superseded(&mut claim_invoices, contract.id, ctx.today);
        for invoice in claim_invoices {
            if let Ok(position) = state.invoice_index(invoice.id) {
                state.invoices[position] = invoice;
            }
        }
        state.contracts[index] = contract;
        state.contracts.push(renewed.clone());
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
        let mut state = self.state.write().await;
        let (mut claim, property) = state.claim_with_property(claim_id)?;
        let (index, mut contract) = state.current_contract(claim_id)?;
        let effective_end =
            notices::termination_end_date(&contract, &state.claim_notices(claim_id), ctx.today);

        machine::terminate(&mut contract, ctx, &termination, effective_end, Utc::now())?;

        let mut claim_invoices = state.claim_invoices(claim_id);
        invoices::deactivate_after(&mut claim_invoices, effective_end);
        for invoice in claim_invoices {
            if let Ok(position) = state.invoice_index(invoice.id) {
                state.invoices[position] = invoice;
            }
        }
        claim.final_status = Some(FinalStatus::Completed);
        state.claims.insert(claim.id, claim);
        if let Some(listed) = state.properties.get_mut(&property.id) {
            listed.availability = Availability::Available;
        }
        state.contracts[index] = contract.clone();

        Ok(contract)
    }

    async fn generate_invoices(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
    ) -> Result<Vec<RecurringInvoice>> {
        ctx.require_role(INVOICE_GENERATORS, "generate invoices")?;
        let mut state = self.state.write().await;
        state.claim(claim_id)?;
        let (_, contract) = state.current_contract(claim_id)?;
        if contract.phase() != ContractPhase::Signed {
            return Err(LifecycleError::invalid_transition(
                "contract",
                "generate invoices for",
                contract.phase(),
            ));
        }
        let claim_invoices = state.claim_invoices(claim_id);
        invoices::ensure_not_generated(contract.id, &claim_invoices)?;

        let periods = invoices::unbilled_periods(
            invoices::invoice_schedule(&contract.terms),
            contract.id,
            &claim_invoices,
        );
        let generated = invoices::build_invoices(claim_id, contract.id, &periods, Utc::now());
        state.invoices.extend(generated.iter().cloned());

        Ok(generated)
    }

    async fn invoices(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
    ) -> Result<Vec<RecurringInvoice>> {
        let state = self.state.read().await;
        let (claim, property) = state.claim_with_property(claim_id)?;
        ctx.require_viewer(&claim, &property)?;
        Ok(state.claim_invoices(claim_id))
    }

    async fn upload_invoice_proof(
        &self,
        ctx: &RequestContext,
        invoice_id: Uuid,
        path: &str,
    ) -> Result<RecurringInvoice> {
        let mut state = self.state.write().await;
        let index = state.invoice_index(invoice_id)?;
        let mut invoice = state.invoices[index].clone();
        let claim = state.claim(invoice.claim_id)?;
        ctx.require_client_or(claim, PROOF_UPLOADERS, "upload payment proofs")?;

        invoices::record_invoice_proof(&mut invoice, path)?;

        state.invoices[index] = invoice.clone();
        Ok(invoice)
    }

    async fn confirm_invoice_payment(
        &self,
        ctx: &RequestContext,
        invoice_id: Uuid,
    ) -> Result<ConfirmOutcome<RecurringInvoice>> {
        ctx.require_role(PAYMENT_CONFIRMERS, "confirm payments")?;
        let mut state = self.state.write().await;
        let index = state.invoice_index(invoice_id)?;
        let mut invoice = state.invoices[index].clone();

        if invoices::plan_invoice_confirmation(&invoice)? {
            return Ok(ConfirmOutcome::AlreadyConfirmed { record: invoice });
        }
        invoices::apply_invoice_confirmation(&mut invoice, ctx.actor_id, Utc::now());

        state.invoices[index] = invoice.clone();
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
        let mut state = self.state.write().await;
        let index = state.invoice_index(invoice_id)?;
        let invoice = &state.invoices[index];

        let warning = warnings::new_warning(
            invoice,
            WarningType::Automatic,
            message,
            sender(ctx),
            Utc::now(),
        )?;

        state.warnings.push(warning.clone());
        Ok(warning)
    }

    async fn send_manual_warning(
        &self,
        ctx: &RequestContext,
        invoice_id: Uuid,
        message: &str,
    ) -> Result<RentWarning> {
        ctx.require_role(WARNING_SENDERS, "send manual warnings")?;
        let mut state = self.state.write().await;
        let index = state.invoice_index(invoice_id)?;
        let invoice = state.invoices[index].clone();

        warnings::manual_warning_eligibility(
            &invoice,
            &state.claim_warnings(invoice.claim_id),
            ctx.today,
        )
        .map_err(LifecycleError::NotPermitted)?;
        let warning = warnings::new_warning(
            &invoice,
            WarningType::Manual,
            message,
            Some(ctx.actor_id),
            Utc::now(),
        )?;

        state.warnings.push(warning.clone());
        Ok(warning)
    }

    async fn visible_warnings(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
    ) -> Result<Vec<RentWarning>> {
        let state = self.state.read().await;
        let (claim, property) = state.claim_with_property(claim_id)?;
        ctx.require_viewer(&claim, &property)?;
        Ok(warnings::visible_warnings(
            state.claim_warnings(claim_id),
            &state.claim_invoices(claim_id),
        ))
    }

    async fn issue_automatic_warnings(
        &self,
        ctx: &RequestContext,
        interval_days: i64,
    ) -> Result<Vec<RentWarning>> {
        ctx.require_role(AUTOMATIC_WARNING_WRITERS, "issue automatic warnings")?;
        let mut state = self.state.write().await;
        let now = Utc::now();

        let mut issued = Vec::new();
        for invoice in &state.invoices {
            let last = warnings::last_automatic_warning(invoice.id, &state.warnings);
            if warnings::automatic_warning_due(invoice, last, ctx.today, interval_days) {
                issued.push(warnings::new_warning(
                    invoice,
                    WarningType::Automatic,
                    "",
                    sender(ctx),
                    now,
                )?);
            }
        }

        state.warnings.extend(issued.iter().cloned());
        Ok(issued)
    }

    async fn send_notice(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
        message: &str,
        immediate_termination: bool,
    ) -> Result<RentNotice> {
        let mut state = self.state.write().await;
        let claim = state.claim(claim_id)?.clone();
        let (_, contract) = state.current_contract(claim_id)?;

        let notice = notices::new_notice(
            ctx,
            &claim,
            &contract,
            message,
            immediate_termination,
            Utc::now(),
        )?;
        notices::ensure_notice_allowed(&contract, &state.claim_notices(claim_id))?;

        state.notices.push(notice.clone());
        Ok(notice)
    }

    async fn cancel_notice(&self, ctx: &RequestContext, notice_id: Uuid) -> Result<RentNotice> {
        let mut state = self.state.write().await;
        let index = state
            .notices
            .iter()
            .position(|notice| notice.id == notice_id)
            .ok_or_else(|| LifecycleError::not_found("notice", notice_id))?;
        let mut notice = state.notices[index].clone();

        notices::cancel_notice(&mut notice, ctx, Utc::now())?;

        state.notices[index] = notice.clone();
        Ok(notice)
    }
}

/// Staff id stamped on a warning; background jobs leave it empty.
fn sender(ctx: &RequestContext) -> Option<Uuid> {
    (ctx.role != ActorRole::System).then_some(ctx.actor_id)
}
