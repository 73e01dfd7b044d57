use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::Result;
use crate::models::{
    Claim, ClaimOverview, ClaimPayment, ConfirmOutcome, ContractTerms, NewClaim,
    RecurringInvoice, RentNotice, RentWarning, RentalContract, Termination,
};

/// Persistence for the claim → contract → invoice → notice lifecycle.
///
/// Every method is one business operation: implementations apply all of its
/// reads and writes atomically, so a failed guard leaves no partial state behind.
#[async_trait]
pub trait LifecycleStore: Send + Sync {
    async fn create_claim(&self, ctx: &RequestContext, claim: NewClaim) -> Result<Claim>;
    async fn claim_overview(&self, ctx: &RequestContext, claim_id: Uuid) -> Result<ClaimOverview>;

    async fn upload_payment_invoice(
        &self,
        ctx: &RequestContext,
        payment_id: Uuid,
        path: &str,
    ) -> Result<ClaimPayment>;
    async fn upload_payment_proof(
        &self,
        ctx: &RequestContext,
        payment_id: Uuid,
        path: &str,
    ) -> Result<ClaimPayment>;
    async fn confirm_payment(
        &self,
        ctx: &RequestContext,
        payment_id: Uuid,
    ) -> Result<ConfirmOutcome<ClaimPayment>>;

    async fn contract(&self, ctx: &RequestContext, claim_id: Uuid) -> Result<RentalContract>;
    async fn save_contract(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
        terms: ContractTerms,
    ) -> Result<RentalContract>;
    async fn lock_contract(&self, ctx: &RequestContext, claim_id: Uuid) -> Result<RentalContract>;
    async fn unlock_contract(&self, ctx: &RequestContext, claim_id: Uuid)
    -> Result<RentalContract>;
    async fn restore_contract_from_template(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
    ) -> Result<RentalContract>;
    async fn sign_contract(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
        signature: &str,
    ) -> Result<RentalContract>;
    async fn renew_contract(&self, ctx: &RequestContext, claim_id: Uuid) -> Result<RentalContract>;
    async fn schedule_signing_meeting(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<RentalContract>;
    async fn terminate_contract(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
        termination: Termination,
    ) -> Result<RentalContract>;

    async fn generate_invoices(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
    ) -> Result<Vec<RecurringInvoice>>;
    async fn invoices(&self, ctx: &RequestContext, claim_id: Uuid)
    -> Result<Vec<RecurringInvoice>>;
    async fn upload_invoice_proof(
        &self,
        ctx: &RequestContext,
        invoice_id: Uuid,
        path: &str,
    ) -> Result<RecurringInvoice>;
    async fn confirm_invoice_payment(
        &self,
        ctx: &RequestContext,
        invoice_id: Uuid,
    ) -> Result<ConfirmOutcome<RecurringInvoice>>;

    async fn record_automatic_warning(
        &self,
        ctx: &RequestContext,
        invoice_id: Uuid,
        message: &str,
    ) -> Result<RentWarning>;
    async fn send_manual_warning(
        &self,
        ctx: &RequestContext,
        invoice_id: Uuid,
        message: &str,
    ) -> Result<RentWarning>;
    async fn visible_warnings(&self, ctx: &RequestContext, claim_id: Uuid)
    -> Result<Vec<RentWarning>>;
    /// Issues an automatic warning for every overdue invoice that has gone
    /// `interval_days` without one.
    async fn issue_automatic_warnings(
        &self,
        ctx: &RequestContext,
        interval_days: i64,
    ) -> Result<Vec<RentWarning>>;

    async fn send_notice(
        &self,
        ctx: &RequestContext,
        claim_id: Uuid,
        message: &str,
        immediate_termination: bool,
    ) -> Result<RentNotice>;
    async fn cancel_notice(&self, ctx: &RequestContext, notice_id: Uuid) -> Result<RentNotice>;
}
