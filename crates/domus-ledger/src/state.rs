use std::collections::HashMap;

use domus_core::{
    Claim, ClaimPayment, ContractParties, ContractStatus, LifecycleError, Property,
    RecurringInvoice, RentNotice, RentWarning, RentalContract, Result,
};
use uuid::Uuid;

/// Tables held by [`crate::InMemoryLedger`], mirroring the relational schema.
#[derive(Debug, Default, Clone)]
pub(crate) struct LedgerState {
    pub clients: HashMap<Uuid, String>,
    pub owners: HashMap<Uuid, String>,
    pub properties: HashMap<Uuid, Property>,
    pub claims: HashMap<Uuid, Claim>,
    pub payments: HashMap<Uuid, ClaimPayment>,
    pub contracts: Vec<RentalContract>,
    pub invoices: Vec<RecurringInvoice>,
    pub warnings: Vec<RentWarning>,
    pub notices: Vec<RentNotice>,
}

impl LedgerState {
    pub fn claim(&self, claim_id: Uuid) -> Result<&Claim> {
        self.claims
            .get(&claim_id)
            .ok_or_else(|| LifecycleError::not_found("claim", claim_id))
    }

    pub fn property(&self, property_id: Uuid) -> Result<&Property> {
        self.properties
            .get(&property_id)
            .ok_or_else(|| LifecycleError::not_found("property", property_id))
    }

    pub fn claim_with_property(&self, claim_id: Uuid) -> Result<(Claim, Property)> {
        let claim = self.claim(claim_id)?.clone();
        let property = self.property(claim.property_id)?.clone();
        Ok((claim, property))
    }

    pub fn parties(&self, claim: &Claim, property: &Property) -> Result<ContractParties> {
        let client_name = self
            .clients
            .get(&claim.client_id)
            .ok_or_else(|| LifecycleError::not_found("client", claim.client_id))?;
        let owner_name = self
            .owners
            .get(&property.owner_id)
            .ok_or_else(|| LifecycleError::not_found("owner", property.owner_id))?;
        Ok(ContractParties {
            client_name: client_name.clone(),
            owner_name: owner_name.clone(),
            property_address: property.address.clone(),
        })
    }

    pub fn payment(&self, payment_id: Uuid) -> Result<&ClaimPayment> {
        self.payments
            .get(&payment_id)
            .ok_or_else(|| LifecycleError::not_found("payment", payment_id))
    }

    pub fn claim_payments(&self, claim_id: Uuid) -> Vec<ClaimPayment> {
        let mut payments: Vec<ClaimPayment> = self
            .payments
            .values()
            .filter(|payment| payment.claim_id == claim_id)
            .cloned()
            .collect();
        payments.sort_by_key(|payment| (payment.created_at, payment.payment_type.as_str()));
        payments
    }

    /// Position of the claim's contract row that has not been superseded.
    pub fn contract_index(&self, claim_id: Uuid) -> Option<usize> {
        self.contracts.iter().position(|contract| {
            contract.claim_id == claim_id && contract.status != ContractStatus::Superseded
        })
    }

    pub fn current_contract(&self, claim_id: Uuid) -> Result<(usize, RentalContract)> {
        let index = self
            .contract_index(claim_id)
            .ok_or_else(|| LifecycleError::not_found("contract for claim", claim_id))?;
        Ok((index, self.contracts[index].clone()))
    }

    pub fn claim_invoices(&self, claim_id: Uuid) -> Vec<RecurringInvoice> {
        let mut invoices: Vec<RecurringInvoice> = self
            .invoices
            .iter()
            .filter(|invoice| invoice.claim_id == claim_id)
            .cloned()
            .collect();
        invoices.sort_by_key(|invoice| invoice.invoice_date);
        invoices
    }

    pub fn invoice_index(&self, invoice_id: Uuid) -> Result<usize> {
        self.invoices
            .iter()
            .position(|invoice| invoice.id == invoice_id)
            .ok_or_else(|| LifecycleError::not_found("invoice", invoice_id))
    }

    pub fn claim_warnings(&self, claim_id: Uuid) -> Vec<RentWarning> {
        let mut warnings: Vec<RentWarning> = self
            .warnings
            .iter()
            .filter(|warning| warning.claim_id == claim_id)
            .cloned()
            .collect();
        warnings.sort_by_key(|warning| warning.sent_at);
        warnings
    }

    pub fn claim_notices(&self, claim_id: Uuid) -> Vec<RentNotice> {
        self.notices
            .iter()
            .filter(|notice| notice.claim_id == claim_id)
            .cloned()
            .collect()
    }
}
