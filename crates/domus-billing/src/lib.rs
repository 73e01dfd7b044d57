pub mod invoices;
pub mod payments;

pub use invoices::{InvoicePeriod, current_invoice, end_of_month, invoice_schedule};
pub use payments::{ConfirmationPlan, plan_payment_confirmation, prerequisites_confirmed};
