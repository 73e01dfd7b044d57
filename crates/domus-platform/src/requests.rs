//! JSON bodies shared by the gateway and its clients.

use chrono::{DateTime, Utc};
use domus_core::{RecurringInvoice, RentWarning};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Path of a file already stored by the document service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadDocumentRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignContractRequest {
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleMeetingRequest {
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarningRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendNoticeRequest {
    pub message: String,
    #[serde(default)]
    pub immediate_termination: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceListResponse {
    pub claim_id: Uuid,
    pub current: Option<RecurringInvoice>,
    pub items: Vec<RecurringInvoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedInvoicesResponse {
    pub claim_id: Uuid,
    pub generated: usize,
    pub items: Vec<RecurringInvoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarningListResponse {
    pub claim_id: Uuid,
    pub items: Vec<RentWarning>,
}
