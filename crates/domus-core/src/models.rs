use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::{
    ActorRole, Availability, ClaimSource, ClaimType, ContractStatus, FinalStatus, NoticeStatus,
    PaymentFrequency, PaymentStatus, PaymentType, RevisionUnit, TerminationType, WarningType,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Property {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub address: String,
    pub availability: Availability,
}

/// Display names of the people a contract is drawn up between.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractParties {
    pub client_name: String,
    pub owner_name: String,
    pub property_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claim {
    pub id: Uuid,
    pub client_id: Uuid,
    pub property_id: Uuid,
    pub claim_type: ClaimType,
    pub claim_source: ClaimSource,
    pub claimed_at: DateTime<Utc>,
    pub final_status: Option<FinalStatus>,
}

impl Claim {
    pub fn is_closed(&self) -> bool {
        matches!(
            self.final_status,
            Some(FinalStatus::Completed) | Some(FinalStatus::Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClaim {
    pub property_id: Uuid,
    pub claim_type: ClaimType,
    pub claim_source: ClaimSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimPayment {
    pub id: Uuid,
    pub claim_id: Uuid,
    pub payment_type: PaymentType,
    pub invoice_path: Option<String>,
    pub proof_path: Option<String>,
    pub status: PaymentStatus,
    pub confirmed_by: Option<Uuid>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClaimPayment {
    pub fn pending(claim_id: Uuid, payment_type: PaymentType, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            claim_id,
            payment_type,
            invoice_path: None,
            proof_path: None,
            status: PaymentStatus::Pending,
            confirmed_by: None,
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_invoice(&self) -> bool {
        has_path(&self.invoice_path)
    }

    pub fn has_proof(&self) -> bool {
        has_path(&self.proof_path)
    }
}

/// Commercial terms of a rental contract, edited as a unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractTerms {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub monthly_amount: Decimal,
    pub payment_frequency: PaymentFrequency,
    pub grace_period_days: i32,
    pub penalty_rate: Decimal,
    pub notice_period_months: i32,
    pub revision_frequency: i32,
    pub revision_unit: RevisionUnit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RentalContract {
    pub id: Uuid,
    pub claim_id: Uuid,
    pub status: ContractStatus,
    #[serde(flatten)]
    pub terms: ContractTerms,
    pub locked: bool,
    pub next_revision_date: Option<NaiveDate>,
    pub client_signature: Option<String>,
    pub client_signed_at: Option<DateTime<Utc>>,
    pub owner_signature: Option<String>,
    pub owner_signed_at: Option<DateTime<Utc>>,
    pub signing_meeting_at: Option<DateTime<Utc>>,
    pub actual_end_date: Option<NaiveDate>,
    pub termination_type: Option<TerminationType>,
    pub termination_reason: Option<String>,
    pub contract_body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RentalContract {
    pub fn client_signed(&self) -> bool {
        has_path(&self.client_signature)
    }

    pub fn owner_signed(&self) -> bool {
        has_path(&self.owner_signature)
    }

    pub fn fully_signed(&self) -> bool {
        self.client_signed() && self.owner_signed()
    }

    pub fn any_signature(&self) -> bool {
        self.client_signed() || self.owner_signed()
    }

    pub fn is_terminated(&self) -> bool {
        self.actual_end_date.is_some() || self.status == ContractStatus::Terminated
    }

    pub fn phase(&self) -> ContractPhase {
        if self.is_terminated() {
            ContractPhase::Terminated
        } else if !self.locked && self.any_signature() {
            ContractPhase::UnlockedForExtension
        } else if !self.locked {
            ContractPhase::Unlocked
        } else if self.fully_signed() {
            ContractPhase::Signed
        } else {
            ContractPhase::AwaitingSignature
        }
    }
}

/// Editing/signing state derived from the lock flag, signatures and end date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContractPhase {
    Unlocked,
    UnlockedForExtension,
    AwaitingSignature,
    Signed,
    Terminated,
}

impl std::fmt::Display for ContractPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ContractPhase::Unlocked => "unlocked",
            ContractPhase::UnlockedForExtension => "unlocked for extension",
            ContractPhase::AwaitingSignature => "locked awaiting signature",
            ContractPhase::Signed => "signed",
            ContractPhase::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Termination {
    pub termination_type: TerminationType,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurringInvoice {
    pub id: Uuid,
    pub claim_id: Uuid,
    pub contract_id: Uuid,
    pub invoice_date: NaiveDate,
    pub start_period_date: NaiveDate,
    pub end_period_date: NaiveDate,
    pub due_date: NaiveDate,
    pub amount: Decimal,
    pub payment_status: PaymentStatus,
    pub recurring_active: bool,
    pub invoice_path: Option<String>,
    pub proof_path: Option<String>,
    pub confirmed_by: Option<Uuid>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RecurringInvoice {
    pub fn has_proof(&self) -> bool {
        has_path(&self.proof_path)
    }

    pub fn is_confirmed(&self) -> bool {
        self.payment_status == PaymentStatus::Confirmed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RentWarning {
    pub id: Uuid,
    pub claim_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub warning_type: WarningType,
    pub message: String,
    pub sent_by: Option<Uuid>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RentNotice {
    pub id: Uuid,
    pub claim_id: Uuid,
    pub contract_id: Uuid,
    pub sent_by: Uuid,
    pub sender_role: ActorRole,
    pub message: String,
    pub immediate_termination: bool,
    pub status: NoticeStatus,
    pub sent_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Why a manual ("final") warning cannot be sent for an invoice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ManualWarningDenial {
    AlreadyPaid,
    NotYetDue,
    ProofUploaded,
    ManualWarningAlreadySent,
    InsufficientAutomaticWarnings { found: usize },
}

impl std::fmt::Display for ManualWarningDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManualWarningDenial::AlreadyPaid => f.write_str("invoice is already confirmed"),
            ManualWarningDenial::NotYetDue => f.write_str("invoice is not past its due date"),
            ManualWarningDenial::ProofUploaded => {
                f.write_str("a payment proof has been uploaded for the invoice")
            }
            ManualWarningDenial::ManualWarningAlreadySent => {
                f.write_str("a manual warning was already sent for this claim")
            }
            ManualWarningDenial::InsufficientAutomaticWarnings { found } => {
                write!(f, "only {found} automatic warning(s) sent, at least 2 required")
            }
        }
    }
}

/// Side effects applied alongside a confirmation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmationEffects {
    pub contract_created: Option<Uuid>,
    pub property_unavailable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmOutcome<T> {
    AlreadyConfirmed { record: T },
    Confirmed { record: T, effects: ConfirmationEffects },
}

impl<T> ConfirmOutcome<T> {
    pub fn record(&self) -> &T {
        match self {
            ConfirmOutcome::AlreadyConfirmed { record } => record,
            ConfirmOutcome::Confirmed { record, .. } => record,
        }
    }

    pub fn was_already_confirmed(&self) -> bool {
        matches!(self, ConfirmOutcome::AlreadyConfirmed { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimOverview {
    pub claim: Claim,
    pub payments: Vec<ClaimPayment>,
    pub prerequisites_confirmed: bool,
    pub contract_phase: Option<ContractPhase>,
    pub current_invoice: Option<RecurringInvoice>,
    pub active_notice: Option<RentNotice>,
    pub notice_effective_end: Option<NaiveDate>,
}

fn has_path(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|path| !path.trim().is_empty())
}
