use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecycleEventKind {
    PaymentConfirmed,
    ContractLocked,
    ContractSigned,
    ContractTerminated,
    InvoicesGenerated,
    WarningIssued,
    NoticeSent,
    NoticeCancelled,
}

impl LifecycleEventKind {
    /// Bus channel the event is published on.
    pub fn channel(&self) -> &'static str {
        match self {
            LifecycleEventKind::PaymentConfirmed => "claims.payment_confirmed",
            LifecycleEventKind::ContractLocked => "contracts.locked",
            LifecycleEventKind::ContractSigned => "contracts.signed",
            LifecycleEventKind::ContractTerminated => "contracts.terminated",
            LifecycleEventKind::InvoicesGenerated => "invoices.generated",
            LifecycleEventKind::WarningIssued => "warnings.issued",
            LifecycleEventKind::NoticeSent => "notices.sent",
            LifecycleEventKind::NoticeCancelled => "notices.cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub claim_id: Uuid,
    pub kind: LifecycleEventKind,
    pub actor_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl LifecycleEvent {
    pub fn new(
        claim_id: Uuid,
        kind: LifecycleEventKind,
        actor_id: Uuid,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            claim_id,
            kind,
            actor_id,
            occurred_at: Utc::now(),
            payload,
        }
    }
}
