pub mod context;
pub mod enums;
pub mod error;
pub mod events;
pub mod models;
pub mod storage;

pub use context::RequestContext;
pub use enums::{
    ActorRole, Availability, ClaimSource, ClaimType, ContractStatus, FinalStatus, NoticeStatus,
    PaymentFrequency, PaymentStatus, PaymentType, RevisionUnit, SignatoryParty, TerminationType,
    WarningType,
};
pub use error::{LifecycleError, Result};
pub use events::{LifecycleEvent, LifecycleEventKind};
pub use models::{
    Claim, ClaimOverview, ClaimPayment, ConfirmOutcome, ConfirmationEffects, ContractParties,
    ContractPhase, ContractTerms, ManualWarningDenial, NewClaim, Property, RecurringInvoice,
    RentNotice, RentWarning, RentalContract, Termination,
};
pub use storage::LifecycleStore;
