pub mod config;
pub mod db;
pub mod pg_ledger;
mod rows;
pub mod redis_bus;
pub mod requests;

pub use config::ServiceConfig;
pub use db::{connect_database, run_migrations};
pub use pg_ledger::PgLedger;
pub use redis_bus::RedisBus;
pub use requests::{
    GeneratedInvoicesResponse, InvoiceListResponse, ScheduleMeetingRequest, SendNoticeRequest,
    SignContractRequest, UploadDocumentRequest, WarningListResponse, WarningRequest,
};
