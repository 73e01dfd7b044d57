pub mod machine;
pub mod template;

pub use machine::{default_terms, new_pending_contract, next_revision_date, validate_terms};
pub use template::{ContractTemplate, ContractToken, TemplateError, TemplateValues};
