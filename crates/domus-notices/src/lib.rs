pub mod notices;
pub mod warnings;

pub use notices::{DAYS_PER_NOTICE_MONTH, active_notice, notice_effective_end};
pub use warnings::{
    REQUIRED_AUTOMATIC_WARNINGS, automatic_warning_due, manual_warning_eligibility,
    visible_warnings,
};
