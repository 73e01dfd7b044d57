use std::fmt::Display;

use thiserror::Error;

use crate::models::ManualWarningDenial;

/// Errors surfaced by every lifecycle operation.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("cannot {action} {entity} while {state}")]
    InvalidStateTransition {
        entity: &'static str,
        action: &'static str,
        state: String,
    },

    #[error("{entity} already exists: {detail}")]
    AlreadyExists { entity: &'static str, detail: String },

    #[error("manual warning not permitted: {0}")]
    NotPermitted(ManualWarningDenial),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl LifecycleError {
    pub fn not_found(entity: &'static str, id: impl Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        action: &'static str,
        state: impl Display,
    ) -> Self {
        Self::InvalidStateTransition {
            entity,
            action,
            state: state.to_string(),
        }
    }

    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        Self::Storage(err.into())
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
