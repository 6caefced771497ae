use thiserror::Error;
use uuid::Uuid;

use crate::validation::ValidationError;

pub type RetentionResult<T> = Result<T, RetentionError>;

#[derive(Error, Debug)]
pub enum RetentionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid flow state: {0}")]
    InvalidState(String),

    #[error("Flow {0} not found")]
    FlowNotFound(Uuid),

    #[error("Flow {0} already has a submission in flight")]
    SubmissionInFlight(Uuid),

    #[error("Too many active flows (limit {0})")]
    CapacityExceeded(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RetentionError {
    /// True for errors the caller can fix by correcting its input.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RetentionError::InvalidInput(_) | RetentionError::Validation(_)
        )
    }
}

impl From<config::ConfigError> for RetentionError {
    fn from(e: config::ConfigError) -> Self {
        RetentionError::Config(e.to_string())
    }
}
