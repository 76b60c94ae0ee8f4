use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),
    #[error("Rate limited, retry after {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },
    #[error("Compliance rejected: {0}")]
    ComplianceRejected(String),
    #[error("Verification required: {0}")]
    VerificationRequired(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Funds already held for transaction {0}")]
    AlreadyHeld(String),
    #[error("Processor unavailable: {0}")]
    ProcessorUnavailable(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PaymentError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed(vec![message.into()])
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the caller may retry the same request later without changing it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ProcessorUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
