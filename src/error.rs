use thiserror::Error;

use crate::ledger::entry::TransactionId;

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(format!("Failed to load configuration: {}", err))
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::TransientNetworkFailure(err.to_string())
        } else if err.is_decode() {
            Self::UnexpectedResponse(format!("Failed to decode response body: {}", err))
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else {
            Self::TransientNetworkFailure(err.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Authentication failure: {0}")]
    AuthenticationFailure(String),

    #[error("Transient network failure: {0}")]
    TransientNetworkFailure(String),

    #[error("Request rejected by ledger service (HTTP {status}): {message}")]
    ServiceRejected { status: u16, message: String },

    #[error("Malformed ledger entry{}: {reason}", fmt_transaction(.transaction_id))]
    MalformedEntry {
        transaction_id: Option<TransactionId>,
        reason: String,
    },

    #[error("Unexpected response from ledger service: {0}")]
    UnexpectedResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

fn fmt_transaction(transaction_id: &Option<TransactionId>) -> String {
    match transaction_id {
        Some(id) => format!(" at transaction {}", id),
        None => String::new(),
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    /// Classify a non-success HTTP status returned by the ledger service.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailure(format!("HTTP {}: {}", status, message)),
            408 | 429 | 500..=599 => {
                Self::TransientNetworkFailure(format!("HTTP {}: {}", status, message))
            }
            _ => Self::ServiceRejected { status, message },
        }
    }

    pub fn malformed(transaction_id: Option<TransactionId>, reason: impl Into<String>) -> Self {
        Self::MalformedEntry {
            transaction_id,
            reason: reason.into(),
        }
    }

    /// Safe to retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetworkFailure(_))
    }

    /// Whether this error ends a read of a collection. Only a malformed
    /// entry is isolated to the element it was found on.
    pub fn aborts_read(&self) -> bool {
        !matches!(self, Self::MalformedEntry { .. })
    }

    /// Short stable name used for diagnostics counters and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailure(_) => "authentication_failure",
            Self::TransientNetworkFailure(_) => "transient_network_failure",
            Self::ServiceRejected { .. } => "service_rejected",
            Self::MalformedEntry { .. } => "malformed_entry",
            Self::UnexpectedResponse(_) => "unexpected_response",
            Self::ConfigError(_) => "config_error",
        }
    }
}
