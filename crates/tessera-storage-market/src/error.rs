use tessera_archive::ArchiveError;
use tessera_crypto::CryptoError;
use tessera_storage::RegistryError;
use tessera_types::{DealId, FilAmount, TypesError};
use thiserror::Error;

/// Storage market error types
#[derive(Error, Debug, Clone)]
pub enum StorageMarketError {
    /// Caller supplied unusable input
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Payload does not fit the largest supported sector
    #[error("Payload too large: {size} bytes exceeds {max}")]
    PayloadTooLarge { size: u64, max: u64 },

    /// No plan satisfies both the replica floor and the budget
    #[error(
        "Budget infeasible: budget {budget}, cheapest satisfying plan {}",
        .required.map(|r| r.to_string()).unwrap_or_else(|| "none".to_string())
    )]
    BudgetInfeasible { required: Option<FilAmount>, budget: FilAmount },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Archive bytes or blocks failed verification
    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    /// Network call failed in a way worth retrying
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Retry budget for an operation is spent
    #[error("Retry budget exhausted for {operation} after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    /// Provider declined a proposal or sealing
    #[error("Provider rejected: {0}")]
    ProviderRejected(String),

    /// Ledger rejected a transaction
    #[error("Transaction rejected: {0}")]
    TransactionRejected(String),

    /// Transaction was not included in time
    #[error("Inclusion timeout: {0}")]
    InclusionTimeout(String),

    /// Proof verification failed
    #[error("Proof verification failed: {0}")]
    VerificationFailed(String),

    /// Invalid deal state transition
    #[error("Invalid state transition: from {from:?} to {to:?}")]
    InvalidStateTransition { from: String, to: String },

    /// Deal not found
    #[error("Deal not found: {0}")]
    DealNotFound(DealId),

    /// Deal registry failure
    #[error("Registry error: {0}")]
    Registry(String),

    /// Key handling failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Operation stopped by cancellation
    #[error("Cancelled")]
    Cancelled,

    /// Other errors
    #[error("Storage market error: {0}")]
    Other(String),
}

impl StorageMarketError {
    /// Transient failures that a retry may resolve
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }
}

impl From<ArchiveError> for StorageMarketError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::MalformedInput(msg) => Self::MalformedInput(msg),
            ArchiveError::PayloadTooLarge { size, max } => Self::PayloadTooLarge { size, max },
            ArchiveError::NotFound(msg) => Self::NotFound(msg),
            ArchiveError::CorruptArchive(msg) => Self::CorruptArchive(msg),
            ArchiveError::Io(io) => Self::Other(format!("I/O error: {}", io)),
        }
    }
}

impl From<TypesError> for StorageMarketError {
    fn from(e: TypesError) -> Self {
        ArchiveError::from(e).into()
    }
}

impl From<RegistryError> for StorageMarketError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(id) => Self::DealNotFound(id),
            other => Self::Registry(other.to_string()),
        }
    }
}

impl From<CryptoError> for StorageMarketError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e.to_string())
    }
}

/// Result type for storage market operations
pub type Result<T> = std::result::Result<T, StorageMarketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(StorageMarketError::TransientNetwork("reset".into()).is_retryable());
        assert!(!StorageMarketError::ProviderRejected("no".into()).is_retryable());
        assert!(!StorageMarketError::Cancelled.is_retryable());
    }

    #[test]
    fn test_conversions() {
        let err: StorageMarketError = RegistryError::NotFound(7).into();
        assert!(matches!(err, StorageMarketError::DealNotFound(7)));

        let err: StorageMarketError = ArchiveError::CorruptArchive("x".into()).into();
        assert!(matches!(err, StorageMarketError::CorruptArchive(_)));

        let err = StorageMarketError::BudgetInfeasible {
            required: None,
            budget: FilAmount::from_fil(1.0),
        };
        assert!(err.to_string().contains("none"));
    }
}
