use async_trait::async_trait;
use thiserror::Error;

use crate::domain::order::OrderRecord;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger transport failed: {0}")]
    Transport(String),
    #[error("ledger authentication failed: {0}")]
    Auth(String),
    #[error("ledger storage failed: {0}")]
    Storage(String),
    #[error("ledger rejected the row: {0}")]
    Rejected(String),
    /// The row reached the ledger but no answer came back; it may be stored.
    #[error("ledger write unconfirmed: {0}")]
    Unconfirmed(String),
}

impl LedgerError {
    /// Whether a later attempt with the same row may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Auth(_) | Self::Storage(_))
    }
}

/// Append-only destination for committed orders. The caller guarantees at
/// most one `append` per record; implementations do not deduplicate.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn append(&self, order: &OrderRecord) -> Result<(), LedgerError>;

    async fn readiness(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}
