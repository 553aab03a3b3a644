use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::RwLock;

use orderdesk_core::domain::order::OrderRecord;
use orderdesk_core::ledger::{LedgerError, OrderLedger};

/// Ledger kept in process memory. Failures can be scripted ahead of time;
/// each scripted error is consumed by one `append` call.
#[derive(Default)]
pub struct InMemoryOrderLedger {
    rows: RwLock<Vec<OrderRecord>>,
    failures: RwLock<VecDeque<LedgerError>>,
    attempts: RwLock<usize>,
}

impl InMemoryOrderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_next(&self, errors: impl IntoIterator<Item = LedgerError>) {
        self.failures.write().await.extend(errors);
    }

    pub async fn rows(&self) -> Vec<OrderRecord> {
        self.rows.read().await.clone()
    }

    /// Number of `append` calls, successful or not.
    pub async fn attempts(&self) -> usize {
        *self.attempts.read().await
    }
}

#[async_trait]
impl OrderLedger for InMemoryOrderLedger {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn append(&self, order: &OrderRecord) -> Result<(), LedgerError> {
        *self.attempts.write().await += 1;
        if let Some(error) = self.failures.write().await.pop_front() {
            return Err(error);
        }
        self.rows.write().await.push(order.clone());
        Ok(())
    }
}
