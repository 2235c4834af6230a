//! Ledger Transport
//!
//! Network boundary to the ledger service. Implementations must be safe for
//! concurrent use without external locking.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::{AppendReceipt, CollectionId, EntryPage, TransactionId, TransactionStatus};

#[async_trait]
pub trait LedgerTransport: Send + Sync {
    /// Submit one write. Returns once the service accepted it, without
    /// waiting for commit. Never retries.
    async fn append(&self, collection: &CollectionId, payload: Vec<u8>) -> LedgerResult<AppendReceipt>;

    /// Fetch one page of a collection listing. `None` requests the first page.
    async fn fetch_page(
        &self,
        collection: &CollectionId,
        continuation: Option<&str>,
    ) -> LedgerResult<EntryPage>;

    async fn transaction_status(&self, transaction_id: &TransactionId) -> LedgerResult<TransactionStatus>;
}

/// Poll until the transaction is committed or `timeout` elapses.
pub async fn wait_for_commit(
    transport: &dyn LedgerTransport,
    transaction_id: &TransactionId,
    poll_interval: Duration,
    timeout: Duration,
) -> LedgerResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let status = transport.transaction_status(transaction_id).await?;
        if status.is_committed() {
            debug!("Transaction {} committed", transaction_id);
            return Ok(());
        }
        if Instant::now() + poll_interval > deadline {
            return Err(LedgerError::TransientNetworkFailure(format!(
                "Transaction {} not committed within {:?}",
                transaction_id, timeout
            )));
        }
        tokio::time::sleep(poll_interval).await;
    }
}
