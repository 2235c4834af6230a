//! Ledger Reader
//!
//! Read-only retrieval of a collection for audit review. An entry that
//! cannot be decoded is reported on its own and the read continues; any
//! other failure ends the read.

use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;

use crate::audit::verify::{ChainVerifier, ReviewReport};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::codec::{self, LogMessage};
use crate::ledger::entry::{CollectionId, LedgerEntry, TransactionId};
use crate::ledger::pager::{list_entries_with_options, ListOptions};
use crate::ledger::retry::RetryPolicy;
use crate::ledger::transport::LedgerTransport;

/// A decoded ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub transaction_id: TransactionId,
    pub collection_id: CollectionId,
    pub message: LogMessage,
}

pub type RecordStream = Pin<Box<dyn Stream<Item = LedgerResult<AuditRecord>> + Send>>;

#[derive(Clone)]
pub struct LedgerReader {
    transport: Arc<dyn LedgerTransport>,
    options: ListOptions,
}

impl LedgerReader {
    pub fn new(transport: Arc<dyn LedgerTransport>) -> Self {
        Self {
            transport,
            options: ListOptions {
                retry: RetryPolicy::default(),
                ..ListOptions::default()
            },
        }
    }

    pub fn with_options(mut self, options: ListOptions) -> Self {
        self.options = options;
        self
    }

    /// Stream every message in `collection` in ledger order.
    ///
    /// `Err(MalformedEntry)` items are per entry and the stream goes on.
    /// Any other error is the last item.
    pub fn read_all(&self, collection: &CollectionId) -> RecordStream {
        list_entries_with_options(self.transport.clone(), collection.clone(), self.options.clone())
            .map(|item| item.and_then(decode_entry))
            .boxed()
    }

    /// Read the whole collection and summarize what was found.
    pub async fn review(&self, collection: &CollectionId) -> ReviewReport {
        info!("Reviewing ledger collection {}", collection);
        let mut verifier = ChainVerifier::new(collection.clone());
        let mut records = self.read_all(collection);

        while let Some(item) = records.next().await {
            if !verifier.observe(item) {
                break;
            }
        }

        verifier.finish()
    }
}

fn decode_entry(entry: LedgerEntry) -> LedgerResult<AuditRecord> {
    match codec::decode(&entry.payload) {
        Ok(message) => Ok(AuditRecord {
            transaction_id: entry.transaction_id,
            collection_id: entry.collection_id,
            message,
        }),
        Err(LedgerError::MalformedEntry { reason, .. }) => {
            Err(LedgerError::malformed(Some(entry.transaction_id), reason))
        }
        Err(other) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::verify::ReviewOutcome;
    use crate::ledger::codec::encode;
    use crate::ledger::memory::InMemoryLedger;
    use std::time::Duration;

    async fn ledger_with(messages: &[&str]) -> InMemoryLedger {
        let ledger = InMemoryLedger::new().with_page_size(2);
        for message in messages {
            ledger
                .append(&CollectionId::default(), encode(&LogMessage::new(*message)))
                .await
                .unwrap();
        }
        ledger
    }

    #[tokio::test]
    async fn test_malformed_entry_does_not_stop_read() {
        let ledger = ledger_with(&["a", "b"]).await;
        let corrupt = ledger.insert_raw(&CollectionId::default(), b"\x00garbage");
        ledger
            .append(&CollectionId::default(), encode(&LogMessage::new("c")))
            .await
            .unwrap();

        let reader = LedgerReader::new(Arc::new(ledger));
        let items: Vec<LedgerResult<AuditRecord>> =
            reader.read_all(&CollectionId::default()).collect().await;

        assert_eq!(items.len(), 4);
        let texts: Vec<&str> = items
            .iter()
            .filter_map(|item| item.as_ref().ok())
            .map(|record| record.message.as_str())
            .collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert!(matches!(
            &items[2],
            Err(LedgerError::MalformedEntry { transaction_id: Some(id), .. }) if *id == corrupt
        ));
    }

    #[tokio::test]
    async fn test_review_distinguishes_abort_from_unreadable() {
        let ledger = ledger_with(&["a", "b", "c"]).await;
        ledger.fail_next_page(LedgerError::AuthenticationFailure("expired".to_string()));
        let reader = LedgerReader::new(Arc::new(ledger.clone()));

        let report = reader.review(&CollectionId::default()).await;
        assert_eq!(report.outcome(), ReviewOutcome::Aborted);
        assert!(report.records.is_empty());

        let report = reader.review(&CollectionId::default()).await;
        assert_eq!(report.outcome(), ReviewOutcome::Complete);
        assert_eq!(report.records.len(), 3);
    }

    #[tokio::test]
    async fn test_transient_page_failures_exhaust_budget() {
        let ledger = ledger_with(&["a", "b", "c"]).await;
        for _ in 0..3 {
            ledger.fail_next_page(LedgerError::TransientNetworkFailure("reset".to_string()));
        }
        let reader = LedgerReader::new(Arc::new(ledger)).with_options(ListOptions {
            retry: RetryPolicy::exponential(3, Duration::ZERO),
            ..ListOptions::default()
        });

        let report = reader.review(&CollectionId::default()).await;
        assert!(matches!(
            report.aborted,
            Some(LedgerError::TransientNetworkFailure(_))
        ));
    }
}
