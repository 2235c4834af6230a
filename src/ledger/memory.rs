//! In-Memory Ledger
//!
//! A process-local ledger with the same observable behavior as the remote
//! service: server-assigned positions, paginated listings, optional commit
//! lag and injectable failures.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::{
    AppendReceipt, CollectionId, EntryPage, LedgerEntry, PageState, TransactionId, TransactionStatus,
};
use crate::ledger::transport::LedgerTransport;

const VIEW: u64 = 2;

struct StoredEntry {
    transaction_id: TransactionId,
    collection_id: CollectionId,
    payload: Vec<u8>,
    committed: bool,
}

struct State {
    entries: Vec<StoredEntry>,
    next_seqno: u64,
    page_size: usize,
    commit_lag: bool,
    loading_pages: usize,
    append_failures: VecDeque<LedgerError>,
    page_failures: VecDeque<LedgerError>,
    append_attempts: usize,
    page_requests: usize,
}

#[derive(Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                entries: Vec::new(),
                next_seqno: 1,
                page_size: 100,
                commit_lag: false,
                loading_pages: 0,
                append_failures: VecDeque::new(),
                page_failures: VecDeque::new(),
                append_attempts: 0,
                page_requests: 0,
            })),
        }
    }

    pub fn with_page_size(self, page_size: usize) -> Self {
        self.lock().page_size = page_size.max(1);
        self
    }

    /// Keep appended entries pending, and out of listings, until
    /// [`commit_pending`](Self::commit_pending) is called.
    pub fn with_commit_lag(self) -> Self {
        self.lock().commit_lag = true;
        self
    }

    /// Answer the next `pages` listing requests with `Loading`.
    pub fn with_loading_pages(self, pages: usize) -> Self {
        self.lock().loading_pages = pages;
        self
    }

    pub fn commit_pending(&self) {
        for entry in self.lock().entries.iter_mut() {
            entry.committed = true;
        }
    }

    pub fn fail_next_append(&self, error: LedgerError) {
        self.lock().append_failures.push_back(error);
    }

    pub fn fail_next_page(&self, error: LedgerError) {
        self.lock().page_failures.push_back(error);
    }

    /// Store bytes exactly as given, bypassing request validation. Models
    /// entries written by other clients in a foreign format.
    pub fn insert_raw(&self, collection: &CollectionId, payload: &[u8]) -> TransactionId {
        let mut state = self.lock();
        let committed = !state.commit_lag;
        Self::store(&mut state, collection, payload.to_vec(), committed)
    }

    pub fn append_attempts(&self) -> usize {
        self.lock().append_attempts
    }

    pub fn page_requests(&self) -> usize {
        self.lock().page_requests
    }

    pub fn committed_len(&self, collection: &CollectionId) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.committed && &e.collection_id == collection)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test thread panicked mid-update.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store(state: &mut State, collection: &CollectionId, payload: Vec<u8>, committed: bool) -> TransactionId {
        let transaction_id = TransactionId::new(VIEW, state.next_seqno);
        state.next_seqno += 1;
        state.entries.push(StoredEntry {
            transaction_id,
            collection_id: collection.clone(),
            payload,
            committed,
        });
        transaction_id
    }

    fn render(entry: &StoredEntry) -> Vec<u8> {
        match serde_json::from_slice::<serde_json::Value>(&entry.payload) {
            Ok(serde_json::Value::Object(mut object)) => {
                object.insert(
                    "collectionId".to_string(),
                    serde_json::Value::String(entry.collection_id.to_string()),
                );
                object.insert(
                    "transactionId".to_string(),
                    serde_json::Value::String(entry.transaction_id.to_string()),
                );
                serde_json::to_vec(&object).unwrap_or_else(|_| entry.payload.clone())
            }
            _ => entry.payload.clone(),
        }
    }

    fn parse_continuation(token: &str) -> LedgerResult<u64> {
        token
            .strip_prefix("after:")
            .and_then(|seqno| seqno.parse().ok())
            .ok_or_else(|| LedgerError::ServiceRejected {
                status: 400,
                message: format!("Invalid continuation token: {}", token),
            })
    }
}

#[async_trait]
impl LedgerTransport for InMemoryLedger {
    async fn append(&self, collection: &CollectionId, payload: Vec<u8>) -> LedgerResult<AppendReceipt> {
        let mut state = self.lock();
        state.append_attempts += 1;
        if let Some(error) = state.append_failures.pop_front() {
            return Err(error);
        }

        let valid = matches!(
            serde_json::from_slice::<serde_json::Value>(&payload),
            Ok(serde_json::Value::Object(ref object)) if object.get("contents").map_or(false, |c| c.is_string())
        );
        if !valid {
            return Err(LedgerError::ServiceRejected {
                status: 400,
                message: "Request body must be an object with a string contents field".to_string(),
            });
        }

        let committed = !state.commit_lag;
        let transaction_id = Self::store(&mut state, collection, payload, committed);
        Ok(AppendReceipt {
            collection_id: collection.clone(),
            transaction_id: Some(transaction_id),
        })
    }

    async fn fetch_page(
        &self,
        collection: &CollectionId,
        continuation: Option<&str>,
    ) -> LedgerResult<EntryPage> {
        let mut state = self.lock();
        state.page_requests += 1;
        if let Some(error) = state.page_failures.pop_front() {
            return Err(error);
        }

        let after = match continuation {
            Some(token) => Self::parse_continuation(token)?,
            None => 0,
        };

        if state.loading_pages > 0 {
            state.loading_pages -= 1;
            return Ok(EntryPage {
                entries: Vec::new(),
                continuation: Some(format!("after:{}", after)),
                state: PageState::Loading,
            });
        }

        let page_size = state.page_size;
        let mut matching = state
            .entries
            .iter()
            .filter(|e| e.committed && &e.collection_id == collection && e.transaction_id.seqno > after);

        let listed: Vec<LedgerEntry> = matching
            .by_ref()
            .take(page_size)
            .map(|e| LedgerEntry {
                transaction_id: e.transaction_id,
                collection_id: e.collection_id.clone(),
                payload: Self::render(e),
            })
            .collect();

        let continuation = match (matching.next(), listed.last()) {
            (Some(_), Some(last)) => Some(format!("after:{}", last.transaction_id.seqno)),
            _ => None,
        };

        Ok(EntryPage {
            entries: listed.into_iter().map(Ok).collect(),
            continuation,
            state: PageState::Ready,
        })
    }

    async fn transaction_status(&self, transaction_id: &TransactionId) -> LedgerResult<TransactionStatus> {
        let state = self.lock();
        match state.entries.iter().find(|e| &e.transaction_id == transaction_id) {
            Some(entry) if entry.committed => Ok(TransactionStatus::Committed),
            Some(_) => Ok(TransactionStatus::Pending),
            None => Err(LedgerError::ServiceRejected {
                status: 404,
                message: format!("Unknown transaction {}", transaction_id),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::codec::{decode, encode, LogMessage};

    #[tokio::test]
    async fn test_positions_are_server_assigned_and_increasing() {
        let ledger = InMemoryLedger::new();
        let collection = CollectionId::default();
        let first = ledger.append(&collection, encode(&LogMessage::new("a"))).await.unwrap();
        let second = ledger.append(&collection, encode(&LogMessage::new("b"))).await.unwrap();
        assert!(first.transaction_id.unwrap() < second.transaction_id.unwrap());
    }

    #[tokio::test]
    async fn test_listed_entries_carry_ledger_fields() {
        let ledger = InMemoryLedger::new();
        let collection = CollectionId::default();
        ledger.append(&collection, encode(&LogMessage::new("SELECT 1"))).await.unwrap();

        let page = ledger.fetch_page(&collection, None).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert!(page.continuation.is_none());
        let entry = page.entries[0].as_ref().unwrap();
        let raw: serde_json::Value = serde_json::from_slice(&entry.payload).unwrap();
        assert_eq!(raw["transactionId"], "2.1");
        assert_eq!(raw["collectionId"], "ContosoHrSqlLogs");
        assert_eq!(decode(&entry.payload).unwrap().as_str(), "SELECT 1");
    }

    #[tokio::test]
    async fn test_append_rejects_non_envelope_body() {
        let ledger = InMemoryLedger::new();
        let result = ledger.append(&CollectionId::default(), b"plain text".to_vec()).await;
        assert!(matches!(result, Err(LedgerError::ServiceRejected { status: 400, .. })));
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let ledger = InMemoryLedger::new();
        let hr = CollectionId::default();
        let other = CollectionId::new("PayrollLogs").unwrap();
        ledger.append(&hr, encode(&LogMessage::new("hr"))).await.unwrap();
        ledger.append(&other, encode(&LogMessage::new("payroll"))).await.unwrap();

        assert_eq!(ledger.committed_len(&hr), 1);
        assert_eq!(ledger.fetch_page(&other, None).await.unwrap().entries.len(), 1);
    }
}
