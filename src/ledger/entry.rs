//! Ledger Data Model
//!
//! Collections, ledger-assigned transaction ids and the entry/page shapes
//! returned by the ledger service.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{LedgerError, LedgerResult};

/// Collection the application writes its SQL command log to.
pub const DEFAULT_COLLECTION: &str = "ContosoHrSqlLogs";

/// Named partition of the ledger. Created implicitly on first append.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(String);

impl CollectionId {
    pub fn new(id: impl Into<String>) -> LedgerResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(LedgerError::ConfigError(
                "Collection id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CollectionId {
    fn default() -> Self {
        Self(DEFAULT_COLLECTION.to_string())
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ledger-assigned position, written on the wire as `<view>.<seqno>`.
///
/// Sequence numbers keep increasing across views, so ordering is by
/// `seqno` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId {
    pub view: u64,
    pub seqno: u64,
}

impl TransactionId {
    pub fn new(view: u64, seqno: u64) -> Self {
        Self { view, seqno }
    }
}

impl Ord for TransactionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seqno
            .cmp(&other.seqno)
            .then_with(|| self.view.cmp(&other.view))
    }
}

impl PartialOrd for TransactionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.view, self.seqno)
    }
}

impl FromStr for TransactionId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LedgerError::UnexpectedResponse(format!("Invalid transaction id: {:?}", s));
        let (view, seqno) = s.trim().split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            view: view.parse().map_err(|_| invalid())?,
            seqno: seqno.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for TransactionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TransactionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One immutable entry of a collection as stored by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub transaction_id: TransactionId,
    pub collection_id: CollectionId,
    /// Raw JSON of the entry object; carries the `contents` field.
    pub payload: Vec<u8>,
}

/// Readiness of a listing as reported by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageState {
    #[default]
    Ready,
    /// The service is still assembling the range; re-request the same page.
    Loading,
}

/// One page of a paginated collection listing.
#[derive(Debug, Clone, Default)]
pub struct EntryPage {
    /// Listed entries in ledger order. An entry the transport could not make
    /// sense of is an `Err(MalformedEntry)` in its slot; the rest of the page
    /// is unaffected.
    pub entries: Vec<LedgerResult<LedgerEntry>>,
    pub continuation: Option<String>,
    pub state: PageState,
}

/// Result of an accepted append. Acceptance is not commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    pub collection_id: CollectionId,
    pub transaction_id: Option<TransactionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Committed,
    Pending,
}

impl TransactionStatus {
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionStatus::Committed)
    }
}
