//! Ledger Client
//!
//! Wire codec, transport abstraction and the HTTP and in-memory
//! implementations of an append-only, tamper-evident ledger.

pub mod codec;
pub mod entry;
pub mod http;
pub mod memory;
pub mod pager;
pub mod retry;
pub mod transport;

pub use codec::{decode, encode, LogMessage};
pub use entry::{
    AppendReceipt, CollectionId, EntryPage, LedgerEntry, PageState, TransactionId, TransactionStatus,
    DEFAULT_COLLECTION,
};
pub use http::HttpLedgerTransport;
pub use memory::InMemoryLedger;
pub use pager::{list_entries, list_entries_with_options, EntryStream, ListOptions};
pub use retry::RetryPolicy;
pub use transport::{wait_for_commit, LedgerTransport};
