//! Audit Log Pipeline
//!
//! Captures application activity, ships it to the ledger without holding up
//! the caller, and reads it back for review.

pub mod layer;
pub mod logger;
pub mod reader;
pub mod verify;

pub use layer::LedgerAuditLayer;
pub use logger::{AuditLogger, AuditStats};
pub use reader::{AuditRecord, LedgerReader, RecordStream};
pub use verify::{ChainVerifier, ReviewOutcome, ReviewReport};
