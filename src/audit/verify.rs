//! Audit Review Verification
//!
//! Checks the records read back from a collection: ledger ordering,
//! unreadable entries, and a hash chain over the decoded contents that lets
//! two reviews of the same collection be compared.

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::audit::reader::AuditRecord;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::{CollectionId, TransactionId};

pub const GENESIS_DIGEST: &str =
    "sha256:0000000000000000000000000000000000000000000000000000000000000000";

/// Fold one record into the running chain digest.
fn chain_step(previous: &str, record: &AuditRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous.as_bytes());
    hasher.update(b"|");
    hasher.update(record.transaction_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(record.message.as_str().as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Chain digest over a sequence of records.
pub fn chain_digest(records: &[AuditRecord]) -> String {
    records
        .iter()
        .fold(GENESIS_DIGEST.to_string(), |digest, record| chain_step(&digest, record))
}

/// Positions that do not strictly increase over their predecessor.
pub fn verify_ordering(positions: &[TransactionId]) -> Vec<OrderingViolation> {
    positions
        .windows(2)
        .filter(|pair| pair[1] <= pair[0])
        .map(|pair| OrderingViolation {
            previous: pair[0],
            current: pair[1],
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderingViolation {
    pub previous: TransactionId,
    pub current: TransactionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedEntryReport {
    pub transaction_id: Option<TransactionId>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReviewOutcome {
    Complete,
    /// Retrieval finished but some entries could not be decoded.
    CompleteWithUnreadableEntries,
    /// Retrieval stopped before the end of the collection.
    Aborted,
}

/// Result of reviewing one collection
#[derive(Debug, Clone)]
pub struct ReviewReport {
    pub collection_id: CollectionId,
    pub records: Vec<AuditRecord>,
    pub malformed: Vec<MalformedEntryReport>,
    pub ordering_violations: Vec<OrderingViolation>,
    pub aborted: Option<LedgerError>,
    pub chain_digest: String,
}

impl ReviewReport {
    pub fn outcome(&self) -> ReviewOutcome {
        if self.aborted.is_some() {
            ReviewOutcome::Aborted
        } else if !self.malformed.is_empty() {
            ReviewOutcome::CompleteWithUnreadableEntries
        } else {
            ReviewOutcome::Complete
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.ordering_violations.is_empty()
    }

    pub fn entries_seen(&self) -> usize {
        self.records.len() + self.malformed.len()
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        let ordering = if self.is_ordered() {
            String::new()
        } else {
            format!(", {} ordering violations", self.ordering_violations.len())
        };
        match self.outcome() {
            ReviewOutcome::Complete => format!(
                "✅ {}: {} entries read{}",
                self.collection_id,
                self.records.len(),
                ordering
            ),
            ReviewOutcome::CompleteWithUnreadableEntries => format!(
                "⚠️ {}: {} entries read, {} unreadable{}",
                self.collection_id,
                self.records.len(),
                self.malformed.len(),
                ordering
            ),
            ReviewOutcome::Aborted => format!(
                "❌ {}: retrieval aborted after {} entries: {}",
                self.collection_id,
                self.entries_seen(),
                self.aborted.as_ref().map(|e| e.to_string()).unwrap_or_default()
            ),
        }
    }

    /// Get detailed status
    pub fn detailed_status(&self) -> String {
        let mut lines = vec![
            format!("Collection: {}", self.collection_id),
            format!("Entries read: {}", self.records.len()),
            format!("Unreadable entries: {}", self.malformed.len()),
            format!(
                "Ordering: {}",
                if self.is_ordered() { "✅ Ascending" } else { "❌ Violations found" }
            ),
            format!("Chain digest: {}", self.chain_digest),
        ];
        if let (Some(first), Some(last)) = (self.records.first(), self.records.last()) {
            lines.push(format!(
                "Positions: {} .. {}",
                first.transaction_id, last.transaction_id
            ));
        }
        for entry in &self.malformed {
            lines.push(format!(
                "  unreadable at {}: {}",
                entry
                    .transaction_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "unknown position".to_string()),
                entry.reason
            ));
        }
        for violation in &self.ordering_violations {
            lines.push(format!(
                "  out of order: {} after {}",
                violation.current, violation.previous
            ));
        }
        if let Some(error) = &self.aborted {
            lines.push(format!("Aborted: {}", error));
        }
        lines.join("\n")
    }
}

/// Accumulates a [`ReviewReport`] while a collection is streamed.
pub struct ChainVerifier {
    collection_id: CollectionId,
    records: Vec<AuditRecord>,
    malformed: Vec<MalformedEntryReport>,
    positions: Vec<TransactionId>,
    aborted: Option<LedgerError>,
}

impl ChainVerifier {
    pub fn new(collection_id: CollectionId) -> Self {
        Self {
            collection_id,
            records: Vec::new(),
            malformed: Vec::new(),
            positions: Vec::new(),
            aborted: None,
        }
    }

    /// Take one item of a record stream. Returns `false` once the item ended
    /// the read, after which the stream should not be polled further.
    pub fn observe(&mut self, item: LedgerResult<AuditRecord>) -> bool {
        match item {
            Ok(record) => self.accept(record),
            Err(err) if !err.aborts_read() => self.reject(err),
            Err(err) => {
                self.abort(err);
                return false;
            }
        }
        true
    }

    pub fn accept(&mut self, record: AuditRecord) {
        self.positions.push(record.transaction_id);
        self.records.push(record);
    }

    /// Record an entry that could not be decoded.
    pub fn reject(&mut self, error: LedgerError) {
        let (transaction_id, reason) = match error {
            LedgerError::MalformedEntry {
                transaction_id,
                reason,
            } => (transaction_id, reason),
            other => (None, other.to_string()),
        };
        if let Some(position) = transaction_id {
            self.positions.push(position);
        }
        warn!(
            "Unreadable entry in {} at {:?}: {}",
            self.collection_id, transaction_id, reason
        );
        self.malformed.push(MalformedEntryReport {
            transaction_id,
            reason,
        });
    }

    pub fn abort(&mut self, error: LedgerError) {
        self.aborted = Some(error);
    }

    pub fn finish(self) -> ReviewReport {
        let ordering_violations = verify_ordering(&self.positions);
        for violation in &ordering_violations {
            warn!("Entry {} is not after {}", violation.current, violation.previous);
        }

        let report = ReviewReport {
            chain_digest: chain_digest(&self.records),
            collection_id: self.collection_id,
            records: self.records,
            malformed: self.malformed,
            ordering_violations,
            aborted: self.aborted,
        };
        info!("{}", report.summary());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::codec::LogMessage;

    fn record(seqno: u64, text: &str) -> AuditRecord {
        AuditRecord {
            transaction_id: TransactionId::new(2, seqno),
            collection_id: CollectionId::default(),
            message: LogMessage::new(text),
        }
    }

    #[test]
    fn test_chain_digest_is_deterministic() {
        let records = vec![record(1, "a"), record(2, "b")];
        let digest = chain_digest(&records);
        assert_eq!(digest, chain_digest(&records));
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), 71);
        assert_eq!(chain_digest(&[]), GENESIS_DIGEST);
    }

    #[test]
    fn test_chain_digest_detects_changed_contents() {
        let recorded = vec![record(1, "UPDATE Employees SET Salary=90000"), record(2, "b")];
        let tampered = vec![record(1, "UPDATE Employees SET Salary=99000"), record(2, "b")];
        assert_ne!(chain_digest(&recorded), chain_digest(&tampered));
    }

    #[test]
    fn test_verify_ordering_flags_duplicates_and_regressions() {
        let positions = vec![
            TransactionId::new(2, 1),
            TransactionId::new(2, 2),
            TransactionId::new(2, 2),
            TransactionId::new(2, 1),
            TransactionId::new(3, 5),
        ];
        let violations = verify_ordering(&positions);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].current, TransactionId::new(2, 2));
        assert_eq!(violations[1].current, TransactionId::new(2, 1));
    }

    #[test]
    fn test_verifier_outcomes() {
        let mut verifier = ChainVerifier::new(CollectionId::default());
        verifier.accept(record(1, "a"));
        verifier.reject(LedgerError::malformed(Some(TransactionId::new(2, 2)), "no contents"));
        verifier.accept(record(3, "c"));
        let report = verifier.finish();

        assert_eq!(report.outcome(), ReviewOutcome::CompleteWithUnreadableEntries);
        assert_eq!(report.entries_seen(), 3);
        assert!(report.is_ordered());
        assert_eq!(report.chain_digest, chain_digest(&report.records));
        assert!(report.summary().contains("1 unreadable"));
        assert!(report.detailed_status().contains("unreadable at 2.2: no contents"));

        let mut verifier = ChainVerifier::new(CollectionId::default());
        assert!(verifier.observe(Ok(record(1, "a"))));
        assert!(!verifier.observe(Err(LedgerError::AuthenticationFailure("expired".to_string()))));
        let report = verifier.finish();
        assert_eq!(report.outcome(), ReviewOutcome::Aborted);
        assert!(report.summary().starts_with("❌"));
    }

    #[test]
    fn test_unreadable_entries_count_towards_ordering() {
        let mut verifier = ChainVerifier::new(CollectionId::default());
        assert!(verifier.observe(Ok(record(5, "a"))));
        assert!(verifier.observe(Err(LedgerError::malformed(Some(TransactionId::new(2, 4)), "bad"))));
        assert!(verifier.observe(Err(LedgerError::malformed(None, "no position"))));
        assert!(verifier.observe(Ok(record(6, "b"))));
        let report = verifier.finish();

        assert_eq!(report.malformed.len(), 2);
        assert_eq!(report.ordering_violations.len(), 1);
        assert_eq!(report.ordering_violations[0].current, TransactionId::new(2, 4));
    }
}
