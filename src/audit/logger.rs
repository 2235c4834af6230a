//! Audit Logger
//!
//! Application-facing entry point. Each call submits exactly one append to
//! the ledger in the background; the caller never waits for the ledger and
//! never sees a ledger failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::codec::{self, LogMessage};
use crate::ledger::entry::{AppendReceipt, CollectionId};
use crate::ledger::transport::LedgerTransport;

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    appended: AtomicU64,
    transient_failures: AtomicU64,
    authentication_failures: AtomicU64,
    rejected: AtomicU64,
}

/// Snapshot of the logger's diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditStats {
    pub submitted: u64,
    pub appended: u64,
    pub transient_failures: u64,
    pub authentication_failures: u64,
    /// Rejections and any other non-transient failure.
    pub rejected: u64,
}

impl AuditStats {
    pub fn failed(&self) -> u64 {
        self.transient_failures + self.authentication_failures + self.rejected
    }
}

/// Forwards log lines to a fixed ledger collection
#[derive(Clone)]
pub struct AuditLogger {
    transport: Arc<dyn LedgerTransport>,
    collection: CollectionId,
    runtime: Handle,
    tracker: TaskTracker,
    flush_gate: Arc<Mutex<()>>,
    counters: Arc<Counters>,
}

impl AuditLogger {
    /// Create a logger bound to the current tokio runtime.
    pub fn new(transport: Arc<dyn LedgerTransport>, collection: CollectionId) -> LedgerResult<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            LedgerError::ConfigError(format!("Audit logger requires a tokio runtime: {}", e))
        })?;
        Ok(Self::with_runtime(transport, collection, runtime))
    }

    /// Create a logger that spawns its appends on `runtime`, so `log` can be
    /// called from threads outside the runtime.
    pub fn with_runtime(
        transport: Arc<dyn LedgerTransport>,
        collection: CollectionId,
        runtime: Handle,
    ) -> Self {
        Self {
            transport,
            collection,
            runtime,
            tracker: TaskTracker::new(),
            flush_gate: Arc::new(Mutex::new(())),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn collection(&self) -> &CollectionId {
        &self.collection
    }

    /// Record `message` without waiting for the ledger. Failures are logged
    /// and counted, never returned.
    pub fn log(&self, message: impl Into<LogMessage>) {
        let message = message.into();
        let logger = self.clone();
        self.tracker.spawn_on(
            async move {
                match logger.append_once(&message).await {
                    Ok(_) => {}
                    Err(err @ LedgerError::TransientNetworkFailure(_))
                    | Err(err @ LedgerError::AuthenticationFailure(_)) => {
                        warn!("Audit entry for {} not recorded: {}", logger.collection, err);
                    }
                    Err(err) => {
                        error!("Audit entry for {} not recorded: {}", logger.collection, err);
                    }
                }
            },
            &self.runtime,
        );
    }

    /// Submit one append and wait for the service to accept it. Acceptance
    /// does not mean the entry is committed.
    pub async fn try_log(&self, message: impl Into<LogMessage>) -> LedgerResult<AppendReceipt> {
        self.append_once(&message.into()).await
    }

    /// Wait until every append started by [`log`](Self::log) has finished.
    ///
    /// Concurrent flushes take turns; the tracker is only reopened once the
    /// flush that closed it has seen it drain.
    pub async fn flush(&self) {
        let _gate = self.flush_gate.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Number of background appends still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            appended: self.counters.appended.load(Ordering::Relaxed),
            transient_failures: self.counters.transient_failures.load(Ordering::Relaxed),
            authentication_failures: self.counters.authentication_failures.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    async fn append_once(&self, message: &LogMessage) -> LedgerResult<AppendReceipt> {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let payload = codec::encode(message);

        match self.transport.append(&self.collection, payload).await {
            Ok(receipt) => {
                self.counters.appended.fetch_add(1, Ordering::Relaxed);
                debug!("Posted the following to {}: \n{}", self.collection, message);
                Ok(receipt)
            }
            Err(err) => {
                let counter = match err {
                    LedgerError::TransientNetworkFailure(_) => &self.counters.transient_failures,
                    LedgerError::AuthenticationFailure(_) => &self.counters.authentication_failures,
                    _ => &self.counters.rejected,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }
}
