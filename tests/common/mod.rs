#![allow(dead_code)]

use ledger_audit::identity::{StaticTokenCredential, TokenCredential};
use ledger_audit::ledger::{encode, CollectionId, HttpLedgerTransport, InMemoryLedger, LedgerTransport, LogMessage};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

pub const TEST_TOKEN: &str = "test-token";
pub const SALARY_UPDATE: &str = "UPDATE Employees SET Salary=90000 WHERE EmployeeID=5";

pub fn test_credential() -> Arc<dyn TokenCredential> {
    Arc::new(StaticTokenCredential::new(TEST_TOKEN).expect("static token"))
}

/// HTTP transport pointed at a mock ledger
pub fn transport_for(server: &MockServer) -> HttpLedgerTransport {
    transport_with_timeout(server, Duration::from_secs(5))
}

pub fn transport_with_timeout(server: &MockServer, timeout: Duration) -> HttpLedgerTransport {
    HttpLedgerTransport::new(&server.uri(), test_credential(), timeout).expect("valid mock endpoint")
}

/// A ledger entry object as the service returns it
pub fn entry_json(seqno: u64, contents: &str) -> Value {
    json!({
        "contents": contents,
        "collectionId": "ContosoHrSqlLogs",
        "transactionId": format!("2.{}", seqno),
    })
}

pub fn next_link(from_seqno: u64) -> String {
    format!(
        "/app/transactions?api-version=2022-05-13&collectionId=ContosoHrSqlLogs&fromTransactionId=2.{}",
        from_seqno
    )
}

/// In-memory ledger preloaded with `messages` in the default collection
pub async fn seeded_ledger(messages: &[&str], page_size: usize) -> InMemoryLedger {
    let ledger = InMemoryLedger::new().with_page_size(page_size);
    for message in messages {
        ledger
            .append(&CollectionId::default(), encode(&LogMessage::new(*message)))
            .await
            .expect("append to in-memory ledger");
    }
    ledger
}
