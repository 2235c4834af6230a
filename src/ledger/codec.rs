//! Ledger Entry Codec
//!
//! Wraps a log message in the ledger's `{"contents": ...}` envelope and
//! recovers it from stored entries.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LedgerError, LedgerResult};

/// Opaque text recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogMessage(String);

impl LogMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for LogMessage {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for LogMessage {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    contents: &'a str,
}

/// Serialize a message into the canonical ledger envelope.
pub fn encode(message: &LogMessage) -> Vec<u8> {
    let envelope = Envelope {
        contents: message.as_str(),
    };
    // A struct with a single string field always serializes.
    serde_json::to_vec(&envelope).unwrap_or_default()
}

/// Recover the message from an envelope or a full ledger entry object.
pub fn decode(bytes: &[u8]) -> LedgerResult<LogMessage> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| LedgerError::malformed(None, format!("Entry is not valid JSON: {}", e)))?;

    let object = value
        .as_object()
        .ok_or_else(|| LedgerError::malformed(None, "Entry is not a JSON object"))?;

    match object.get("contents") {
        Some(serde_json::Value::String(text)) => Ok(LogMessage::new(text.as_str())),
        Some(other) => Err(LedgerError::malformed(
            None,
            format!("Entry contents is not a string: {}", other),
        )),
        None => Err(LedgerError::malformed(None, "Entry has no contents field")),
    }
}
