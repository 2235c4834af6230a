//! Database command capture
//!
//! A `tracing` layer that forwards database command events to the audit
//! logger, so every statement the data layer executes lands in the ledger.

use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::audit::logger::AuditLogger;

/// Target sqlx uses for executed statements.
pub const SQLX_QUERY_TARGET: &str = "sqlx::query";

pub struct LedgerAuditLayer {
    logger: AuditLogger,
    targets: Vec<String>,
}

impl LedgerAuditLayer {
    pub fn new<I, T>(logger: AuditLogger, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            logger,
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }

    /// Capture sqlx statement events only.
    pub fn for_sqlx(logger: AuditLogger) -> Self {
        Self::new(logger, [SQLX_QUERY_TARGET])
    }

    fn captures(&self, target: &str) -> bool {
        self.targets.iter().any(|prefix| target.starts_with(prefix.as_str()))
    }
}

impl<S: Subscriber> Layer<S> for LedgerAuditLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.captures(event.metadata().target()) {
            return;
        }

        let mut visitor = CommandVisitor::default();
        event.record(&mut visitor);
        if let Some(text) = visitor.finish() {
            self.logger.log(text);
        }
    }
}

#[derive(Default)]
struct CommandVisitor {
    message: String,
    statement: Option<String>,
    fields: Vec<String>,
}

impl CommandVisitor {
    fn push(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            "db.statement" => self.statement = Some(value),
            name => self.fields.push(format!("{}={}", name, value)),
        }
    }

    /// `<message> [k=v, ...]` with the statement, if any, on its own line.
    fn finish(self) -> Option<String> {
        let mut head = self.message.trim().to_string();
        if !self.fields.is_empty() {
            if !head.is_empty() {
                head.push(' ');
            }
            head.push_str(&format!("[{}]", self.fields.join(", ")));
        }

        let text = match self.statement {
            Some(statement) if head.is_empty() => statement,
            Some(statement) => format!("{}\n{}", head, statement),
            None => head,
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

impl Visit for CommandVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{:?}", value));
    }
}
