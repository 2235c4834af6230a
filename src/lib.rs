pub mod audit;
pub mod config;
pub mod error;
pub mod identity;
pub mod ledger;

pub use error::{LedgerError, LedgerResult};
