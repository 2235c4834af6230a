//! Identity
//!
//! Bearer-token sources for authenticating ledger calls.

pub mod credential;
pub mod imds;

pub use credential::{AccessToken, CachedCredential, StaticTokenCredential, TokenCredential};
pub use imds::{ImdsClient, ManagedIdentityCredential};
