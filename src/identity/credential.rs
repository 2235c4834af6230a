//! Token Credentials
//!
//! The ledger client only needs bearer tokens on demand. Where those come
//! from is a pluggable capability.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};

/// A bearer token and the instant it stops being accepted.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_on,
        }
    }

    /// True when the token expires within `skew` of now.
    pub fn expires_within(&self, skew: Duration) -> bool {
        self.expires_on
            .checked_sub_signed(skew)
            .map_or(true, |refresh_at| refresh_at <= Utc::now())
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Source of bearer tokens for ledger calls.
///
/// Failures must be reported as [`LedgerError::AuthenticationFailure`].
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self) -> LedgerResult<AccessToken>;
}

#[async_trait]
impl<T: TokenCredential + ?Sized> TokenCredential for Arc<T> {
    async fn get_token(&self) -> LedgerResult<AccessToken> {
        (**self).get_token().await
    }
}

/// A token issued out of band, e.g. by `az account get-access-token`.
pub struct StaticTokenCredential {
    token: AccessToken,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> LedgerResult<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(LedgerError::AuthenticationFailure(
                "No access token configured".to_string(),
            ));
        }
        // Lifetime unknown; the service decides when it expires.
        Ok(Self {
            token: AccessToken::new(token, DateTime::<Utc>::MAX_UTC),
        })
    }

    pub fn with_expiry(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: AccessToken::new(token, expires_on),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self) -> LedgerResult<AccessToken> {
        if self.token.expires_within(Duration::zero()) {
            return Err(LedgerError::AuthenticationFailure(
                "Configured access token has expired".to_string(),
            ));
        }
        Ok(self.token.clone())
    }
}

/// Caches tokens from an inner credential and refreshes them shortly
/// before expiry. Concurrent callers share a single refresh.
pub struct CachedCredential<C> {
    inner: C,
    refresh_skew: Duration,
    cached: Mutex<Option<AccessToken>>,
}

impl<C: TokenCredential> CachedCredential<C> {
    pub fn new(inner: C) -> Self {
        Self::with_refresh_skew(inner, Duration::minutes(5))
    }

    pub fn with_refresh_skew(inner: C, refresh_skew: Duration) -> Self {
        Self {
            inner,
            refresh_skew,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<C: TokenCredential> TokenCredential for CachedCredential<C> {
    async fn get_token(&self) -> LedgerResult<AccessToken> {
        // Held across the refresh so waiters reuse the new token.
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.expires_within(self.refresh_skew) {
                return Ok(token.clone());
            }
        }

        debug!("Refreshing ledger access token");
        let token = self.inner.get_token().await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCredential {
        calls: AtomicUsize,
        lifetime: Duration,
    }

    #[async_trait]
    impl TokenCredential for CountingCredential {
        async fn get_token(&self) -> LedgerResult<AccessToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            Ok(AccessToken::new(format!("token-{}", n), Utc::now() + self.lifetime))
        }
    }

    #[tokio::test]
    async fn test_static_token() {
        let credential = StaticTokenCredential::new("abc").unwrap();
        assert_eq!(credential.get_token().await.unwrap().token, "abc");
        assert!(StaticTokenCredential::new("").is_err());
    }

    #[tokio::test]
    async fn test_expired_static_token_is_auth_failure() {
        let credential =
            StaticTokenCredential::with_expiry("abc", Utc::now() - Duration::minutes(1));
        assert!(matches!(
            credential.get_token().await,
            Err(LedgerError::AuthenticationFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let credential = Arc::new(CachedCredential::new(CountingCredential {
            calls: AtomicUsize::new(0),
            lifetime: Duration::hours(1),
        }));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let credential = credential.clone();
            handles.push(tokio::spawn(async move { credential.get_token().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().token, "token-0");
        }
        assert_eq!(credential.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refreshes_inside_skew_window() {
        let credential = CachedCredential::with_refresh_skew(
            CountingCredential {
                calls: AtomicUsize::new(0),
                lifetime: Duration::minutes(1),
            },
            Duration::minutes(5),
        );
        assert_eq!(credential.get_token().await.unwrap().token, "token-0");
        assert_eq!(credential.get_token().await.unwrap().token, "token-1");
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = AccessToken::new("secret", Utc::now());
        assert!(!format!("{:?}", token).contains("secret"));
    }
}
