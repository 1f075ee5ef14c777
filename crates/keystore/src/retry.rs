//! Bounded exponential backoff for transient backend failures.

use std::{future::Future, sync::Arc, time::Duration};

use {async_trait::async_trait, tracing::warn};

#[cfg(feature = "metrics")]
use shredder_metrics::{counter, keystore as keystore_metrics};

use crate::{Result, StoreError, material::KeyMaterial, store::KeyStore};

/// Retry schedule: `initial_backoff`, doubled after each attempt, capped at
/// `max_backoff`, at most `max_retries` retries after the first attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the policy
/// is exhausted. The last error is returned.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && is_retryable(&e) => {
                let delay = policy.backoff(attempt);
                warn!(error = %e, attempt = attempt + 1, ?delay, "transient failure, retrying");

                #[cfg(feature = "metrics")]
                counter!(keystore_metrics::RETRIES_TOTAL).increment(1);

                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}

/// Decorator retrying transient [`StoreError`]s of the
/// wrapped store.
pub struct RetryingKeyStore {
    inner: Arc<dyn KeyStore>,
    policy: RetryPolicy,
}

impl RetryingKeyStore {
    pub fn new(inner: Arc<dyn KeyStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl KeyStore for RetryingKeyStore {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    async fn get_or_create(&self, subject: &str) -> Result<KeyMaterial> {
        retry(&self.policy, StoreError::is_retryable, || {
            self.inner.get_or_create(subject)
        })
        .await
    }

    async fn get(&self, subject: &str) -> Result<Option<KeyMaterial>> {
        retry(&self.policy, StoreError::is_retryable, || {
            self.inner.get(subject)
        })
        .await
    }

    async fn delete(&self, subject: &str) -> Result<bool> {
        retry(&self.policy, StoreError::is_retryable, || {
            self.inner.delete(subject)
        })
        .await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
