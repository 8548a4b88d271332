// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Timeout and retry handling around the distributed tier.

mod backoff;

use std::time::Duration;

use bytes::Bytes;
use stratum_tier::{BackendError, CacheKey, DistributedCache};

pub use backoff::{Backoff, RetryOptions};

/// Default limit for a single distributed-tier call.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Wraps a [`DistributedCache`] so that every call is bounded by a timeout and transient
/// failures are retried.
///
/// Errors returned from here are final: callers decide whether to fail open or closed.
#[derive(Debug)]
pub(crate) struct DistributedGateway<B> {
    backend: B,
    timeout: Duration,
    retry: RetryOptions,
}

impl<B> DistributedGateway<B> {
    pub(crate) fn new(backend: B, timeout: Duration, retry: RetryOptions) -> Self {
        Self { backend, timeout, retry }
    }

    pub(crate) fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B> DistributedGateway<B>
where
    B: DistributedCache,
{
    pub(crate) async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, BackendError> {
        self.call("get", || self.backend.get(key)).await
    }

    pub(crate) async fn set(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<(), BackendError> {
        self.call("set", || self.backend.set(key, value.clone(), ttl)).await
    }

    pub(crate) async fn remove(&self, key: &CacheKey) -> Result<(), BackendError> {
        self.call("remove", || self.backend.remove(key)).await
    }

    pub(crate) async fn remove_batch(&self, keys: &[CacheKey]) -> Result<(), BackendError> {
        self.call("remove_batch", || self.backend.remove_batch(keys)).await
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut delays = self.retry.delays();
        loop {
            let error = match tokio::time::timeout(self.timeout, attempt()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => error,
                Err(elapsed) => BackendError::timeout(format!(
                    "{operation} did not complete within {:?}",
                    self.timeout
                ))
                .with_source(elapsed),
            };

            if !error.is_transient() {
                return Err(error);
            }
            let Some(delay) = delays.next() else {
                return Err(error);
            };

            tracing::debug!(operation, ?delay, %error, "retrying distributed cache operation");
            tokio::time::sleep(delay).await;
        }
    }
}
