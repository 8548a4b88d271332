// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The capability a distributed store must provide to serve as the second tier.

use std::time::Duration;

use bytes::Bytes;

use crate::{BackendError, CacheKey};

/// A shared, out-of-process, byte-oriented key-value store.
///
/// Implementations perform network I/O and may fail; the cache wraps every call in a
/// timeout and a bounded retry policy, so implementations should not retry on their own.
/// Report retryable faults with [`BackendError::transient`] and everything else with
/// [`BackendError::permanent`].
///
/// # Examples
///
/// ```
/// use std::{collections::HashMap, time::Duration};
///
/// use bytes::Bytes;
/// use stratum_tier::{BackendError, CacheKey, DistributedCache};
/// use tokio::sync::Mutex;
///
/// struct InProcess(Mutex<HashMap<CacheKey, Bytes>>);
///
/// impl DistributedCache for InProcess {
///     async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, BackendError> {
///         Ok(self.0.lock().await.get(key).cloned())
///     }
///
///     async fn set(&self, key: &CacheKey, value: Bytes, _ttl: Duration) -> Result<(), BackendError> {
///         self.0.lock().await.insert(key.clone(), value);
///         Ok(())
///     }
///
///     async fn remove(&self, key: &CacheKey) -> Result<(), BackendError> {
///         self.0.lock().await.remove(key);
///         Ok(())
///     }
/// }
/// ```
pub trait DistributedCache: Send + Sync {
    /// Reads the bytes stored under `key`, or `None` when absent or expired.
    fn get(&self, key: &CacheKey) -> impl Future<Output = Result<Option<Bytes>, BackendError>> + Send;

    /// Stores `value` under `key` for `ttl`, replacing any existing value.
    fn set(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Removes `key`. Removing an absent key succeeds.
    fn remove(&self, key: &CacheKey) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Removes every key in `keys`.
    ///
    /// The default implementation removes keys one at a time and stops at the first
    /// failure. Backends with a native multi-key delete should override it.
    fn remove_batch(&self, keys: &[CacheKey]) -> impl Future<Output = Result<(), BackendError>> + Send {
        async move {
            for key in keys {
                self.remove(key).await?;
            }
            Ok(())
        }
    }
}

/// A distributed tier that stores nothing.
///
/// Caches built without a backend use this, which turns them into purely process-local
/// caches: every read misses and every write succeeds without storing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDistributedCache;

impl DistributedCache for NoDistributedCache {
    async fn get(&self, _key: &CacheKey) -> Result<Option<Bytes>, BackendError> {
        Ok(None)
    }

    async fn set(&self, _key: &CacheKey, _value: Bytes, _ttl: Duration) -> Result<(), BackendError> {
        Ok(())
    }

    async fn remove(&self, _key: &CacheKey) -> Result<(), BackendError> {
        Ok(())
    }

    async fn remove_batch(&self, _keys: &[CacheKey]) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_distributed_cache_never_stores() {
        let backend = NoDistributedCache;
        let key = CacheKey::from("k");
        backend
            .set(&key, Bytes::from_static(b"v"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(backend.get(&key).await.unwrap(), None);
        backend.remove(&key).await.unwrap();
        backend.remove_batch(&[key]).await.unwrap();
    }
}
