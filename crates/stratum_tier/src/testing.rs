// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An in-memory distributed backend for tests.
//!
//! [`MockDistributedCache`] stores values in process, honours TTLs against the tokio clock,
//! records every call it receives, and can be told to fail or stall specific calls.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{BackendError, BackendErrorKind, CacheKey, DistributedCache};

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendOp {
    /// `get` was called for the key.
    Get(CacheKey),
    /// `set` was called.
    Set {
        /// The key written.
        key: CacheKey,
        /// Length of the stored bytes.
        len: usize,
        /// Requested time to live.
        ttl: Duration,
    },
    /// `remove` was called for the key.
    Remove(CacheKey),
    /// `remove_batch` was called with the keys.
    RemoveBatch(Vec<CacheKey>),
}

impl BackendOp {
    /// Returns `true` for calls that read or write a single key equal to `key`.
    #[must_use]
    pub fn targets(&self, key: &str) -> bool {
        match self {
            Self::Get(k) | Self::Remove(k) | Self::Set { key: k, .. } => k.as_str() == key,
            Self::RemoveBatch(keys) => keys.iter().any(|k| k.as_str() == key),
        }
    }
}

type FailPredicate = Box<dyn Fn(&BackendOp) -> bool + Send + Sync>;

struct Failure {
    kind: BackendErrorKind,
    predicate: FailPredicate,
}

#[derive(Default)]
struct State {
    data: HashMap<CacheKey, (Bytes, Instant)>,
    operations: Vec<BackendOp>,
    failure: Option<Failure>,
    latency: Option<Duration>,
}

/// A configurable in-memory [`DistributedCache`].
///
/// Clones share state, so a test can hand one clone to the cache and keep another to
/// inspect what happened.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bytes::Bytes;
/// use stratum_tier::{CacheKey, DistributedCache, testing::{BackendOp, MockDistributedCache}};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let backend = MockDistributedCache::new();
/// let key = CacheKey::from("k");
///
/// backend.fail_when(|op| matches!(op, BackendOp::Get(_)));
/// assert!(backend.get(&key).await.is_err());
///
/// backend.clear_failures();
/// backend.set(&key, Bytes::from_static(b"v"), Duration::from_secs(5)).await.unwrap();
/// assert_eq!(backend.get(&key).await.unwrap(), Some(Bytes::from_static(b"v")));
/// assert_eq!(backend.operations().len(), 3);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MockDistributedCache {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MockDistributedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockDistributedCache")
            .field("entries", &state.data.len())
            .field("operations", &state.operations.len())
            .field("failing", &state.failure.is_some())
            .field("latency", &state.latency)
            .finish()
    }
}

impl MockDistributedCache {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every call matching `predicate` with a transient error.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&BackendOp) -> bool + Send + Sync + 'static,
    {
        self.fail_with(BackendErrorKind::Transient, predicate);
    }

    /// Fails every call matching `predicate` with an error of the given kind.
    pub fn fail_with<F>(&self, kind: BackendErrorKind, predicate: F)
    where
        F: Fn(&BackendOp) -> bool + Send + Sync + 'static,
    {
        self.state.lock().failure = Some(Failure {
            kind,
            predicate: Box::new(predicate),
        });
    }

    /// Lets every call succeed again.
    pub fn clear_failures(&self) {
        self.state.lock().failure = None;
    }

    /// Delays every call by `latency`, or removes the delay when `None`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Stores bytes directly, bypassing recording and failure injection.
    pub fn insert_raw(&self, key: impl Into<CacheKey>, value: Bytes, ttl: Duration) {
        self.state.lock().data.insert(key.into(), (value, Instant::now() + ttl));
    }

    /// Reads the stored bytes directly, ignoring expiry.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<Bytes> {
        self.state.lock().data.get(key).map(|(value, _)| value.clone())
    }

    /// Returns `true` if a live value is stored under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.state.lock().data.get(key).is_some_and(|(_, expires_at)| *expires_at > now)
    }

    /// Returns the number of stored values, expired ones included.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.state.lock().data.len()
    }

    /// Returns every call received so far.
    #[must_use]
    pub fn operations(&self) -> Vec<BackendOp> {
        self.state.lock().operations.clone()
    }

    /// Forgets the recorded calls.
    pub fn clear_operations(&self) {
        self.state.lock().operations.clear();
    }

    async fn begin(&self, op: BackendOp) -> Result<(), BackendError> {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        let failure = state
            .failure
            .as_ref()
            .and_then(|failure| (failure.predicate)(&op).then_some(failure.kind));
        state.operations.push(op);
        match failure {
            Some(kind) => Err(BackendError::new(kind, "injected failure")),
            None => Ok(()),
        }
    }
}

impl DistributedCache for MockDistributedCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, BackendError> {
        self.begin(BackendOp::Get(key.clone())).await?;
        let now = Instant::now();
        let mut state = self.state.lock();
        let live = state
            .data
            .get(key)
            .map(|(value, expires_at)| (*expires_at > now).then(|| value.clone()));
        if matches!(live, Some(None)) {
            state.data.remove(key);
        }
        Ok(live.flatten())
    }

    async fn set(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<(), BackendError> {
        self.begin(BackendOp::Set {
            key: key.clone(),
            len: value.len(),
            ttl,
        })
        .await?;
        self.state.lock().data.insert(key.clone(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), BackendError> {
        self.begin(BackendOp::Remove(key.clone())).await?;
        self.state.lock().data.remove(key);
        Ok(())
    }

    async fn remove_batch(&self, keys: &[CacheKey]) -> Result<(), BackendError> {
        self.begin(BackendOp::RemoveBatch(keys.to_vec())).await?;
        let mut state = self.state.lock();
        for key in keys {
            state.data.remove(key);
        }
        Ok(())
    }
}
