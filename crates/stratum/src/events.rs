// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use stratum_tier::{BackendError, CacheKey};
use tokio::sync::broadcast;

/// How many events a slow subscriber may fall behind before it starts missing them.
pub(crate) const EVENT_CAPACITY: usize = 256;

/// A degraded-mode event published by the cache.
///
/// Failures the cache absorbs under [`FailurePolicy::FailOpen`](crate::FailurePolicy::FailOpen)
/// are logged and also published here, so that applications can react to them without
/// parsing logs. Subscribe with [`HybridCache::subscribe`](crate::HybridCache::subscribe).
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CacheEvent {
    /// A distributed read failed and was treated as a miss.
    DistributedReadFailed {
        /// The key being read.
        key: CacheKey,
        /// The final error, after retries.
        error: BackendError,
    },
    /// A distributed write failed; the entry is held in the local tier only.
    DistributedWriteFailed {
        /// The key being written.
        key: CacheKey,
        /// The final error, after retries.
        error: BackendError,
    },
    /// A distributed remove failed; the keys may still be served by other processes until
    /// they expire.
    DistributedRemoveFailed {
        /// The keys that could not be removed.
        keys: Vec<CacheKey>,
        /// The final error, after retries.
        error: BackendError,
    },
    /// A produced value was too large to cache and was returned without being stored.
    PayloadTooLarge {
        /// The key the value was produced for.
        key: CacheKey,
        /// Serialized size of the value, in bytes.
        size: usize,
        /// The configured limit, in bytes.
        max: usize,
    },
}

#[derive(Debug)]
pub(crate) struct EventSender(broadcast::Sender<CacheEvent>);

impl Default for EventSender {
    fn default() -> Self {
        Self(broadcast::Sender::new(EVENT_CAPACITY))
    }
}

impl EventSender {
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.0.subscribe()
    }

    pub(crate) fn send(&self, event: CacheEvent) {
        // Sending only fails when nobody is subscribed.
        _ = self.0.send(event);
    }
}
