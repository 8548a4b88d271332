// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The process-local tier, backed by moka.

use std::{sync::Arc, time::Duration};

use moka::{Expiry, ops::compute::Op, sync::Cache};
use stratum_tier::{CacheEntry, CacheKey};
use tokio::time::Instant;

use crate::builder::MemoryStoreBuilder;

/// A bounded, concurrent, in-process map from keys to entries.
///
/// Every entry leaves the store at its local deadline. The deadline is enforced on read
/// against the tokio clock: an entry found past its deadline is purged and reported as a
/// miss, so an expired entry is never returned. moka additionally evicts entries in the
/// background once their deadline passes, and evicts least-recently-used entries when the
/// configured byte capacity is exceeded.
///
/// All operations are synchronous and never touch the network.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bytes::Bytes;
/// use stratum_memory::MemoryStore;
/// use stratum_tier::{CacheEntry, CacheKey, TagSet};
/// use tokio::time::Instant;
///
/// let store = MemoryStore::new();
/// let now = Instant::now();
/// let key = CacheKey::from("user:1");
/// store.put(CacheEntry::new(
///     key.clone(),
///     Bytes::from_static(b"{}"),
///     TagSet::empty(),
///     now + Duration::from_secs(60),
///     now + Duration::from_secs(10),
/// ));
///
/// assert!(store.get(&key).is_some());
/// store.remove(&key);
/// assert!(store.get(&key).is_none());
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Cache<CacheKey, Arc<CacheEntry>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a store holding at most `max_bytes` of keys and payloads.
    #[must_use]
    pub fn with_capacity_bytes(max_bytes: u64) -> Self {
        Self::builder().max_capacity_bytes(max_bytes).build()
    }

    /// Creates a builder.
    #[must_use]
    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder::new()
    }

    pub(crate) fn from_builder(builder: &MemoryStoreBuilder) -> Self {
        let mut moka_builder = Cache::builder()
            .expire_after(LocalDeadline)
            .weigher(|key: &CacheKey, entry: &Arc<CacheEntry>| weight(key, entry));

        if let Some(capacity) = builder.max_capacity_bytes {
            moka_builder = moka_builder.max_capacity(capacity);
        }

        if let Some(capacity) = builder.initial_capacity {
            moka_builder = moka_builder.initial_capacity(capacity);
        }

        if let Some(name) = builder.name.as_deref() {
            moka_builder = moka_builder.name(name);
        }

        Self {
            inner: moka_builder.build(),
        }
    }

    /// Returns the live entry for `key`.
    ///
    /// An entry past its local deadline is purged and `None` is returned.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let entry = self.inner.get(key)?;
        if entry.is_locally_expired(Instant::now()) {
            self.purge(key, &entry);
            return None;
        }
        Some(entry)
    }

    /// Stores `entry`, replacing any entry under the same key.
    ///
    /// An entry whose local deadline has already passed is not stored, and any entry it
    /// would have replaced is removed.
    pub fn put(&self, entry: impl Into<Arc<CacheEntry>>) {
        let entry = entry.into();
        if entry.is_locally_expired(Instant::now()) {
            self.inner.invalidate(entry.key());
            return;
        }
        self.inner.insert(entry.key().clone(), entry);
    }

    /// Removes `key`. Removing an absent key does nothing.
    pub fn remove(&self, key: &CacheKey) {
        self.inner.invalidate(key);
    }

    /// Removes every key in `keys`.
    pub fn remove_all<'a>(&self, keys: impl IntoIterator<Item = &'a CacheKey>) {
        for key in keys {
            self.inner.invalidate(key);
        }
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks();
    }

    /// Purges every entry past its local deadline and returns how many were purged.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<_> = self
            .inner
            .iter()
            .filter(|(_, entry)| entry.is_locally_expired(now))
            .collect();
        let purged = expired.iter().filter(|(key, entry)| self.purge(key, entry)).count();
        self.inner.run_pending_tasks();
        purged
    }

    /// Returns the keys currently held, including keys of entries not yet purged.
    #[must_use]
    pub fn keys(&self) -> Vec<CacheKey> {
        self.inner.iter().map(|(key, _)| CacheKey::clone(&key)).collect()
    }

    /// Returns the number of entries held, including entries not yet purged.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }

    /// Returns `true` when the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the total weight of held entries, in bytes.
    #[must_use]
    pub fn weighted_size(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.weighted_size()
    }

    // Removes `key` only while it still maps to `entry`, so a concurrent `put` survives.
    fn purge(&self, key: &CacheKey, entry: &Arc<CacheEntry>) -> bool {
        let result = self.inner.entry_by_ref(key).and_compute_with(|current| match current {
            Some(current) if Arc::ptr_eq(current.value(), entry) => Op::Remove,
            _ => Op::Nop,
        });
        matches!(result, moka::ops::compute::CompResult::Removed(_))
    }
}

fn weight(key: &CacheKey, entry: &CacheEntry) -> u32 {
    u32::try_from(key.len() + entry.payload().len()).unwrap_or(u32::MAX)
}

struct LocalDeadline;

impl Expiry<CacheKey, Arc<CacheEntry>> for LocalDeadline {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &Arc<CacheEntry>,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.local_remaining(Instant::now()))
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &Arc<CacheEntry>,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.local_remaining(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use stratum_tier::TagSet;

    use super::*;

    fn entry(key: &str, payload: &'static [u8]) -> CacheEntry {
        let now = Instant::now();
        CacheEntry::new(
            CacheKey::from(key),
            Bytes::from_static(payload),
            TagSet::empty(),
            now + Duration::from_secs(60),
            now + Duration::from_secs(60),
        )
    }

    #[test]
    fn weight_counts_key_and_payload() {
        assert_eq!(weight(&CacheKey::from("abc"), &entry("abc", b"12345")), 8);
    }

    #[test]
    fn purge_skips_replaced_entries() {
        let store = MemoryStore::new();
        let old = Arc::new(entry("k", b"old"));
        store.put(Arc::clone(&old));
        store.put(entry("k", b"new"));

        assert!(!store.purge(&CacheKey::from("k"), &old));
        let current = store.get(&CacheKey::from("k")).unwrap();
        assert_eq!(current.payload(), &Bytes::from_static(b"new"));
    }
}
