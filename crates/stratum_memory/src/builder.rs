// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for configuring a [`MemoryStore`].

use crate::store::MemoryStore;

/// Builder for configuring a [`MemoryStore`] without exposing moka types.
///
/// # Examples
///
/// ```
/// use stratum_memory::MemoryStore;
///
/// let store = MemoryStore::builder()
///     .max_capacity_bytes(64 * 1024 * 1024)
///     .initial_capacity(1_000)
///     .name("users")
///     .build();
/// assert!(store.is_empty());
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryStoreBuilder {
    pub(crate) max_capacity_bytes: Option<u64>,
    pub(crate) initial_capacity: Option<usize>,
    pub(crate) name: Option<String>,
}

impl MemoryStoreBuilder {
    /// Creates a builder for an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds the store by the combined size of keys and payloads.
    ///
    /// When the bound is exceeded, entries are evicted using moka's `TinyLFU` policy
    /// (LRU eviction with LFU admission). If not set, the store is unbounded.
    #[must_use]
    pub fn max_capacity_bytes(mut self, max_bytes: u64) -> Self {
        self.max_capacity_bytes = Some(max_bytes);
        self
    }

    /// Sets the number of entries to pre-allocate room for.
    #[must_use]
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = Some(capacity);
        self
    }

    /// Names the store in moka's debug output.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builds the store.
    #[must_use]
    pub fn build(self) -> MemoryStore {
        MemoryStore::from_builder(&self)
    }
}
