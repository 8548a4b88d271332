// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{any::Any, fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::time::Instant;

use crate::key::{CacheKey, TagSet};

/// A serialized value with its tags and both expiration deadlines.
///
/// The local deadline bounds how long the entry may stay in the in-process tier and is
/// always clamped to the absolute deadline, which bounds its lifetime in the distributed
/// tier.
///
/// An entry may also carry the decoded value it was produced from, so that readers in the
/// same process can skip deserialization.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bytes::Bytes;
/// use stratum_tier::{CacheEntry, CacheKey, TagSet};
/// use tokio::time::Instant;
///
/// let now = Instant::now();
/// let entry = CacheEntry::new(
///     CacheKey::from("user:1"),
///     Bytes::from_static(b"{}"),
///     TagSet::empty(),
///     now + Duration::from_secs(30),
///     now + Duration::from_secs(60),
/// );
/// // The local deadline never outlives the absolute one.
/// assert_eq!(entry.local_expires_at(), entry.expires_at());
/// ```
#[derive(Clone)]
pub struct CacheEntry {
    key: CacheKey,
    payload: Bytes,
    tags: TagSet,
    expires_at: Instant,
    local_expires_at: Instant,
    value: Option<Arc<dyn Any + Send + Sync>>,
}

impl CacheEntry {
    /// Creates an entry. `local_expires_at` is clamped to `expires_at`.
    #[must_use]
    pub fn new(key: CacheKey, payload: Bytes, tags: TagSet, expires_at: Instant, local_expires_at: Instant) -> Self {
        Self {
            key,
            payload,
            tags,
            expires_at,
            local_expires_at: local_expires_at.min(expires_at),
            value: None,
        }
    }

    /// Attaches the decoded value this entry was serialized from.
    #[must_use]
    pub fn with_value<V>(mut self, value: V) -> Self
    where
        V: Send + Sync + 'static,
    {
        self.value = Some(Arc::new(value));
        self
    }

    /// Returns the key.
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns the serialized payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the tags attached to this entry.
    #[must_use]
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Returns the deadline after which the entry is gone from every tier.
    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Returns the deadline after which the entry is gone from the local tier.
    #[must_use]
    pub fn local_expires_at(&self) -> Instant {
        self.local_expires_at
    }

    /// Returns the decoded value if one is attached and it has type `V`.
    #[must_use]
    pub fn decoded<V>(&self) -> Option<&V>
    where
        V: 'static,
    {
        self.value.as_deref().and_then(|value| value.downcast_ref::<V>())
    }

    /// Returns `true` once the local deadline has passed.
    #[must_use]
    pub fn is_locally_expired(&self, now: Instant) -> bool {
        now >= self.local_expires_at
    }

    /// Returns `true` once the absolute deadline has passed.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Returns how long the entry may still live in the local tier.
    #[must_use]
    pub fn local_remaining(&self, now: Instant) -> Duration {
        self.local_expires_at.saturating_duration_since(now)
    }

    /// Returns how long the entry may still live in the distributed tier.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("payload_len", &self.payload.len())
            .field("tags", &self.tags)
            .field("expires_at", &self.expires_at)
            .field("local_expires_at", &self.local_expires_at)
            .field("decoded", &self.value.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(local: u64, absolute: u64) -> (Instant, CacheEntry) {
        let now = Instant::now();
        let entry = CacheEntry::new(
            CacheKey::from("k"),
            Bytes::from_static(b"v"),
            ["t"].into_iter().collect(),
            now + Duration::from_secs(absolute),
            now + Duration::from_secs(local),
        );
        (now, entry)
    }

    #[test]
    fn local_deadline_is_clamped() {
        let (_, entry) = entry(60, 30);
        assert_eq!(entry.local_expires_at(), entry.expires_at());
    }

    #[test]
    fn expiry_checks_use_both_deadlines() {
        let (now, entry) = entry(5, 30);
        assert!(!entry.is_locally_expired(now));
        assert!(entry.is_locally_expired(now + Duration::from_secs(5)));
        assert!(!entry.is_expired(now + Duration::from_secs(5)));
        assert!(entry.is_expired(now + Duration::from_secs(30)));
        assert_eq!(entry.local_remaining(now + Duration::from_secs(2)), Duration::from_secs(3));
        assert_eq!(entry.remaining(now + Duration::from_secs(40)), Duration::ZERO);
    }

    #[test]
    fn decoded_value_is_type_checked() {
        let (_, entry) = entry(5, 30);
        assert!(entry.decoded::<u32>().is_none());
        let entry = entry.with_value(7_u32);
        assert_eq!(entry.decoded::<u32>(), Some(&7));
        assert!(entry.decoded::<String>().is_none());
    }

    #[test]
    fn debug_omits_payload_bytes() {
        let (_, entry) = entry(5, 30);
        let rendered = format!("{entry:?}");
        assert!(rendered.contains("payload_len: 1"));
        assert!(rendered.contains("decoded: false"));
    }
}
