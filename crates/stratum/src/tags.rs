// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The reverse index from tags to the keys stored under them.

use std::hash::Hash;

use ahash::{AHashMap, AHashSet, RandomState};
use parking_lot::Mutex;
use stratum_tier::{CacheKey, Tag, TagSet};

/// Default number of lock stripes on each side of the index.
pub(crate) const DEFAULT_TAG_STRIPES: usize = 64;

type TagStripe = Mutex<AHashMap<Tag, AHashSet<CacheKey>>>;
type KeyStripe = Mutex<AHashMap<CacheKey, TagSet>>;

/// A striped, bidirectional tag index.
///
/// `by_key` holds the exact tag set of every indexed key and `by_tag` the keys carrying
/// each tag. Writers lock the key's stripe first and then one tag stripe at a time, so
/// concurrent writers never wait on each other in a cycle.
#[derive(Debug)]
pub(crate) struct TagIndex {
    hasher: RandomState,
    by_tag: Box<[TagStripe]>,
    by_key: Box<[KeyStripe]>,
}

impl Default for TagIndex {
    fn default() -> Self {
        Self::new(DEFAULT_TAG_STRIPES)
    }
}

impl TagIndex {
    pub(crate) fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            hasher: RandomState::new(),
            by_tag: (0..stripes).map(|_| Mutex::default()).collect(),
            by_key: (0..stripes).map(|_| Mutex::default()).collect(),
        }
    }

    /// Makes `tags` the exact tag set of `key`, detaching it from tags it no longer has.
    ///
    /// An empty set removes the key from the index.
    pub(crate) fn add_tags(&self, key: &CacheKey, tags: &TagSet) {
        let mut keys = self.key_stripe(key).lock();
        let previous = if tags.is_empty() {
            keys.remove(key)
        } else {
            keys.insert(key.clone(), tags.clone())
        }
        .unwrap_or_default();

        for stale in previous.iter().filter(|tag| !tags.contains(tag)) {
            self.detach(stale, key);
        }
        for tag in tags.iter().filter(|tag| !previous.contains(tag)) {
            self.tag_stripe(tag)
                .lock()
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
    }

    /// Removes `key` from the index and returns the tags it had.
    pub(crate) fn remove_key(&self, key: &CacheKey) -> TagSet {
        let mut keys = self.key_stripe(key).lock();
        let tags = keys.remove(key).unwrap_or_default();
        for tag in &tags {
            self.detach(tag, key);
        }
        tags
    }

    /// Returns the keys currently carrying `tag`.
    pub(crate) fn keys_for_tag(&self, tag: &str) -> Vec<CacheKey> {
        self.tag_stripe(tag)
            .lock()
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the tags indexed for `key`.
    pub(crate) fn tags_for_key(&self, key: &CacheKey) -> TagSet {
        self.key_stripe(key).lock().get(key).cloned().unwrap_or_default()
    }

    /// Drops `tag` and every key carrying it, returning those keys.
    ///
    /// The keys are removed from the index entirely, including their other tags.
    pub(crate) fn clear_tag(&self, tag: &str) -> Vec<CacheKey> {
        let keys: Vec<CacheKey> = self
            .tag_stripe(tag)
            .lock()
            .remove(tag)
            .map(|keys| keys.into_iter().collect())
            .unwrap_or_default();
        for key in &keys {
            self.remove_key(key);
        }
        keys
    }

    /// Empties the index and returns every key it held.
    pub(crate) fn clear(&self) -> Vec<CacheKey> {
        let mut removed = Vec::new();
        for stripe in &self.by_key {
            removed.extend(stripe.lock().drain().map(|(key, _)| key));
        }
        for stripe in &self.by_tag {
            stripe.lock().clear();
        }
        removed
    }

    /// Returns the number of distinct tags in use.
    pub(crate) fn tag_count(&self) -> usize {
        self.by_tag.iter().map(|stripe| stripe.lock().len()).sum()
    }

    #[cfg(test)]
    pub(crate) fn key_count(&self) -> usize {
        self.by_key.iter().map(|stripe| stripe.lock().len()).sum()
    }

    fn detach(&self, tag: &Tag, key: &CacheKey) {
        let mut tags = self.tag_stripe(tag).lock();
        if let Some(keys) = tags.get_mut(tag.as_str()) {
            keys.remove(key);
            if keys.is_empty() {
                tags.remove(tag.as_str());
            }
        }
    }

    fn tag_stripe(&self, tag: &str) -> &TagStripe {
        &self.by_tag[self.stripe(tag, self.by_tag.len())]
    }

    fn key_stripe(&self, key: &CacheKey) -> &KeyStripe {
        &self.by_key[self.stripe(key.as_str(), self.by_key.len())]
    }

    #[expect(clippy::cast_possible_truncation, reason = "the remainder is smaller than `stripes`")]
    fn stripe<Q: Hash + ?Sized>(&self, value: &Q, stripes: usize) -> usize {
        (self.hasher.hash_one(value) % stripes as u64) as usize
    }
}
