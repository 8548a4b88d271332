// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache keys, tags and the limits they are validated against.

use std::{borrow::Borrow, fmt, ops::Deref, sync::Arc};

use crate::error::ValidationError;

/// Default upper bound on a key's length, in characters.
pub const DEFAULT_MAX_KEY_LENGTH: usize = 1024;

/// Default upper bound on a serialized payload, in bytes (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Maximum length of a single tag, in bytes.
pub const MAX_TAG_BYTES: usize = u16::MAX as usize;

/// Maximum number of tags on a single entry.
pub const MAX_TAGS: usize = u16::MAX as usize;

/// An opaque string identifying a cache entry.
///
/// Keys are cheap to clone. They are not validated on construction; the cache validates
/// them against its configured [`Limits`] before performing any I/O.
///
/// # Examples
///
/// ```
/// use stratum_tier::CacheKey;
///
/// let key = CacheKey::from("user:42");
/// assert_eq!(key.as_str(), "user:42");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Creates a key from any string-like value.
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the key's length in characters.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }
}

impl Deref for CacheKey {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&String> for CacheKey {
    fn from(value: &String) -> Self {
        Self::new(value.as_str())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A label grouping entries for bulk invalidation.
///
/// The tag `*` is reserved: it cannot be attached to an entry and, when passed to a
/// tag invalidation, addresses every entry.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(Arc<str>);

impl Tag {
    /// The reserved tag that addresses every entry.
    pub const WILDCARD: &'static str = "*";

    /// Creates a tag from any string-like value.
    pub fn new(tag: impl Into<Arc<str>>) -> Self {
        Self(tag.into())
    }

    /// Returns the wildcard tag.
    #[must_use]
    pub fn wildcard() -> Self {
        Self::new(Self::WILDCARD)
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this is the reserved wildcard tag.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        &*self.0 == Self::WILDCARD
    }
}

impl Deref for Tag {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<str> for Tag {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable, sorted and de-duplicated set of tags.
///
/// # Examples
///
/// ```
/// use stratum_tier::TagSet;
///
/// let tags: TagSet = ["b", "a", "b"].into_iter().collect();
/// assert_eq!(tags.len(), 2);
/// assert!(tags.contains("a"));
/// ```
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet(Arc<[Tag]>);

impl TagSet {
    /// Returns an empty set.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the number of tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the set has no tags.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` when the set contains `tag`.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.0.binary_search_by(|probe| probe.as_str().cmp(tag)).is_ok()
    }

    /// Iterates the tags in sorted order.
    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.0.iter()
    }

    /// Returns the tags as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Tag] {
        &self.0
    }
}

impl<T> FromIterator<T> for TagSet
where
    T: Into<Tag>,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut tags: Vec<Tag> = iter.into_iter().map(Into::into).collect();
        tags.sort_unstable();
        tags.dedup();
        Self(tags.into())
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Debug for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.iter()).finish()
    }
}

/// Size limits applied before any cache I/O.
///
/// # Examples
///
/// ```
/// use stratum_tier::{CacheKey, Limits, ValidationError};
///
/// let limits = Limits::new(4, 16);
/// assert!(limits.validate_key(&CacheKey::from("abcd")).is_ok());
/// assert_eq!(
///     limits.validate_key(&CacheKey::from("abcde")),
///     Err(ValidationError::KeyTooLong { length: 5, max: 4 })
/// );
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    max_key_length: usize,
    max_payload_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_KEY_LENGTH, DEFAULT_MAX_PAYLOAD_BYTES)
    }
}

impl Limits {
    /// Creates limits with the given key length (characters) and payload size (bytes).
    #[must_use]
    pub fn new(max_key_length: usize, max_payload_bytes: usize) -> Self {
        Self {
            max_key_length,
            max_payload_bytes,
        }
    }

    /// Returns the maximum key length, in characters.
    #[must_use]
    pub fn max_key_length(&self) -> usize {
        self.max_key_length
    }

    /// Returns the maximum payload size, in bytes.
    #[must_use]
    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Validates a key, its tags and, when known, the payload size.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered.
    pub fn validate<'a>(
        &self,
        key: &CacheKey,
        tags: impl IntoIterator<Item = &'a Tag>,
        payload_size_estimate: Option<usize>,
    ) -> Result<(), ValidationError> {
        self.validate_key(key)?;
        self.validate_tags(tags)?;
        if let Some(size) = payload_size_estimate {
            self.validate_payload(size)?;
        }
        Ok(())
    }

    /// Validates a key against the length limit.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyKey`] or [`ValidationError::KeyTooLong`].
    pub fn validate_key(&self, key: &CacheKey) -> Result<(), ValidationError> {
        if key.is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        // Byte length bounds character length, so the count is only needed near the limit.
        if key.len() > self.max_key_length {
            let length = key.char_len();
            if length > self.max_key_length {
                return Err(ValidationError::KeyTooLong {
                    length,
                    max: self.max_key_length,
                });
            }
        }
        Ok(())
    }

    /// Validates tags that are about to be attached to an entry.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyTag`], [`ValidationError::ReservedTag`],
    /// [`ValidationError::TagTooLong`] or [`ValidationError::TooManyTags`].
    pub fn validate_tags<'a>(&self, tags: impl IntoIterator<Item = &'a Tag>) -> Result<(), ValidationError> {
        let mut count = 0;
        for tag in tags {
            if tag.is_empty() {
                return Err(ValidationError::EmptyTag);
            }
            if tag.is_wildcard() {
                return Err(ValidationError::ReservedTag(tag.clone()));
            }
            if tag.len() > MAX_TAG_BYTES {
                return Err(ValidationError::TagTooLong {
                    length: tag.len(),
                    max: MAX_TAG_BYTES,
                });
            }
            count += 1;
        }
        if count > MAX_TAGS {
            return Err(ValidationError::TooManyTags { count, max: MAX_TAGS });
        }
        Ok(())
    }

    /// Validates a serialized payload size.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::PayloadTooLarge`].
    pub fn validate_payload(&self, size: usize) -> Result<(), ValidationError> {
        if size > self.max_payload_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size,
                max: self.max_payload_bytes,
            });
        }
        Ok(())
    }
}
