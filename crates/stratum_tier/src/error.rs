// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types shared by every tier.

use std::{borrow::Cow, fmt, sync::Arc};

use crate::key::Tag;

/// A shareable, type-erased error source.
pub type SharedSource = Arc<dyn std::error::Error + Send + Sync>;

/// An entry was rejected before any I/O because it can never be stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ValidationError {
    /// The key is an empty string.
    #[error("cache key must not be empty")]
    EmptyKey,
    /// The key exceeds the configured maximum length.
    #[error("cache key is {length} characters long, the maximum is {max}")]
    KeyTooLong {
        /// Length of the rejected key, in characters.
        length: usize,
        /// Configured maximum.
        max: usize,
    },
    /// The serialized payload exceeds the configured maximum size.
    #[error("payload is {size} bytes, the maximum is {max}")]
    PayloadTooLarge {
        /// Size of the rejected payload, in bytes.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
    /// A tag is an empty string.
    #[error("tags must not be empty")]
    EmptyTag,
    /// A reserved tag was attached to an entry.
    #[error("tag `{0}` is reserved")]
    ReservedTag(Tag),
    /// A tag exceeds the maximum length.
    #[error("tag is {length} bytes long, the maximum is {max}")]
    TagTooLong {
        /// Length of the rejected tag, in bytes.
        length: usize,
        /// Maximum length.
        max: usize,
    },
    /// An entry carries more tags than can be stored.
    #[error("entry has {count} tags, the maximum is {max}")]
    TooManyTags {
        /// Number of tags on the rejected entry.
        count: usize,
        /// Maximum number of tags.
        max: usize,
    },
}

/// Whether a value was being encoded or decoded when serialization failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationDirection {
    /// Value to bytes.
    Encode,
    /// Bytes to value.
    Decode,
}

impl fmt::Display for SerializationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode => f.write_str("encode"),
            Self::Decode => f.write_str("decode"),
        }
    }
}

/// A value could not be converted to or from its serialized form.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to {direction} a value of type `{type_name}`")]
pub struct SerializationError {
    type_name: &'static str,
    direction: SerializationDirection,
    #[source]
    source: SharedSource,
}

impl SerializationError {
    /// Creates a serialization error for type `T`.
    pub fn new<T: ?Sized>(direction: SerializationDirection, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            direction,
            source: Arc::from(source.into()),
        }
    }

    /// Creates an encoding error for type `T`.
    pub fn encode<T: ?Sized>(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::new::<T>(SerializationDirection::Encode, source)
    }

    /// Creates a decoding error for type `T`.
    pub fn decode<T: ?Sized>(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::new::<T>(SerializationDirection::Decode, source)
    }

    /// Returns the name of the type being serialized.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns whether the failure happened while encoding or decoding.
    #[must_use]
    pub fn direction(&self) -> SerializationDirection {
        self.direction
    }
}

/// How a distributed backend call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum BackendErrorKind {
    /// A network or availability fault that may succeed on retry.
    Transient,
    /// The call did not finish within its deadline.
    Timeout,
    /// A fault that retrying will not fix.
    Permanent,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient backend failure"),
            Self::Timeout => f.write_str("backend call timed out"),
            Self::Permanent => f.write_str("permanent backend failure"),
        }
    }
}

/// A distributed backend call failed.
///
/// # Examples
///
/// ```
/// use stratum_tier::{BackendError, BackendErrorKind};
///
/// let error = BackendError::transient("connection reset");
/// assert!(error.is_transient());
/// assert_eq!(error.kind(), BackendErrorKind::Transient);
/// ```
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BackendError {
    kind: BackendErrorKind,
    message: Cow<'static, str>,
    #[source]
    source: Option<SharedSource>,
}

impl BackendError {
    /// Creates an error of the given kind.
    pub fn new(kind: BackendErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a retryable error.
    pub fn transient(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(BackendErrorKind::Transient, message)
    }

    /// Creates a non-retryable error.
    pub fn permanent(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(BackendErrorKind::Permanent, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(BackendErrorKind::Timeout, message)
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        self.source = Some(Arc::from(source.into()));
        self
    }

    /// Returns the failure kind.
    #[must_use]
    pub fn kind(&self) -> BackendErrorKind {
        self.kind
    }

    /// Returns `true` if retrying the call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, BackendErrorKind::Transient | BackendErrorKind::Timeout)
    }
}
