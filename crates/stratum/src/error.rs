// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The error returned by cache operations.

use std::sync::Arc;

use stratum_tier::{BackendError, SerializationError, SharedSource, ValidationError};

/// A specialized `Result` for cache operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a cache operation failed.
///
/// The error is cheap to clone: when several callers are coalesced onto one computation,
/// each of them receives a clone of the same error.
///
/// Distributed-tier failures are only reported as [`Error::Backend`] when the cache is
/// configured with [`FailurePolicy::FailClosed`](crate::FailurePolicy::FailClosed). Under
/// the default fail-open policy they are logged and published as
/// [`CacheEvent`](crate::CacheEvent)s instead.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The key, a tag or the payload can never be stored. Nothing was read or written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A value could not be encoded or decoded.
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// The value producer failed. No entry was written.
    #[error("value producer failed: {0}")]
    Producer(#[source] SharedSource),

    /// The distributed tier failed and the cache is configured to fail closed.
    #[error("distributed cache operation failed")]
    Backend(#[source] BackendError),

    /// The operation, or the computation it was waiting on, was cancelled.
    #[error("cache operation was cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn producer<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Producer(Arc::new(error))
    }

    /// Returns the producer's own error if this is a [`Error::Producer`] of type `E`.
    ///
    /// # Examples
    ///
    /// ```
    /// use stratum::HybridCache;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let cache = HybridCache::builder().build();
    /// let error = cache
    ///     .get_or_create::<u32, _, _, _>("key", Default::default(), |_| async {
    ///         Err(std::io::Error::other("database offline"))
    ///     })
    ///     .await
    ///     .unwrap_err();
    ///
    /// let source = error.producer_source::<std::io::Error>().unwrap();
    /// assert_eq!(source.to_string(), "database offline");
    /// # }
    /// ```
    #[must_use]
    pub fn producer_source<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Self::Producer(source) => source.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Returns `true` for [`Error::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` for [`Error::Validation`].
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
