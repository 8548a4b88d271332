// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Core data model for the stratum two-tier cache.
//!
//! This crate defines the vocabulary shared by every tier:
//!
//! - [`CacheKey`], [`Tag`] and [`TagSet`] identify and group entries.
//! - [`Limits`] validates keys, tags and payload sizes before any I/O happens.
//! - [`CacheEntry`] is a serialized value with its tags and its two expiration deadlines.
//! - [`DistributedCache`] is the capability an out-of-process store implements to act as
//!   the shared second tier.
//! - [`ValidationError`], [`SerializationError`] and [`BackendError`] describe how
//!   an operation can fail.
//!
//! # Implementing a Backend
//!
//! A backend only moves bytes. Timeouts, retries, serialization and fail-open handling are
//! applied by the `stratum` crate on top of it. See [`DistributedCache`] for an example.
//!
//! # Testing
//!
//! Enable the `test-util` feature for [`testing::MockDistributedCache`], an in-memory backend
//! with failure injection, artificial latency and call recording.

mod backend;
mod entry;
pub mod error;
mod key;
#[cfg(any(feature = "test-util", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod testing;

#[doc(inline)]
pub use backend::{DistributedCache, NoDistributedCache};
#[doc(inline)]
pub use entry::CacheEntry;
#[doc(inline)]
pub use error::{BackendError, BackendErrorKind, SerializationDirection, SerializationError, SharedSource, ValidationError};
#[doc(inline)]
pub use key::{CacheKey, DEFAULT_MAX_KEY_LENGTH, DEFAULT_MAX_PAYLOAD_BYTES, Limits, MAX_TAG_BYTES, MAX_TAGS, Tag, TagSet};
