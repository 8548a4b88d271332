// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A two-tier cache with stampede protection and tag-based invalidation.
//!
//! [`HybridCache`] puts a process-local memory tier (L1) in front of a shared, distributed
//! tier (L2):
//!
//! - Reads are served from L1, then from L2, and only then computed by a caller-supplied
//!   producer. A value found in L2 is promoted to L1.
//! - Concurrent misses for the same key run the producer exactly once. Every caller gets
//!   the same value, or the same error.
//! - Entries carry tags; [`HybridCache::remove_by_tag`] removes every entry with a tag from
//!   both tiers.
//! - Keys, tags and payload sizes are validated before any I/O.
//! - Every distributed call is bounded by a timeout and transient failures are retried.
//!   By default a failing L2 degrades the cache to L1 only instead of failing requests.
//!
//! The distributed tier is any [`DistributedCache`] implementation. Any [`Cacheable`] value
//! can be stored: serde types are stored as JSON unless a different [`Codec`] is registered
//! for their type, and other types are stored through their registered codec.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use serde::{Deserialize, Serialize};
//! use stratum::{EntryOptions, HybridCache};
//! use stratum_tier::testing::MockDistributedCache;
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Profile {
//!     id: u64,
//!     name: String,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> stratum::Result<()> {
//! let cache = HybridCache::builder()
//!     .name("profiles")
//!     .distributed(MockDistributedCache::new())
//!     .build();
//!
//! let options = EntryOptions::new()
//!     .with_expiration(Duration::from_secs(300))
//!     .with_local_expiration(Duration::from_secs(30))
//!     .with_tag("tenant:7");
//!
//! let profile = cache
//!     .get_or_create("profile:42", options, |_| async {
//!         Ok::<_, std::io::Error>(Profile { id: 42, name: "Ada".into() })
//!     })
//!     .await?;
//! assert_eq!(profile.name, "Ada");
//!
//! cache.remove_by_tag("tenant:7").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Failure Handling
//!
//! Under the default [`FailurePolicy::FailOpen`], a failed L2 read is treated as a miss and
//! a failed L2 write leaves the entry in L1 only. Both are logged at `warn` and published as
//! [`CacheEvent`]s through [`HybridCache::subscribe`]. [`FailurePolicy::FailClosed`] reports
//! them as [`Error::Backend`] instead.
//!
//! # Features
//!
//! - `metrics`: reports OpenTelemetry metrics through
//!   [`HybridCacheBuilder::meter_provider`].

mod builder;
mod cache;
mod envelope;
mod error;
mod events;
mod gateway;
mod options;
mod serializer;
mod tags;
mod telemetry;

#[doc(inline)]
pub use builder::HybridCacheBuilder;
#[doc(inline)]
pub use cache::{CacheName, Durability, HybridCache};
#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use events::CacheEvent;
#[doc(inline)]
pub use gateway::{Backoff, RetryOptions};
#[doc(inline)]
pub use options::{CancellationPolicy, DEFAULT_EXPIRATION, EntryFlags, EntryOptions, FailurePolicy, MAX_EXPIRATION};
#[doc(inline)]
pub use serializer::{Cacheable, Codec, JsonCodec, SerializerRegistry, Utf8Codec};
#[doc(inline)]
pub use stratum_tier::{
    BackendError, BackendErrorKind, CacheKey, DistributedCache, NoDistributedCache, SerializationError, Tag, TagSet,
    ValidationError,
};
#[doc(no_inline)]
pub use tokio_util::sync::CancellationToken;
