// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! The process-local tier of the stratum cache, backed by moka.
//!
//! [`MemoryStore`] holds [`CacheEntry`](stratum_tier::CacheEntry) values until their local
//! deadline. Configure it with [`MemoryStoreBuilder`].
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use stratum_memory::MemoryStoreBuilder;
//! use stratum_tier::{CacheEntry, CacheKey, TagSet};
//! use tokio::time::Instant;
//!
//! let store = MemoryStoreBuilder::new().max_capacity_bytes(1 << 20).build();
//! let now = Instant::now();
//! store.put(CacheEntry::new(
//!     CacheKey::from("k"),
//!     Bytes::from_static(b"v"),
//!     TagSet::empty(),
//!     now + Duration::from_secs(30),
//!     now + Duration::from_secs(5),
//! ));
//! assert_eq!(store.get(&CacheKey::from("k")).unwrap().payload().as_ref(), b"v");
//! ```
//!
//! # Expiration
//!
//! - Reads check the local deadline against `tokio::time::Instant`, so paused-clock tests
//!   observe expiry deterministically.
//! - [`MemoryStore::sweep`] purges expired entries eagerly.
//! - Capacity is measured in bytes of key plus payload.

mod builder;
mod store;

#[doc(inline)]
pub use builder::MemoryStoreBuilder;
#[doc(inline)]
pub use store::MemoryStore;
