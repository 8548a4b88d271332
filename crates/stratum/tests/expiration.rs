// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for local and absolute expiration.

use std::time::Duration;

use stratum::{CacheKey, EntryOptions, HybridCache, MAX_EXPIRATION};
use stratum_tier::testing::{BackendOp, MockDistributedCache};

#[derive(Debug, thiserror::Error)]
#[error("producer must not run")]
struct NotCalled;

#[tokio::test(start_paused = true)]
async fn local_copy_expires_before_the_distributed_one() {
    let backend = MockDistributedCache::new();
    let cache = HybridCache::builder().distributed(backend.clone()).build();
    let options = EntryOptions::new()
        .with_local_expiration(Duration::from_secs(5))
        .with_expiration(Duration::from_secs(30));
    cache.set("k", 1_u32, options.clone()).await.unwrap();

    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(cache.local().get(&CacheKey::from("k")).is_none());

    backend.clear_operations();
    let value: u32 = cache
        .get_or_create("k", options.clone(), |_| async { Err::<u32, _>(NotCalled) })
        .await
        .unwrap();
    assert_eq!(value, 1);
    assert_eq!(backend.operations(), [BackendOp::Get(CacheKey::from("k"))]);

    tokio::time::advance(Duration::from_secs(25)).await;
    assert!(!backend.contains_key("k"));
    let value: u32 = cache
        .get_or_create("k", options, |_| async { Ok::<_, NotCalled>(2) })
        .await
        .unwrap();
    assert_eq!(value, 2);
}

#[tokio::test(start_paused = true)]
async fn default_options_apply_to_unset_values() {
    let backend = MockDistributedCache::new();
    let cache = HybridCache::builder()
        .distributed(backend.clone())
        .default_entry_options(
            EntryOptions::new()
                .with_expiration(Duration::from_secs(60))
                .with_local_expiration(Duration::from_secs(10)),
        )
        .build();

    cache.set("k", 1_u8, EntryOptions::new()).await.unwrap();

    assert!(matches!(
        backend.operations().as_slice(),
        [BackendOp::Set { ttl, .. }] if *ttl == Duration::from_secs(60)
    ));
    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(cache.local().get(&CacheKey::from("k")).is_some());
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(cache.local().get(&CacheKey::from("k")).is_none());
}

#[tokio::test(start_paused = true)]
async fn local_expiration_never_outlives_the_entry() {
    let cache = HybridCache::builder().build();
    let options = EntryOptions::new()
        .with_expiration(Duration::from_secs(2))
        .with_local_expiration(Duration::from_secs(60));
    cache.set("k", 1_u8, options).await.unwrap();

    tokio::time::advance(Duration::from_secs(2)).await;

    assert!(cache.local().get(&CacheKey::from("k")).is_none());
}

#[tokio::test(start_paused = true)]
async fn sweeper_purges_expired_local_entries() {
    let cache = HybridCache::builder().sweep_interval(Duration::from_secs(1)).build();
    cache
        .set("k", 1_u8, EntryOptions::new().with_expiration(Duration::from_secs(3)))
        .await
        .unwrap();
    assert_eq!(cache.local().keys(), [CacheKey::from("k")]);

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(cache.local().keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn entry_that_never_expires_is_stored() {
    let backend = MockDistributedCache::new();
    let cache = HybridCache::builder().distributed(backend.clone()).build();

    cache
        .set("k", 1_u8, EntryOptions::new().with_expiration(Duration::MAX))
        .await
        .unwrap();
    let value: u8 = cache
        .get_or_create("other", EntryOptions::new().with_expiration(Duration::MAX), |_| async {
            Ok::<_, NotCalled>(2)
        })
        .await
        .unwrap();

    assert_eq!(value, 2);
    assert!(matches!(
        backend.operations().as_slice(),
        [BackendOp::Set { ttl, .. }, BackendOp::Get(_), BackendOp::Set { .. }] if *ttl == MAX_EXPIRATION
    ));
    tokio::time::advance(Duration::from_secs(365 * 24 * 60 * 60)).await;
    assert!(cache.local().get(&CacheKey::from("k")).is_some());
}

#[tokio::test(start_paused = true)]
async fn unbounded_default_expiration_is_capped() {
    let backend = MockDistributedCache::new();
    let cache = HybridCache::builder()
        .distributed(backend.clone())
        .default_entry_options(EntryOptions::new().with_expiration(Duration::MAX))
        .build();

    cache.set("k", 1_u8, EntryOptions::new()).await.unwrap();

    assert!(matches!(
        backend.operations().as_slice(),
        [BackendOp::Set { ttl, .. }] if *ttl == MAX_EXPIRATION
    ));
}

#[tokio::test(start_paused = true)]
async fn promoted_entry_never_outlives_the_distributed_copy() {
    let backend = MockDistributedCache::new();
    let writer = HybridCache::builder().distributed(backend.clone()).build();
    let reader = HybridCache::builder().distributed(backend.clone()).build();
    writer
        .set("k", 1_u32, EntryOptions::new().with_expiration(Duration::from_secs(10)))
        .await
        .unwrap();

    // The reader asks for a much longer lifetime than the writer stored the entry with.
    let value: u32 = reader
        .get_or_create("k", EntryOptions::new().with_expiration(Duration::from_secs(600)), |_| async {
            Err::<u32, _>(NotCalled)
        })
        .await
        .unwrap();
    assert_eq!(value, 1);
    assert!(reader.local().get(&CacheKey::from("k")).is_some());

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(!backend.contains_key("k"));
    assert!(reader.local().get(&CacheKey::from("k")).is_none());

    let value: u32 = reader
        .get_or_create("k", EntryOptions::new(), |_| async { Ok::<_, NotCalled>(2) })
        .await
        .unwrap();
    assert_eq!(value, 2);
}
