// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for `MemoryStore`.

use std::time::Duration;

use bytes::Bytes;
use stratum_memory::MemoryStore;
use stratum_tier::{CacheEntry, CacheKey, TagSet};
use tokio::time::Instant;

fn entry(key: &str, local: Duration, absolute: Duration) -> CacheEntry {
    let now = Instant::now();
    CacheEntry::new(
        CacheKey::from(key),
        Bytes::copy_from_slice(key.as_bytes()),
        ["t"].into_iter().collect::<TagSet>(),
        now + absolute,
        now + local,
    )
}

#[test]
fn get_returns_none_for_missing_key() {
    let store = MemoryStore::new();
    assert!(store.get(&CacheKey::from("missing")).is_none());
    assert!(store.is_empty());
}

#[test]
fn put_overwrites_existing_entry() {
    let store = MemoryStore::new();
    let key = CacheKey::from("k");
    store.put(entry("k", Duration::from_secs(5), Duration::from_secs(5)));
    store.put(
        CacheEntry::new(
            key.clone(),
            Bytes::from_static(b"second"),
            TagSet::empty(),
            Instant::now() + Duration::from_secs(5),
            Instant::now() + Duration::from_secs(5),
        )
        .with_value(2_u8),
    );

    let current = store.get(&key).expect("entry should exist");
    assert_eq!(current.payload().as_ref(), b"second");
    assert_eq!(current.decoded::<u8>(), Some(&2));
    assert_eq!(store.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn entry_is_gone_at_local_deadline() {
    let store = MemoryStore::new();
    let key = CacheKey::from("k");
    store.put(entry("k", Duration::from_secs(5), Duration::from_secs(30)));

    tokio::time::advance(Duration::from_millis(4_999)).await;
    assert!(store.get(&key).is_some());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(store.get(&key).is_none());
    assert_eq!(store.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn already_expired_entry_is_not_stored() {
    let store = MemoryStore::new();
    store.put(entry("k", Duration::from_secs(5), Duration::from_secs(5)));
    store.put(entry("k", Duration::ZERO, Duration::from_secs(5)));

    assert!(store.get(&CacheKey::from("k")).is_none());
    assert!(store.is_empty());
}

#[test]
fn remove_is_idempotent() {
    let store = MemoryStore::new();
    let key = CacheKey::from("k");
    store.put(entry("k", Duration::from_secs(5), Duration::from_secs(5)));

    store.remove(&key);
    store.remove(&key);
    assert!(store.get(&key).is_none());
}

#[test]
fn remove_all_and_clear() {
    let store = MemoryStore::new();
    for key in ["a", "b", "c"] {
        store.put(entry(key, Duration::from_secs(5), Duration::from_secs(5)));
    }

    let mut keys = store.keys();
    keys.sort();
    assert_eq!(keys, [CacheKey::from("a"), CacheKey::from("b"), CacheKey::from("c")]);

    store.remove_all(&[CacheKey::from("a"), CacheKey::from("b")]);
    assert!(store.get(&CacheKey::from("a")).is_none());
    assert!(store.get(&CacheKey::from("c")).is_some());

    store.clear();
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn sweep_purges_only_expired_entries() {
    let store = MemoryStore::new();
    store.put(entry("short", Duration::from_secs(1), Duration::from_secs(60)));
    store.put(entry("long", Duration::from_secs(60), Duration::from_secs(60)));

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(store.sweep(), 1);
    assert_eq!(store.len(), 1);
    assert!(store.get(&CacheKey::from("long")).is_some());
}

#[test]
fn weighted_size_tracks_key_and_payload_bytes() {
    let store = MemoryStore::with_capacity_bytes(1024);
    store.put(entry("abcd", Duration::from_secs(5), Duration::from_secs(5)));
    // Four key bytes plus a four byte payload.
    assert_eq!(store.weighted_size(), 8);
}
