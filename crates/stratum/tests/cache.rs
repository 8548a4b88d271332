// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for reads, writes and removals across both tiers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stratum::{
    CacheEvent, CacheKey, Cacheable, Codec, Durability, EntryOptions, Error, HybridCache, SerializationError, Utf8Codec,
    ValidationError,
};
use stratum_tier::MAX_TAG_BYTES;
use stratum_tier::testing::{BackendOp, MockDistributedCache};

#[derive(Debug, thiserror::Error)]
#[error("producer must not run")]
struct NotCalled;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    id: u64,
    lines: Vec<String>,
}

/// A value with no serde support, cached through its own codec.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Reading {
    sensor: u16,
    millivolts: u32,
}

impl Cacheable for Reading {}

struct ReadingCodec;

impl Codec<Reading> for ReadingCodec {
    fn encode(&self, value: &Reading) -> Result<Vec<u8>, SerializationError> {
        let mut bytes = value.sensor.to_be_bytes().to_vec();
        bytes.extend_from_slice(&value.millivolts.to_be_bytes());
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Reading, SerializationError> {
        let (sensor, millivolts) = bytes.split_at_checked(2).ok_or_else(|| {
            SerializationError::decode::<Reading>(format!("expected 6 bytes, got {}", bytes.len()))
        })?;
        Ok(Reading {
            sensor: u16::from_be_bytes(sensor.try_into().map_err(SerializationError::decode::<Reading>)?),
            millivolts: u32::from_be_bytes(millivolts.try_into().map_err(SerializationError::decode::<Reading>)?),
        })
    }
}

static_assertions::assert_impl_all!(HybridCache<MockDistributedCache>: Send, Sync, Clone);

fn cache(backend: &MockDistributedCache) -> HybridCache<MockDistributedCache> {
    HybridCache::builder().distributed(backend.clone()).build()
}

#[tokio::test]
async fn distributed_hit_skips_the_producer_and_fills_the_local_tier() {
    let backend = MockDistributedCache::new();
    let order = Order {
        id: 9,
        lines: vec!["tea".into(), "scones".into()],
    };
    cache(&backend).set("order:9", order.clone(), EntryOptions::new()).await.unwrap();

    // A second process shares the distributed tier but starts with an empty local tier.
    let other = cache(&backend);
    backend.clear_operations();
    let read: Order = other
        .get_or_create("order:9", EntryOptions::new(), |_| async { Err::<Order, _>(NotCalled) })
        .await
        .unwrap();

    assert_eq!(read, order);
    assert_eq!(other.local_len(), 1);
    assert_eq!(backend.operations(), [BackendOp::Get(CacheKey::from("order:9"))]);
}

#[tokio::test]
async fn remove_is_idempotent() {
    let backend = MockDistributedCache::new();
    let cache = cache(&backend);
    cache.set("k", 1_u32, EntryOptions::new().with_tag("t")).await.unwrap();

    cache.remove("k").await.unwrap();
    cache.remove("k").await.unwrap();

    assert!(cache.local().get(&CacheKey::from("k")).is_none());
    assert!(!backend.contains_key("k"));
    assert!(cache.tags_for_key("k").is_empty());
}

#[tokio::test]
async fn key_at_the_length_limit_is_accepted() {
    let backend = MockDistributedCache::new();
    let cache = HybridCache::builder()
        .distributed(backend.clone())
        .max_key_length(8)
        .build();

    let durability = cache.set("abcdefgh", 1_u8, EntryOptions::new()).await.unwrap();
    assert_eq!(durability, Durability::Distributed);

    backend.clear_operations();
    let error = cache.set("abcdefghi", 1_u8, EntryOptions::new()).await.unwrap_err();
    assert!(matches!(
        error,
        Error::Validation(ValidationError::KeyTooLong { length: 9, max: 8 })
    ));

    let error = cache
        .get_or_create("abcdefghi", EntryOptions::new(), |_| async { Err::<u8, _>(NotCalled) })
        .await
        .unwrap_err();
    assert!(error.is_validation());

    cache.remove("abcdefghi").await.unwrap_err();
    assert!(backend.operations().is_empty());
}

#[tokio::test]
async fn empty_key_and_reserved_tag_are_rejected() {
    let backend = MockDistributedCache::new();
    let cache = cache(&backend);

    let error = cache.set("", 1_u8, EntryOptions::new()).await.unwrap_err();
    assert!(matches!(error, Error::Validation(ValidationError::EmptyKey)));

    let error = cache
        .set("k", 1_u8, EntryOptions::new().with_tag("*"))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Validation(ValidationError::ReservedTag(_))));

    let error = cache.set("k", 1_u8, EntryOptions::new().with_tag("")).await.unwrap_err();
    assert!(matches!(error, Error::Validation(ValidationError::EmptyTag)));

    assert!(backend.operations().is_empty());
    assert_eq!(cache.local_len(), 0);
}

#[tokio::test]
async fn tag_too_long_to_store_is_rejected_before_any_write() {
    let backend = MockDistributedCache::new();
    let cache = cache(&backend);

    let error = cache
        .set("k", 1_u8, EntryOptions::new().with_tag("t".repeat(MAX_TAG_BYTES + 1)))
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        Error::Validation(ValidationError::TagTooLong { max: MAX_TAG_BYTES, .. })
    ));
    assert!(backend.operations().is_empty());
    assert_eq!(cache.local_len(), 0);
}

#[tokio::test]
async fn oversized_set_is_rejected_before_any_write() {
    let backend = MockDistributedCache::new();
    let cache = HybridCache::builder()
        .distributed(backend.clone())
        .max_payload_bytes(16)
        .build();

    let error = cache.set("k", "x".repeat(64), EntryOptions::new()).await.unwrap_err();

    assert!(matches!(
        error,
        Error::Validation(ValidationError::PayloadTooLarge { max: 16, .. })
    ));
    assert!(backend.operations().is_empty());
    assert_eq!(cache.local_len(), 0);
}

#[tokio::test]
async fn oversized_produced_value_is_returned_without_being_stored() {
    let backend = MockDistributedCache::new();
    let cache = HybridCache::builder()
        .distributed(backend.clone())
        .max_payload_bytes(16)
        .build();
    let mut events = cache.subscribe();

    let value: String = cache
        .get_or_create("k", EntryOptions::new().with_tag("t"), |_| async {
            Ok::<_, NotCalled>("y".repeat(64))
        })
        .await
        .unwrap();

    assert_eq!(value.len(), 64);
    assert_eq!(cache.local_len(), 0);
    assert!(!backend.contains_key("k"));
    assert!(cache.keys_for_tag("t").is_empty());
    assert!(matches!(
        events.try_recv().unwrap(),
        CacheEvent::PayloadTooLarge { size: 66, max: 16, .. }
    ));
}

#[tokio::test]
async fn producer_error_is_returned_and_nothing_is_written() {
    let backend = MockDistributedCache::new();
    let cache = cache(&backend);

    let error = cache
        .get_or_create::<u8, _, _, _>("k", EntryOptions::new(), |_| async {
            Err(std::io::Error::other("database offline"))
        })
        .await
        .unwrap_err();

    assert_eq!(
        error.producer_source::<std::io::Error>().unwrap().to_string(),
        "database offline"
    );
    assert_eq!(cache.local_len(), 0);
    assert!(!backend.contains_key("k"));
}

#[tokio::test]
async fn local_only_cache_keeps_everything_in_memory() {
    let cache = HybridCache::builder().build();

    let durability = cache.set("k", 4_i64, EntryOptions::new().with_tag("t")).await.unwrap();
    assert_eq!(durability, Durability::LocalOnly);

    let value: i64 = cache
        .get_or_create("k", EntryOptions::new(), |_| async { Err::<i64, _>(NotCalled) })
        .await
        .unwrap();
    assert_eq!(value, 4);

    assert_eq!(cache.remove_by_tag("t").await.unwrap(), 1);
    assert_eq!(cache.local_len(), 0);
}

#[tokio::test]
async fn registered_codec_is_used_for_its_type() {
    let backend = MockDistributedCache::new();
    let writer = HybridCache::builder()
        .distributed(backend.clone())
        .disable_compression()
        .serializer::<String, _>(Utf8Codec)
        .build();
    writer.set("greeting", "hello".to_string(), EntryOptions::new()).await.unwrap();

    let raw = backend.raw("greeting").unwrap();
    assert!(raw.ends_with(b"hello"));
    assert!(!raw.ends_with(b"\"hello\""));

    let reader = HybridCache::builder()
        .distributed(backend.clone())
        .serializer::<String, _>(Utf8Codec)
        .build();
    let value: String = reader
        .get_or_create("greeting", EntryOptions::new(), |_| async { Err::<String, _>(NotCalled) })
        .await
        .unwrap();
    assert_eq!(value, "hello");
}

#[tokio::test]
async fn type_without_serde_is_cached_through_its_codec() {
    let backend = MockDistributedCache::new();
    let reading = Reading {
        sensor: 3,
        millivolts: 1_250,
    };
    let writer = HybridCache::builder()
        .distributed(backend.clone())
        .serializer::<Reading, _>(ReadingCodec)
        .build();
    writer.set("sensor:3", reading, EntryOptions::new()).await.unwrap();
    assert!(backend.raw("sensor:3").unwrap().ends_with(&[0, 3, 0, 0, 0x04, 0xe2]));

    let reader = HybridCache::builder()
        .distributed(backend.clone())
        .serializer::<Reading, _>(ReadingCodec)
        .build();
    let read: Reading = reader
        .get_or_create("sensor:3", EntryOptions::new(), |_| async { Err::<Reading, _>(NotCalled) })
        .await
        .unwrap();
    assert_eq!(read, reading);
}

#[tokio::test]
async fn type_without_serde_or_codec_cannot_be_stored() {
    let backend = MockDistributedCache::new();
    let cache = cache(&backend);

    let error = cache
        .set("sensor:3", Reading { sensor: 3, millivolts: 0 }, EntryOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(error, Error::Serialization(_)));
    assert!(backend.operations().is_empty());
    assert_eq!(cache.local_len(), 0);
}

#[tokio::test]
async fn set_replaces_the_existing_entry_and_its_tags() {
    let backend = MockDistributedCache::new();
    let cache = cache(&backend);
    cache.set("k", 1_u8, EntryOptions::new().with_tag("old")).await.unwrap();

    cache.set("k", 2_u8, EntryOptions::new().with_tag("new")).await.unwrap();

    assert!(cache.keys_for_tag("old").is_empty());
    assert_eq!(cache.keys_for_tag("new"), [CacheKey::from("k")]);
    let value: u8 = cache
        .get_or_create("k", EntryOptions::new(), |_| async { Err::<u8, _>(NotCalled) })
        .await
        .unwrap();
    assert_eq!(value, 2);
}

#[tokio::test(start_paused = true)]
async fn entry_ttl_is_sent_to_the_distributed_tier() {
    let backend = MockDistributedCache::new();
    let cache = cache(&backend);

    cache
        .set("k", 1_u8, EntryOptions::new().with_expiration(Duration::from_secs(42)))
        .await
        .unwrap();

    assert!(matches!(
        backend.operations().as_slice(),
        [BackendOp::Set { ttl, .. }] if *ttl == Duration::from_secs(42)
    ));
}
