// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Two processes sharing one distributed tier.
//!
//! The first cache computes and stores a value; the second finds it in the distributed
//! tier without running its producer. Invalidating a tag on either side removes the entry
//! from the shared tier. The distributed tier then goes down, and both caches keep
//! answering from memory.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stratum::{CacheEvent, EntryOptions, HybridCache, RetryOptions};
use stratum_tier::testing::{BackendOp, MockDistributedCache};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Product {
    sku: String,
    price_cents: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("catalog is unavailable")]
struct CatalogUnavailable;

#[tokio::main]
async fn main() -> stratum::Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let shared = MockDistributedCache::new();
    let build = |name| {
        HybridCache::builder()
            .name(name)
            .distributed(shared.clone())
            .retry(RetryOptions::default().max_retries(1))
            .build()
    };
    let east = build("east");
    let west = build("west");

    let options = EntryOptions::new()
        .with_expiration(Duration::from_secs(600))
        .with_local_expiration(Duration::from_secs(30))
        .with_tags(["catalog", "sku:tea-01"]);

    let product = east
        .get_or_create("product:tea-01", options.clone(), |_| async {
            Ok::<_, CatalogUnavailable>(Product {
                sku: "tea-01".into(),
                price_cents: 450,
            })
        })
        .await?;
    println!("east computed {product:?}");

    // West has never seen the key, but the distributed tier has.
    let product: Product = west
        .get_or_create("product:tea-01", options.clone(), |_| async { Err(CatalogUnavailable) })
        .await?;
    println!("west read {product:?} from the distributed tier");

    let removed = west.remove_by_tag("catalog").await?;
    println!("west invalidated {removed} entries tagged `catalog`");

    // With the distributed tier down, writes land in memory only and reads fall through.
    shared.fail_when(|_: &BackendOp| true);
    let mut events = east.subscribe();
    let durability = east
        .set(
            "product:tea-01",
            Product {
                sku: "tea-01".into(),
                price_cents: 500,
            },
            options,
        )
        .await?;
    println!("east stored the new price with durability {durability:?}");
    if let Ok(CacheEvent::DistributedWriteFailed { key, error }) = events.try_recv() {
        println!("east was notified that {key} is held locally only: {error}");
    }

    Ok(())
}
