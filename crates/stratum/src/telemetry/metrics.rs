// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use opentelemetry::{
    InstrumentationScope,
    metrics::{Counter, Gauge, Histogram, Meter, MeterProvider},
};

const METER_NAME: &str = "stratum";
const VERSION: &str = "v0.1.0";
const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.47.0";

pub(crate) const CACHE_EVENT_COUNT_NAME: &str = "cache.event.count";
pub(crate) const CACHE_OPERATION_DURATION_NAME: &str = "cache.operation.duration";
pub(crate) const CACHE_SIZE_NAME: &str = "cache.size";

pub(crate) fn create_meter(meter_provider: &dyn MeterProvider) -> Meter {
    meter_provider.meter_with_scope(
        InstrumentationScope::builder(METER_NAME)
            .with_version(VERSION)
            .with_schema_url(SCHEMA_URL)
            .build(),
    )
}

/// The instruments one cache reports to.
#[derive(Debug, Clone)]
pub(crate) struct Instruments {
    /// Hits, misses, coalesced waits, invalidations and absorbed distributed failures.
    pub events: Counter<u64>,
    /// Time spent in public operations and in the distributed calls they make.
    pub durations: Histogram<f64>,
    /// Entries held by the local tier.
    pub local_size: Gauge<u64>,
}

impl Instruments {
    pub(crate) fn new(meter: &Meter) -> Self {
        Self {
            events: meter
                .u64_counter(CACHE_EVENT_COUNT_NAME)
                .with_description("Cache activity across the local and distributed tiers, by operation and outcome")
                .with_unit("{event}")
                .build(),
            durations: meter
                .f64_histogram(CACHE_OPERATION_DURATION_NAME)
                .with_description("Duration of cache operations, including time spent waiting on the distributed tier")
                .with_unit("s")
                .build(),
            local_size: meter
                .u64_gauge(CACHE_SIZE_NAME)
                .with_description("Entries held by the process-local tier")
                .with_unit("{entry}")
                .build(),
        }
    }
}
