// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured logs and optional OpenTelemetry metrics for cache operations.
//!
//! Every recorded activity is emitted as a `tracing` event named `cache.event` when logging
//! is enabled. With the `metrics` feature and a meter configured, activities also feed the
//! `cache.event.count` counter and the `cache.operation.duration` histogram, and the local
//! tier's entry count is reported through the `cache.size` gauge.

use std::time::Duration;

#[cfg(any(feature = "metrics", test))]
use opentelemetry::{KeyValue, metrics::Meter};
use stratum_tier::Tag;
use tracing::Level;

use crate::CacheName;

pub(crate) mod attributes;
#[cfg(any(feature = "metrics", test))]
pub(crate) mod metrics;
#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheOperation {
    GetOrCreate,
    Set,
    Remove,
    RemoveByTag,
    DistributedGet,
    DistributedSet,
    DistributedRemove,
}

impl CacheOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetOrCreate => "cache.get_or_create",
            Self::Set => "cache.set",
            Self::Remove => "cache.remove",
            Self::RemoveByTag => "cache.remove_by_tag",
            Self::DistributedGet => "cache.distributed.get",
            Self::DistributedSet => "cache.distributed.set",
            Self::DistributedRemove => "cache.distributed.remove",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheActivity {
    /// Served from the local tier.
    Hit,
    /// Served from the distributed tier and promoted locally.
    DistributedHit,
    Miss,
    /// Joined another caller's in-flight computation.
    Coalesced,
    /// The producer ran and its value was stored.
    Produced,
    Inserted,
    Invalidated,
    /// A distributed failure was absorbed.
    Degraded,
    Cancelled,
    /// A value was too large to store.
    Rejected,
    Error,
}

impl CacheActivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache.hit",
            Self::DistributedHit => "cache.distributed_hit",
            Self::Miss => "cache.miss",
            Self::Coalesced => "cache.coalesced",
            Self::Produced => "cache.produced",
            Self::Inserted => "cache.inserted",
            Self::Invalidated => "cache.invalidated",
            Self::Degraded => "cache.degraded",
            Self::Cancelled => "cache.cancelled",
            Self::Rejected => "cache.rejected",
            Self::Error => "cache.error",
        }
    }

    pub fn level(self) -> Level {
        match self {
            Self::Hit | Self::DistributedHit | Self::Miss | Self::Coalesced => Level::DEBUG,
            Self::Produced | Self::Inserted | Self::Invalidated => Level::INFO,
            Self::Degraded | Self::Cancelled | Self::Rejected => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

/// Records cache activity for one cache instance.
#[derive(Debug, Clone)]
pub(crate) struct CacheTelemetry {
    name: CacheName,
    logging_enabled: bool,
    report_tag_metrics: bool,
    #[cfg(any(feature = "metrics", test))]
    instruments: Option<metrics::Instruments>,
}

impl CacheTelemetry {
    pub(crate) fn new(name: CacheName, logging_enabled: bool, report_tag_metrics: bool) -> Self {
        Self {
            name,
            logging_enabled,
            report_tag_metrics,
            #[cfg(any(feature = "metrics", test))]
            instruments: None,
        }
    }

    #[cfg(any(feature = "metrics", test))]
    pub(crate) fn with_meter(mut self, meter: &Meter) -> Self {
        self.instruments = Some(metrics::Instruments::new(meter));
        self
    }

    pub(crate) fn name(&self) -> CacheName {
        self.name
    }

    pub(crate) fn record(&self, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>) {
        self.record_inner(operation, activity, duration, None);
    }

    /// Records an activity attributed to a tag. The tag only becomes a metric attribute and
    /// a log field when tag reporting is enabled.
    pub(crate) fn record_tagged(&self, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>, tag: &Tag) {
        self.record_inner(operation, activity, duration, Some(tag));
    }

    /// Reports the local tier's entry count. `size` is only evaluated when a meter is set.
    pub(crate) fn record_size(&self, size: impl FnOnce() -> u64) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(instruments) = &self.instruments {
            instruments
                .local_size
                .record(size(), &[KeyValue::new(attributes::CACHE_NAME, self.name)]);
        }

        #[cfg(not(any(feature = "metrics", test)))]
        drop(size);
    }

    fn record_inner(&self, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>, tag: Option<&Tag>) {
        let tag = tag.filter(|_| self.report_tag_metrics);

        #[cfg(any(feature = "metrics", test))]
        if let Some(instruments) = &self.instruments {
            let mut attrs = Vec::with_capacity(4);
            attrs.push(KeyValue::new(attributes::CACHE_NAME, self.name));
            attrs.push(KeyValue::new(attributes::CACHE_OPERATION_NAME, operation.as_str()));
            attrs.push(KeyValue::new(attributes::CACHE_ACTIVITY_NAME, activity.as_str()));
            if let Some(tag) = tag {
                attrs.push(KeyValue::new(attributes::CACHE_TAG_NAME, tag.to_string()));
            }

            instruments.events.add(1, &attrs);
            if let Some(duration) = duration {
                instruments.durations.record(duration.as_secs_f64(), &attrs);
            }
        }

        if self.logging_enabled {
            Self::emit(self.name, operation, activity, duration, tag.map(Tag::as_str));
        }
    }

    fn emit(cache_name: CacheName, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>, tag: Option<&str>) {
        let op = operation.as_str();
        let ev = activity.as_str();
        let duration_ns = duration.map(|d| d.as_nanos());

        // Field names must match the constants in attributes.rs.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(
                    cache.name = cache_name,
                    cache.operation = op,
                    cache.activity = ev,
                    cache.tag = tag,
                    cache.duration_ns = ?duration_ns,
                    "cache.event"
                )
            };
        }

        match activity.level() {
            Level::ERROR => emit_event!(error),
            Level::WARN => emit_event!(warn),
            Level::INFO => emit_event!(info),
            _ => emit_event!(debug),
        }
    }
}
