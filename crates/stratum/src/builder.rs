// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Construction of [`HybridCache`] instances.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

#[cfg(any(feature = "metrics", test))]
use opentelemetry::metrics::{Meter, MeterProvider};
use stratum_memory::MemoryStore;
use stratum_tier::{DEFAULT_MAX_KEY_LENGTH, DEFAULT_MAX_PAYLOAD_BYTES, DistributedCache, Limits, NoDistributedCache};
use tokio::{task::AbortHandle, time::MissedTickBehavior};

use crate::{
    CacheName, Codec, EntryOptions, HybridCache, RetryOptions, SerializerRegistry,
    cache::Inner,
    events::EventSender,
    gateway::{DEFAULT_TIMEOUT, DistributedGateway},
    options::{CancellationPolicy, FailurePolicy},
    tags::{DEFAULT_TAG_STRIPES, TagIndex},
    telemetry::CacheTelemetry,
};

const DEFAULT_NAME: CacheName = "stratum";

/// Builder for [`HybridCache`].
///
/// Created by [`HybridCache::builder`]. Without a call to
/// [`distributed`](Self::distributed) the cache keeps entries in process memory only.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use stratum::{EntryOptions, FailurePolicy, HybridCache, RetryOptions};
/// use stratum_tier::NoDistributedCache;
///
/// let cache = HybridCache::builder()
///     .name("profiles")
///     .distributed(NoDistributedCache)
///     .default_entry_options(
///         EntryOptions::new()
///             .with_expiration(Duration::from_secs(600))
///             .with_local_expiration(Duration::from_secs(30)),
///     )
///     .failure_policy(FailurePolicy::FailOpen)
///     .distributed_timeout(Duration::from_millis(250))
///     .retry(RetryOptions::default().max_retries(3))
///     .build();
/// assert_eq!(cache.name(), "profiles");
/// ```
#[derive(Debug)]
pub struct HybridCacheBuilder<B = NoDistributedCache> {
    backend: B,
    distributed: bool,
    settings: Settings,
}

#[derive(Debug)]
struct Settings {
    name: CacheName,
    max_key_length: usize,
    max_payload_bytes: usize,
    defaults: EntryOptions,
    compression: bool,
    report_tag_metrics: bool,
    failure_policy: FailurePolicy,
    cancellation_policy: CancellationPolicy,
    timeout: Duration,
    retry: RetryOptions,
    tag_stripes: usize,
    local_capacity_bytes: Option<u64>,
    sweep_interval: Option<Duration>,
    serializers: SerializerRegistry,
    logs: bool,
    #[cfg(any(feature = "metrics", test))]
    meter: Option<Meter>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            defaults: EntryOptions::default(),
            compression: true,
            report_tag_metrics: false,
            failure_policy: FailurePolicy::default(),
            cancellation_policy: CancellationPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryOptions::default(),
            tag_stripes: DEFAULT_TAG_STRIPES,
            local_capacity_bytes: None,
            sweep_interval: None,
            serializers: SerializerRegistry::default(),
            logs: true,
            #[cfg(any(feature = "metrics", test))]
            meter: None,
        }
    }
}

impl HybridCacheBuilder {
    pub(crate) fn new() -> Self {
        Self {
            backend: NoDistributedCache,
            distributed: false,
            settings: Settings::default(),
        }
    }
}

impl<B> HybridCacheBuilder<B> {
    /// Uses `backend` as the distributed tier.
    #[must_use]
    pub fn distributed<D>(self, backend: D) -> HybridCacheBuilder<D>
    where
        D: DistributedCache,
    {
        HybridCacheBuilder {
            backend,
            distributed: true,
            settings: self.settings,
        }
    }

    /// Sets the name reported in logs and metrics.
    #[must_use]
    pub fn name(mut self, name: CacheName) -> Self {
        self.settings.name = name;
        self
    }

    /// Sets the largest serialized value that is stored, in bytes.
    #[must_use]
    pub fn max_payload_bytes(mut self, max: usize) -> Self {
        self.settings.max_payload_bytes = max;
        self
    }

    /// Sets the longest accepted key, in characters.
    #[must_use]
    pub fn max_key_length(mut self, max: usize) -> Self {
        self.settings.max_key_length = max;
        self
    }

    /// Sets the options applied to entries whose own options leave a value unset.
    #[must_use]
    pub fn default_entry_options(mut self, options: EntryOptions) -> Self {
        self.settings.defaults = options;
        self
    }

    /// Stops compressing payloads sent to the distributed tier.
    #[must_use]
    pub fn disable_compression(mut self) -> Self {
        self.settings.compression = false;
        self
    }

    /// Adds the invalidated tag as a metric attribute and as a field of the `cache.event`
    /// log record.
    ///
    /// Tags can have high cardinality, so this is off by default.
    #[must_use]
    pub fn report_tag_metrics(mut self, enabled: bool) -> Self {
        self.settings.report_tag_metrics = enabled;
        self
    }

    /// Sets how distributed-tier failures are handled.
    #[must_use]
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.settings.failure_policy = policy;
        self
    }

    /// Sets what coalesced waiters do when the computation they joined is cancelled.
    #[must_use]
    pub fn cancellation_policy(mut self, policy: CancellationPolicy) -> Self {
        self.settings.cancellation_policy = policy;
        self
    }

    /// Limits how long a single distributed-tier call may take.
    #[must_use]
    pub fn distributed_timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = timeout;
        self
    }

    /// Sets the retry policy for transient distributed-tier failures.
    #[must_use]
    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.settings.retry = retry;
        self
    }

    /// Sets the number of lock stripes in the tag index. Zero is treated as one.
    #[must_use]
    pub fn tag_stripes(mut self, stripes: usize) -> Self {
        self.settings.tag_stripes = stripes;
        self
    }

    /// Bounds the local tier by the combined size of keys and payloads.
    #[must_use]
    pub fn local_capacity_bytes(mut self, bytes: u64) -> Self {
        self.settings.local_capacity_bytes = Some(bytes);
        self
    }

    /// Purges expired local entries on this interval.
    ///
    /// The sweep runs on the tokio runtime the cache is built on. Without a runtime, or with
    /// a zero interval, expired entries are only purged when read.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.settings.sweep_interval = Some(interval).filter(|interval| !interval.is_zero());
        self
    }

    /// Uses `codec` for values of type `T` instead of JSON.
    #[must_use]
    pub fn serializer<T, C>(mut self, codec: C) -> Self
    where
        T: 'static,
        C: Codec<T>,
    {
        self.settings.serializers.register::<T, C>(codec);
        self
    }

    /// Enables or disables the `cache.event` log records. Enabled by default.
    #[must_use]
    pub fn logs(mut self, enabled: bool) -> Self {
        self.settings.logs = enabled;
        self
    }

    /// Reports metrics through `provider`.
    #[cfg(any(feature = "metrics", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
    #[must_use]
    pub fn meter_provider(mut self, provider: &dyn MeterProvider) -> Self {
        self.settings.meter = Some(crate::telemetry::metrics::create_meter(provider));
        self
    }

    /// Builds the cache.
    #[must_use]
    pub fn build(self) -> HybridCache<B>
    where
        B: DistributedCache + 'static,
    {
        let Self {
            backend,
            distributed,
            settings,
        } = self;

        let mut local = MemoryStore::builder().name(settings.name);
        if let Some(bytes) = settings.local_capacity_bytes {
            local = local.max_capacity_bytes(bytes);
        }

        let telemetry = CacheTelemetry::new(settings.name, settings.logs, settings.report_tag_metrics);
        #[cfg(any(feature = "metrics", test))]
        let telemetry = match &settings.meter {
            Some(meter) => telemetry.with_meter(meter),
            None => telemetry,
        };

        let sweep_interval = settings.sweep_interval;
        let inner = Arc::new_cyclic(|weak| Inner {
            telemetry,
            local: local.build(),
            gateway: DistributedGateway::new(backend, settings.timeout, settings.retry),
            distributed,
            tags: TagIndex::new(settings.tag_stripes),
            flights: coalesce::Coalescer::new(),
            serializers: settings.serializers,
            limits: Limits::new(settings.max_key_length, settings.max_payload_bytes),
            defaults: settings.defaults,
            compression: settings.compression,
            failure_policy: settings.failure_policy,
            cancellation_policy: settings.cancellation_policy,
            events: EventSender::default(),
            sweeper: sweep_interval.and_then(|interval| spawn_sweeper(Weak::clone(weak), interval)),
        });

        HybridCache { inner }
    }
}

fn spawn_sweeper<B>(cache: Weak<Inner<B>>, interval: Duration) -> Option<AbortHandle>
where
    B: DistributedCache + 'static,
{
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::debug!("no tokio runtime available, expired local entries are purged on read only");
        return None;
    };

    let task = runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = cache.upgrade() else {
                break;
            };
            inner.sweep();
        }
    });
    Some(task.abort_handle())
}
