// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The two-tier cache.

use std::{fmt, sync::Arc, time::SystemTime};

use coalesce::{Abandoned, Coalescer, Registration};
use stratum_memory::MemoryStore;
use stratum_tier::{
    BackendError, CacheEntry, CacheKey, DistributedCache, Limits, NoDistributedCache, SerializationError, Tag, TagSet,
    ValidationError,
};
use tokio::{sync::broadcast, task::AbortHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    CacheEvent, Cacheable, EntryOptions, Error, HybridCacheBuilder, Result, SerializerRegistry,
    envelope,
    events::EventSender,
    gateway::DistributedGateway,
    options::{CancellationPolicy, EntryFlags, FailurePolicy, MAX_EXPIRATION, ResolvedOptions},
    tags::TagIndex,
    telemetry::{CacheActivity, CacheOperation, CacheTelemetry},
};

/// Identifies a cache instance in logs and metrics.
pub type CacheName = &'static str;

/// Where a written entry ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Stored in the local and the distributed tier.
    Distributed,
    /// Stored in the local tier only: no distributed tier is configured, distributed writes
    /// are disabled for the entry, or the distributed write failed and the cache fails open.
    LocalOnly,
}

/// A two-tier cache: a process-local memory tier in front of a shared distributed tier.
///
/// Reads are served from memory when possible, then from the distributed tier, and only
/// then computed. Concurrent misses for the same key are coalesced so that the value is
/// computed once. Entries can be tagged and invalidated by tag.
///
/// The cache is cheap to clone; clones share all state.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use stratum::{EntryOptions, HybridCache};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> stratum::Result<()> {
/// let cache = HybridCache::builder().name("users").build();
///
/// let options = EntryOptions::new()
///     .with_expiration(Duration::from_secs(60))
///     .with_tag("users");
/// let name: String = cache
///     .get_or_create("user:42", options, |_| async { Ok::<_, std::io::Error>("Ada".to_string()) })
///     .await?;
/// assert_eq!(name, "Ada");
///
/// assert_eq!(cache.remove_by_tag("users").await?, 1);
/// # Ok(())
/// # }
/// ```
pub struct HybridCache<B = NoDistributedCache> {
    pub(crate) inner: Arc<Inner<B>>,
}

impl<B> Clone for HybridCache<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B> fmt::Debug for HybridCache<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridCache")
            .field("name", &self.inner.telemetry.name())
            .field("distributed", &self.inner.distributed)
            .field("in_flight", &self.inner.flights.in_flight())
            .field("failure_policy", &self.inner.failure_policy)
            .field("cancellation_policy", &self.inner.cancellation_policy)
            .finish_non_exhaustive()
    }
}

impl HybridCache {
    /// Starts building a cache.
    #[must_use]
    pub fn builder() -> HybridCacheBuilder {
        HybridCacheBuilder::new()
    }
}

impl<B> HybridCache<B>
where
    B: DistributedCache,
{
    /// Returns the value for `key`, computing it with `producer` when neither tier has it.
    ///
    /// Concurrent calls for the same missing key share one computation: the first caller
    /// runs its producer and every other caller receives a clone of the same value or error.
    /// A produced value is written to both tiers and indexed under the tags in `options`.
    ///
    /// The producer receives a [`CancellationToken`] that is cancelled when this call is
    /// cancelled through [`get_or_create_with_cancellation`](Self::get_or_create_with_cancellation).
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] when the key or a tag is invalid. Nothing is read or written.
    /// - [`Error::Producer`] when the producer fails. Nothing is written.
    /// - [`Error::Serialization`] when the value cannot be encoded or a stored value cannot be
    ///   decoded.
    /// - [`Error::Backend`] when the distributed tier fails and the cache fails closed.
    /// - [`Error::Cancelled`] when the computation this call waited on was cancelled.
    pub async fn get_or_create<V, F, Fut, E>(&self, key: impl Into<CacheKey>, options: EntryOptions, producer: F) -> Result<V>
    where
        V: Cacheable,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.get_or_create_with_cancellation(key, options, &CancellationToken::new(), producer)
            .await
    }

    /// Like [`get_or_create`](Self::get_or_create), but stops when `cancellation` is
    /// cancelled.
    ///
    /// Cancelling a caller that runs the computation cancels its producer. Callers waiting on
    /// it then fail with [`Error::Cancelled`] or start over, depending on the configured
    /// [`CancellationPolicy`]. Cancelling a waiting caller never affects the computation.
    ///
    /// # Errors
    ///
    /// As [`get_or_create`](Self::get_or_create), plus [`Error::Cancelled`] when
    /// `cancellation` fires first.
    pub async fn get_or_create_with_cancellation<V, F, Fut, E>(
        &self,
        key: impl Into<CacheKey>,
        options: EntryOptions,
        cancellation: &CancellationToken,
        producer: F,
    ) -> Result<V>
    where
        V: Cacheable,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let started = Instant::now();
        let inner = &*self.inner;
        let key = key.into();
        let options = options.resolve(&inner.defaults);
        inner.limits.validate(&key, &options.tags, None)?;

        if let Some(entry) = inner.local_hit(&key, options.flags) {
            inner.record(CacheOperation::GetOrCreate, CacheActivity::Hit, started);
            return inner.materialize(&entry);
        }

        let owner = loop {
            match inner.flights.register(key.clone()) {
                Registration::Owner(owner) => break owner,
                Registration::Joined(waiter) => {
                    inner.record(CacheOperation::GetOrCreate, CacheActivity::Coalesced, started);
                    let outcome = tokio::select! {
                        biased;
                        () = cancellation.cancelled() => return Err(Error::Cancelled),
                        outcome = waiter.wait() => outcome,
                    };
                    match outcome {
                        Ok(Ok(entry)) => return inner.materialize(&entry),
                        Ok(Err(error)) => return Err(error),
                        Err(Abandoned) => match inner.cancellation_policy {
                            CancellationPolicy::PropagateToWaiters => return Err(Error::Cancelled),
                            CancellationPolicy::PromoteWaiter => {
                                tracing::debug!(key = %key, "computation was abandoned, retrying as a new owner");
                            }
                        },
                    }
                }
            }
        };

        let outcome = tokio::select! {
            biased;
            () = cancellation.cancelled() => Err(Error::Cancelled),
            outcome = inner.load(&key, &options, cancellation, producer) => outcome,
        };

        match &outcome {
            Err(Error::Cancelled) => {
                inner.record(CacheOperation::GetOrCreate, CacheActivity::Cancelled, started);
                match inner.cancellation_policy {
                    CancellationPolicy::PropagateToWaiters => owner.complete(outcome.clone()),
                    // Abandoning the flight sends the waiters back to registration.
                    CancellationPolicy::PromoteWaiter => drop(owner),
                }
            }
            Err(_) => {
                inner.record(CacheOperation::GetOrCreate, CacheActivity::Error, started);
                owner.complete(outcome.clone());
            }
            Ok(_) => owner.complete(outcome.clone()),
        }

        let entry = outcome?;
        inner.materialize(&entry)
    }

    /// Stores `value` under `key` in both tiers, replacing any existing entry.
    ///
    /// A `set` racing with a [`get_or_create`](Self::get_or_create) for the same key is not
    /// ordered against it: whichever write completes last wins.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] when the key, a tag or the serialized size is invalid. Nothing
    ///   is written.
    /// - [`Error::Serialization`] when the value cannot be encoded.
    /// - [`Error::Backend`] when the distributed write fails and the cache fails closed.
    pub async fn set<V>(&self, key: impl Into<CacheKey>, value: V, options: EntryOptions) -> Result<Durability>
    where
        V: Cacheable,
    {
        let started = Instant::now();
        let inner = &*self.inner;
        let key = key.into();
        let options = options.resolve(&inner.defaults);
        inner.limits.validate(&key, &options.tags, None)?;

        let payload = inner.serializers.encode(&value)?;
        inner.limits.validate_payload(payload.len())?;

        let entry = inner.entry(key, payload, options.tags.clone(), &options).with_value(value);
        let durability = inner.write_through(Arc::new(entry), &options).await?;
        inner.record(CacheOperation::Set, CacheActivity::Inserted, started);
        Ok(durability)
    }

    /// Removes `key` from both tiers and from the tag index.
    ///
    /// Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] when the key is invalid.
    /// - [`Error::Backend`] when the distributed remove fails and the cache fails closed.
    pub async fn remove(&self, key: impl Into<CacheKey>) -> Result<()> {
        let started = Instant::now();
        let inner = &*self.inner;
        let key = key.into();
        inner.limits.validate_key(&key)?;

        inner.local.remove(&key);
        inner.tags.remove_key(&key);
        inner.remove_distributed(std::slice::from_ref(&key)).await?;

        inner.record(CacheOperation::Remove, CacheActivity::Invalidated, started);
        inner.record_size();
        Ok(())
    }

    /// Removes every entry tagged with `tag` from both tiers and returns how many keys were
    /// removed.
    ///
    /// The wildcard tag [`Tag::WILDCARD`] removes every entry known to this process. Each
    /// distributed removal is best-effort: a key that cannot be removed does not stop the
    /// others.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] when `tag` is empty.
    /// - [`Error::Backend`] when a distributed removal fails and the cache fails closed.
    pub async fn remove_by_tag(&self, tag: impl Into<Tag>) -> Result<usize> {
        let started = Instant::now();
        let inner = &*self.inner;
        let tag = tag.into();
        if tag.is_empty() {
            return Err(ValidationError::EmptyTag.into());
        }

        let keys = inner.invalidate_tag(&tag);
        inner.remove_distributed(&keys).await?;

        inner
            .telemetry
            .record_tagged(CacheOperation::RemoveByTag, CacheActivity::Invalidated, Some(started.elapsed()), &tag);
        inner.record_size();
        Ok(keys.len())
    }

    /// Removes every entry carrying any of `tags` and returns how many distinct keys were
    /// removed.
    ///
    /// # Errors
    ///
    /// As [`remove_by_tag`](Self::remove_by_tag).
    pub async fn remove_by_tags<T>(&self, tags: impl IntoIterator<Item = T>) -> Result<usize>
    where
        T: Into<Tag>,
    {
        let started = Instant::now();
        let inner = &*self.inner;
        let tags: TagSet = tags.into_iter().collect();
        if tags.iter().any(|tag| tag.is_empty()) {
            return Err(ValidationError::EmptyTag.into());
        }

        let mut keys: Vec<CacheKey> = tags.iter().flat_map(|tag| inner.invalidate_tag(tag)).collect();
        keys.sort_unstable();
        keys.dedup();
        inner.remove_distributed(&keys).await?;

        let elapsed = started.elapsed();
        for tag in &tags {
            inner
                .telemetry
                .record_tagged(CacheOperation::RemoveByTag, CacheActivity::Invalidated, Some(elapsed), tag);
        }
        inner.record_size();
        Ok(keys.len())
    }

    /// Returns a receiver for degraded-mode events, such as distributed failures absorbed
    /// under [`FailurePolicy::FailOpen`].
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the keys currently indexed under `tag` in this process.
    #[must_use]
    pub fn keys_for_tag(&self, tag: &str) -> Vec<CacheKey> {
        self.inner.tags.keys_for_tag(tag)
    }

    /// Returns the tags indexed for `key` in this process.
    #[must_use]
    pub fn tags_for_key(&self, key: &str) -> TagSet {
        self.inner.tags.tags_for_key(&CacheKey::from(key))
    }

    /// Returns the number of tags currently in use.
    #[must_use]
    pub fn tag_count(&self) -> usize {
        self.inner.tags.tag_count()
    }
}

impl<B> HybridCache<B> {
    /// Returns the cache name.
    #[must_use]
    pub fn name(&self) -> CacheName {
        self.inner.telemetry.name()
    }

    /// Returns the local tier.
    #[must_use]
    pub fn local(&self) -> &MemoryStore {
        &self.inner.local
    }

    /// Returns the distributed backend.
    #[must_use]
    pub fn distributed(&self) -> &B {
        self.inner.gateway.backend()
    }

    /// Returns the number of entries in the local tier.
    #[must_use]
    pub fn local_len(&self) -> u64 {
        self.inner.local.len()
    }

    /// Returns the number of keys currently being computed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.flights.in_flight()
    }

    /// Returns the number of callers waiting on the computation for `key`, if one is running.
    #[must_use]
    pub fn waiters(&self, key: &str) -> Option<usize> {
        self.inner.flights.waiters(&CacheKey::from(key))
    }
}

type Flight = Result<Arc<CacheEntry>>;

pub(crate) struct Inner<B> {
    pub(crate) telemetry: CacheTelemetry,
    pub(crate) local: MemoryStore,
    pub(crate) gateway: DistributedGateway<B>,
    pub(crate) distributed: bool,
    pub(crate) tags: TagIndex,
    pub(crate) flights: Coalescer<CacheKey, Flight>,
    pub(crate) serializers: SerializerRegistry,
    pub(crate) limits: Limits,
    pub(crate) defaults: EntryOptions,
    pub(crate) compression: bool,
    pub(crate) failure_policy: FailurePolicy,
    pub(crate) cancellation_policy: CancellationPolicy,
    pub(crate) events: EventSender,
    pub(crate) sweeper: Option<AbortHandle>,
}

impl<B> Drop for Inner<B> {
    fn drop(&mut self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.abort();
        }
    }
}

impl<B> Inner<B> {
    pub(crate) fn sweep(&self) {
        let purged = self.local.sweep();
        if purged > 0 {
            tracing::debug!(cache.name = self.telemetry.name(), purged, "purged expired local entries");
        }
        self.record_size();
    }

    fn record(&self, operation: CacheOperation, activity: CacheActivity, started: Instant) {
        self.telemetry.record(operation, activity, Some(started.elapsed()));
    }

    fn record_size(&self) {
        self.telemetry.record_size(|| self.local.len());
    }

    fn local_hit(&self, key: &CacheKey, flags: EntryFlags) -> Option<Arc<CacheEntry>> {
        if flags.disable_local_read {
            return None;
        }
        self.local.get(key)
    }

    fn materialize<V>(&self, entry: &CacheEntry) -> Result<V>
    where
        V: Cacheable,
    {
        if let Some(value) = entry.decoded::<V>() {
            return Ok(value.clone());
        }
        Ok(self.serializers.decode(entry.payload())?)
    }

    fn entry(&self, key: CacheKey, payload: bytes::Bytes, tags: TagSet, options: &ResolvedOptions) -> CacheEntry {
        let now = Instant::now();
        CacheEntry::new(key, payload, tags, now + options.expiration, now + options.local_expiration)
    }

    /// Drops the index and local entries for `tag` and returns the affected keys.
    fn invalidate_tag(&self, tag: &Tag) -> Vec<CacheKey> {
        if tag.is_wildcard() {
            let mut keys = self.tags.clear();
            keys.extend(self.local.keys());
            keys.sort_unstable();
            keys.dedup();
            self.local.clear();
            keys
        } else {
            let keys = self.tags.clear_tag(tag);
            self.local.remove_all(&keys);
            keys
        }
    }

    fn absorb(&self, operation: CacheOperation, event: CacheEvent) {
        self.telemetry.record(operation, CacheActivity::Degraded, None);
        self.events.send(event);
    }
}

impl<B> Inner<B>
where
    B: DistributedCache,
{
    /// Runs as the owner of the flight for `key`: probes both tiers, then produces.
    async fn load<V, F, Fut, E>(&self, key: &CacheKey, options: &ResolvedOptions, cancellation: &CancellationToken, producer: F) -> Flight
    where
        V: Cacheable,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let started = Instant::now();

        // Another owner may have stored the value between the fast path and registration.
        if let Some(entry) = self.local_hit(key, options.flags) {
            self.record(CacheOperation::GetOrCreate, CacheActivity::Hit, started);
            return Ok(entry);
        }

        if let Some(entry) = self.read_distributed::<V>(key, options).await? {
            self.record(CacheOperation::GetOrCreate, CacheActivity::DistributedHit, started);
            return Ok(entry);
        }

        self.record(CacheOperation::GetOrCreate, CacheActivity::Miss, started);
        self.tags.remove_key(key);

        let value = producer(cancellation.child_token()).await.map_err(Error::producer)?;
        let payload = self.serializers.encode(&value)?;
        let entry = Arc::new(self.entry(key.clone(), payload, options.tags.clone(), options).with_value(value));

        let size = entry.payload().len();
        let max = self.limits.max_payload_bytes();
        if size > max {
            tracing::warn!(
                cache.name = self.telemetry.name(),
                key = %key,
                size,
                max,
                "produced value is too large to cache, returning it uncached"
            );
            self.telemetry.record(CacheOperation::GetOrCreate, CacheActivity::Rejected, None);
            self.events.send(CacheEvent::PayloadTooLarge {
                key: key.clone(),
                size,
                max,
            });
            return Ok(entry);
        }

        self.write_through(Arc::clone(&entry), options).await?;
        self.record(CacheOperation::GetOrCreate, CacheActivity::Produced, started);
        Ok(entry)
    }

    async fn read_distributed<V>(&self, key: &CacheKey, options: &ResolvedOptions) -> Result<Option<Arc<CacheEntry>>>
    where
        V: Cacheable,
    {
        if !self.distributed || options.flags.disable_distributed_read {
            return Ok(None);
        }

        let bytes = match self.gateway.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(error) => {
                self.distributed_failed(CacheOperation::DistributedGet, &error)?;
                tracing::warn!(
                    cache.name = self.telemetry.name(),
                    key = %key,
                    %error,
                    "distributed cache read failed, treating as a miss"
                );
                self.absorb(
                    CacheOperation::DistributedGet,
                    CacheEvent::DistributedReadFailed { key: key.clone(), error },
                );
                return Ok(None);
            }
        };

        let stored = match envelope::decode(bytes, self.limits.max_payload_bytes()) {
            Ok(stored) => stored,
            Err(error) => {
                tracing::warn!(
                    cache.name = self.telemetry.name(),
                    key = %key,
                    error = %error,
                    "distributed entry is malformed, treating as a miss"
                );
                return Ok(None);
            }
        };

        // The stored deadline bounds both copies, whatever this caller's options say.
        let remaining = stored.remaining(SystemTime::now()).min(MAX_EXPIRATION);
        if remaining.is_zero() {
            tracing::debug!(
                cache.name = self.telemetry.name(),
                key = %key,
                "distributed entry has already expired, treating as a miss"
            );
            return Ok(None);
        }

        let value: V = self.serializers.decode(&stored.payload)?;
        let now = Instant::now();
        let entry = CacheEntry::new(
            key.clone(),
            stored.payload,
            stored.tags,
            now + remaining,
            now + options.local_expiration,
        );
        let entry = Arc::new(entry.with_value(value));
        if !options.flags.disable_local_write {
            self.local.put(Arc::clone(&entry));
        }
        self.tags.add_tags(key, entry.tags());
        self.record_size();
        Ok(Some(entry))
    }

    /// Writes `entry` to the local tier, the tag index and the distributed tier.
    async fn write_through(&self, entry: Arc<CacheEntry>, options: &ResolvedOptions) -> Result<Durability> {
        let flags = options.flags;
        let distributed = self.distributed && !flags.disable_distributed_write;

        // Encode before touching any tier, so a failure leaves nothing half-written.
        let wire = if distributed {
            let compress = self.compression && !flags.disable_compression;
            let expires_at = SystemTime::now() + entry.expires_at().saturating_duration_since(Instant::now());
            Some(
                envelope::encode(entry.payload(), entry.tags(), expires_at, compress)
                    .map_err(SerializationError::encode::<CacheEntry>)?,
            )
        } else {
            None
        };

        if !flags.disable_local_write {
            self.local.put(Arc::clone(&entry));
        }
        self.tags.add_tags(entry.key(), entry.tags());
        self.record_size();

        let Some(wire) = wire else {
            return Ok(Durability::LocalOnly);
        };

        match self.gateway.set(entry.key(), wire, options.expiration).await {
            Ok(()) => Ok(Durability::Distributed),
            Err(error) => {
                if self.failure_policy == FailurePolicy::FailClosed {
                    self.local.remove(entry.key());
                    self.tags.remove_key(entry.key());
                }
                self.distributed_failed(CacheOperation::DistributedSet, &error)?;
                tracing::warn!(
                    cache.name = self.telemetry.name(),
                    key = %entry.key(),
                    %error,
                    "distributed cache write failed, entry is stored locally only"
                );
                self.absorb(
                    CacheOperation::DistributedSet,
                    CacheEvent::DistributedWriteFailed {
                        key: entry.key().clone(),
                        error,
                    },
                );
                Ok(Durability::LocalOnly)
            }
        }
    }

    /// Removes `keys` from the distributed tier, one by one if the batch call fails.
    async fn remove_distributed(&self, keys: &[CacheKey]) -> Result<()> {
        if !self.distributed {
            return Ok(());
        }

        let (failed, error) = match keys {
            [] => return Ok(()),
            [key] => match self.gateway.remove(key).await {
                Ok(()) => return Ok(()),
                Err(error) => (vec![key.clone()], error),
            },
            _ => match self.gateway.remove_batch(keys).await {
                Ok(()) => return Ok(()),
                Err(batch_error) => {
                    tracing::debug!(
                        cache.name = self.telemetry.name(),
                        keys = keys.len(),
                        error = %batch_error,
                        "batch removal failed, removing keys individually"
                    );
                    let mut failed = Vec::new();
                    let mut last_error = batch_error;
                    for key in keys {
                        if let Err(error) = self.gateway.remove(key).await {
                            failed.push(key.clone());
                            last_error = error;
                        }
                    }
                    if failed.is_empty() {
                        return Ok(());
                    }
                    (failed, last_error)
                }
            },
        };

        self.distributed_failed(CacheOperation::DistributedRemove, &error)?;
        tracing::warn!(
            cache.name = self.telemetry.name(),
            keys = failed.len(),
            %error,
            "distributed cache remove failed, other processes may serve the entries until they expire"
        );
        self.absorb(CacheOperation::DistributedRemove, CacheEvent::DistributedRemoveFailed { keys: failed, error });
        Ok(())
    }

    /// Fails the operation when the cache fails closed.
    fn distributed_failed(&self, operation: CacheOperation, error: &BackendError) -> Result<()> {
        match self.failure_policy {
            FailurePolicy::FailOpen => Ok(()),
            FailurePolicy::FailClosed => {
                self.telemetry.record(operation, CacheActivity::Error, None);
                tracing::error!(cache.name = self.telemetry.name(), %error, "distributed cache operation failed");
                Err(Error::Backend(error.clone()))
            }
        }
    }
}
