// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-entry options and cache-wide policies.

use std::time::Duration;

use stratum_tier::{Tag, TagSet};

/// Expiration used when neither the call nor the cache defaults specify one.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(5 * 60);

/// Longest expiration an entry can have. Longer expirations, such as [`Duration::MAX`] for
/// entries that should never expire, are capped to it.
pub const MAX_EXPIRATION: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Switches that bypass individual tiers for a single operation.
///
/// Flags configured in the cache's default entry options are combined with the flags of
/// each call: a tier disabled in either place is skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[expect(clippy::struct_excessive_bools, reason = "independent switches, one per tier and direction")]
pub struct EntryFlags {
    /// Do not read from the local tier.
    pub disable_local_read: bool,
    /// Do not write to the local tier.
    pub disable_local_write: bool,
    /// Do not read from the distributed tier.
    pub disable_distributed_read: bool,
    /// Do not write to the distributed tier.
    pub disable_distributed_write: bool,
    /// Do not compress the payload sent to the distributed tier.
    pub disable_compression: bool,
}

impl EntryFlags {
    /// Returns flags with every switch that is set in either `self` or `other`.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            disable_local_read: self.disable_local_read || other.disable_local_read,
            disable_local_write: self.disable_local_write || other.disable_local_write,
            disable_distributed_read: self.disable_distributed_read || other.disable_distributed_read,
            disable_distributed_write: self.disable_distributed_write || other.disable_distributed_write,
            disable_compression: self.disable_compression || other.disable_compression,
        }
    }

    /// Flags that keep an entry in the local tier only.
    #[must_use]
    pub fn local_only() -> Self {
        Self {
            disable_distributed_read: true,
            disable_distributed_write: true,
            ..Self::default()
        }
    }
}

/// Options for a single entry.
///
/// Unset values fall back to the cache's default entry options.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use stratum::EntryOptions;
///
/// let options = EntryOptions::new()
///     .with_expiration(Duration::from_secs(30))
///     .with_local_expiration(Duration::from_secs(5))
///     .with_tag("users")
///     .with_tag("tenant:7");
/// assert_eq!(options.tags().len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryOptions {
    expiration: Option<Duration>,
    local_expiration: Option<Duration>,
    tags: TagSet,
    flags: EntryFlags,
}

impl EntryOptions {
    /// Creates options that use every default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long the entry lives in the distributed tier.
    ///
    /// Values longer than [`MAX_EXPIRATION`] are capped to it.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Sets how long the entry lives in the local tier.
    ///
    /// Values longer than the expiration are clamped to it.
    #[must_use]
    pub fn with_local_expiration(mut self, local_expiration: Duration) -> Self {
        self.local_expiration = Some(local_expiration);
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tags = self.tags.iter().cloned().chain([tag.into()]).collect();
        self
    }

    /// Replaces the tags.
    #[must_use]
    pub fn with_tags<T>(mut self, tags: impl IntoIterator<Item = T>) -> Self
    where
        T: Into<Tag>,
    {
        self.tags = tags.into_iter().collect();
        self
    }

    /// Sets the tier switches.
    #[must_use]
    pub fn with_flags(mut self, flags: EntryFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Returns the configured expiration, if any.
    #[must_use]
    pub fn expiration(&self) -> Option<Duration> {
        self.expiration
    }

    /// Returns the configured local expiration, if any.
    #[must_use]
    pub fn local_expiration(&self) -> Option<Duration> {
        self.local_expiration
    }

    /// Returns the tags.
    #[must_use]
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Returns the tier switches.
    #[must_use]
    pub fn flags(&self) -> EntryFlags {
        self.flags
    }

    /// Fills unset values from `defaults`.
    pub(crate) fn resolve(self, defaults: &Self) -> ResolvedOptions {
        let expiration = self
            .expiration
            .or(defaults.expiration)
            .unwrap_or(DEFAULT_EXPIRATION)
            .min(MAX_EXPIRATION);
        let local_expiration = self
            .local_expiration
            .or(defaults.local_expiration)
            .unwrap_or(expiration)
            .min(expiration);
        ResolvedOptions {
            expiration,
            local_expiration,
            tags: self.tags,
            flags: defaults.flags.union(self.flags),
        }
    }
}

/// Entry options with every default applied.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedOptions {
    pub expiration: Duration,
    pub local_expiration: Duration,
    pub tags: TagSet,
    pub flags: EntryFlags,
}

/// What the cache does when the distributed tier fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum FailurePolicy {
    /// Treat failed reads as misses and failed writes as local-only writes. Failures are
    /// logged and published as events.
    #[default]
    FailOpen,
    /// Report failures to the caller as [`Error::Backend`](crate::Error::Backend).
    FailClosed,
}

/// What coalesced waiters do when the computation they joined is cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum CancellationPolicy {
    /// Waiters fail with [`Error::Cancelled`](crate::Error::Cancelled).
    #[default]
    PropagateToWaiters,
    /// Waiters start over; one of them becomes the new owner and runs its own producer.
    PromoteWaiter,
}
