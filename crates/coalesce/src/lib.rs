// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Coalesces concurrent misses for the same key onto a single in-flight computation.
//!
//! [`Coalescer`] keeps a table of in-flight computations keyed by `K`. The first caller to
//! [`register`](Coalescer::register) a key becomes the *owner* and receives an [`Ownership`]
//! handle; every caller that registers the same key while the owner is still computing
//! *joins* the flight and receives a [`Waiter`]. When the owner calls
//! [`Ownership::complete`], all waiters observe a clone of the same outcome.
//!
//! The outcome type `T` is usually a `Result`, so a failure is shared exactly like a success.
//!
//! # Example
//!
//! ```
//! use coalesce::{Coalescer, Registration};
//!
//! # async fn example() {
//! let flights: Coalescer<&str, Result<u32, String>> = Coalescer::new();
//!
//! match flights.register("user:123") {
//!     Registration::Owner(owner) => {
//!         let outcome = Ok(42);
//!         owner.complete(outcome);
//!     }
//!     Registration::Joined(waiter) => {
//!         let _shared = waiter.wait().await;
//!     }
//! }
//! # }
//! ```
//!
//! # Cancellation and Panic Safety
//!
//! - The flight lives exactly as long as its owner. When [`Ownership`] is dropped without
//!   completing (the owning task was cancelled or panicked), the flight is removed and every
//!   waiter resolves to [`Abandoned`]. Whether a waiter then retries as a new owner is the
//!   caller's decision.
//! - Dropping a [`Waiter`] only releases that waiter; the owner and the other waiters are
//!   unaffected.
//! - A flight is never reused: once it completes or is abandoned, the next registration for
//!   the key starts a new one.

use std::{
    fmt::{self, Debug},
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use ahash::RandomState;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::watch;

type FlightTable<K, T> = Arc<DashMap<K, Arc<Flight<T>>, RandomState>>;

/// A table of in-flight computations with duplicate suppression.
pub struct Coalescer<K, T> {
    flights: FlightTable<K, T>,
}

struct Flight<T> {
    outcome: watch::Receiver<Option<T>>,
    waiters: AtomicUsize,
}

impl<K, T> Debug for Coalescer<K, T>
where
    K: Hash + Eq,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coalescer")
            .field("in_flight", &self.flights.len())
            .finish()
    }
}

impl<K, T> Default for Coalescer<K, T>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self {
            flights: Arc::new(DashMap::with_hasher(RandomState::new())),
        }
    }
}

/// The role handed to a caller by [`Coalescer::register`].
#[derive(Debug)]
pub enum Registration<K, T>
where
    K: Hash + Eq,
{
    /// No computation was in flight; the caller now owns one and must complete it.
    Owner(Ownership<K, T>),
    /// A computation was already in flight; the caller waits for its outcome.
    Joined(Waiter<T>),
}

impl<K, T> Coalescer<K, T>
where
    K: Hash + Eq + Clone,
{
    /// Creates an empty coalescer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `key`.
    ///
    /// Returns [`Registration::Owner`] when no computation is in flight for the key and
    /// [`Registration::Joined`] otherwise. The lookup and the insertion happen under the
    /// same shard lock, so two concurrent callers can never both become owners.
    pub fn register(&self, key: K) -> Registration<K, T> {
        match self.flights.entry(key) {
            Entry::Occupied(occupied) => {
                let flight = Arc::clone(occupied.get());
                flight.waiters.fetch_add(1, Ordering::AcqRel);
                Registration::Joined(Waiter {
                    outcome: flight.outcome.clone(),
                    flight,
                })
            }
            Entry::Vacant(vacant) => {
                let (sender, outcome) = watch::channel(None);
                let flight = Arc::new(Flight {
                    outcome,
                    waiters: AtomicUsize::new(0),
                });
                let key = vacant.key().clone();
                vacant.insert(Arc::clone(&flight));
                Registration::Owner(Ownership {
                    key,
                    flight,
                    sender,
                    flights: Arc::clone(&self.flights),
                    released: false,
                })
            }
        }
    }

    /// Runs `func` as the owner of `key`, or waits for the current owner.
    ///
    /// This is the convenience form of [`register`](Self::register) for callers that do not
    /// need to act between registration and completion.
    ///
    /// # Errors
    ///
    /// Returns [`Abandoned`] when this caller joined a flight whose owner was dropped before
    /// completing it.
    pub async fn execute<F, Fut>(&self, key: K, func: F) -> Result<T, Abandoned>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        T: Clone,
    {
        match self.register(key) {
            Registration::Owner(owner) => {
                let outcome = func().await;
                owner.complete(outcome.clone());
                Ok(outcome)
            }
            Registration::Joined(waiter) => waiter.wait().await,
        }
    }

    /// Returns the number of computations currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Returns the number of waiters joined to the flight for `key`, if one is in flight.
    #[must_use]
    pub fn waiters(&self, key: &K) -> Option<usize> {
        self.flights
            .get(key)
            .map(|flight| flight.waiters.load(Ordering::Acquire))
    }
}

/// Ownership of an in-flight computation.
///
/// Call [`complete`](Self::complete) to publish the outcome. Dropping the handle without
/// completing abandons the flight.
pub struct Ownership<K, T>
where
    K: Hash + Eq,
{
    key: K,
    flight: Arc<Flight<T>>,
    sender: watch::Sender<Option<T>>,
    flights: FlightTable<K, T>,
    released: bool,
}

impl<K, T> Debug for Ownership<K, T>
where
    K: Hash + Eq + Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ownership")
            .field("key", &self.key)
            .field("waiters", &self.waiters())
            .finish_non_exhaustive()
    }
}

impl<K, T> Ownership<K, T>
where
    K: Hash + Eq,
{
    /// Returns the key this flight computes.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns the number of waiters currently joined to this flight.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.flight.waiters.load(Ordering::Acquire)
    }

    /// Publishes `outcome` to every waiter and retires the flight.
    ///
    /// The flight is removed from the table before the outcome is published, so a caller
    /// that registers afterwards starts a fresh flight instead of joining a finished one.
    pub fn complete(mut self, outcome: T) {
        self.release();
        self.sender.send_replace(Some(outcome));
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let flight = &self.flight;
        self.flights
            .remove_if(&self.key, |_, current| Arc::ptr_eq(current, flight));
    }
}

impl<K, T> Drop for Ownership<K, T>
where
    K: Hash + Eq,
{
    fn drop(&mut self) {
        // The sender is dropped right after this, which resolves waiters to `Abandoned`.
        self.release();
    }
}

/// A caller joined to another caller's in-flight computation.
pub struct Waiter<T> {
    outcome: watch::Receiver<Option<T>>,
    flight: Arc<Flight<T>>,
}

impl<T> Debug for Waiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter").finish_non_exhaustive()
    }
}

impl<T> Waiter<T>
where
    T: Clone,
{
    /// Waits for the owner's outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Abandoned`] if the owner was dropped before completing.
    pub async fn wait(mut self) -> Result<T, Abandoned> {
        match self.outcome.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.as_ref().cloned().ok_or(Abandoned),
            Err(_) => Err(Abandoned),
        }
    }
}

impl<T> Drop for Waiter<T> {
    fn drop(&mut self) {
        self.flight.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The owner of a flight went away without publishing an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abandoned;

impl fmt::Display for Abandoned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the owning computation was abandoned before completing")
    }
}

impl std::error::Error for Abandoned {}
