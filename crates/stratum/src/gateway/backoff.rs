// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{cmp::min, time::Duration};

/// The factor used to determine the range of jitter applied to delays.
const JITTER_FACTOR: f64 = 0.5;

/// How the delay between retries grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Backoff {
    /// Every retry waits the base delay.
    ///
    /// **Example with `50ms` base delay:** `50ms, 50ms, 50ms, ...`
    Constant,
    /// Delays grow by the base delay with each retry.
    ///
    /// **Example with `50ms` base delay:** `50ms, 100ms, 150ms, ...`
    Linear,
    /// Delays double with each retry.
    ///
    /// **Example with `50ms` base delay:** `50ms, 100ms, 200ms, ...`
    Exponential,
}

/// Retry policy for transient distributed-tier failures.
///
/// Only failures reported as transient (including timeouts) are retried. The defaults are
/// two retries with exponential backoff from a 50 ms base delay, capped at one second,
/// with jitter.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use stratum::{Backoff, RetryOptions};
///
/// let retry = RetryOptions::default()
///     .max_retries(4)
///     .backoff(Backoff::Linear)
///     .base_delay(Duration::from_millis(20))
///     .use_jitter(false);
/// assert_eq!(retry.get_max_retries(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    max_retries: u32,
    backoff: Backoff,
    base_delay: Duration,
    max_delay: Option<Duration>,
    use_jitter: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Backoff::Exponential,
            base_delay: Duration::from_millis(50),
            max_delay: Some(Duration::from_secs(1)),
            use_jitter: true,
        }
    }
}

impl RetryOptions {
    /// Disables retries.
    #[must_use]
    pub fn none() -> Self {
        Self::default().max_retries(0)
    }

    /// Sets how many times a failed call is retried.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets how the delay grows between retries.
    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Caps every delay, or removes the cap when `None`.
    #[must_use]
    pub fn max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Randomizes each delay by up to a quarter in either direction.
    #[must_use]
    pub fn use_jitter(mut self, use_jitter: bool) -> Self {
        self.use_jitter = use_jitter;
        self
    }

    /// Returns how many times a failed call is retried.
    #[must_use]
    pub fn get_max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the delays to wait before each retry.
    pub(crate) fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        let options = *self;
        (0..self.max_retries).map(move |attempt| options.delay(attempt, fastrand::f64()))
    }

    fn delay(&self, attempt: u32, random: f64) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }

        let delay = match self.backoff {
            Backoff::Constant => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(attempt.saturating_add(1)),
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2_u32.saturating_pow(attempt)),
        };
        let delay = if self.use_jitter { apply_jitter(delay, random) } else { delay };
        self.max_delay.map_or(delay, |max| min(delay, max))
    }
}

/// Adds a symmetric, uniform jitter around the given delay.
///
/// With `JITTER_FACTOR = 0.5`, the result lies in `[0.75*delay, 1.25*delay]`.
fn apply_jitter(delay: Duration, random: f64) -> Duration {
    let secs = delay.as_secs_f64();
    let offset = secs * JITTER_FACTOR / 2.0;
    let jittered = (secs * JITTER_FACTOR).mul_add(random, secs - offset);
    Duration::try_from_secs_f64(jittered.max(0.0)).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(backoff: Backoff) -> RetryOptions {
        RetryOptions::default()
            .backoff(backoff)
            .base_delay(Duration::from_millis(100))
            .max_delay(None)
            .use_jitter(false)
    }

    #[test]
    fn defaults() {
        let retry = RetryOptions::default();
        assert_eq!(retry.get_max_retries(), 2);
        assert_eq!(retry.delays().count(), 2);
        assert_eq!(RetryOptions::none().delays().count(), 0);
    }

    #[test]
    fn constant_backoff() {
        let retry = fixed(Backoff::Constant);
        assert_eq!(retry.delay(0, 0.5), Duration::from_millis(100));
        assert_eq!(retry.delay(5, 0.5), Duration::from_millis(100));
    }

    #[test]
    fn linear_backoff() {
        let retry = fixed(Backoff::Linear);
        assert_eq!(retry.delay(0, 0.5), Duration::from_millis(100));
        assert_eq!(retry.delay(2, 0.5), Duration::from_millis(300));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let retry = fixed(Backoff::Exponential);
        assert_eq!(retry.delay(0, 0.5), Duration::from_millis(100));
        assert_eq!(retry.delay(3, 0.5), Duration::from_millis(800));

        let capped = retry.max_delay(Some(Duration::from_millis(250)));
        assert_eq!(capped.delay(3, 0.5), Duration::from_millis(250));
        assert_eq!(capped.delay(40, 0.5), Duration::from_millis(250));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let retry = fixed(Backoff::Constant).use_jitter(true);
        assert_eq!(retry.delay(0, 0.0), Duration::from_millis(75));
        assert_eq!(retry.delay(0, 1.0), Duration::from_millis(125));
        assert_eq!(retry.delay(0, 0.5), Duration::from_millis(100));
    }

    #[test]
    fn zero_base_delay_never_waits() {
        let retry = fixed(Backoff::Exponential).base_delay(Duration::ZERO).use_jitter(true);
        assert_eq!(retry.delay(3, 0.9), Duration::ZERO);
    }
}
