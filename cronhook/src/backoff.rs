//! Backoff strategies for retrying failed store operations.
//!
//! The trigger loop retries transient store failures a handful of times
//! within a tick before giving up and leaving the affected job due for the
//! next tick. The delays between those attempts come from a
//! [`BackoffStrategy`], optionally softened with a random [`Jitter`].
//!
//! All of the constructors and configuration functions are `const`, so a
//! strategy can live in a `const`:
//!
//! ```
//! # use cronhook::backoff::{BackoffStrategy, Jitter, Strategy};
//! # use chrono::TimeDelta;
//! const RETRY: BackoffStrategy<cronhook::backoff::Exponential> =
//!     BackoffStrategy::exponential(TimeDelta::milliseconds(50))
//!         .with_max(TimeDelta::milliseconds(500))
//!         .with_jitter(Jitter::Relative(0.1));
//!
//! assert!(RETRY.backoff(1) >= TimeDelta::milliseconds(45));
//! assert!(RETRY.backoff(1) <= TimeDelta::milliseconds(55));
//! ```

use chrono::TimeDelta;
use rand::Rng;

/// Type that can be used to implement a backoff strategy.
pub trait Strategy {
    /// Given a retry attempt as a number returns the [`TimeDelta`] to wait
    /// before the operation should be retried.
    fn backoff(&self, attempt: u16) -> TimeDelta;
}

/// Constant backoff strategy.
///
/// Always returns the same value no matter what the attempt is.
///
/// __Note:__ This type cannot be constructed directly, instead
/// [`BackoffStrategy::constant`] should be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constant {
    delay: TimeDelta,
}

impl Strategy for Constant {
    fn backoff(&self, _attempt: u16) -> TimeDelta {
        self.delay
    }
}

/// Exponential backoff strategy.
///
/// Doubles with each attempt starting from the base delay. It is advisable to
/// clamp the growth with [`BackoffStrategy::with_max`].
///
/// __Note:__ This type cannot be constructed directly, instead
/// [`BackoffStrategy::exponential`] should be used.
///
/// # Example
///
/// ```
/// # use cronhook::backoff::{BackoffStrategy, Strategy};
/// # use chrono::TimeDelta;
/// let strategy = BackoffStrategy::exponential(TimeDelta::milliseconds(50))
///     .with_max(TimeDelta::milliseconds(300));
///
/// assert_eq!(strategy.backoff(1), TimeDelta::milliseconds(50));
/// assert_eq!(strategy.backoff(2), TimeDelta::milliseconds(100));
/// assert_eq!(strategy.backoff(3), TimeDelta::milliseconds(200));
/// assert_eq!(strategy.backoff(4), TimeDelta::milliseconds(300));
/// assert_eq!(strategy.backoff(5), TimeDelta::milliseconds(300));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exponential {
    base: TimeDelta,
    max: Option<TimeDelta>,
}

impl Strategy for Exponential {
    fn backoff(&self, attempt: u16) -> TimeDelta {
        let doublings = u32::from(attempt.saturating_sub(1)).min(32);
        let mut milliseconds = self
            .base
            .num_milliseconds()
            .saturating_mul(1i64 << doublings);
        if let Some(max) = self.max {
            milliseconds = milliseconds.min(max.num_milliseconds());
        }
        TimeDelta::milliseconds(milliseconds)
    }
}

/// A random jitter to be applied to a given backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// A random jitter to be added to the backoff in the range
    /// `-delta <= jitter <= delta`.
    Absolute(TimeDelta),
    /// A random jitter to be added as a proportion of the current backoff.
    Relative(f64),
}

impl Jitter {
    fn apply_jitter(&self, value: TimeDelta) -> TimeDelta {
        let milliseconds = match self {
            Self::Absolute(delta) => delta.num_milliseconds(),
            Self::Relative(ratio) => (value.num_milliseconds() as f64 * ratio).round() as i64,
        };
        let jitter = rand::thread_rng().gen_range(-milliseconds..=milliseconds);
        value + TimeDelta::milliseconds(jitter)
    }
}

/// A backoff strategy optionally softened by a [`Jitter`].
pub struct BackoffStrategy<T: Strategy> {
    strategy: T,
    jitter: Option<Jitter>,
}

impl BackoffStrategy<Constant> {
    /// Creates a [`BackoffStrategy`] with a constant backoff strategy.
    pub const fn constant(delay: TimeDelta) -> Self {
        Self {
            strategy: Constant { delay },
            jitter: None,
        }
    }
}

impl BackoffStrategy<Exponential> {
    /// Creates a [`BackoffStrategy`] with an exponential backoff strategy.
    pub const fn exponential(base: TimeDelta) -> Self {
        Self {
            strategy: Exponential { base, max: None },
            jitter: None,
        }
    }

    /// Clamps the maximum value to be returned by [`Strategy::backoff`] to
    /// `max_delay`.
    pub const fn with_max(mut self, max_delay: TimeDelta) -> Self {
        self.strategy.max = Some(max_delay);
        self
    }
}

impl<T: Strategy> BackoffStrategy<T> {
    /// Applies the given jitter to every returned backoff.
    pub const fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Some(jitter);
        self
    }
}

impl<T: Strategy> Strategy for BackoffStrategy<T> {
    fn backoff(&self, attempt: u16) -> TimeDelta {
        let backoff = self.strategy.backoff(attempt);
        match self.jitter {
            Some(jitter) => jitter.apply_jitter(backoff).max(TimeDelta::zero()),
            None => backoff,
        }
    }
}
