// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A monotonic clock abstraction with a frozen mode for tests.

use std::ops::Add;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Provides the cache's view of monotonic time.
///
/// A system clock reads the OS monotonic clock. A frozen clock only moves when
/// [`advance`](Clock::advance) is called, which lets tests exercise expiry and
/// refresh timing without sleeping. Cloned clocks share state: advancing any
/// clone of a frozen clock advances all of them.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use memoflight::Clock;
///
/// let clock = Clock::new_frozen();
/// let before = clock.now();
/// clock.advance(Duration::from_secs(60));
/// assert_eq!(before + Duration::from_secs(60), clock.now());
/// ```
#[derive(Clone, Debug)]
pub struct Clock(ClockInner);

#[derive(Clone, Debug)]
enum ClockInner {
    System { origin: Instant },
    Frozen { offset: Arc<Mutex<Duration>> },
}

impl Clock {
    /// Creates a clock backed by the OS monotonic clock.
    #[must_use]
    pub fn new() -> Self {
        Self(ClockInner::System { origin: Instant::now() })
    }

    /// Creates a clock that does not move until [`advance`](Clock::advance) is called.
    #[must_use]
    pub fn new_frozen() -> Self {
        Self(ClockInner::Frozen {
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        })
    }

    /// Returns the current reading of this clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        match &self.0 {
            ClockInner::System { origin } => Timestamp(origin.elapsed()),
            ClockInner::Frozen { offset } => Timestamp(*offset.lock()),
        }
    }

    /// Moves a frozen clock forward by `duration`.
    ///
    /// # Panics
    ///
    /// Panics when called on a system clock.
    pub fn advance(&self, duration: Duration) {
        match &self.0 {
            ClockInner::System { .. } => panic!("advance is only supported on frozen clocks"),
            ClockInner::Frozen { offset } => *offset.lock() += duration,
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// A point in time on a [`Clock`], measured from the clock's origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}
