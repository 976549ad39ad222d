// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for configuring a cache before construction.

use std::hash::Hash;
use std::marker::PhantomData;
use std::time::Duration;

use crate::cache::{Cache, Config, Sizer};
use crate::clock::Clock;

/// Builder for a [`Cache`].
///
/// Created by calling [`Cache::builder`]. All options default to off: no
/// capacity bounds, no background refresh, no handle timeout.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use memoflight::{Cache, Clock};
///
/// let cache = Cache::builder::<String, String>(Clock::new())
///     .max_size(1024)
///     .refresh(true)
///     .get_timeout(Duration::from_secs(5))
///     .build();
/// # drop(cache);
/// ```
pub struct CacheBuilder<K, V> {
    max_size: usize,
    max_storage: u64,
    refresh: bool,
    extend_on_use: bool,
    get_timeout: Option<Duration>,
    recover: bool,
    sizer: Option<Sizer<V>>,
    clock: Clock,
    _phantom: PhantomData<fn(K)>,
}

impl<K, V> std::fmt::Debug for CacheBuilder<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("max_size", &self.max_size)
            .field("max_storage", &self.max_storage)
            .field("refresh", &self.refresh)
            .field("extend_on_use", &self.extend_on_use)
            .field("get_timeout", &self.get_timeout)
            .field("recover", &self.recover)
            .field("sizer", &self.sizer.as_ref().map(|_| "Fn"))
            .field("clock", &self.clock)
            .finish()
    }
}

impl<K, V> CacheBuilder<K, V> {
    pub(crate) fn new(clock: Clock) -> Self {
        Self {
            max_size: 0,
            max_storage: 0,
            refresh: false,
            extend_on_use: false,
            get_timeout: None,
            recover: false,
            sizer: None,
            clock,
            _phantom: PhantomData,
        }
    }

    /// Sets the upper bound on the number of entries.
    ///
    /// When an insertion would exceed the bound, entries are evicted using a
    /// sampled approximation of least-recently-used order. `0` (the default)
    /// disables entry-count eviction.
    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sets the upper bound on the summed sizer estimates, in bytes.
    ///
    /// Requires a [`sizer`](Self::sizer) to have any effect; without one every
    /// value weighs zero. `0` (the default) disables storage-based eviction
    /// and sizer calls entirely.
    #[must_use]
    pub fn max_storage(mut self, max_storage: u64) -> Self {
        self.max_storage = max_storage;
        self
    }

    /// Enables mid-TTL background refresh.
    ///
    /// A get that resolves past the midpoint of an entry's TTL returns the
    /// cached value immediately and recomputes it in the background, so hot
    /// entries are renewed before readers ever block on an expiry miss.
    #[must_use]
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Measures expiry from the last resolution instead of the last
    /// publication, keeping frequently read entries alive.
    #[must_use]
    pub fn extend_on_use(mut self, extend_on_use: bool) -> Self {
        self.extend_on_use = extend_on_use;
        self
    }

    /// Caps how long a retrieval handle waits for its result.
    ///
    /// A handle that hits the cap resolves to [`Error::TimedOut`]; the
    /// in-flight computation is not cancelled and later callers may observe
    /// its result. Unset by default: handles wait unconditionally.
    ///
    /// [`Error::TimedOut`]: crate::Error::TimedOut
    #[must_use]
    pub fn get_timeout(mut self, get_timeout: Duration) -> Self {
        self.get_timeout = Some(get_timeout);
        self
    }

    /// Converts generator panics into the opaque "Unknown Error" instead of
    /// surfacing the panic payload.
    #[must_use]
    pub fn recover(mut self, recover: bool) -> Self {
        self.recover = recover;
        self
    }

    /// Sets the sizer used to estimate the byte cost of stored values.
    ///
    /// Called once per successful publication while `max_storage` is set. The
    /// estimate is treated as opaque; a sizer that panics charges zero for
    /// that value.
    ///
    /// # Examples
    ///
    /// ```
    /// use memoflight::{Cache, Clock};
    ///
    /// let cache = Cache::builder::<String, Vec<u8>>(Clock::new())
    ///     .max_storage(64 * 1024 * 1024)
    ///     .sizer(|val| val.len() as u64)
    ///     .build();
    /// # drop(cache);
    /// ```
    #[must_use]
    pub fn sizer(mut self, sizer: impl Fn(&V) -> u64 + Send + Sync + 'static) -> Self {
        self.sizer = Some(std::sync::Arc::new(sizer));
        self
    }

    /// Returns a reference to the builder's clock.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Builds the cache with the configured settings.
    #[must_use]
    pub fn build(self) -> Cache<K, V> {
        Cache::new(
            Config {
                max_size: self.max_size,
                max_storage: self.max_storage,
                refresh: self.refresh,
                extend_on_use: self.extend_on_use,
                get_timeout: self.get_timeout,
                recover: self.recover,
                sizer: self.sizer,
            },
            self.clock,
        )
    }
}
