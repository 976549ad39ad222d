// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The cache core: coalescing get, publication, eviction, and purge.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::builder::CacheBuilder;
use crate::clock::{Clock, Timestamp};
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::flight::Flight;

/// How many entries an eviction round samples when picking a victim.
const PRUNE_SAMPLE: usize = 5;

/// How many entries each get scans for opportunistic expiry cleanup.
const PURGE_BATCH: usize = 5;

pub(crate) type Sizer<V> = Arc<dyn Fn(&V) -> u64 + Send + Sync>;

type Generator<K, V> = Arc<dyn Fn(K) -> BoxFuture<'static, Result<V>> + Send + Sync>;

type EntryRef<V> = Arc<Mutex<Entry<V>>>;

pub(crate) struct Config<V> {
    pub(crate) max_size: usize,
    pub(crate) max_storage: u64,
    pub(crate) refresh: bool,
    pub(crate) extend_on_use: bool,
    pub(crate) get_timeout: Option<Duration>,
    pub(crate) recover: bool,
    pub(crate) sizer: Option<Sizer<V>>,
}

impl<V> fmt::Debug for Config<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("max_size", &self.max_size)
            .field("max_storage", &self.max_storage)
            .field("refresh", &self.refresh)
            .field("extend_on_use", &self.extend_on_use)
            .field("get_timeout", &self.get_timeout)
            .field("recover", &self.recover)
            .finish_non_exhaustive()
    }
}

struct State<K, V> {
    data: HashMap<K, EntryRef<V>>,
    storage: u64,
}

struct CacheInner<K, V> {
    state: Mutex<State<K, V>>,
    config: Config<V>,
    clock: Clock,
}

/// An in-process coalescing cache with lazy regeneration.
///
/// [`get`](Cache::get) memoizes expensive values under a per-call TTL while
/// guaranteeing at most one concurrent computation per key: concurrent callers
/// of the same key share a single generator invocation and all receive its
/// result. Entries are evicted under entry-count and approximate-byte bounds,
/// and hot entries can be recomputed in the background before they expire.
///
/// All operations are safe to call concurrently. The generator runs outside
/// any lock.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use memoflight::{Cache, Clock};
///
/// # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
/// # rt.block_on(async {
/// let cache = Cache::builder::<String, String>(Clock::new())
///     .max_size(128)
///     .build();
///
/// let value = cache
///     .get(&"config".to_string(), Duration::from_secs(60), |key| async move {
///         Ok::<_, std::io::Error>(format!("loaded:{key}"))
///     })
///     .await?;
/// assert_eq!(value, "loaded:config");
/// # Ok::<(), memoflight::Error>(())
/// # });
/// ```
pub struct Cache<K, V> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K, V> fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache").field("config", &self.inner.config).finish_non_exhaustive()
    }
}

impl Cache<(), ()> {
    /// Creates a new cache builder.
    ///
    /// # Examples
    ///
    /// ```
    /// use memoflight::{Cache, Clock};
    ///
    /// let cache = Cache::builder::<String, i32>(Clock::new())
    ///     .max_size(1024)
    ///     .build();
    /// # drop(cache);
    /// ```
    #[must_use]
    pub fn builder<K, V>(clock: Clock) -> CacheBuilder<K, V> {
        CacheBuilder::new(clock)
    }
}

impl<K, V> Cache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(config: Config<V>, clock: Clock) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(State {
                    data: HashMap::new(),
                    storage: 0,
                }),
                config,
                clock,
            }),
        }
    }

    /// Begins retrieving the value for `key`, computing it with `generate` on
    /// a miss.
    ///
    /// If no entry exists for the key, room is made under the configured
    /// bounds, a pending entry is installed, and the generator is spawned in
    /// the background; concurrent gets for the same key join that computation
    /// instead of starting their own. The returned handle resolves once the
    /// computation settles (bounded by the configured
    /// [`get_timeout`](CacheBuilder::get_timeout)), transparently restarting
    /// the computation when the entry expired before the waiter proceeded.
    ///
    /// A get that resolves past the midpoint of the entry's TTL returns the
    /// cached value and, when refresh is enabled, recomputes it in the
    /// background with this call's generator.
    ///
    /// Results that carry an error, and results retrieved with a zero `ttl`,
    /// are delivered to waiters but never retained.
    ///
    /// Expiry and refresh conditions are evaluated when `get` is called; the
    /// handle reports the retrieval as it was resolved at that point.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use memoflight::{Cache, Clock};
    ///
    /// # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
    /// # rt.block_on(async {
    /// let cache = Cache::builder::<u32, u32>(Clock::new()).build();
    ///
    /// let value = cache.get(&7, Duration::from_secs(30), |n| async move {
    ///     Ok::<_, std::io::Error>(n * n)
    /// });
    /// assert_eq!(value.await?, 49);
    ///
    /// // The second generator is never called; the cached value wins.
    /// let value = cache.get(&7, Duration::from_secs(30), |_| async move {
    ///     Ok::<_, std::io::Error>(0)
    /// });
    /// assert_eq!(value.await?, 49);
    /// # Ok::<(), memoflight::Error>(())
    /// # });
    /// ```
    pub fn get<F, Fut, E>(&self, key: &K, ttl: Duration, generate: F) -> GetHandle<V>
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: StdError + Send + Sync + 'static,
    {
        let generate: Generator<K, V> = Arc::new(move |key: K| {
            let fut = generate(key);
            async move { fut.await.map_err(Error::from_source) }.boxed()
        });

        let (entry, flight) = self.inner.lookup_or_insert(key, ttl, &generate);

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let resolver_key = key.clone();
        tokio::spawn(async move { inner.resolve(resolver_key, ttl, generate, entry, flight, tx).await });

        self.inner.purge_scan(Some(PURGE_BATCH));

        GetHandle {
            rx,
            timeout: self.inner.config.get_timeout,
        }
    }

    /// Removes every expired entry from the cache.
    pub fn purge(&self) {
        self.inner.purge_scan(None);
    }

    /// Scans up to `count` entries and removes the expired ones among them.
    ///
    /// Every get already runs a small scan, so calling this directly is only
    /// useful to spread additional cleanup work.
    pub fn purge_count(&self, count: usize) {
        self.inner.purge_scan(Some(count));
    }

    /// Discards all entries.
    ///
    /// In-flight computations continue; their results are delivered to
    /// existing waiters and then dropped.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.data.clear();
        state.storage = 0;
    }

    /// Returns the number of entries, including expired-but-unpurged ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().data.len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().data.is_empty()
    }

    /// Returns a reference to the cache's clock.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }
}

enum Step<V> {
    Done(Result<V>),
    Retry,
}

impl<K, V> CacheInner<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// The table step of a get: reuse the live entry for `key`, or make room,
    /// install a pending entry, and start its foreground computation.
    fn lookup_or_insert(self: &Arc<Self>, key: &K, ttl: Duration, generate: &Generator<K, V>) -> (EntryRef<V>, Arc<Flight>) {
        let mut state = self.state.lock();
        if let Some(entry) = state.data.get(key) {
            let entry = Arc::clone(entry);
            let flight = entry
                .lock()
                .future
                .clone()
                .expect("entries in the table always carry a foreground latch");
            return (entry, flight);
        }

        self.prune(&mut state);

        let flight = Arc::new(Flight::new());
        let entry: EntryRef<V> = Arc::new(Mutex::new(Entry::new(ttl, Arc::clone(&flight))));
        state.data.insert(key.clone(), Arc::clone(&entry));
        drop(state);

        self.spawn_generation(key.clone(), Arc::clone(&entry), Arc::clone(generate), flight.clone());
        (entry, flight)
    }

    /// Runs the generator and publishes its outcome into `entry`.
    fn spawn_generation(self: &Arc<Self>, key: K, entry: EntryRef<V>, generate: Generator<K, V>, flight: Arc<Flight>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(generate(key.clone())).catch_unwind().await;
            let (val, err) = match outcome {
                Ok(Ok(val)) => (Some(val), None),
                Ok(Err(err)) => (None, Some(err)),
                Err(payload) => {
                    let err = if inner.config.recover {
                        Error::Unknown
                    } else {
                        Error::from_panic(payload.as_ref())
                    };
                    (None, Some(err))
                }
            };
            inner.publish(key, &entry, val, err, &flight);
        });
    }

    /// Publication: writes the computation's outcome into the entry under the
    /// cache mutex and signals the latch.
    ///
    /// Storage bookkeeping only applies while the entry is still the table's
    /// entry for `key`; publications into evicted entries keep their waiters
    /// fed but leave the accounting alone.
    fn publish(self: &Arc<Self>, key: K, entry: &EntryRef<V>, val: Option<V>, err: Option<Error>, flight: &Arc<Flight>) {
        let size = match (&val, &self.config.sizer) {
            (Some(val), Some(sizer)) if self.config.max_storage > 0 => {
                std::panic::catch_unwind(AssertUnwindSafe(|| sizer(val))).unwrap_or_else(|_| {
                    tracing::trace!("sizer panicked; charging zero for this value");
                    0
                })
            }
            _ => 0,
        };

        {
            let mut state = self.state.lock();
            let in_table = state.data.get(&key).is_some_and(|current| Arc::ptr_eq(current, entry));
            let mut item = entry.lock();

            // A failed refresh must not overwrite a good cached value.
            if err.is_none() || item.refresh.is_none() {
                item.val = val;
                item.err = err;
                if in_table {
                    state.storage = state.storage.saturating_sub(item.size) + size;
                } else {
                    tracing::trace!("publication arrived for an entry no longer in the table");
                }
                item.size = size;
            }

            // Errors and zero-ttl results are non-cacheable.
            if item.refresh.is_none() && (item.err.is_some() || item.ttl.is_zero()) && in_table {
                state.storage = state.storage.saturating_sub(item.size);
                state.data.remove(&key);
            }

            item.created = Some(self.clock.now());
            item.refresh = None;
        }

        flight.signal();
    }

    /// Waits for the entry's foreground latch and settles the get.
    ///
    /// Runs as its own task so the handle can bound its wait without
    /// affecting the cache. Expiry restarts the table step in a loop rather
    /// than recursing.
    async fn resolve(
        self: Arc<Self>,
        key: K,
        ttl: Duration,
        generate: Generator<K, V>,
        mut entry: EntryRef<V>,
        mut flight: Arc<Flight>,
        tx: oneshot::Sender<Result<V>>,
    ) {
        loop {
            flight.wait().await;

            let step = {
                let now = self.clock.now();
                let mut state = self.state.lock();
                let mut item = entry.lock();

                if item.expired(self.config.extend_on_use, now) {
                    if item.future.is_some() {
                        // Promote the refresh computation to the foreground slot;
                        // with nothing to promote the entry is dead.
                        item.future = item.refresh.take();
                        if item.future.is_none()
                            && state.data.get(&key).is_some_and(|current| Arc::ptr_eq(current, &entry))
                        {
                            state.storage = state.storage.saturating_sub(item.size);
                            state.data.remove(&key);
                        }
                    }
                    Step::Retry
                } else {
                    if item.should_refresh(self.config.refresh, now) && item.refresh.is_none() {
                        let refresh = Arc::new(Flight::new());
                        item.refresh = Some(Arc::clone(&refresh));
                        tracing::debug!("scheduling background refresh");
                        self.spawn_generation(key.clone(), Arc::clone(&entry), Arc::clone(&generate), refresh);
                    }
                    item.ttl = ttl;
                    item.last_used = Some(now);
                    let result = if let Some(err) = &item.err {
                        Err(err.clone())
                    } else if let Some(val) = &item.val {
                        Ok(val.clone())
                    } else {
                        Err(Error::Unknown)
                    };
                    Step::Done(result)
                }
            };

            match step {
                Step::Done(result) => {
                    let _ = tx.send(result);
                    return;
                }
                Step::Retry => {
                    let (next_entry, next_flight) = self.lookup_or_insert(&key, ttl, &generate);
                    entry = next_entry;
                    flight = next_flight;
                    self.purge_scan(Some(PURGE_BATCH));
                }
            }
        }
    }

    /// Evicts entries until the capacity bounds are satisfied.
    ///
    /// Each round samples a handful of entries in table order: zero-ttl and
    /// expired entries are evicted on sight, otherwise the sampled entry with
    /// the earliest resolution goes, preferring entries that never resolved.
    fn prune(&self, state: &mut State<K, V>) {
        while !state.data.is_empty()
            && ((self.config.max_size > 0 && state.data.len() >= self.config.max_size)
                || (self.config.max_storage > 0 && state.storage > self.config.max_storage))
        {
            let now = self.clock.now();
            let mut victim: Option<(K, Option<Timestamp>)> = None;
            for (key, entry) in state.data.iter().take(PRUNE_SAMPLE) {
                let item = entry.lock();
                if item.ttl.is_zero() || item.expired(self.config.extend_on_use, now) {
                    victim = Some((key.clone(), item.last_used));
                    break;
                }
                let earlier = match &victim {
                    None => true,
                    Some((_, candidate)) => match (item.last_used, *candidate) {
                        (None, Some(_)) => true,
                        (Some(mine), Some(theirs)) => mine < theirs,
                        (_, None) => false,
                    },
                };
                if earlier {
                    victim = Some((key.clone(), item.last_used));
                }
            }

            let Some((key, _)) = victim else { break };
            tracing::debug!("evicting entry to satisfy capacity bounds");
            Self::remove(state, &key);
        }
    }

    fn remove(state: &mut State<K, V>, key: &K) {
        if let Some(entry) = state.data.remove(key) {
            state.storage = state.storage.saturating_sub(entry.lock().size);
        }
    }

    /// Removes expired entries, scanning at most `limit` of them when set.
    fn purge_scan(&self, limit: Option<usize>) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let expired: Vec<K> = state
            .data
            .iter()
            .take(limit.unwrap_or(usize::MAX))
            .filter(|(_, entry)| entry.lock().expired(self.config.extend_on_use, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            Self::remove(&mut state, key);
        }
        if !expired.is_empty() {
            tracing::trace!(count = expired.len(), "purged expired entries");
        }
    }
}

/// The deferred result of a [`Cache::get`] call.
///
/// Resolving the handle waits until the cache has a settled opinion on the
/// key, or until the configured [`get_timeout`](CacheBuilder::get_timeout)
/// elapses, whichever comes first. Dropping the handle does not cancel the
/// computation. Handles can be awaited directly:
///
/// ```
/// # use std::time::Duration;
/// # use memoflight::{Cache, Clock};
/// # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
/// # rt.block_on(async {
/// # let cache = Cache::builder::<u32, u32>(Clock::new()).build();
/// let handle = cache.get(&1, Duration::from_secs(10), |n| async move {
///     Ok::<_, std::io::Error>(n + 1)
/// });
/// assert_eq!(handle.await?, 2);
/// # Ok::<(), memoflight::Error>(())
/// # });
/// ```
pub struct GetHandle<V> {
    rx: oneshot::Receiver<Result<V>>,
    timeout: Option<Duration>,
}

impl<V> GetHandle<V> {
    /// Waits for the retrieval to settle and returns its outcome.
    pub async fn resolve(self) -> Result<V> {
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.rx).await {
                Ok(delivered) => delivered.unwrap_or(Err(Error::Unknown)),
                Err(_) => Err(Error::TimedOut),
            },
            None => self.rx.await.unwrap_or(Err(Error::Unknown)),
        }
    }
}

impl<V> fmt::Debug for GetHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetHandle").field("timeout", &self.timeout).finish_non_exhaustive()
    }
}

impl<V: Send + 'static> IntoFuture for GetHandle<V> {
    type Output = Result<V>;
    type IntoFuture = BoxFuture<'static, Result<V>>;

    fn into_future(self) -> Self::IntoFuture {
        self.resolve().boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use tokio::sync::Notify;

    use super::*;

    fn stub(value: &str) -> impl Fn(String) -> std::future::Ready<std::result::Result<String, io::Error>> + Send + Sync + 'static {
        let value = value.to_owned();
        move |_key| std::future::ready(Ok(value.clone()))
    }

    fn sized_cache(max_storage: u64) -> Cache<String, String> {
        Cache::builder::<String, String>(Clock::new_frozen())
            .max_storage(max_storage)
            .sizer(|val: &String| val.len() as u64)
            .build()
    }

    fn storage_matches_entry_sizes(cache: &Cache<String, String>) -> bool {
        let state = cache.inner.state.lock();
        let total: u64 = state.data.values().map(|entry| entry.lock().size).sum();
        state.storage == total
    }

    #[tokio::test]
    async fn storage_tracks_the_sum_of_entry_sizes() {
        let cache = sized_cache(1024);
        let ttl = Duration::from_secs(100);

        for key in ["a", "b", "c"] {
            cache.get(&key.to_string(), ttl, stub("0123456789")).await.unwrap();
        }
        assert_eq!(cache.inner.state.lock().storage, 30);
        assert!(storage_matches_entry_sizes(&cache));

        cache.clock().advance(Duration::from_secs(101));
        cache.purge();
        assert_eq!(cache.inner.state.lock().storage, 0);
        assert!(storage_matches_entry_sizes(&cache));
    }

    #[tokio::test]
    async fn storage_bound_evicts_down_to_the_limit() {
        let cache = sized_cache(10);
        let ttl = Duration::from_secs(100);

        cache.get(&"a".to_string(), ttl, stub("aaaaaa")).await.unwrap();
        cache.clock().advance(Duration::from_secs(1));
        cache.get(&"b".to_string(), ttl, stub("bbbbbb")).await.unwrap();
        cache.clock().advance(Duration::from_secs(1));
        // Inserting over the bound evicts the least recently resolved entry.
        cache.get(&"c".to_string(), ttl, stub("cccccc")).await.unwrap();

        let state = cache.inner.state.lock();
        assert!(state.data.len() <= 2);
        assert!(!state.data.contains_key("a"));
        drop(state);
        assert!(storage_matches_entry_sizes(&cache));
    }

    #[tokio::test]
    async fn never_resolved_entries_are_preferred_victims() {
        let cache = Cache::builder::<String, String>(Clock::new_frozen()).max_size(2).build();
        let ttl = Duration::from_secs(100);

        // A pending entry whose generator never completes.
        let _stalled = cache.get(&"pending".to_string(), ttl, |_key: String| {
            std::future::pending::<std::result::Result<String, io::Error>>()
        });
        cache.get(&"warm".to_string(), ttl, stub("W")).await.unwrap();

        cache.get(&"next".to_string(), ttl, stub("N")).await.unwrap();

        let state = cache.inner.state.lock();
        assert!(!state.data.contains_key("pending"));
        assert!(state.data.contains_key("warm"));
        assert!(state.data.contains_key("next"));
    }

    #[tokio::test]
    async fn zero_ttl_results_are_not_retained() {
        let cache = sized_cache(1024);

        let value = cache.get(&"k".to_string(), Duration::ZERO, stub("first")).await.unwrap();
        assert_eq!(value, "first");
        assert!(cache.is_empty());
        assert_eq!(cache.inner.state.lock().storage, 0);

        let value = cache.get(&"k".to_string(), Duration::ZERO, stub("second")).await.unwrap();
        assert_eq!(value, "second");
    }

    #[tokio::test]
    async fn orphaned_publication_leaves_accounting_alone() {
        let cache = sized_cache(1024);
        let gate = Arc::new(Notify::new());

        let handle = {
            let gate = Arc::clone(&gate);
            cache.get(&"k".to_string(), Duration::from_secs(100), move |_key: String| {
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    Ok::<_, io::Error>("late".to_owned())
                }
            })
        };

        cache.clear();
        gate.notify_one();

        // The orphaned computation still feeds its waiter.
        assert_eq!(handle.resolve().await.unwrap(), "late");
        assert!(cache.is_empty());
        assert_eq!(cache.inner.state.lock().storage, 0);
    }

    #[tokio::test]
    async fn generator_panic_is_surfaced_and_not_cached() {
        let cache = Cache::builder::<String, String>(Clock::new_frozen()).build();
        let ttl = Duration::from_secs(100);

        let err = cache
            .get(&"k".to_string(), ttl, |key: String| async move {
                if key.len() < 1024 {
                    panic!("boom");
                }
                Ok::<String, io::Error>(key)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Panicked(_)));
        assert!(cache.is_empty());

        let value = cache.get(&"k".to_string(), ttl, stub("ok")).await.unwrap();
        assert_eq!(value, "ok");
    }

    #[tokio::test]
    async fn recover_swallows_panics_into_a_generic_error() {
        let cache = Cache::builder::<String, String>(Clock::new_frozen()).recover(true).build();

        let err = cache
            .get(&"k".to_string(), Duration::from_secs(100), |key: String| async move {
                if key.len() < 1024 {
                    panic!("boom");
                }
                Ok::<String, io::Error>(key)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unknown));
        assert_eq!(err.to_string(), "Unknown Error");
    }

    #[tokio::test]
    async fn sizer_panic_charges_zero() {
        let cache = Cache::builder::<String, String>(Clock::new_frozen())
            .max_storage(1024)
            .sizer(|_val: &String| panic!("unsizable"))
            .build();

        let value = cache.get(&"k".to_string(), Duration::from_secs(100), stub("v")).await.unwrap();
        assert_eq!(value, "v");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.inner.state.lock().storage, 0);
    }
}
