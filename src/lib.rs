// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-process coalescing cache with lazy regeneration.
//!
//! This crate provides a cache whose [`get`](Cache::get) both memoizes
//! expensive values under a TTL and deduplicates concurrent computations of
//! the same key:
//! - At most one foreground computation runs per key; concurrent callers join
//!   it and share the result
//! - Hot entries are recomputed in the background past the midpoint of their
//!   TTL, so readers are not blocked on an expiry miss
//! - Entries are evicted by a sampled approximation of LRU under entry-count
//!   and approximate-byte bounds
//! - Each retrieval returns a handle whose wait can be capped per cache
//!
//! The cache is purely in-memory and process-local.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use memoflight::{Cache, Clock};
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
//! # rt.block_on(async {
//! let cache = Cache::builder::<String, String>(Clock::new())
//!     .max_size(1024)
//!     .refresh(true)
//!     .build();
//!
//! // The generator runs once; both gets observe its result.
//! let key = "user:42".to_string();
//! let first = cache.get(&key, Duration::from_secs(60), |key| async move {
//!     Ok::<_, std::io::Error>(format!("profile of {key}"))
//! });
//! let second = cache.get(&key, Duration::from_secs(60), |_| async move {
//!     Ok::<_, std::io::Error>("never computed".to_string())
//! });
//!
//! assert_eq!(first.await?, "profile of user:42");
//! assert_eq!(second.await?, "profile of user:42");
//! # Ok::<(), memoflight::Error>(())
//! # });
//! ```
//!
//! # Timing
//!
//! All expiry and refresh decisions read a [`Clock`]. Production caches use
//! [`Clock::new`]; tests can use [`Clock::new_frozen`] and
//! [`advance`](Clock::advance) to drive TTLs without sleeping.

pub mod builder;
pub mod cache;
mod clock;
mod entry;
mod error;
mod flight;

#[doc(inline)]
pub use builder::CacheBuilder;
#[doc(inline)]
pub use cache::{Cache, GetHandle};
#[doc(inline)]
pub use clock::{Clock, Timestamp};
#[doc(inline)]
pub use error::{Error, Result};
