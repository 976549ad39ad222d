// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The per-key record held by the cache.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Timestamp;
use crate::error::Error;
use crate::flight::Flight;

/// A cached value with its lifecycle metadata.
///
/// All fields are read and mutated only while the cache mutex is held. An
/// entry is born pending (`created` unset), becomes ready when its foreground
/// computation publishes, and may carry an in-flight refresh mid-TTL.
#[derive(Debug)]
pub(crate) struct Entry<V> {
    /// Time of the most recent publication; `None` while pending.
    pub(crate) created: Option<Timestamp>,
    /// Time of the most recent get resolution; `None` if never resolved.
    pub(crate) last_used: Option<Timestamp>,
    /// Time-to-live, updated to the ttl of the most recent get.
    pub(crate) ttl: Duration,
    pub(crate) val: Option<V>,
    pub(crate) err: Option<Error>,
    /// Completion latch of the foreground computation. Entries in the table
    /// always carry one; it is taken only while tearing the entry down.
    pub(crate) future: Option<Arc<Flight>>,
    /// Completion latch of an in-flight background refresh, if any.
    pub(crate) refresh: Option<Arc<Flight>>,
    /// Last sizer estimate for `val`, in bytes.
    pub(crate) size: u64,
}

impl<V> Entry<V> {
    pub(crate) fn new(ttl: Duration, future: Arc<Flight>) -> Self {
        Self {
            created: None,
            last_used: None,
            ttl,
            val: None,
            err: None,
            future: Some(future),
            refresh: None,
            size: 0,
        }
    }

    /// Whether the entry's TTL has elapsed.
    ///
    /// Pending entries (no `created`) and entries with a zero TTL never report
    /// expired; zero-TTL results are torn down at publication instead.
    pub(crate) fn expired(&self, extend_on_use: bool, now: Timestamp) -> bool {
        let base = match (extend_on_use, self.last_used) {
            (true, Some(last_used)) => Some(last_used),
            _ => self.created,
        };
        match base {
            Some(base) => !self.ttl.is_zero() && base + self.ttl < now,
            None => false,
        }
    }

    /// Whether the entry is past the midpoint of its TTL and due for a
    /// background refresh.
    pub(crate) fn should_refresh(&self, refresh_enabled: bool, now: Timestamp) -> bool {
        refresh_enabled
            && self
                .created
                .is_some_and(|created| !self.ttl.is_zero() && created + self.ttl / 2 < now)
    }
}
