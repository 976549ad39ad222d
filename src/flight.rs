// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! One-shot completion latch for in-flight computations.

use std::sync::atomic::{AtomicBool, Ordering};

use event_listener::Event;

/// A one-shot latch that transitions from "pending" to "signalled" exactly once.
///
/// Each cache entry carries one latch for its foreground computation and
/// optionally a second one for an in-flight refresh. The published result lives
/// in the entry itself, guarded by the cache mutex; the latch only carries the
/// completion signal, so it can be waited on without holding any lock.
#[derive(Debug, Default)]
pub(crate) struct Flight {
    done: AtomicBool,
    ready: Event,
}

impl Flight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Marks the computation as complete and wakes every waiter.
    pub(crate) fn signal(&self) {
        self.done.store(true, Ordering::Release);
        self.ready.notify(usize::MAX);
    }

    /// Waits until [`signal`](Flight::signal) has been called.
    ///
    /// Lock-free once signalled. A listener is registered before the state is
    /// re-checked so a concurrent signal cannot be missed.
    pub(crate) async fn wait(&self) {
        loop {
            if self.done.load(Ordering::Acquire) {
                return;
            }

            let listener = self.ready.listen();

            if self.done.load(Ordering::Acquire) {
                return;
            }

            listener.await;
        }
    }
}
