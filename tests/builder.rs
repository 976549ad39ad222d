// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the cache builder.

use std::time::Duration;

use memoflight::{Cache, Clock};

#[test]
fn builder_carries_the_provided_clock() {
    let clock = Clock::new_frozen();
    let builder = Cache::builder::<String, i32>(clock.clone());

    let builder_clock = builder.clock();
    builder_clock.advance(Duration::from_secs(5));

    // Frozen clones share state, so the builder holds the clock it was given.
    assert_eq!(clock.now(), builder.clock().now());
}

#[test]
fn built_cache_keeps_the_builder_clock() {
    let clock = Clock::new_frozen();
    let cache = Cache::builder::<String, i32>(clock.clone()).build();

    clock.advance(Duration::from_secs(60));
    assert_eq!(cache.clock().now(), clock.now());
}
