// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Segmented scratch pool.
//!
//! Serialization records are expensive to allocate (one growable buffer per
//! schema field) and must never be shared across threads mid-use. The pool
//! hands each calling thread an exclusive instance for the duration of a
//! closure and takes it back afterwards. Segmenting by a per-thread index
//! keeps concurrent callers on different locks, so the steady state is one
//! uncontended lock acquisition per borrow.
//!
//! The pool is owned by the engine state that uses it; there are no
//! process-wide scratch singletons.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::Spinlock;

const POOL_SEGMENTS: usize = 16;

static POOL_THREAD_COUNTER: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static POOL_SLOT: Cell<usize> =
        Cell::new(POOL_THREAD_COUNTER.fetch_add(1, Ordering::Relaxed) % POOL_SEGMENTS);
}

pub struct ScratchPool<T> {
    segments: [Spinlock<Vec<T>>; POOL_SEGMENTS],
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T> ScratchPool<T> {
    pub fn new<F>(factory: F) -> ScratchPool<T>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        ScratchPool {
            segments: std::array::from_fn(|_| Spinlock::new(Vec::new())),
            factory: Box::new(factory),
        }
    }

    /// Borrows a scratch instance for the duration of `handler`.
    ///
    /// The instance is returned to the caller's segment afterwards, dirty;
    /// users are expected to reset it on borrow, not on return.
    pub fn with<R>(&self, handler: impl FnOnce(&mut T) -> R) -> R {
        let slot = POOL_SLOT.with(|s| s.get());
        let mut item = self.segments[slot]
            .lock()
            .pop()
            .unwrap_or_else(|| (self.factory)());
        let result = handler(&mut item);
        self.segments[slot].lock().push(item);
        result
    }

    /// Drops every pooled instance. Called at cycle boundaries when the
    /// schema changes shape and stale scratch layouts must not be reused.
    pub fn clear(&self) {
        for segment in &self.segments {
            segment.lock().clear();
        }
    }
}
