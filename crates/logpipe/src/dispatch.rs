// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::entry::LogEntry;
use crate::publisher::Publisher;
use crate::queue::{LogQueue, QueueSlot};

/// Single-flight sequencer draining the queue through the publisher.
///
/// At most one drain task exists at a time. The head slot stays queued while
/// it is dispatched and is popped once its dispatch resolves, unless an
/// overflow already evicted it.
pub struct DispatchLoop {
    queue: Mutex<LogQueue>,
    active: AtomicBool,
    disposed: AtomicBool,
    next_id: AtomicU64,
    root: CancellationToken,
    publisher: Publisher,
    runtime: Handle,
}

impl DispatchLoop {
    #[must_use]
    pub fn new(
        publisher: Publisher,
        capacity: usize,
        root: CancellationToken,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(LogQueue::new(capacity)),
            active: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            root,
            publisher,
            runtime,
        })
    }

    /// Queues `entry` and wakes the loop. Returns `false` once disposed.
    pub fn enqueue(self: &Arc<Self>, entry: LogEntry) -> bool {
        {
            // The flag is read under the queue lock so that a concurrent
            // dispose cannot drain between the check and the push.
            let mut queue = self.lock_queue();
            if self.is_disposed() {
                return false;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let slot = QueueSlot::new(id, entry, self.root.child_token());
            if let Some(evicted) = queue.push(slot) {
                debug!("DISPATCH | Queue full, evicted entry {}", evicted.id);
            }
        }
        self.on_work();
        true
    }

    /// Starts a drain task unless one is already running.
    pub fn on_work(self: &Arc<Self>) {
        if self.is_disposed() || !self.try_activate() {
            return;
        }
        let this = Arc::clone(self);
        self.runtime.spawn(this.drain());
    }

    fn try_activate(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn drain(self: Arc<Self>) {
        loop {
            while !self.is_disposed() {
                let Some(slot) = self.lock_queue().peek() else {
                    break;
                };
                let outcome = self.publisher.dispatch(&slot).await;
                debug!("DISPATCH | Entry {} finished: {outcome:?}", slot.id);
                self.lock_queue().pop_if(slot.id);
            }

            self.active.store(false, Ordering::Release);
            // An enqueue between the last peek and the store above saw the
            // flag still set, so look again before exiting.
            if self.is_disposed() || self.lock_queue().is_empty() || !self.try_activate() {
                return;
            }
        }
    }

    /// Marks the loop disposed, then empties the queue and cancels every
    /// drained slot along with the root token. Returns the number of slots
    /// dropped, or `None` when already disposed.
    pub fn dispose(&self) -> Option<usize> {
        let drained = {
            let mut queue = self.lock_queue();
            if self.disposed.swap(true, Ordering::AcqRel) {
                return None;
            }
            queue.drain()
        };
        for slot in &drained {
            slot.token.cancel();
        }
        self.root.cancel();
        Some(drained.len())
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Whether a drain task is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_queue().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_queue().is_empty()
    }

    /// Tokens of the queued slots, oldest first.
    #[must_use]
    pub fn tokens(&self) -> Vec<CancellationToken> {
        self.lock_queue()
            .iter()
            .map(|slot| slot.token.clone())
            .collect()
    }

    fn lock_queue(&self) -> MutexGuard<'_, LogQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
