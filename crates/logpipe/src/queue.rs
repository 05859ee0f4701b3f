// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::entry::LogEntry;

/// A queued entry together with the token that aborts its dispatch.
#[derive(Debug, Clone)]
pub struct QueueSlot {
    /// Monotonic per-pipe identifier, used to recognise the slot under dispatch.
    pub id: u64,
    pub entry: Arc<LogEntry>,
    pub token: CancellationToken,
}

impl QueueSlot {
    #[must_use]
    pub fn new(id: u64, entry: LogEntry, token: CancellationToken) -> Self {
        Self {
            id,
            entry: Arc::new(entry),
            token,
        }
    }
}

/// Fixed-capacity FIFO with drop-oldest overflow.
///
/// Inspection and removal of the head are separate so the dispatcher can keep
/// the head in place until its dispatch resolves.
#[derive(Debug)]
pub struct LogQueue {
    slots: VecDeque<QueueSlot>,
    capacity: usize,
}

impl LogQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Appends `slot`. When the queue was full the oldest slot is removed,
    /// cancelled and returned.
    pub fn push(&mut self, slot: QueueSlot) -> Option<QueueSlot> {
        self.slots.push_back(slot);
        if self.slots.len() > self.capacity {
            let evicted = self.slots.pop_front()?;
            evicted.token.cancel();
            return Some(evicted);
        }
        None
    }

    #[must_use]
    pub fn peek(&self) -> Option<QueueSlot> {
        self.slots.front().cloned()
    }

    /// Removes the head only if it is still the slot with `id`.
    pub fn pop_if(&mut self, id: u64) -> Option<QueueSlot> {
        if self.slots.front().is_some_and(|slot| slot.id == id) {
            return self.slots.pop_front();
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueSlot> {
        self.slots.iter()
    }

    /// Empties the queue, returning the slots oldest first.
    pub fn drain(&mut self) -> Vec<QueueSlot> {
        self.slots.drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
