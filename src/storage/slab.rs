// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A pool of same-capacity [`Slot`]s and the locking granule for slot
//! assignment (spec.md §3, §4.2).

use super::slot::Slot;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

struct SlabInner {
    slots: Vec<Slot>,
    /// Rotation order of slot indices; front is the next candidate to
    /// probe, back is the most-recently-assigned.
    order: VecDeque<usize>,
    last_sweep: Instant,
    sweep_interval: Duration,
}

/// An insertion-ordered pool of [`Slot`]s, all of one capacity class.
pub struct Slab {
    capacity: u32,
    inner: Mutex<SlabInner>,
}

impl Slab {
    pub fn new(capacity: u32, slot_count: usize, sweep_interval: Duration) -> Self {
        let slots = (0..slot_count).map(|_| Slot::new(capacity)).collect();
        let order = (0..slot_count).collect();
        Self {
            capacity,
            inner: Mutex::new(SlabInner {
                slots,
                order,
                last_sweep: Instant::now(),
                sweep_interval,
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` against the slot at `idx` under the slab lock.
    pub fn with_slot<R>(&self, idx: usize, f: impl FnOnce(&mut Slot) -> R) -> R {
        let mut inner = self.inner.lock();
        f(&mut inner.slots[idx])
    }

    /// spec.md §4.2: front-peek, then a rate-limited back-sweep.
    pub fn find_available_slot(&self) -> Option<usize> {
        self.find_available_slot_at(Instant::now())
    }

    fn find_available_slot_at(&self, now: Instant) -> Option<usize> {
        let mut inner = self.inner.lock();

        if let Some(&idx) = inner.order.front() {
            if inner.slots[idx].check_clear(now) {
                inner.slots[idx].reserve(now);
                inner.order.pop_front();
                inner.order.push_back(idx);
                return Some(idx);
            }
        }

        if now.saturating_duration_since(inner.last_sweep) < inner.sweep_interval {
            return None;
        }
        inner.last_sweep = now;

        let len = inner.order.len();
        if len == 0 {
            return None;
        }
        let n = (len / 10).clamp(1, 5).min(len);

        let mut examined = Vec::with_capacity(n);
        for _ in 0..n {
            if let Some(idx) = inner.order.pop_back() {
                examined.push(idx);
            }
        }

        let mut reclaimed = Vec::new();
        let mut unreclaimed = Vec::new();
        for idx in examined {
            if inner.slots[idx].check_clear(now) {
                reclaimed.push(idx);
            } else {
                unreclaimed.push(idx);
            }
        }

        for idx in unreclaimed.into_iter().rev() {
            inner.order.push_back(idx);
        }
        for &idx in &reclaimed {
            inner.order.push_front(idx);
        }

        let taken = reclaimed.first().copied();
        if let Some(idx) = taken {
            inner.slots[idx].reserve(now);
            if let Some(pos) = inner.order.iter().position(|&i| i == idx) {
                inner.order.remove(pos);
            }
            inner.order.push_back(idx);
        }
        taken
    }
}
