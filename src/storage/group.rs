// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! All [`Slab`]s for one capacity class: parallel slot probing and
//! on-demand growth under a global byte ceiling (spec.md §3, §4.3).

use super::capacity::CapacityTracker;
use super::slab::Slab;
use super::slot::{Slot, SlotError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CapacityError {
    #[error("more slots requested than the group holds")]
    TooMany,
    #[error("not enough slots available after growth")]
    NoEnoughSlots,
    #[error("global storage ceiling reached")]
    StorageFull,
}

/// A non-owning reference to one slot, addressed by `(slab, index)` so it
/// stays valid across the slab's internal rotation (spec.md §9).
#[derive(Clone)]
pub struct SlotHandle {
    slab: Arc<Slab>,
    index: usize,
}

impl SlotHandle {
    pub fn capacity(&self) -> u32 {
        self.slab.capacity()
    }

    pub fn key(&self) -> Vec<u8> {
        self.slab.with_slot(self.index, |s: &mut Slot| s.key().to_vec())
    }

    pub fn data(&self) -> Vec<u8> {
        self.slab.with_slot(self.index, |s: &mut Slot| s.data().to_vec())
    }

    /// True if this slot no longer holds live data for `key` (races or
    /// expiry mid-read, spec.md §4.7 step 4).
    pub fn vacant_for(&self, key: &[u8]) -> bool {
        self.slab
            .with_slot(self.index, |s: &mut Slot| s.vacant(Instant::now()) || s.key() != key)
    }

    /// Commit already-read bytes into this slot (the two-phase
    /// equivalent of spec.md's `Slot::read_and_set`: the network read
    /// happens outside any storage lock, then the result is committed
    /// here under the owning slab's lock).
    pub fn commit(
        &self,
        key: &[u8],
        data: &[u8],
        set_at: Instant,
        lifetime: Duration,
    ) -> Result<u64, SlotError> {
        self.slab
            .with_slot(self.index, |s| s.commit(key, data, set_at, lifetime))
    }

    /// Release this slot back to its slab (spec.md §4.5 `ClearSlots`).
    pub fn release(&self) {
        self.slab.with_slot(self.index, |s| s.clear());
    }
}

/// All [`Slab`]s of one capacity class.
pub struct SlabGroup {
    slot_capacity: u32,
    initial_slab_count: usize,
    slots_per_slab: usize,
    sweep_interval: Duration,
    slabs: Mutex<VecDeque<Arc<Slab>>>,
}

impl SlabGroup {
    pub fn new(
        slot_capacity: u32,
        initial_slab_count: usize,
        slots_per_slab: usize,
        sweep_interval: Duration,
        tracker: &CapacityTracker,
    ) -> Self {
        let group = Self {
            slot_capacity,
            initial_slab_count,
            slots_per_slab,
            sweep_interval,
            slabs: Mutex::new(VecDeque::new()),
        };
        let bytes_per_slab = slot_capacity as u64 * slots_per_slab as u64;
        let granted = tracker.try_grow(initial_slab_count as u64 * bytes_per_slab);
        let initial_slabs = (granted / bytes_per_slab) as usize;
        group.grow(initial_slabs);
        group
    }

    pub fn slot_capacity(&self) -> u32 {
        self.slot_capacity
    }

    pub fn slot_sum(&self) -> usize {
        self.slabs.lock().iter().map(|s| s.len()).sum()
    }

    pub fn slab_count(&self) -> usize {
        self.slabs.lock().len()
    }

    fn grow(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut slabs = self.slabs.lock();
        for _ in 0..n {
            slabs.push_back(Arc::new(Slab::new(
                self.slot_capacity,
                self.slots_per_slab,
                self.sweep_interval,
            )));
        }
    }

    /// Find `need` available slots, growing the group if necessary
    /// (spec.md §4.3). Returns the slots found and the extra bytes
    /// reserved by growth.
    pub fn find_available_slots(
        &self,
        need: usize,
        tracker: &CapacityTracker,
    ) -> Result<(Vec<SlotHandle>, u64), CapacityError> {
        if need > self.slot_sum() {
            return Err(CapacityError::TooMany);
        }

        let mut collected = Vec::with_capacity(need);
        let mut extra_added = 0u64;

        loop {
            self.probe_round(need, &mut collected);
            if collected.len() >= need {
                return Ok((collected, extra_added));
            }

            if tracker.current() >= tracker.ceiling() {
                return Err(CapacityError::StorageFull);
            }

            let need_unsatisfied = need - collected.len();
            let mut ext = self.initial_slab_count.div_ceil(2).max(need_unsatisfied);
            let bytes_per_slab = self.slot_capacity as u64 * self.slots_per_slab as u64;
            while ext > 0 {
                let want = ext as u64 * bytes_per_slab;
                if tracker.current() + want < tracker.ceiling() {
                    break;
                }
                ext -= 1;
            }
            if ext == 0 {
                return Err(CapacityError::NoEnoughSlots);
            }

            let granted = tracker.try_grow(ext as u64 * bytes_per_slab);
            if granted == 0 {
                return Err(CapacityError::StorageFull);
            }
            let slabs_added = (granted / bytes_per_slab) as usize;
            if slabs_added == 0 {
                return Err(CapacityError::NoEnoughSlots);
            }
            self.grow(slabs_added);
            extra_added += granted;
        }
    }

    /// Walk every slab once, probing in bounded-concurrency batches: the
    /// first batch runs at `probe_concurrency`, every batch after that
    /// runs at 1 (spec.md §4.3 step 3).
    fn probe_round(&self, need: usize, collected: &mut Vec<SlotHandle>) {
        let snapshot = self.rotate_snapshot();
        let slab_count = snapshot.len();
        if slab_count == 0 {
            return;
        }

        let probe_concurrency = slab_count
            .div_ceil(10)
            .max(3)
            .min(need.min(slab_count).max(1));

        let mut idx = 0;
        let mut concurrency = probe_concurrency;
        while idx < slab_count && collected.len() < need {
            let end = (idx + concurrency).min(slab_count);
            for (slab, found) in Self::probe_batch(&snapshot[idx..end]) {
                if let Some(slot_index) = found {
                    collected.push(SlotHandle {
                        slab,
                        index: slot_index,
                    });
                    if collected.len() >= need {
                        break;
                    }
                }
            }
            idx = end;
            concurrency = 1;
        }
    }

    /// Rotate every slab from front to back once, returning them in
    /// probe order (spec.md §4.3 step 2: "takes the front slab, rotates
    /// it to the back").
    fn rotate_snapshot(&self) -> Vec<Arc<Slab>> {
        let mut slabs = self.slabs.lock();
        let len = slabs.len();
        let mut ordered = Vec::with_capacity(len);
        for _ in 0..len {
            if let Some(s) = slabs.pop_front() {
                ordered.push(s.clone());
                slabs.push_back(s);
            }
        }
        ordered
    }

    /// Probe a batch of slabs concurrently via OS threads, returning each
    /// slab alongside the slot it found (if any).
    fn probe_batch(batch: &[Arc<Slab>]) -> Vec<(Arc<Slab>, Option<usize>)> {
        if batch.len() <= 1 {
            return batch
                .iter()
                .map(|s| (s.clone(), s.find_available_slot()))
                .collect();
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        std::thread::scope(|scope| {
            for slab in batch {
                let tx = tx.clone();
                scope.spawn(move || {
                    let found = slab.find_available_slot();
                    let _ = tx.send((slab.clone(), found));
                });
            }
        });
        drop(tx);
        rx.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(mb: u64) -> CapacityTracker {
        CapacityTracker::new(mb * 1024 * 1024)
    }

    #[test]
    fn finds_slots_within_initial_capacity() {
        let tracker = tracker(1);
        let group = SlabGroup::new(64, 2, 4, Duration::from_secs(10), &tracker);
        let (slots, extra) = group.find_available_slots(4, &tracker).unwrap();
        assert_eq!(slots.len(), 4);
        assert_eq!(extra, 0);
    }

    #[test]
    fn too_many_rejected_outright() {
        let tracker = tracker(1);
        let group = SlabGroup::new(64, 1, 4, Duration::from_secs(10), &tracker);
        assert_eq!(
            group.find_available_slots(5, &tracker).unwrap_err(),
            CapacityError::TooMany
        );
    }

    #[test]
    fn grows_when_slabs_are_full() {
        let tracker = tracker(1);
        let group = SlabGroup::new(64, 1, 2, Duration::from_secs(10), &tracker);
        let (first, _) = group.find_available_slots(2, &tracker).unwrap();
        for h in &first {
            h.commit(b"k", b"v", Instant::now(), Duration::from_secs(120))
                .unwrap();
        }
        let (second, extra) = group.find_available_slots(1, &tracker).unwrap();
        assert_eq!(second.len(), 1);
        assert!(extra > 0);
        assert!(group.slab_count() > 1);
    }

    #[test]
    fn storage_full_when_ceiling_reached() {
        // Ceiling only fits the initial slab; growth must fail.
        let ceiling = 64u64 * 2; // exactly one slab of 2 slots * 64B
        let tracker = CapacityTracker::new(ceiling);
        let group = SlabGroup::new(64, 1, 2, Duration::from_secs(10), &tracker);
        let (first, _) = group.find_available_slots(2, &tracker).unwrap();
        for h in &first {
            h.commit(b"k", b"v", Instant::now(), Duration::from_secs(120))
                .unwrap();
        }
        let err = group.find_available_slots(1, &tracker).unwrap_err();
        assert_eq!(err, CapacityError::StorageFull);
    }

    #[test]
    fn release_makes_slot_reusable() {
        let tracker = tracker(1);
        let group = SlabGroup::new(64, 1, 2, Duration::from_secs(10), &tracker);
        let (slots, _) = group.find_available_slots(1, &tracker).unwrap();
        slots[0]
            .commit(b"k", b"v", Instant::now(), Duration::from_secs(120))
            .unwrap();
        slots[0].release();
        let (more, _) = group.find_available_slots(1, &tracker).unwrap();
        assert_eq!(more.len(), 1);
    }
}
