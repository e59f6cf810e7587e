// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Greedy largest-class-first allocation across capacity classes
//! (spec.md §4.4).

use super::capacity::CapacityTracker;
use super::group::{CapacityError, SlabGroup, SlotHandle};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Owns one [`SlabGroup`] per capacity class plus the shared byte
/// ceiling, and picks the slot combination for a value of a given
/// length.
pub struct Allocator {
    /// Capacity classes sorted ascending; groups addressed by capacity.
    groups: BTreeMap<u32, Arc<SlabGroup>>,
    tracker: CapacityTracker,
}

impl Allocator {
    pub fn new(
        capacity_classes: &[u32],
        slots_in_slab: usize,
        slabs_in_group: usize,
        sweep_interval: Duration,
        max_storage_bytes: u64,
    ) -> Self {
        let tracker = CapacityTracker::new(max_storage_bytes);
        let mut groups = BTreeMap::new();
        for &cap in capacity_classes {
            groups.insert(
                cap,
                Arc::new(SlabGroup::new(
                    cap,
                    slabs_in_group,
                    slots_in_slab,
                    sweep_interval,
                    &tracker,
                )),
            );
        }
        Self { groups, tracker }
    }

    pub fn tracker(&self) -> &CapacityTracker {
        &self.tracker
    }

    /// Decompose `byte_length` into the largest-class-first slot plan,
    /// then reserve the slots for each class (spec.md §4.4 worked
    /// example: 2600B → 2×1024 + 2×256 + 1×64 = 2624B in 5 slots).
    pub fn allocate(&self, byte_length: u64) -> Result<Vec<SlotHandle>, CapacityError> {
        let plan = self.plan(byte_length);
        if plan.is_empty() && byte_length > 0 {
            return Err(CapacityError::TooMany);
        }

        let mut handles = Vec::new();
        for (capacity, count) in plan {
            let group = self
                .groups
                .get(&capacity)
                .expect("plan only names configured capacity classes");
            let (mut slots, _extra) = group.find_available_slots(count, &self.tracker)?;
            handles.append(&mut slots);
        }
        Ok(handles)
    }

    /// Greedy decomposition: repeatedly take as many of the largest
    /// remaining class as fit, then descend.
    fn plan(&self, byte_length: u64) -> Vec<(u32, usize)> {
        let mut remaining = byte_length;
        let mut plan = Vec::new();
        for (&capacity, _) in self.groups.iter().rev() {
            if remaining == 0 {
                break;
            }
            let cap = capacity as u64;
            let count = (remaining / cap) as usize;
            if count > 0 {
                plan.push((capacity, count));
                remaining -= count as u64 * cap;
            }
        }
        if remaining > 0 {
            // Leftover smaller than the smallest class still needs one
            // slot of the smallest class to hold it.
            if let Some((&smallest, _)) = self.groups.iter().next() {
                if let Some(last) = plan.last_mut() {
                    if last.0 == smallest {
                        last.1 += 1;
                        return plan;
                    }
                }
                plan.push((smallest, 1));
            }
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(max_storage: u64) -> Allocator {
        Allocator::new(&[64, 256, 1024, 4096], 1000, 100, Duration::from_secs(10), max_storage)
    }

    #[test]
    fn plan_matches_worked_example() {
        let alloc = allocator(1024 * 1024);
        let plan = alloc.plan(2600);
        assert_eq!(plan, vec![(1024, 2), (256, 2), (64, 1)]);
    }

    #[test]
    fn plan_handles_exact_multiple() {
        let alloc = allocator(1024 * 1024);
        let plan = alloc.plan(128);
        assert_eq!(plan, vec![(64, 2)]);
    }

    #[test]
    fn allocate_reserves_matching_slots() {
        let alloc = allocator(1024 * 1024);
        let handles = alloc.allocate(2600).unwrap();
        assert_eq!(handles.len(), 5);
        let mut caps: Vec<u32> = handles.iter().map(|h| h.capacity()).collect();
        caps.sort_unstable();
        assert_eq!(caps, vec![64, 256, 256, 1024, 1024]);
    }

    #[test]
    fn allocate_zero_length_needs_no_slots() {
        let alloc = allocator(1024 * 1024);
        let handles = alloc.allocate(0).unwrap();
        assert!(handles.is_empty());
    }

    #[test]
    fn allocate_fails_when_storage_full() {
        // Ceiling only large enough for a single smallest-class slab.
        let alloc = Allocator::new(&[64], 2, 1, Duration::from_secs(10), 128);
        let _first = alloc.allocate(64).unwrap();
        let _second = alloc.allocate(64).unwrap();
        let err = alloc.allocate(64).unwrap_err();
        assert!(matches!(
            err,
            CapacityError::StorageFull | CapacityError::NoEnoughSlots
        ));
    }
}
