// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The metadata record held per stored key, independent of where its
//! bytes physically live (spec.md §3).

use super::group::SlotHandle;
use std::time::{Duration, Instant};

/// Everything the index needs to know about one stored key besides its
/// position in the LRU/expirer views.
pub struct MetaItem {
    pub key: Vec<u8>,
    pub flags: u32,
    pub set_at: Instant,
    pub lifetime: Duration,
    pub byte_length: u64,
    pub slots: Vec<SlotHandle>,
}

impl MetaItem {
    pub fn new(
        key: Vec<u8>,
        flags: u32,
        set_at: Instant,
        lifetime: Duration,
        byte_length: u64,
        slots: Vec<SlotHandle>,
    ) -> Self {
        Self {
            key,
            flags,
            set_at,
            lifetime,
            byte_length,
            slots,
        }
    }

    pub fn expired(&self, now: Instant) -> bool {
        !self.lifetime.is_zero() && now.saturating_duration_since(self.set_at) > self.lifetime
    }

    /// Release every backing slot (spec.md §4.5 `ClearSlots`).
    pub fn clear_slots(&self) {
        for handle in &self.slots {
            handle.release();
        }
    }

    /// Reassemble the value by concatenating slots in allocation order.
    pub fn assemble(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_length as usize);
        for handle in &self.slots {
            out.extend_from_slice(&handle.data());
        }
        out.truncate(self.byte_length as usize);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_expired_with_zero_lifetime() {
        let item = MetaItem::new(
            b"k".to_vec(),
            0,
            Instant::now() - Duration::from_secs(1000),
            Duration::ZERO,
            0,
            Vec::new(),
        );
        assert!(!item.expired(Instant::now()));
    }

    #[test]
    fn expired_after_lifetime_elapses() {
        let item = MetaItem::new(
            b"k".to_vec(),
            0,
            Instant::now() - Duration::from_secs(100),
            Duration::from_secs(1),
            0,
            Vec::new(),
        );
        assert!(item.expired(Instant::now()));
    }

    #[test]
    fn not_expired_within_lifetime() {
        let item = MetaItem::new(
            b"k".to_vec(),
            0,
            Instant::now(),
            Duration::from_secs(100),
            0,
            Vec::new(),
        );
        assert!(!item.expired(Instant::now()));
    }
}
