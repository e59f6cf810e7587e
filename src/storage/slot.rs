// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A single fixed-capacity byte buffer plus occupancy metadata
//! (spec.md §3, §4.1).

use std::time::{Duration, Instant};
use thiserror::Error;

/// A slot's reservation guard window: closes the race between "found
/// vacant" and "filled" (spec.md §4.1 `reserve`).
const RESERVATION_GUARD: Duration = Duration::from_secs(2);

/// Maximum key length, shared with the protocol parser (spec.md §4.6).
pub const MAX_KEY_LEN: usize = 250;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    #[error("slot already occupied")]
    Occupied,
    #[error("invalid key")]
    InvalidKey,
}

/// One fixed-capacity byte buffer. Never reallocated after construction;
/// `clear()` resets metadata but leaves the buffer contents untouched.
#[derive(Debug)]
pub struct Slot {
    capacity: u32,
    key: Vec<u8>,
    buf: Vec<u8>,
    used: u32,
    set_at: Instant,
    lifetime: Duration,
    reserved_at: Option<Instant>,
}

impl Slot {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            key: Vec::new(),
            buf: vec![0u8; capacity as usize],
            used: 0,
            set_at: Instant::now(),
            lifetime: Duration::ZERO,
            reserved_at: None,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[..self.used as usize]
    }

    /// `used > 0 ∧ lifetime > 0` (spec.md §3 invariant).
    pub fn occupied(&self) -> bool {
        self.used > 0 && !self.lifetime.is_zero()
    }

    /// Vacant iff unreserved-or-stale-reservation, or TTL has passed.
    pub fn vacant(&self, now: Instant) -> bool {
        let unreserved = (self.used == 0 || self.lifetime.is_zero())
            && self
                .reserved_at
                .map(|r| now.saturating_duration_since(r) > RESERVATION_GUARD)
                .unwrap_or(true);
        let ttl_passed = self.used > 0
            && !self.lifetime.is_zero()
            && now.saturating_duration_since(self.set_at) > self.lifetime;
        unreserved || ttl_passed
    }

    /// Stamp the reservation timestamp, closing the narrow race between a
    /// finder claiming this slot and the caller actually filling it.
    pub fn reserve(&mut self, now: Instant) {
        self.reserved_at = Some(now);
    }

    /// Zero key/used/lifetime. Buffer content is left as-is; the next
    /// write overwrites only what it needs.
    pub fn clear(&mut self) {
        self.key.clear();
        self.used = 0;
        self.lifetime = Duration::ZERO;
        self.reserved_at = None;
    }

    /// Tests `vacant()` and, if true and the slot held a live lifetime,
    /// clears it. Returns whether the slot is now available.
    pub fn check_clear(&mut self, now: Instant) -> bool {
        if self.vacant(now) {
            if !self.lifetime.is_zero() {
                self.clear();
            }
            true
        } else {
            false
        }
    }

    /// Commit `data` (already read off the wire) into this slot under the
    /// given key/timestamps. Fails if the slot is occupied or the key is
    /// invalid. `data` is clamped to `capacity`; returns bytes consumed.
    pub fn commit(
        &mut self,
        key: &[u8],
        data: &[u8],
        set_at: Instant,
        lifetime: Duration,
    ) -> Result<u64, SlotError> {
        if self.occupied() {
            return Err(SlotError::Occupied);
        }
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(SlotError::InvalidKey);
        }
        let n = data.len().min(self.capacity as usize);
        self.buf[..n].copy_from_slice(&data[..n]);
        self.key.clear();
        self.key.extend_from_slice(key);
        self.used = n as u32;
        self.set_at = set_at;
        self.lifetime = lifetime;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_slot_is_vacant() {
        let slot = Slot::new(64);
        assert!(slot.vacant(Instant::now()));
        assert!(!slot.occupied());
    }

    #[test]
    fn commit_then_occupied() {
        let mut slot = Slot::new(64);
        let now = Instant::now();
        slot.commit(b"hello", b"world", now, Duration::from_secs(60))
            .unwrap();
        assert!(slot.occupied());
        assert_eq!(slot.data(), b"world");
        assert_eq!(slot.key(), b"hello");
    }

    #[test]
    fn commit_rejects_occupied_slot() {
        let mut slot = Slot::new(64);
        let now = Instant::now();
        slot.commit(b"k", b"v", now, Duration::from_secs(60))
            .unwrap();
        let err = slot
            .commit(b"k2", b"v2", now, Duration::from_secs(60))
            .unwrap_err();
        assert_eq!(err, SlotError::Occupied);
    }

    #[test]
    fn commit_rejects_bad_key() {
        let mut slot = Slot::new(64);
        let now = Instant::now();
        assert_eq!(
            slot.commit(b"", b"v", now, Duration::from_secs(60))
                .unwrap_err(),
            SlotError::InvalidKey
        );
        let long_key = vec![b'a'; 251];
        assert_eq!(
            slot.commit(&long_key, b"v", now, Duration::from_secs(60))
                .unwrap_err(),
            SlotError::InvalidKey
        );
    }

    #[test]
    fn commit_clamps_to_capacity() {
        let mut slot = Slot::new(4);
        let now = Instant::now();
        let n = slot
            .commit(b"k", b"toolong", now, Duration::from_secs(60))
            .unwrap();
        assert_eq!(n, 4);
        assert_eq!(slot.data(), b"tool");
    }

    #[test]
    fn clear_resets_metadata_not_buffer() {
        let mut slot = Slot::new(64);
        let now = Instant::now();
        slot.commit(b"k", b"v", now, Duration::from_secs(60))
            .unwrap();
        slot.clear();
        assert!(!slot.occupied());
        assert_eq!(slot.key(), b"");
        assert_eq!(slot.data(), b"");
    }

    #[test]
    fn ttl_expiry_makes_slot_vacant() {
        let mut slot = Slot::new(64);
        let past = Instant::now() - Duration::from_secs(100);
        slot.commit(b"k", b"v", past, Duration::from_secs(1)).unwrap();
        assert!(slot.vacant(Instant::now()));
    }

    #[test]
    fn reservation_blocks_reuse_briefly() {
        let mut slot = Slot::new(64);
        slot.reserve(Instant::now());
        assert!(!slot.vacant(Instant::now()));
    }

    #[test]
    fn stale_reservation_becomes_vacant() {
        let mut slot = Slot::new(64);
        let stale = Instant::now() - Duration::from_secs(3);
        slot.reserve(stale);
        assert!(slot.vacant(Instant::now()));
    }

    #[test]
    fn check_clear_clears_expired_slot() {
        let mut slot = Slot::new(64);
        let past = Instant::now() - Duration::from_secs(100);
        slot.commit(b"k", b"v", past, Duration::from_secs(1)).unwrap();
        assert!(slot.check_clear(Instant::now()));
        assert!(!slot.occupied());
    }
}
