// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The keyed index over [`MetaItem`]s: a bounded LRU view for eviction
//! and an ordered-key view with a persistent cursor for round-robin TTL
//! expiry (spec.md §4.5). The two views stay coupled: every entry lives
//! in both.

use super::item::MetaItem;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IndexError {
    #[error("key not found")]
    NotFound,
    #[error("key already exists")]
    Exists,
}

struct Entry {
    item: MetaItem,
    generation: u64,
}

struct IndexInner {
    entries: HashMap<Vec<u8>, Entry>,
    ordered_keys: BTreeSet<Vec<u8>>,
    next_generation: u64,
    cursor: Option<Vec<u8>>,
}

/// Bounded, LRU-evicting key index with a coupled round-robin expirer.
pub struct ItemsIndex {
    lru_size: usize,
    skiplist_check_step: usize,
    inner: Mutex<IndexInner>,
}

impl ItemsIndex {
    pub fn new(lru_size: usize, skiplist_check_step: usize) -> Self {
        Self {
            lru_size,
            skiplist_check_step,
            inner: Mutex::new(IndexInner {
                entries: HashMap::new(),
                ordered_keys: BTreeSet::new(),
                next_generation: 0,
                cursor: None,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Touch and return the item for `key`, or `None` if absent,
    /// lazily expired, or if any backing slot was reclaimed out from
    /// under it (spec.md §4.7 step 4: races/expiry during read surface
    /// as a miss rather than partial data).
    pub fn get(&self, key: &[u8], now: Instant) -> Option<(u32, Vec<u8>)> {
        let mut inner = self.inner.lock();
        let expired = inner
            .entries
            .get(key)
            .map(|e| e.item.expired(now))
            .unwrap_or(false);
        if expired {
            Self::remove_locked(&mut inner, key);
            return None;
        }
        let raced = inner
            .entries
            .get(key)
            .map(|e| e.item.slots.iter().any(|s| s.vacant_for(key)))
            .unwrap_or(false);
        if raced {
            Self::remove_locked(&mut inner, key);
            return None;
        }
        let gen = Self::next_gen(&mut inner);
        let entry = inner.entries.get_mut(key)?;
        entry.generation = gen;
        Some((entry.item.flags, entry.item.assemble()))
    }

    /// Attach allocated slots and the final byte length to an
    /// already-inserted item (spec.md §4.7 step 3: the item is inserted
    /// before the allocator runs, then updated once slots are known).
    pub fn update_slots(&self, key: &[u8], slots: Vec<super::group::SlotHandle>, byte_length: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.item.slots = slots;
                entry.item.byte_length = byte_length;
                true
            }
            None => false,
        }
    }

    /// Unconditional insert/overwrite (spec.md `set`).
    pub fn set(&self, item: MetaItem) {
        let mut inner = self.inner.lock();
        self.insert_locked(&mut inner, item);
    }

    /// Insert only if absent or expired (spec.md `add`).
    pub fn add(&self, item: MetaItem, now: Instant) -> Result<(), IndexError> {
        let mut inner = self.inner.lock();
        let occupied = inner
            .entries
            .get(&item.key)
            .map(|e| !e.item.expired(now))
            .unwrap_or(false);
        if occupied {
            return Err(IndexError::Exists);
        }
        self.insert_locked(&mut inner, item);
        Ok(())
    }

    /// Replace only if present and unexpired (spec.md `replace`).
    pub fn replace(&self, item: MetaItem, now: Instant) -> Result<(), IndexError> {
        let mut inner = self.inner.lock();
        let present = inner
            .entries
            .get(&item.key)
            .map(|e| !e.item.expired(now))
            .unwrap_or(false);
        if !present {
            return Err(IndexError::NotFound);
        }
        self.insert_locked(&mut inner, item);
        Ok(())
    }

    fn insert_locked(&self, inner: &mut IndexInner, item: MetaItem) {
        let key = item.key.clone();
        if let Some(old) = inner.entries.remove(&key) {
            old.item.clear_slots();
        }
        inner.ordered_keys.insert(key.clone());
        let gen = Self::next_gen(inner);
        inner.entries.insert(key, Entry { item, generation: gen });
        self.evict_if_over_capacity(inner);
    }

    pub fn remove(&self, key: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        Self::remove_locked(&mut inner, key)
    }

    /// Removes `key` from both views. If the expirer cursor pointed at
    /// `key`, advances it to `key`'s successor in the ordered view (or
    /// `None` if `key` was the last one) rather than resetting to the
    /// front — restarting the scan would let high keys starve under
    /// churn (spec.md §4.5, §8 Property 8).
    fn remove_locked(inner: &mut IndexInner, key: &[u8]) -> bool {
        if let Some(entry) = inner.entries.remove(key) {
            entry.item.clear_slots();
            if inner.cursor.as_deref() == Some(key) {
                let key_vec = key.to_vec();
                inner.cursor = inner
                    .ordered_keys
                    .range((std::ops::Bound::Excluded(key_vec), std::ops::Bound::Unbounded))
                    .next()
                    .cloned();
            }
            inner.ordered_keys.remove(key);
            true
        } else {
            false
        }
    }

    fn next_gen(inner: &mut IndexInner) -> u64 {
        let g = inner.next_generation;
        inner.next_generation += 1;
        g
    }

    /// Evict the least-recently-touched entry by linear scan when the
    /// index exceeds `lru_size` (spec.md §3: avoids an intrusive list).
    fn evict_if_over_capacity(&self, inner: &mut IndexInner) {
        while inner.entries.len() > self.lru_size {
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.generation)
                .map(|(k, _)| k.clone());
            if let Some(key) = victim {
                Self::remove_locked(inner, &key);
            } else {
                break;
            }
        }
    }

    /// Advance the round-robin cursor through the ordered-key view by up
    /// to `skiplist_check_step` keys, removing any that have expired
    /// (spec.md §4.5 periodic expirer).
    pub fn expire_tick(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock();
        let step = self.skiplist_check_step;
        if inner.ordered_keys.is_empty() {
            inner.cursor = None;
            return 0;
        }

        let mut removed = 0;
        let mut visited = 0;
        let mut start = inner
            .cursor
            .clone()
            .and_then(|c| inner.ordered_keys.range(c..).next().cloned())
            .unwrap_or_else(|| inner.ordered_keys.iter().next().cloned().unwrap());

        while visited < step {
            if inner.ordered_keys.is_empty() {
                inner.cursor = None;
                break;
            }
            let next_key = inner
                .ordered_keys
                .range(start.clone()..)
                .next()
                .cloned()
                .or_else(|| inner.ordered_keys.iter().next().cloned());
            let Some(key) = next_key else {
                inner.cursor = None;
                break;
            };

            let expired = inner
                .entries
                .get(&key)
                .map(|e| e.item.expired(now))
                .unwrap_or(true);

            let advance_to = inner
                .ordered_keys
                .range((std::ops::Bound::Excluded(key.clone()), std::ops::Bound::Unbounded))
                .next()
                .cloned();

            if expired {
                Self::remove_locked(&mut inner, &key);
                removed += 1;
            }

            visited += 1;
            match advance_to {
                Some(next) => start = next,
                None => {
                    inner.cursor = None;
                    return removed;
                }
            }
        }
        inner.cursor = Some(start);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn item(key: &str, lifetime: Duration) -> MetaItem {
        MetaItem::new(key.as_bytes().to_vec(), 0, Instant::now(), lifetime, 0, Vec::new())
    }

    #[test]
    fn set_then_get_round_trips() {
        let index = ItemsIndex::new(10, 5);
        index.set(item("k", Duration::from_secs(60)));
        let (flags, _) = index.get(b"k", Instant::now()).unwrap();
        assert_eq!(flags, 0);
    }

    #[test]
    fn add_rejects_existing_live_key() {
        let index = ItemsIndex::new(10, 5);
        index.set(item("k", Duration::from_secs(60)));
        let err = index.add(item("k", Duration::from_secs(60)), Instant::now()).unwrap_err();
        assert_eq!(err, IndexError::Exists);
    }

    #[test]
    fn add_accepts_expired_key() {
        let index = ItemsIndex::new(10, 5);
        let mut old = item("k", Duration::from_secs(1));
        old.set_at = Instant::now() - Duration::from_secs(100);
        index.set(old);
        assert!(index.add(item("k", Duration::from_secs(60)), Instant::now()).is_ok());
    }

    #[test]
    fn replace_rejects_missing_key() {
        let index = ItemsIndex::new(10, 5);
        let err = index.replace(item("k", Duration::from_secs(60)), Instant::now()).unwrap_err();
        assert_eq!(err, IndexError::NotFound);
    }

    #[test]
    fn lru_evicts_least_recently_touched() {
        let index = ItemsIndex::new(2, 5);
        index.set(item("a", Duration::from_secs(600)));
        index.set(item("b", Duration::from_secs(600)));
        // touch "a" so "b" becomes the least recently used
        index.get(b"a", Instant::now());
        index.set(item("c", Duration::from_secs(600)));
        assert_eq!(index.len(), 2);
        assert!(index.get(b"b", Instant::now()).is_none());
        assert!(index.get(b"a", Instant::now()).is_some());
        assert!(index.get(b"c", Instant::now()).is_some());
    }

    #[test]
    fn expire_tick_removes_stale_entries_round_robin() {
        let index = ItemsIndex::new(10, 2);
        for k in ["a", "b", "c", "d"] {
            let mut i = item(k, Duration::from_secs(1));
            i.set_at = Instant::now() - Duration::from_secs(100);
            index.set(i);
        }
        let now = Instant::now();
        let mut total_removed = 0;
        for _ in 0..4 {
            total_removed += index.expire_tick(now);
        }
        assert_eq!(total_removed, 4);
        assert!(index.is_empty());
    }

    #[test]
    fn expire_tick_on_empty_index_is_noop() {
        let index = ItemsIndex::new(10, 5);
        assert_eq!(index.expire_tick(Instant::now()), 0);
    }

    #[test]
    fn remove_advances_cursor_to_successor_not_front() {
        let index = ItemsIndex::new(10, 1);
        index.set(item("a", Duration::from_secs(600)));
        index.set(item("b", Duration::from_secs(600)));
        index.set(item("c", Duration::from_secs(600)));

        // tick1 visits "a" (cursor starts at the front), then advances
        // the cursor to "b".
        assert_eq!(index.expire_tick(Instant::now()), 0);

        // "a" becomes expired after the cursor has already passed it.
        let mut expired_a = item("a", Duration::from_secs(1));
        expired_a.set_at = Instant::now() - Duration::from_secs(100);
        index.set(expired_a);

        // Removing "b", which the cursor currently points at, must
        // advance the cursor to "b"'s successor ("c"), not reset to
        // the front ("a") — otherwise the next tick would immediately
        // resweep "a" instead of resuming the round-robin at "c".
        index.remove(b"b");
        assert_eq!(index.len(), 2);

        assert_eq!(index.expire_tick(Instant::now()), 0);
        assert_eq!(index.len(), 2, "tick should have visited \"c\", not re-swept \"a\"");

        // Only once the cursor wraps back around does "a" get reclaimed.
        assert_eq!(index.expire_tick(Instant::now()), 1);
        assert_eq!(index.len(), 1);
        assert!(index.get(b"c", Instant::now()).is_some());
    }
}
