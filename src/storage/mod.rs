// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The storage engine: fixed-capacity slab allocation underneath a
//! keyed, LRU-bounded index with a coupled TTL expirer (spec.md §3-§4.5).

pub mod allocator;
pub mod capacity;
pub mod group;
pub mod index;
pub mod item;
pub mod slab;
pub mod slot;

pub use allocator::Allocator;
pub use capacity::CapacityTracker;
pub use group::{CapacityError, SlabGroup, SlotHandle};
pub use index::{IndexError, ItemsIndex};
pub use item::MetaItem;
pub use slab::Slab;
pub use slot::{Slot, SlotError, MAX_KEY_LEN};

use crate::config::RelayConfig;
use std::sync::Arc;
use std::time::Duration;

/// Everything a [`crate::server`] needs to store and retrieve values:
/// the capacity-class allocator plus the keyed index, wired from
/// configuration (spec.md §4 overview).
pub struct Engine {
    pub allocator: Allocator,
    pub index: Arc<ItemsIndex>,
}

impl Engine {
    pub fn new(config: &RelayConfig) -> Result<Self, crate::config::ConfigError> {
        let max_storage = config.max_storage_bytes()?;
        let classes = config.capacity_classes();
        let sweep_interval = Duration::from_secs(config.slab_check_interval_secs);
        let allocator = Allocator::new(
            &classes,
            config.slots_in_slab,
            config.slabs_in_group,
            sweep_interval,
            max_storage,
        );
        let index = Arc::new(ItemsIndex::new(config.lru_size, config.skiplist_check_step));
        Ok(Self { allocator, index })
    }
}
