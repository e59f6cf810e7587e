// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay configuration.
//!
//! Mirrors the fields named in spec.md §6. The YAML authoring format and
//! the CLI that fills these defaults are external collaborators; this
//! struct, its defaults, and its validation are the in-scope surface.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Relay server configuration (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_network_type", rename = "network-type")]
    pub network_type: String,
    #[serde(default = "default_max_routines", rename = "max-routines")]
    pub max_routines: usize,
    #[serde(default = "default_lru_size", rename = "lru-size")]
    pub lru_size: usize,
    #[serde(default = "default_check_step", rename = "skiplist-check-step")]
    pub skiplist_check_step: usize,
    #[serde(default = "default_min_expiration", rename = "min-expiration")]
    pub min_expiration: i64,
    #[serde(
        default = "default_slab_check_interval",
        rename = "slab-check-interval"
    )]
    pub slab_check_interval_secs: u64,
    #[serde(default = "default_slot_capacity_min", rename = "slot-capacity-min")]
    pub slot_capacity_min: u32,
    #[serde(default = "default_slot_capacity_max", rename = "slot-capacity-max")]
    pub slot_capacity_max: u32,
    #[serde(default = "default_slots_in_slab", rename = "slots-in-slab")]
    pub slots_in_slab: usize,
    #[serde(default = "default_slabs_in_group", rename = "slabs-in-group")]
    pub slabs_in_group: usize,
    #[serde(default = "default_max_storage", rename = "max-storage")]
    pub max_storage: String,
}

fn default_host() -> String {
    String::new()
}
fn default_port() -> u16 {
    12721
}
fn default_network_type() -> String {
    "tcp".to_string()
}
fn default_max_routines() -> usize {
    2
}
fn default_lru_size() -> usize {
    100_000
}
fn default_check_step() -> usize {
    20
}
fn default_min_expiration() -> i64 {
    60
}
fn default_slab_check_interval() -> u64 {
    10
}
fn default_slot_capacity_min() -> u32 {
    64
}
fn default_slot_capacity_max() -> u32 {
    4096
}
fn default_slots_in_slab() -> usize {
    100
}
fn default_slabs_in_group() -> usize {
    100
}
fn default_max_storage() -> String {
    "200MB".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            network_type: default_network_type(),
            max_routines: default_max_routines(),
            lru_size: default_lru_size(),
            skiplist_check_step: default_check_step(),
            min_expiration: default_min_expiration(),
            slab_check_interval_secs: default_slab_check_interval(),
            slot_capacity_min: default_slot_capacity_min(),
            slot_capacity_max: default_slot_capacity_max(),
            slots_in_slab: default_slots_in_slab(),
            slabs_in_group: default_slabs_in_group(),
            max_storage: default_max_storage(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Capacity classes, geometric progression by factor of 4 from
    /// `slot_capacity_min` to `slot_capacity_max` (spec.md §3).
    pub fn capacity_classes(&self) -> Vec<u32> {
        let mut classes = Vec::new();
        let mut c = self.slot_capacity_min;
        loop {
            classes.push(c);
            if c >= self.slot_capacity_max {
                break;
            }
            c *= 4;
        }
        classes
    }

    /// Parse `max-storage` ("200MB", "4GB", ...) into a byte ceiling.
    pub fn max_storage_bytes(&self) -> Result<u64, ConfigError> {
        parse_storage_size(&self.max_storage)
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port cannot be 0".into()));
        }
        if self.max_routines == 0 {
            return Err(ConfigError::Invalid("max-routines cannot be 0".into()));
        }
        if self.lru_size == 0 {
            return Err(ConfigError::Invalid("lru-size cannot be 0".into()));
        }
        if self.slot_capacity_min == 0 {
            return Err(ConfigError::Invalid("slot-capacity-min cannot be 0".into()));
        }
        if self.slot_capacity_max < self.slot_capacity_min {
            return Err(ConfigError::Invalid(
                "slot-capacity-max must be >= slot-capacity-min".into(),
            ));
        }
        let mut c = self.slot_capacity_min as u64;
        let mut found = false;
        while c <= self.slot_capacity_max as u64 {
            if c == self.slot_capacity_max as u64 {
                found = true;
                break;
            }
            c *= 4;
        }
        if !found {
            return Err(ConfigError::Invalid(
                "slot-capacity-max must be slot-capacity-min * 4^k".into(),
            ));
        }
        if self.slots_in_slab == 0 || self.slabs_in_group == 0 {
            return Err(ConfigError::Invalid(
                "slots-in-slab and slabs-in-group must be >= 1".into(),
            ));
        }
        let ceiling = self.max_storage_bytes()?;
        let largest_slab_bytes =
            self.slot_capacity_max as u64 * self.slots_in_slab as u64;
        if ceiling < largest_slab_bytes {
            return Err(ConfigError::Invalid(format!(
                "max-storage {} cannot hold even one slab of the largest class ({} bytes)",
                self.max_storage, largest_slab_bytes
            )));
        }
        Ok(())
    }
}

/// Parses `\d{1,4}(MB|GB)` with MB>1 and GB in 2..8, per spec.md §6.
fn parse_storage_size(s: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::Invalid(format!("invalid max-storage value: {}", s));

    let (digits, unit, multiplier) = if let Some(d) = s.strip_suffix("GB") {
        (d, "GB", 1024u64 * 1024 * 1024)
    } else if let Some(d) = s.strip_suffix("MB") {
        (d, "MB", 1024u64 * 1024)
    } else {
        return Err(invalid());
    };

    if digits.is_empty() || digits.len() > 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    match unit {
        "MB" if value > 1 => Ok(value * multiplier),
        // 2..8 is exclusive of 8, matching spec.md §6's own range notation: 7GB is the ceiling.
        "GB" if (2..8).contains(&value) => Ok(value * multiplier),
        _ => Err(invalid()),
    }
}
