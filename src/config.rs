//! Host-facing control registers and static configuration.
//!
//! The data path itself is configured through plain register words, the
//! way a register map would expose them. Bit masks live on small
//! newtypes so call sites read as `control.contains(...)` rather than
//! raw masking. File-driven setup (the replay binary) deserializes
//! [`DataPathConfig`] and applies it to the registers.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! control_register {
    ($(#[$doc:meta])* $name:ident { $($(#[$bdoc:meta])* $bit:ident = $value:expr;)* }) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            $($(#[$bdoc])* pub const $bit: Self = Self($value);)*

            #[inline]
            pub const fn empty() -> Self {
                Self(0)
            }

            #[inline]
            pub const fn contains(self, mask: Self) -> bool {
                self.0 & mask.0 != 0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

control_register! {
    /// Per-port ingress filter control word.
    FilterControl {
        HALT = 1 << 0;
        RESET_DATA = 1 << 1;
        RESET_COUNT = 1 << 2;
        /// Mirror all ingress traffic to the echo streams.
        ECHO_ENABLE = 1 << 3;
        /// Bypass the rule table; everything forwards on split 0.
        FILTER_DISABLE = 1 << 4;
    }
}

control_register! {
    /// Arbitrator control word.
    ArbControl {
        /// Zero every expected sequence counter while set.
        RESET_SEQ_NUM = 1 << 0;
    }
}

control_register! {
    /// Strategy-select register. While GLOBAL_STRATEGY is set, the low
    /// eight bits override every symbol's per-symbol strategy register.
    StrategyControl {
        GLOBAL_STRATEGY = 1 << 31;
    }
}

impl StrategyControl {
    /// The global strategy id carried in the low byte.
    #[inline]
    pub const fn global_id(self) -> u8 {
        self.0 as u8
    }
}

control_register! {
    /// Operation-capture register control word.
    CaptureControl {
        /// Stop updating the capture register, freezing the last
        /// operation for host readout.
        CAPTURE_FREEZE = 1 << 31;
    }
}

/// One ingress filter rule as it appears in a config file.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FilterRuleConfig {
    pub slot: usize,
    pub address: u32,
    pub port: u16,
    pub split_id: u8,
}

/// File-loadable setup for the whole data path.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DataPathConfig {
    #[serde(default)]
    pub filter_control: FilterControl,
    #[serde(default)]
    pub arb_control: ArbControl,
    #[serde(default)]
    pub strategy_control: StrategyControl,
    #[serde(default)]
    pub capture_control: CaptureControl,
    /// Steps during which a second implied sequence reset is ignored.
    #[serde(default)]
    pub reset_timer_interval: u32,
    #[serde(default)]
    pub port0_rules: Vec<FilterRuleConfig>,
    #[serde(default)]
    pub port1_rules: Vec<FilterRuleConfig>,
    #[serde(default)]
    pub securities: Vec<u64>,
}

/// Errors from the host-facing symbol directory.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("security id {0} is already mapped")]
    DuplicateSecurityId(u64),
    #[error("symbol index {index} out of range (capacity {capacity})")]
    IndexOutOfRange { index: usize, capacity: usize },
    #[error("security id {0} is not mapped")]
    SecurityNotFound(u64),
}

/// Maps exchange security IDs to dense symbol indices for the pricing
/// cache. Host-side only; the data path works in indices.
pub struct SecurityDirectory {
    by_id: FxHashMap<u64, usize>,
    ids: Vec<Option<u64>>,
}

impl SecurityDirectory {
    pub fn new(capacity: usize) -> Self {
        Self {
            by_id: FxHashMap::default(),
            ids: vec![None; capacity],
        }
    }

    pub fn insert(&mut self, security_id: u64, index: usize) -> Result<(), DirectoryError> {
        if index >= self.ids.len() {
            return Err(DirectoryError::IndexOutOfRange { index, capacity: self.ids.len() });
        }
        if self.by_id.contains_key(&security_id) {
            return Err(DirectoryError::DuplicateSecurityId(security_id));
        }
        if let Some(old) = self.ids[index] {
            self.by_id.remove(&old);
        }
        self.by_id.insert(security_id, index);
        self.ids[index] = Some(security_id);
        Ok(())
    }

    pub fn index_of(&self, security_id: u64) -> Result<usize, DirectoryError> {
        self.by_id
            .get(&security_id)
            .copied()
            .ok_or(DirectoryError::SecurityNotFound(security_id))
    }

    pub fn id_at(&self, index: usize) -> Option<u64> {
        self.ids.get(index).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
