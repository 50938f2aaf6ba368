//! Physical address model of a bank-level PIM memory device.
//!
//! The device is organised as `channel -> pseudochannel -> rank -> bankgroup -> bank -> row ->
//! column`. Every level owns a stride (bytes addressed by one unit increment at that level) derived
//! bottom-up from the counts of all finer levels, so a logical address is simply
//! `base + sum(index * stride)`.

mod preset;

use core::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use preset::preset_names;

/// Levels of the address hierarchy, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Channel,
    #[serde(rename = "pseudochannel")]
    PseudoChannel,
    Rank,
    #[serde(rename = "bankgroup")]
    BankGroup,
    Bank,
    Row,
    Column,
}

impl Level {
    pub const ALL: [Level; 7] = [
        Level::Channel,
        Level::PseudoChannel,
        Level::Rank,
        Level::BankGroup,
        Level::Bank,
        Level::Row,
        Level::Column,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Level::Channel => "channel",
            Level::PseudoChannel => "pseudochannel",
            Level::Rank => "rank",
            Level::BankGroup => "bankgroup",
            Level::Bank => "bank",
            Level::Row => "row",
            Level::Column => "column",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("{level} count must be positive")]
    NonPositiveCount { level: Level },

    #[error("column granularity must be positive")]
    ZeroGranularity,

    #[error("{level} stride overflows the 64-bit address space")]
    Overflow { level: Level },

    #[error("address computation overflows the 64-bit address space")]
    AddressOverflow,

    #[error("address 0x{address:08x} exceeds device capacity 0x{capacity:x}")]
    AddressOutOfRange { address: u64, capacity: u64 },

    #[error("unknown organization preset: {0}")]
    UnknownPreset(String),
}

/// Counts of every hierarchy level plus the access granularity of a single column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub channels: u64,
    pub pseudo_channels: u64,
    pub ranks: u64,
    pub bank_groups: u64,
    pub banks: u64,
    pub rows: u64,
    pub columns: u64,
    /// Bytes moved by one column access.
    pub granularity: u64,
}

impl Organization {
    pub const fn count(&self, level: Level) -> u64 {
        match level {
            Level::Channel => self.channels,
            Level::PseudoChannel => self.pseudo_channels,
            Level::Rank => self.ranks,
            Level::BankGroup => self.bank_groups,
            Level::Bank => self.banks,
            Level::Row => self.rows,
            Level::Column => self.columns,
        }
    }

    fn count_mut(&mut self, level: Level) -> &mut u64 {
        match level {
            Level::Channel => &mut self.channels,
            Level::PseudoChannel => &mut self.pseudo_channels,
            Level::Rank => &mut self.ranks,
            Level::BankGroup => &mut self.bank_groups,
            Level::Bank => &mut self.banks,
            Level::Row => &mut self.rows,
            Level::Column => &mut self.columns,
        }
    }
}

impl Default for Organization {
    /// 16 channels of `HBM3_8Gb_2R` with 32-byte column accesses.
    fn default() -> Self {
        Organization {
            channels: 16,
            pseudo_channels: 2,
            ranks: 2,
            bank_groups: 4,
            banks: 4,
            rows: 1 << 14,
            columns: 1 << 5,
            granularity: 32,
        }
    }
}

/// An address within the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl From<Address> for u64 {
    fn from(addr: Address) -> u64 {
        addr.0
    }
}

/// Per-level indices of an address, as recovered by [`Geometry::decompose`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelIndices {
    indices: [u64; 7],
    /// Byte offset below column granularity.
    pub offset: u64,
}

impl LevelIndices {
    pub const fn get(&self, level: Level) -> u64 {
        self.indices[level.index()]
    }
}

/// An organization together with its derived strides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    org: Organization,
    strides: [u64; 7],
    capacity: u64,
}

impl Geometry {
    pub fn new(org: Organization) -> Result<Self, GeometryError> {
        if let Some(level) = Level::ALL.into_iter().find(|&level| org.count(level) == 0) {
            return Err(GeometryError::NonPositiveCount { level });
        }
        if org.granularity == 0 {
            return Err(GeometryError::ZeroGranularity);
        }

        // Finest level first: each stride spans everything below it.
        let mut strides = [0; 7];
        let mut stride = org.granularity;
        for level in Level::ALL.into_iter().rev() {
            strides[level.index()] = stride;
            stride = stride
                .checked_mul(org.count(level))
                .ok_or(GeometryError::Overflow { level })?;
        }

        Ok(Self {
            org,
            strides,
            capacity: stride,
        })
    }

    pub const fn organization(&self) -> &Organization {
        &self.org
    }

    pub const fn stride(&self, level: Level) -> u64 {
        self.strides[level.index()]
    }

    pub const fn count(&self, level: Level) -> u64 {
        self.org.count(level)
    }

    /// Total number of addressable bytes.
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Replace the count of one level, recomputing every coarser stride.
    pub fn with_count(&self, level: Level, count: u64) -> Result<Self, GeometryError> {
        let mut org = self.org;
        *org.count_mut(level) = count;
        Self::new(org)
    }

    /// Compute `base + sum(index * stride(level))`.
    ///
    /// Indices are not bounded by their level's count; a column index past the last column simply
    /// walks into the following rows. Only the device capacity is enforced.
    pub fn encode(&self, base: u64, indices: &[(Level, u64)]) -> Result<Address, GeometryError> {
        let mut addr = base;
        for &(level, index) in indices {
            addr = index
                .checked_mul(self.stride(level))
                .and_then(|offset| addr.checked_add(offset))
                .ok_or(GeometryError::AddressOverflow)?;
        }

        if addr >= self.capacity {
            return Err(GeometryError::AddressOutOfRange {
                address: addr,
                capacity: self.capacity,
            });
        }
        Ok(Address(addr))
    }

    pub fn decompose(&self, addr: Address) -> LevelIndices {
        let mut indices = [0; 7];
        let mut rem = addr.get();
        for level in Level::ALL {
            indices[level.index()] = rem / self.stride(level);
            rem %= self.stride(level);
        }
        LevelIndices {
            indices,
            offset: rem,
        }
    }
}
