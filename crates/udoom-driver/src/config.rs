//! Registry and per-device tunables.

use udoom_abi::paging::MAX_PHYS_BITS;

use crate::error::{DriverError, Result};

/// Upper bound on simultaneously attached devices (`udoom0` .. `udoom255`).
pub const MAX_DEVICES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Width of bus addresses the device can reach. Page-table entries carry 40 bits, so wider
    /// masks are rejected; narrower ones model a bus that cannot reach all of memory.
    pub dma_mask_bits: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            dma_mask_bits: MAX_PHYS_BITS,
        }
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<()> {
        if !(32..=MAX_PHYS_BITS).contains(&self.dma_mask_bits) {
            return Err(DriverError::InvalidConfig("dma_mask_bits must be within 32..=40"));
        }
        Ok(())
    }

    pub fn dma_mask(&self) -> u64 {
        (1u64 << self.dma_mask_bits) - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    pub max_devices: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_devices: MAX_DEVICES,
        }
    }
}
