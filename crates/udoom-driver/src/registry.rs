//! Device registry: assigns `udoomN` minors and tracks attached devices.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use udoom_abi::{Accelerator, DmaMemory};

use crate::config::{DeviceConfig, RegistryConfig};
use crate::device::Device;
use crate::error::{DriverError, Result};

/// Table of attached devices, indexed by minor number.
#[derive(Debug)]
pub struct DeviceRegistry {
    config: RegistryConfig,
    slots: Mutex<Vec<Option<Device>>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl DeviceRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(Vec::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Option<Device>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Brings up a device at the lowest free index.
    pub fn attach(
        &self,
        hw: Box<dyn Accelerator>,
        dma: Arc<dyn DmaMemory>,
        config: DeviceConfig,
    ) -> Result<Device> {
        let mut slots = self.slots();
        let index = match slots.iter().position(Option::is_none) {
            Some(free) => free,
            None if slots.len() < self.config.max_devices => {
                slots.push(None);
                slots.len() - 1
            }
            None => {
                tracing::warn!(max = self.config.max_devices, "no free device slot");
                return Err(DriverError::NoDeviceSlot {
                    max: self.config.max_devices,
                });
            }
        };

        let device = Device::attach(index, hw, dma, config)?;
        slots[index] = Some(device.clone());
        Ok(device)
    }

    /// Disables the device at `index` and frees the index for reuse.
    pub fn detach(&self, index: usize) -> Result<()> {
        let device = self
            .slots()
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(DriverError::NoSuchDevice(index))?;
        device.detach();
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<Device> {
        self.slots().get(index).cloned().flatten()
    }

    pub fn len(&self) -> usize {
        self.slots().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
