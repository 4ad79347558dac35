//! Seams between the driver core and the platform.
//!
//! The driver talks to the device only through [`Accelerator`] (register access plus interrupt
//! wiring) and obtains device-visible memory only through [`DmaMemory`]. A PCI binding implements
//! these over BAR0 and a coherent DMA allocator; `udoom-sim` implements them in software.

use std::sync::Arc;

use thiserror::Error;

use crate::paging::PAGE_SIZE;

/// 32-bit register access to BAR0.
pub trait Mmio: Send {
    fn read32(&mut self, offset: u32) -> u32;
    fn write32(&mut self, offset: u32, value: u32);
}

/// Interrupt service routine installed by the driver.
///
/// May be invoked from any thread, but never from inside an [`Mmio`] call: the driver holds its
/// device lock across register access and the handler takes the same lock. Implementations of
/// [`Accelerator`] must not hold their own locks while calling it either.
pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

pub trait Accelerator: Mmio {
    fn request_irq(&mut self, handler: IrqHandler);
    fn free_irq(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DmaError {
    #[error("out of DMA memory")]
    OutOfMemory,
}

/// Page-granular coherent DMA memory.
///
/// Addresses are bus addresses as the device sees them. Pages come back zeroed.
pub trait DmaMemory: Send + Sync {
    fn alloc_page(&self) -> Result<u64, DmaError>;
    fn free_page(&self, addr: u64);

    fn read(&self, addr: u64, buf: &mut [u8]);
    fn write(&self, addr: u64, buf: &[u8]);

    fn read_u32(&self, addr: u64) -> u32 {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf);
        u32::from_le_bytes(buf)
    }

    fn write_u32(&self, addr: u64, value: u32) {
        self.write(addr, &value.to_le_bytes());
    }

    fn zero_page(&self, addr: u64) {
        self.write(addr, &[0u8; PAGE_SIZE as usize]);
    }
}
