//! Device-visible buffers shared between clients.

use std::fmt;
use std::sync::Arc;

use udoom_abi::{DmaMemory, PAGE_SIZE};

use crate::error::{DriverError, Result};

/// One coherent DMA page, returned to its allocator on drop.
pub(crate) struct DmaPage {
    dma: Arc<dyn DmaMemory>,
    addr: u64,
}

impl DmaPage {
    /// Allocates a zeroed page reachable through `mask`.
    pub(crate) fn alloc(dma: &Arc<dyn DmaMemory>, mask: u64) -> Result<Self> {
        let addr = dma.alloc_page()?;
        let page = Self {
            dma: Arc::clone(dma),
            addr,
        };
        if addr & !mask != 0 || addr % u64::from(PAGE_SIZE) != 0 {
            tracing::warn!(addr = format_args!("{addr:#x}"), mask = format_args!("{mask:#x}"), "DMA page outside device reach");
            return Err(DriverError::OutOfMemory);
        }
        page.dma.zero_page(addr);
        Ok(page)
    }

    pub(crate) fn addr(&self) -> u64 {
        self.addr
    }

    pub(crate) fn read(&self, offset: u32, buf: &mut [u8]) {
        debug_assert!(offset as usize + buf.len() <= PAGE_SIZE as usize);
        self.dma.read(self.addr + u64::from(offset), buf);
    }

    pub(crate) fn write(&self, offset: u32, buf: &[u8]) {
        debug_assert!(offset as usize + buf.len() <= PAGE_SIZE as usize);
        self.dma.write(self.addr + u64::from(offset), buf);
    }

    pub(crate) fn read_u32(&self, offset: u32) -> u32 {
        self.dma.read_u32(self.addr + u64::from(offset))
    }

    pub(crate) fn write_u32(&self, offset: u32, value: u32) {
        self.dma.write_u32(self.addr + u64::from(offset), value);
    }
}

impl Drop for DmaPage {
    fn drop(&mut self) {
        self.dma.free_page(self.addr);
    }
}

impl fmt::Debug for DmaPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaPage")
            .field("addr", &format_args!("{:#x}", self.addr))
            .finish()
    }
}

/// Allocates `count` pages, releasing any already obtained if one allocation fails.
pub(crate) fn alloc_pages(dma: &Arc<dyn DmaMemory>, mask: u64, count: u32) -> Result<Vec<DmaPage>> {
    (0..count).map(|_| DmaPage::alloc(dma, mask)).collect()
}
