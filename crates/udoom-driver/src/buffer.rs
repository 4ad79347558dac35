//! Page-granular DMA buffers.
//!
//! A [`Buffer`] is a cheap handle; every clone and every mapping that uses it holds a reference,
//! and the backing pages go back to the allocator when the last one is dropped. Buffers are not
//! tied to any address space, only to the device instance that allocated them.

use std::fmt;
use std::sync::Arc;

use udoom_abi::paging::page_count;
use udoom_abi::{DmaMemory, PAGE_SIZE};

use crate::device::InstanceId;
use crate::dma::{alloc_pages, DmaPage};
use crate::error::{DriverError, Result};

#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

struct BufferInner {
    size: u32,
    pages: Vec<DmaPage>,
    instance: InstanceId,
}

impl Buffer {
    pub(crate) fn allocate(
        dma: &Arc<dyn DmaMemory>,
        mask: u64,
        size: u32,
        instance: InstanceId,
    ) -> Result<Self> {
        let count = page_count(size).ok_or(DriverError::InvalidSize)?;
        let pages = alloc_pages(dma, mask, count)?;
        tracing::debug!(size, pages = count, "created buffer");
        Ok(Self {
            inner: Arc::new(BufferInner {
                size,
                pages,
                instance,
            }),
        })
    }

    /// Size requested at creation.
    pub fn size(&self) -> u32 {
        self.inner.size
    }

    pub fn page_count(&self) -> u32 {
        self.inner.pages.len() as u32
    }

    /// Bytes accessible from the CPU: the size rounded up to whole pages.
    pub fn extent(&self) -> u64 {
        u64::from(self.page_count()) * u64::from(PAGE_SIZE)
    }

    /// Number of live references: handles plus mappings.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub(crate) fn instance(&self) -> InstanceId {
        self.inner.instance
    }

    pub(crate) fn page_addr(&self, index: usize) -> u64 {
        self.inner.pages[index].addr()
    }

    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        let mut done = 0;
        while done < buf.len() {
            let (page, in_page, chunk) = self.locate(offset + done as u64, buf.len() - done);
            page.read(in_page, &mut buf[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    pub fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        let mut done = 0;
        while done < buf.len() {
            let (page, in_page, chunk) = self.locate(offset + done as u64, buf.len() - done);
            page.write(in_page, &buf[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    pub fn read_u8(&self, offset: u64) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read(offset, &mut b)?;
        Ok(b[0])
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        let extent = self.extent();
        let in_range = offset
            .checked_add(len as u64)
            .is_some_and(|end| end <= extent);
        if !in_range {
            return Err(DriverError::OutOfRange {
                offset,
                len,
                size: extent,
            });
        }
        Ok(())
    }

    fn locate(&self, offset: u64, remaining: usize) -> (&DmaPage, u32, usize) {
        let page_size = u64::from(PAGE_SIZE);
        let page = &self.inner.pages[(offset / page_size) as usize];
        let in_page = (offset % page_size) as u32;
        let chunk = remaining.min((PAGE_SIZE - in_page) as usize);
        (page, in_page, chunk)
    }
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        tracing::trace!(size = self.size, pages = self.pages.len(), "releasing buffer");
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.inner.size)
            .field("pages", &self.inner.pages.len())
            .field("instance", &self.inner.instance)
            .finish()
    }
}
