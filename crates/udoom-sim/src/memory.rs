//! Sparse page-granular DMA memory.
//!
//! Frames are only materialized when written, so tests can allocate gigabytes of address space
//! without touching real memory. Reads of unallocated addresses return all-ones like an
//! unclaimed bus; writes to them are dropped.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use udoom_abi::{DmaError, DmaMemory, PAGE_SIZE};

use crate::SimConfig;

const PAGE: u64 = PAGE_SIZE as u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub allocated_pages: usize,
    pub peak_pages: usize,
    /// Frees of addresses that were not allocated.
    pub bad_frees: usize,
}

#[derive(Debug)]
struct Inner {
    next: u64,
    free: Vec<u64>,
    allocated: HashSet<u64>,
    frames: HashMap<u64, Box<[u8]>>,
    limit: Option<usize>,
    stats: MemoryStats,
}

#[derive(Debug)]
pub struct SimMemory {
    inner: Mutex<Inner>,
}

impl SimMemory {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next: config.base_addr & !(PAGE - 1),
                free: Vec::new(),
                allocated: HashSet::new(),
                frames: HashMap::new(),
                limit: config.page_limit,
                stats: MemoryStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn allocated_pages(&self) -> usize {
        self.lock().allocated.len()
    }

    pub fn stats(&self) -> MemoryStats {
        self.lock().stats
    }

    pub fn is_allocated(&self, addr: u64) -> bool {
        self.lock().allocated.contains(&(addr & !(PAGE - 1)))
    }

    /// Caps the number of simultaneously allocated pages.
    pub fn set_page_limit(&self, limit: Option<usize>) {
        self.lock().limit = limit;
    }
}

impl DmaMemory for SimMemory {
    fn alloc_page(&self) -> Result<u64, DmaError> {
        let mut inner = self.lock();
        if inner.limit.is_some_and(|limit| inner.allocated.len() >= limit) {
            return Err(DmaError::OutOfMemory);
        }
        let addr = match inner.free.pop() {
            Some(addr) => addr,
            None => {
                let addr = inner.next;
                inner.next += PAGE;
                addr
            }
        };
        inner.allocated.insert(addr);
        inner.stats.allocated_pages = inner.allocated.len();
        inner.stats.peak_pages = inner.stats.peak_pages.max(inner.allocated.len());
        Ok(addr)
    }

    fn free_page(&self, addr: u64) {
        let mut inner = self.lock();
        if inner.allocated.remove(&addr) {
            inner.frames.remove(&addr);
            inner.free.push(addr);
            inner.stats.allocated_pages = inner.allocated.len();
        } else {
            inner.stats.bad_frees += 1;
            tracing::error!(addr = format_args!("{addr:#x}"), "free of unallocated DMA page");
        }
    }

    fn read(&self, addr: u64, buf: &mut [u8]) {
        let inner = self.lock();
        let mut done = 0;
        while done < buf.len() {
            let cur = addr + done as u64;
            let page = cur & !(PAGE - 1);
            let off = (cur - page) as usize;
            let chunk = (buf.len() - done).min(PAGE as usize - off);
            let dst = &mut buf[done..done + chunk];
            match inner.frames.get(&page) {
                Some(frame) => dst.copy_from_slice(&frame[off..off + chunk]),
                None if inner.allocated.contains(&page) => dst.fill(0),
                None => dst.fill(0xFF),
            }
            done += chunk;
        }
    }

    fn write(&self, addr: u64, buf: &[u8]) {
        let mut inner = self.lock();
        let mut done = 0;
        while done < buf.len() {
            let cur = addr + done as u64;
            let page = cur & !(PAGE - 1);
            let off = (cur - page) as usize;
            let chunk = (buf.len() - done).min(PAGE as usize - off);
            if inner.allocated.contains(&page) {
                let frame = inner
                    .frames
                    .entry(page)
                    .or_insert_with(|| vec![0u8; PAGE as usize].into_boxed_slice());
                frame[off..off + chunk].copy_from_slice(&buf[done..done + chunk]);
            } else {
                tracing::trace!(addr = format_args!("{cur:#x}"), "write to unallocated DMA page dropped");
            }
            done += chunk;
        }
    }

    fn zero_page(&self, addr: u64) {
        self.lock().frames.remove(&(addr & !(PAGE - 1)));
    }
}
