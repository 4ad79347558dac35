//! Per-client device address spaces.
//!
//! Each client owns a page directory plus the page tables its mappings need. Mappings are kept
//! sorted by VA and never overlap; a page table exists exactly while at least one mapped page
//! falls inside its 4 MiB span. Placement is first-fit over the sorted mapping list.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use udoom_abi::paging::{
    decode_entry, encode_entry, pdi, pdp_from_phys, pti, ENTRIES_PER_TABLE, ENTRY_SIZE_BYTES,
    VA_SPACE_PAGES,
};
use udoom_abi::{DmaMemory, PteFlags, PAGE_SHIFT};

use crate::buffer::Buffer;
use crate::device::InstanceId;
use crate::dma::DmaPage;
use crate::error::{DriverError, Result};

/// Drops the device's cached translations for one address space.
pub(crate) trait TlbFlush {
    fn invalidate(&self, pdp: u32);
}

struct Mapping {
    va: u32,
    pages: u32,
    read_only: bool,
    buffer: Buffer,
}

impl Mapping {
    fn first_page(&self) -> u32 {
        self.va >> PAGE_SHIFT
    }

    /// One past the last page; at most `VA_SPACE_PAGES`.
    fn end_page(&self) -> u32 {
        self.first_page() + self.pages
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingInfo {
    pub va: u32,
    pub pages: u32,
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableInfo {
    /// Directory index.
    pub index: u32,
    /// Number of present entries.
    pub used: u32,
}

#[derive(Debug)]
struct PageTable {
    page: DmaPage,
    used: u32,
}

pub(crate) struct AddressSpace {
    dma: Arc<dyn DmaMemory>,
    dma_mask: u64,
    /// Device attach whose buffers this space accepts.
    instance: InstanceId,
    directory: DmaPage,
    tables: BTreeMap<u32, PageTable>,
    mappings: Vec<Mapping>,
}

/// Pages `[first, end)` that fall inside table `index`.
fn table_span(index: u32, first: u32, end: u32) -> (u32, u32) {
    let lo = first.max(index * ENTRIES_PER_TABLE);
    let hi = end.min((index + 1) * ENTRIES_PER_TABLE);
    (lo, hi)
}

fn entry_offset(vpn: u32) -> u32 {
    (vpn % ENTRIES_PER_TABLE) * ENTRY_SIZE_BYTES
}

impl AddressSpace {
    pub(crate) fn new(dma: Arc<dyn DmaMemory>, dma_mask: u64, instance: InstanceId) -> Result<Self> {
        let directory = DmaPage::alloc(&dma, dma_mask)?;
        Ok(Self {
            dma,
            dma_mask,
            instance,
            directory,
            tables: BTreeMap::new(),
            mappings: Vec::new(),
        })
    }

    pub fn pagedir_phys(&self) -> u64 {
        self.directory.addr()
    }

    /// Address-space base as carried in job descriptors.
    pub fn pdp(&self) -> u32 {
        pdp_from_phys(self.directory.addr())
    }

    /// Maps all of `buffer` at the lowest free VA and returns that VA.
    ///
    /// Only buffers allocated by the same device attach are accepted.
    pub fn map(&mut self, buffer: Buffer, read_only: bool) -> Result<u32> {
        if buffer.instance() != self.instance {
            tracing::debug!("refusing buffer of another device");
            return Err(DriverError::DeviceMismatch);
        }
        let pages = buffer.page_count();
        let (pos, first) = self.find_gap(pages)?;
        let end = first + pages;
        let first_table = first / ENTRIES_PER_TABLE;
        let last_table = (end - 1) / ENTRIES_PER_TABLE;

        self.provision_tables(first_table, last_table)?;

        let mut flags = PteFlags::PRESENT;
        if !read_only {
            flags |= PteFlags::WRITABLE;
        }
        for (&index, table) in self.tables.range_mut(first_table..=last_table) {
            let (lo, hi) = table_span(index, first, end);
            for vpn in lo..hi {
                let phys = buffer.page_addr((vpn - first) as usize);
                table.page.write_u32(entry_offset(vpn), encode_entry(phys, flags));
            }
            table.used += hi - lo;
        }

        let va = first << PAGE_SHIFT;
        self.mappings.insert(
            pos,
            Mapping {
                va,
                pages,
                read_only,
                buffer,
            },
        );
        tracing::debug!(va = format_args!("{va:#x}"), pages, read_only, "mapped buffer");
        Ok(va)
    }

    /// Removes the mapping starting exactly at `va`.
    ///
    /// Freed page tables are handed back only after `tlb` has dropped the device's cached
    /// translations for this address space.
    pub fn unmap(&mut self, va: u32, tlb: &dyn TlbFlush) -> Result<()> {
        let pos = self
            .mappings
            .iter()
            .position(|m| m.va == va)
            .ok_or(DriverError::NotMapped { va })?;
        self.remove_at(pos, tlb);
        Ok(())
    }

    /// Unmaps everything, in VA order.
    pub fn clear(&mut self, tlb: &dyn TlbFlush) {
        while !self.mappings.is_empty() {
            self.remove_at(0, tlb);
        }
        debug_assert!(self.tables.is_empty());
    }

    fn remove_at(&mut self, pos: usize, tlb: &dyn TlbFlush) {
        let mapping = self.mappings.remove(pos);
        let va = mapping.va;
        let (first, end) = (mapping.first_page(), mapping.end_page());

        let mut freed = Vec::new();
        for index in first / ENTRIES_PER_TABLE..=(end - 1) / ENTRIES_PER_TABLE {
            let Some(table) = self.tables.get_mut(&index) else {
                debug_assert!(false, "mapped range without page table {index}");
                continue;
            };
            let (lo, hi) = table_span(index, first, end);
            for vpn in lo..hi {
                table.page.write_u32(entry_offset(vpn), 0);
            }
            debug_assert!(table.used >= hi - lo);
            table.used = table.used.saturating_sub(hi - lo);
            if table.used == 0 {
                self.directory.write_u32(index * ENTRY_SIZE_BYTES, 0);
                freed.extend(self.tables.remove(&index));
            }
        }

        tlb.invalidate(self.pdp());
        tracing::debug!(
            va = format_args!("{va:#x}"),
            pages = mapping.pages,
            tables_freed = freed.len(),
            "unmapped buffer"
        );
        drop(freed);
    }

    pub fn mappings(&self) -> Vec<MappingInfo> {
        self.mappings
            .iter()
            .map(|m| MappingInfo {
                va: m.va,
                pages: m.pages,
                read_only: m.read_only,
            })
            .collect()
    }

    pub fn page_tables(&self) -> Vec<PageTableInfo> {
        self.tables
            .iter()
            .map(|(&index, t)| PageTableInfo {
                index,
                used: t.used,
            })
            .collect()
    }

    /// Walks the tables the way the device does and returns the leaf entry's target and flags.
    pub fn translate(&self, va: u32) -> Option<(u64, PteFlags)> {
        let pde = self.directory.read_u32(pdi(va) * ENTRY_SIZE_BYTES);
        let (table_phys, pde_flags) = decode_entry(pde);
        if !pde_flags.contains(PteFlags::PRESENT) {
            return None;
        }
        let pte = self
            .dma
            .read_u32(table_phys + u64::from(pti(va) * ENTRY_SIZE_BYTES));
        let (page_phys, flags) = decode_entry(pte);
        flags
            .contains(PteFlags::PRESENT)
            .then_some((page_phys, flags))
    }

    /// First gap of at least `pages` free pages: the insertion index into the mapping list and
    /// the first page number of the gap.
    fn find_gap(&self, pages: u32) -> Result<(usize, u32)> {
        let mut prev_end = 0u32;
        for (i, m) in self.mappings.iter().enumerate() {
            if m.first_page() - prev_end >= pages {
                return Ok((i, prev_end));
            }
            prev_end = m.end_page();
        }
        if VA_SPACE_PAGES - prev_end >= pages {
            Ok((self.mappings.len(), prev_end))
        } else {
            Err(DriverError::NoVaSpace { pages })
        }
    }

    /// Ensures tables `first..=last` exist. Either every missing table is allocated and linked
    /// into the directory, or nothing changes.
    fn provision_tables(&mut self, first: u32, last: u32) -> Result<()> {
        let mut fresh = Vec::new();
        for index in first..=last {
            if !self.tables.contains_key(&index) {
                fresh.push((index, DmaPage::alloc(&self.dma, self.dma_mask)?));
            }
        }
        for (index, page) in fresh {
            self.directory.write_u32(
                index * ENTRY_SIZE_BYTES,
                encode_entry(page.addr(), PteFlags::PRESENT),
            );
            self.tables.insert(index, PageTable { page, used: 0 });
        }
        Ok(())
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("pagedir", &format_args!("{:#x}", self.directory.addr()))
            .field("mappings", &self.mappings())
            .field("tables", &self.page_tables())
            .finish()
    }
}
