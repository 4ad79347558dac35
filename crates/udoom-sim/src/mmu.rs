use std::collections::HashMap;

use udoom_abi::paging::{decode_entry, page_offset, pdi, pdp_to_phys, pti, ENTRY_SIZE_BYTES};
use udoom_abi::{DmaMemory, Intr, PteFlags, PAGE_SHIFT};

use crate::memory::SimMemory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub kind: Intr,
    pub va: u32,
}

impl Fault {
    pub(crate) fn new(kind: Intr, va: u32) -> Self {
        Self { kind, va }
    }
}

/// Translation cache keyed by address space and page number. Holds leaf entries only, so a stale
/// entry survives page-table edits until the driver invalidates it.
#[derive(Debug, Default)]
pub(crate) struct Tlb {
    entries: HashMap<(u32, u32), u32>,
}

impl Tlb {
    pub(crate) fn translate(
        &mut self,
        mem: &SimMemory,
        pdp: u32,
        va: u32,
        write: bool,
    ) -> Result<u64, Fault> {
        let vpn = va >> PAGE_SHIFT;
        let pte = match self.entries.get(&(pdp, vpn)) {
            Some(&pte) => pte,
            None => {
                let pte = walk(mem, pdp, va).ok_or(Fault::new(Intr::PAGE_FAULT, va))?;
                self.entries.insert((pdp, vpn), pte);
                pte
            }
        };
        let (page, flags) = decode_entry(pte);
        if write && !flags.contains(PteFlags::WRITABLE) {
            return Err(Fault::new(Intr::WRITE_FAULT, va));
        }
        Ok(page + u64::from(page_offset(va)))
    }

    pub(crate) fn invalidate(&mut self, pdp: u32) {
        self.entries.retain(|&(space, _), _| space != pdp);
    }

    pub(crate) fn flush(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Two-level walk; `None` if either level is not present.
fn walk(mem: &SimMemory, pdp: u32, va: u32) -> Option<u32> {
    let pde = mem.read_u32(pdp_to_phys(pdp) + u64::from(pdi(va) * ENTRY_SIZE_BYTES));
    let (table, flags) = decode_entry(pde);
    if !flags.contains(PteFlags::PRESENT) {
        return None;
    }
    let pte = mem.read_u32(table + u64::from(pti(va) * ENTRY_SIZE_BYTES));
    let (_, flags) = decode_entry(pte);
    flags.contains(PteFlags::PRESENT).then_some(pte)
}

#[cfg(test)]
mod tests {
    use super::*;
    use udoom_abi::paging::{encode_entry, pdp_from_phys};

    use crate::SimConfig;

    struct Space {
        mem: SimMemory,
        pdp: u32,
        table: u64,
        page: u64,
    }

    /// Maps VA 0x0040_3000 to one page, read-only unless `writable`.
    fn space(writable: bool) -> Space {
        let mem = SimMemory::new(&SimConfig::default());
        let dir = mem.alloc_page().unwrap();
        let table = mem.alloc_page().unwrap();
        let page = mem.alloc_page().unwrap();
        mem.write_u32(dir + 4, encode_entry(table, PteFlags::PRESENT));
        let mut flags = PteFlags::PRESENT;
        if writable {
            flags |= PteFlags::WRITABLE;
        }
        mem.write_u32(table + 3 * 4, encode_entry(page, flags));
        Space {
            pdp: pdp_from_phys(dir),
            mem,
            table,
            page,
        }
    }

    #[test]
    fn walk_resolves_offset_within_page() {
        let s = space(true);
        let mut tlb = Tlb::default();
        assert_eq!(tlb.translate(&s.mem, s.pdp, 0x0040_3ABC, true), Ok(s.page + 0xABC));
        assert_eq!(
            tlb.translate(&s.mem, s.pdp, 0x0040_4000, false),
            Err(Fault::new(Intr::PAGE_FAULT, 0x0040_4000))
        );
        assert_eq!(
            tlb.translate(&s.mem, s.pdp, 0x0000_3000, false),
            Err(Fault::new(Intr::PAGE_FAULT, 0x3000))
        );
    }

    #[test]
    fn read_only_entry_faults_on_write() {
        let s = space(false);
        let mut tlb = Tlb::default();
        assert!(tlb.translate(&s.mem, s.pdp, 0x0040_3000, false).is_ok());
        assert_eq!(
            tlb.translate(&s.mem, s.pdp, 0x0040_3010, true),
            Err(Fault::new(Intr::WRITE_FAULT, 0x0040_3010))
        );
    }

    #[test]
    fn cached_translation_outlives_table_edit_until_invalidated() {
        let s = space(true);
        let mut tlb = Tlb::default();
        tlb.translate(&s.mem, s.pdp, 0x0040_3000, true).unwrap();

        s.mem.write_u32(s.table + 3 * 4, 0);
        assert!(tlb.translate(&s.mem, s.pdp, 0x0040_3000, true).is_ok());

        tlb.invalidate(s.pdp.wrapping_add(1));
        assert_eq!(tlb.len(), 1);
        tlb.invalidate(s.pdp);
        assert!(tlb.translate(&s.mem, s.pdp, 0x0040_3000, true).is_err());
    }
}
