//! Two-level device page tables.
//!
//! A device VA is 32 bits: `pdi[31:22] | pti[21:12] | offset[11:0]`. The page directory and each
//! page table are one page holding 1024 little-endian `u32` entries. An entry stores the target's
//! physical address shifted right by [`ENTRY_PA_SHIFT`]; since targets are page aligned the low
//! four bits are free for [`PteFlags`]. This limits physical addresses to 40 bits.

use bitflags::bitflags;

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: u32 = 1 << PAGE_SHIFT;

pub const ENTRIES_PER_TABLE: u32 = 1024;
pub const ENTRY_SIZE_BYTES: u32 = 4;

/// Number of pages in the 32-bit device address space.
pub const VA_SPACE_PAGES: u32 = 1 << (32 - PAGE_SHIFT);

pub const ENTRY_PA_SHIFT: u32 = 8;
/// A job descriptor carries the page directory address shifted right by this amount.
pub const PDP_SHIFT: u32 = 12;

/// Widest physical address an entry can express.
pub const MAX_PHYS_BITS: u8 = 40;

const ENTRY_FLAGS_MASK: u32 = 0xF;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PteFlags: u32 {
        const PRESENT = 1 << 0;
        /// Ignored in directory entries.
        const WRITABLE = 1 << 1;
    }
}

#[inline]
pub const fn pdi(va: u32) -> u32 {
    va >> 22
}

#[inline]
pub const fn pti(va: u32) -> u32 {
    (va >> PAGE_SHIFT) & (ENTRIES_PER_TABLE - 1)
}

#[inline]
pub const fn page_offset(va: u32) -> u32 {
    va & (PAGE_SIZE - 1)
}

/// Number of whole pages needed to hold `size` bytes.
///
/// Returns `None` for a zero size. Every nonzero `u32` size fits: the largest rounds up to
/// [`VA_SPACE_PAGES`].
pub fn page_count(size: u32) -> Option<u32> {
    if size == 0 {
        return None;
    }
    Some((u64::from(size).div_ceil(u64::from(PAGE_SIZE))) as u32)
}

/// Encodes a directory or table entry pointing at the page at `phys`.
///
/// `phys` must be page aligned and below 2^40.
pub fn encode_entry(phys: u64, flags: PteFlags) -> u32 {
    debug_assert_eq!(phys % u64::from(PAGE_SIZE), 0, "entry target must be page aligned");
    debug_assert!(phys >> MAX_PHYS_BITS == 0, "entry target exceeds 40 bits");
    ((phys >> ENTRY_PA_SHIFT) as u32) | flags.bits()
}

/// Splits an entry into its target physical address and flags.
pub fn decode_entry(entry: u32) -> (u64, PteFlags) {
    let phys = u64::from(entry & !ENTRY_FLAGS_MASK) << ENTRY_PA_SHIFT;
    (phys, PteFlags::from_bits_truncate(entry))
}

/// Address-space base as carried in a job descriptor.
pub fn pdp_from_phys(pagedir_phys: u64) -> u32 {
    (pagedir_phys >> PDP_SHIFT) as u32
}

pub fn pdp_to_phys(pdp: u32) -> u64 {
    u64::from(pdp) << PDP_SHIFT
}
