//! BAR0 register map.
//!
//! All registers are 32-bit. `INTR` is write-1-to-clear. The batch registers (`BATCH_*`) hold byte
//! offsets into the one-page job ring, always multiples of [`crate::RING_SLOT_SIZE`].

use bitflags::bitflags;

pub mod mmio {
    /// Block enables; see [`super::Enable`].
    pub const ENABLE: u32 = 0x0000;
    /// Write-only reset strobes; see [`super::Reset`].
    pub const RESET: u32 = 0x0004;
    /// Pending interrupt status (write 1 to clear); see [`super::Intr`].
    pub const INTR: u32 = 0x0008;
    pub const INTR_ENABLE: u32 = 0x000C;
    /// Device VA that caused the most recent fault.
    pub const FAULT_VA: u32 = 0x0010;
    /// Write an address-space base (`pagedir >> 12`) to drop its cached translations.
    pub const TLB_INVALIDATE: u32 = 0x0014;

    /// Physical address of the ring page, shifted right by 8.
    pub const BATCH_RING: u32 = 0x0020;
    pub const BATCH_GET: u32 = 0x0024;
    pub const BATCH_PUT: u32 = 0x0028;
    /// Raise `Intr::BATCH_WAIT` when `BATCH_GET` advances onto this offset.
    pub const BATCH_WAIT: u32 = 0x002C;
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Enable: u32 {
        /// Fetch descriptors from the ring.
        const BATCH = 1 << 0;
        /// Command front-end.
        const FE = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Intr: u32 {
        const BATCH_WAIT = 1 << 0;
        /// Unknown command opcode.
        const FE_ERROR = 1 << 1;
        /// Command stream ended in the middle of a packet.
        const CMD_OVERRUN = 1 << 2;
        /// Translation hit a non-present directory or table entry.
        const PAGE_FAULT = 1 << 3;
        /// Write through a read-only mapping.
        const WRITE_FAULT = 1 << 4;
    }
}

impl Intr {
    /// Every bit that means the job at `BATCH_GET` failed.
    pub const FAULTS: Intr = Intr::FE_ERROR
        .union(Intr::CMD_OVERRUN)
        .union(Intr::PAGE_FAULT)
        .union(Intr::WRITE_FAULT);

    pub fn is_fault(self) -> bool {
        self.intersects(Self::FAULTS)
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Reset: u32 {
        /// Abort the current job and clear the halted-on-fault state.
        const PIPELINE = 1 << 0;
        /// Flush every cached user translation.
        const TLB_USER = 1 << 1;
    }
}
