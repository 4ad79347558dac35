//! Hardware ABI shared by the udoom driver core and the software accelerator model.
//!
//! Everything in here describes what the device sees: the BAR0 register map and its bit layouts,
//! the two-level page table entry format, the job ring geometry and descriptor encoding, and the
//! command packets the front-end understands. The [`hal`] module holds the traits that separate the
//! driver from whatever implements the device (real MMIO, or `udoom-sim` in tests).
#![forbid(unsafe_code)]

pub mod cmd;
pub mod hal;
pub mod paging;
pub mod regs;
pub mod ring;

pub use cmd::{CmdOpcode, CmdWriter, CMD_SIZE_BYTES, CMD_WORDS};
pub use hal::{Accelerator, DmaError, DmaMemory, IrqHandler, Mmio};
pub use paging::{PteFlags, PAGE_SHIFT, PAGE_SIZE};
pub use regs::{mmio, Enable, Intr, Reset};
pub use ring::{JobDescriptor, RING_SIZE_BYTES, RING_SLOT_COUNT, RING_SLOT_SIZE, WAIT_NONE};
