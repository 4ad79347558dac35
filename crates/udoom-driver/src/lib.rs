//! Driver core for the udoom drawing accelerator.
//!
//! Several [`Client`]s share one device. Each client maps [`Buffer`]s into a private 32-bit
//! device address space backed by software-maintained two-level page tables, then submits jobs
//! (command streams by VA and size) into the device's single job ring. Completion is observed
//! through one programmable ring-position interrupt that all blocked waiters share; a job that
//! faults quarantines only its owner.
//!
//! The hardware is reached through the [`udoom_abi::Accelerator`] and [`udoom_abi::DmaMemory`]
//! traits, so the same core drives real registers or the `udoom-sim` model.
#![forbid(unsafe_code)]

mod address_space;
mod buffer;
mod client;
mod config;
mod device;
mod dma;
pub mod error;
mod irq;
mod registry;
mod ring;
mod wait;

pub use address_space::{MappingInfo, PageTableInfo};
pub use buffer::Buffer;
pub use client::{Client, ClientId};
pub use config::{DeviceConfig, RegistryConfig, MAX_DEVICES};
pub use device::{Canceller, Device, DeviceStats};
pub use error::{DriverError, ErrorKind, Result};
pub use registry::DeviceRegistry;
