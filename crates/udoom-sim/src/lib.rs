//! Software model of the udoom accelerator.
//!
//! [`SimDevice`] bundles sparse DMA memory with a device that walks the two-level page tables
//! (through a TLB that only the driver's invalidations clear), fetches descriptors from the job
//! ring, executes `FILL_RECT`/`DRAW_LINE` packets and raises interrupts. It either runs on its
//! own executor thread or is stepped by hand for deterministic tests.
#![forbid(unsafe_code)]

mod accel;
mod exec;
mod memory;
mod mmu;

use std::sync::Arc;
use std::thread::JoinHandle;

use udoom_abi::DmaMemory;

pub use accel::{Registers, SimAccelerator, SimStats};
pub use memory::{MemoryStats, SimMemory};
pub use mmu::Fault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// Execute jobs on a background thread as soon as they are queued.
    pub autorun: bool,
    /// Cap on simultaneously allocated DMA pages.
    pub page_limit: Option<usize>,
    /// First DMA address handed out. Defaults above 4 GiB so entries exercise all 40 bits.
    pub base_addr: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            autorun: true,
            page_limit: None,
            base_addr: 0x1_0000_0000,
        }
    }
}

impl SimConfig {
    /// No executor thread; the test drives the device with [`SimAccelerator::step`].
    pub fn manual() -> Self {
        Self {
            autorun: false,
            ..Self::default()
        }
    }
}

pub struct SimDevice {
    accel: SimAccelerator,
    memory: Arc<SimMemory>,
    worker: Option<JoinHandle<()>>,
}

impl SimDevice {
    pub fn new(config: SimConfig) -> Self {
        let memory = Arc::new(SimMemory::new(&config));
        let accel = SimAccelerator::new(Arc::clone(&memory));
        let worker = config.autorun.then(|| {
            let accel = accel.clone();
            std::thread::Builder::new()
                .name("udoom-sim".into())
                .spawn(move || accel.run_worker())
        });
        let worker = match worker {
            Some(Ok(handle)) => Some(handle),
            Some(Err(err)) => {
                tracing::error!(%err, "failed to spawn simulator thread; falling back to manual stepping");
                None
            }
            None => None,
        };
        Self {
            accel,
            memory,
            worker,
        }
    }

    pub fn accelerator(&self) -> SimAccelerator {
        self.accel.clone()
    }

    pub fn memory(&self) -> Arc<dyn DmaMemory> {
        self.memory.clone()
    }

    pub fn sim_memory(&self) -> &Arc<SimMemory> {
        &self.memory
    }

    pub fn allocated_pages(&self) -> usize {
        self.memory.allocated_pages()
    }

    pub fn is_autorun(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.accel.stop_worker();
            let _ = worker.join();
        }
    }
}
