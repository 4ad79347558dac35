//! Client sessions.
//!
//! A [`Client`] is one open of a device node. It owns a private address space and submits jobs
//! into the device's shared ring. Dropping it (or calling [`Client::close`]) blocks until the
//! client's jobs have left the ring, then tears down its mappings.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use udoom_abi::PteFlags;

use crate::address_space::{AddressSpace, MappingInfo, PageTableInfo};
use crate::buffer::Buffer;
use crate::device::{Canceller, Device};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub(crate) u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct Client {
    id: ClientId,
    device: Device,
    vm: Mutex<AddressSpace>,
    pdp: u32,
}

impl Client {
    pub fn open(device: &Device) -> Result<Self> {
        let vm = AddressSpace::new(device.dma(), device.config().dma_mask(), device.instance())?;
        let pdp = vm.pdp();
        let id = device.open_session()?;
        tracing::debug!(client = %id, device = %device.name(), pagedir = format_args!("{:#x}", vm.pagedir_phys()), "opened client");
        Ok(Self {
            id,
            device: device.clone(),
            vm: Mutex::new(vm),
            pdp,
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn vm(&self) -> MutexGuard<'_, AddressSpace> {
        self.vm.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_buffer(&self, size: u32) -> Result<Buffer> {
        self.device.create_buffer(size)
    }

    /// Maps `buffer` into this client's address space and returns its device VA.
    pub fn map_buffer(&self, buffer: &Buffer, read_only: bool) -> Result<u32> {
        self.vm().map(buffer.clone(), read_only)
    }

    pub fn unmap_buffer(&self, va: u32) -> Result<()> {
        self.vm().unmap(va, &self.device)
    }

    /// Queues the command stream at `va`. Blocks while the ring is full.
    pub fn run(&self, va: u32, size: u32) -> Result<()> {
        self.device.submit(self.id, self.pdp, va, size)
    }

    /// Waits for the `jobs_back`-th most recent of this client's jobs (0 = the latest).
    pub fn wait(&self, jobs_back: u32) -> Result<()> {
        self.device.wait_jobs(self.id, jobs_back)
    }

    pub fn canceller(&self) -> Canceller {
        Canceller::new(&self.device, self.id)
    }

    /// Whether one of this client's jobs has faulted.
    pub fn is_quarantined(&self) -> bool {
        self.device.is_quarantined(self.id)
    }

    pub fn mappings(&self) -> Vec<MappingInfo> {
        self.vm().mappings()
    }

    pub fn page_tables(&self) -> Vec<PageTableInfo> {
        self.vm().page_tables()
    }

    pub fn translate(&self, va: u32) -> Option<(u64, PteFlags)> {
        self.vm().translate(va)
    }

    pub fn close(self) {}
}

impl Drop for Client {
    fn drop(&mut self) {
        self.device.close_session(self.id);
        let vm = self.vm.get_mut().unwrap_or_else(PoisonError::into_inner);
        vm.clear(&self.device);
        tracing::debug!(client = %self.id, "closed client");
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("device", &self.device.index())
            .field("pdp", &format_args!("{:#x}", self.pdp))
            .finish()
    }
}
