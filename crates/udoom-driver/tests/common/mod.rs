//! Shared helpers for `udoom-driver` integration tests.
#![allow(dead_code)]

use std::time::{Duration, Instant};

use udoom_abi::{CmdWriter, PAGE_SIZE};
use udoom_driver::{Buffer, Client, Device, DeviceConfig, DeviceRegistry};
use udoom_sim::{SimAccelerator, SimConfig, SimDevice};

/// A simulated device attached through a registry.
///
/// Fields drop in order, so the driver side goes away before the simulator it talks to.
pub struct Rig {
    pub device: Device,
    pub registry: DeviceRegistry,
    pub sim: SimDevice,
}

impl Rig {
    pub fn new(config: SimConfig) -> Self {
        let sim = SimDevice::new(config);
        let registry = DeviceRegistry::default();
        let device = registry
            .attach(Box::new(sim.accelerator()), sim.memory(), DeviceConfig::default())
            .unwrap();
        Self {
            device,
            registry,
            sim,
        }
    }

    /// Device with no executor thread; jobs only run when the test steps it.
    pub fn manual() -> Self {
        Self::new(SimConfig::manual())
    }

    pub fn autorun() -> Self {
        Self::new(SimConfig::default())
    }

    pub fn hw(&self) -> SimAccelerator {
        self.sim.accelerator()
    }

    pub fn open(&self) -> Client {
        Client::open(&self.device).unwrap()
    }
}

/// A client buffer mapped read-write with room for a command stream in its last page.
pub struct Scratch {
    pub buffer: Buffer,
    pub va: u32,
    pages: u32,
}

impl Scratch {
    pub fn new(client: &Client, pages: u32) -> Self {
        let buffer = client.create_buffer(pages * PAGE_SIZE).unwrap();
        let va = client.map_buffer(&buffer, false).unwrap();
        Self { buffer, va, pages }
    }

    /// VA of the command area (start of the last page).
    pub fn cmd_va(&self) -> u32 {
        self.va + (self.pages - 1) * PAGE_SIZE
    }

    /// Writes `stream` into the command area and returns its VA and length.
    pub fn load(&self, stream: &[u8]) -> (u32, u32) {
        let offset = u64::from((self.pages - 1) * PAGE_SIZE);
        self.buffer.write(offset, stream).unwrap();
        (self.cmd_va(), stream.len() as u32)
    }

    /// Loads a single 1x1 fill of `color` at pixel `x` of the first page.
    pub fn load_dot(&self, x: u16, color: u8) -> (u32, u32) {
        let mut w = CmdWriter::new();
        w.fill_rect(color, self.va, 0, x, 0, 1, 1);
        self.load(&w.finish())
    }

    pub fn pixel(&self, offset: u64) -> u8 {
        self.buffer.read_u8(offset).unwrap()
    }
}

/// Polls `cond` until it holds; panics after a few seconds.
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}
