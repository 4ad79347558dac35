#![allow(dead_code)]

use udoom_abi::CmdWriter;
use udoom_driver::{Buffer, Client, Device, DeviceConfig, DeviceRegistry, DriverError};
use udoom_sim::{SimConfig, SimDevice};

/// Pitch of the 0x40 x 0x40 drawing area every scenario uses.
pub const PITCH: u32 = 0x40;
pub const COLOR: u8 = 0xAA;

/// Two simulated devices attached as `udoom0` and `udoom1`.
pub struct Bench {
    pub devices: Vec<Device>,
    pub registry: DeviceRegistry,
    pub sims: Vec<SimDevice>,
}

impl Bench {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_test_writer()
            .try_init();

        let registry = DeviceRegistry::default();
        let sims: Vec<SimDevice> = (0..2).map(|_| SimDevice::new(SimConfig::default())).collect();
        let devices = sims
            .iter()
            .map(|sim| {
                registry
                    .attach(Box::new(sim.accelerator()), sim.memory(), DeviceConfig::default())
                    .unwrap()
            })
            .collect();
        Self {
            devices,
            registry,
            sims,
        }
    }

    pub fn open(&self, index: usize) -> Client {
        Client::open(&self.devices[index]).unwrap()
    }

    pub fn open0(&self) -> Client {
        self.open(0)
    }

    pub fn open1(&self) -> Client {
        self.open(1)
    }
}

/// A single `DRAW_LINE` from `(0, 0)` to `(last, last)` in [`COLOR`].
pub fn diagonal(dst: u32, last: u16) -> Vec<u8> {
    let mut w = CmdWriter::new();
    w.draw_line(COLOR, dst, PITCH, 0, 0, last, last);
    w.finish()
}

/// Checks the drawing area at the start of `buffer`: [`COLOR`] on `(i, i)` for `i <= last`, zero
/// everywhere else. `None` expects an untouched area.
pub fn assert_diagonal(buffer: &Buffer, last: Option<u32>) {
    let mut area = vec![0u8; (PITCH * PITCH) as usize];
    buffer.read(0, &mut area).unwrap();
    for i in 0..PITCH {
        for j in 0..PITCH {
            let on_line = i == j && last.is_some_and(|last| i <= last);
            let expected = if on_line { COLOR } else { 0 };
            assert_eq!(
                area[(i * PITCH + j) as usize],
                expected,
                "invalid value at ({i}, {j})"
            );
        }
    }
}

/// Submits a job that must fail; only the wait is required to report it.
pub fn run_and_wait_with_err(client: &Client, va: u32, size: u32) -> DriverError {
    let _ = client.run(va, size);
    client.wait(0).expect_err("wait should fail")
}
