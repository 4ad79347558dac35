//! Register file, batch engine and interrupt delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use udoom_abi::ring::next_slot;
use udoom_abi::{
    mmio, Accelerator, DmaMemory, Enable, Intr, IrqHandler, JobDescriptor, Mmio, Reset,
    RING_SIZE_BYTES, RING_SLOT_SIZE,
};

use crate::exec::run_job;
use crate::memory::SimMemory;
use crate::mmu::Tlb;

/// Snapshot of the architectural registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub enable: u32,
    pub intr: u32,
    pub intr_enable: u32,
    pub fault_va: u32,
    pub batch_ring: u32,
    pub batch_get: u32,
    pub batch_put: u32,
    pub batch_wait: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub jobs_completed: u64,
    pub jobs_faulted: u64,
    pub irqs_delivered: u64,
    pub tlb_invalidations: u64,
}

struct State {
    regs: Registers,
    /// Set by a fault; the batch engine stays stopped until a pipeline reset.
    halted: bool,
    tlb: Tlb,
    irq: Option<IrqHandler>,
    stats: SimStats,
}

impl State {
    fn can_run(&self) -> bool {
        let enable = Enable::from_bits_truncate(self.regs.enable);
        enable.contains(Enable::BATCH | Enable::FE)
            && !self.halted
            && self.regs.batch_get != self.regs.batch_put
    }

    fn irq_pending(&self) -> bool {
        self.regs.intr & self.regs.intr_enable != 0 && self.irq.is_some()
    }
}

struct Shared {
    state: Mutex<State>,
    work: Condvar,
    mem: Arc<SimMemory>,
    shutdown: AtomicBool,
}

/// Handle to the simulated device's register block; clones share the device.
#[derive(Clone)]
pub struct SimAccelerator {
    shared: Arc<Shared>,
}

impl SimAccelerator {
    pub(crate) fn new(mem: Arc<SimMemory>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    regs: Registers::default(),
                    halted: false,
                    tlb: Tlb::default(),
                    irq: None,
                    stats: SimStats::default(),
                }),
                work: Condvar::new(),
                mem,
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registers(&self) -> Registers {
        self.lock().regs
    }

    pub fn stats(&self) -> SimStats {
        self.lock().stats
    }

    pub fn has_irq_handler(&self) -> bool {
        self.lock().irq.is_some()
    }

    pub fn is_halted(&self) -> bool {
        self.lock().halted
    }

    /// Latches status bits as if the hardware raised them; delivered on the next step.
    pub fn raise(&self, bits: Intr) {
        self.lock().regs.intr |= bits.bits();
        self.shared.work.notify_all();
    }

    /// Runs at most one job, then delivers the interrupt if any enabled status is pending.
    /// Returns whether anything happened.
    pub fn step(&self) -> bool {
        let (ran, handler) = {
            let mut state = self.lock();
            let ran = state.can_run();
            if ran {
                execute_one(&mut state, &self.shared.mem);
            }
            let handler = if state.irq_pending() {
                state.stats.irqs_delivered += 1;
                state.irq.clone()
            } else {
                None
            };
            (ran, handler)
        };
        // Outside the lock: the handler reads and writes our registers.
        let delivered = handler.is_some();
        if let Some(handler) = handler {
            handler();
        }
        ran || delivered
    }

    /// Steps until the ring is drained or the engine is stopped. Returns the number of steps.
    pub fn run_until_idle(&self) -> usize {
        let mut steps = 0;
        while self.step() {
            steps += 1;
        }
        steps
    }

    pub(crate) fn run_worker(&self) {
        while !self.shared.shutdown.load(Ordering::Acquire) {
            if self.step() {
                continue;
            }
            let state = self.lock();
            if self.shared.shutdown.load(Ordering::Acquire) {
                break;
            }
            if !state.can_run() && !state.irq_pending() {
                // The timeout only bounds a missed notification.
                let _ = self
                    .shared
                    .work
                    .wait_timeout(state, Duration::from_millis(20))
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }

    pub(crate) fn stop_worker(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let _guard = self.lock();
        self.shared.work.notify_all();
    }
}

fn execute_one(state: &mut State, mem: &SimMemory) {
    let get = state.regs.batch_get;
    let ring = u64::from(state.regs.batch_ring) << 8;
    let mut raw = [0u8; RING_SLOT_SIZE as usize];
    mem.read(ring + u64::from(get), &mut raw);
    let job = JobDescriptor::decode(&raw);

    match run_job(mem, &mut state.tlb, &job) {
        Ok(()) => {
            let next = next_slot(get);
            state.regs.batch_get = next;
            if next == state.regs.batch_wait {
                state.regs.intr |= Intr::BATCH_WAIT.bits();
            }
            state.stats.jobs_completed += 1;
        }
        Err(fault) => {
            tracing::debug!(slot = get, va = format_args!("{:#x}", fault.va), kind = ?fault.kind, "job faulted");
            state.regs.intr |= fault.kind.bits();
            state.regs.fault_va = fault.va;
            state.halted = true;
            state.stats.jobs_faulted += 1;
        }
    }
}

impl Mmio for SimAccelerator {
    fn read32(&mut self, offset: u32) -> u32 {
        let state = self.lock();
        let r = &state.regs;
        match offset {
            mmio::ENABLE => r.enable,
            mmio::INTR => r.intr,
            mmio::INTR_ENABLE => r.intr_enable,
            mmio::FAULT_VA => r.fault_va,
            mmio::BATCH_RING => r.batch_ring,
            mmio::BATCH_GET => r.batch_get,
            mmio::BATCH_PUT => r.batch_put,
            mmio::BATCH_WAIT => r.batch_wait,
            _ => 0,
        }
    }

    fn write32(&mut self, offset: u32, value: u32) {
        let slot_mask = (RING_SIZE_BYTES - 1) & !(RING_SLOT_SIZE - 1);
        let mut state = self.lock();
        match offset {
            mmio::ENABLE => state.regs.enable = value & Enable::all().bits(),
            mmio::RESET => {
                let reset = Reset::from_bits_truncate(value);
                if reset.contains(Reset::PIPELINE) {
                    state.halted = false;
                }
                if reset.contains(Reset::TLB_USER) {
                    state.tlb.flush();
                }
            }
            mmio::INTR => state.regs.intr &= !value,
            mmio::INTR_ENABLE => state.regs.intr_enable = value & Intr::all().bits(),
            mmio::TLB_INVALIDATE => {
                state.tlb.invalidate(value);
                state.stats.tlb_invalidations += 1;
            }
            mmio::BATCH_RING => state.regs.batch_ring = value,
            mmio::BATCH_GET => state.regs.batch_get = value & slot_mask,
            mmio::BATCH_PUT => state.regs.batch_put = value & slot_mask,
            mmio::BATCH_WAIT => state.regs.batch_wait = value,
            _ => tracing::trace!(offset = format_args!("{offset:#x}"), "write to unknown register"),
        }
        drop(state);
        self.shared.work.notify_all();
    }
}

impl Accelerator for SimAccelerator {
    fn request_irq(&mut self, handler: IrqHandler) {
        self.lock().irq = Some(handler);
        self.shared.work.notify_all();
    }

    fn free_irq(&mut self) {
        self.lock().irq = None;
    }
}
