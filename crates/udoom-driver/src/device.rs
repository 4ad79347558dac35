//! One attached accelerator.
//!
//! Everything the hardware and the interrupt handler share lives in [`DeviceState`] behind a
//! single mutex: the ring and its ownership records, the wait list, per-client session flags and
//! the register block itself. Blocking operations sleep on the paired condvar with the lock
//! released.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use udoom_abi::paging::ENTRY_PA_SHIFT;
use udoom_abi::ring::{is_ahead, next_slot};
use udoom_abi::{
    mmio, Accelerator, DmaMemory, Enable, Intr, JobDescriptor, Reset, RING_SLOT_COUNT, WAIT_NONE,
};

use crate::address_space::TlbFlush;
use crate::buffer::Buffer;
use crate::client::ClientId;
use crate::config::DeviceConfig;
use crate::error::{DriverError, Result};
use crate::ring::Ring;
use crate::wait::{WaitList, WaitOutcome};

/// Identity of one attach of one device; buffers may only be mapped by clients of the instance
/// that allocated them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct InstanceId(u64);

impl InstanceId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub jobs_submitted: u64,
    pub interrupts: u64,
    pub spurious_interrupts: u64,
    pub faults: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitMode {
    Interruptible,
    /// Ignores cancellation; used by teardown.
    Uninterruptible,
}

#[derive(Debug, Default)]
pub(crate) struct Session {
    pub(crate) quarantined: bool,
    pub(crate) signal_pending: bool,
    /// Slot just after this client's most recent job. Unlike ownership records it survives a
    /// fault, so teardown can still find how far the ring must drain.
    pub(crate) last_end: Option<u32>,
}

pub(crate) struct DeviceState {
    pub(crate) hw: Box<dyn Accelerator>,
    pub(crate) ring: Ring,
    pub(crate) waiters: WaitList,
    pub(crate) sessions: HashMap<ClientId, Session>,
    next_client: u64,
    pub(crate) detached: bool,
    pub(crate) stats: DeviceStats,
}

impl DeviceState {
    /// Stops descriptor fetch so `BATCH_GET` holds still.
    pub(crate) fn pause(&mut self) {
        self.hw.write32(mmio::ENABLE, Enable::FE.bits());
    }

    pub(crate) fn resume(&mut self) {
        self.hw.write32(mmio::ENABLE, Enable::all().bits());
    }

    pub(crate) fn positions(&mut self) -> (u32, u32) {
        let get = self.hw.read32(mmio::BATCH_GET);
        let put = self.hw.read32(mmio::BATCH_PUT);
        (get, put)
    }

    pub(crate) fn rearm(&mut self) {
        let trigger = self.waiters.trigger();
        self.hw.write32(mmio::BATCH_WAIT, trigger);
    }

    fn is_quarantined(&self, client: ClientId) -> bool {
        self.sessions.get(&client).is_some_and(|s| s.quarantined)
    }

    fn take_signal(&mut self, client: ClientId) -> bool {
        self.sessions
            .get_mut(&client)
            .is_some_and(|s| std::mem::take(&mut s.signal_pending))
    }

    fn check_live(&self, client: ClientId) -> Result<()> {
        if self.detached {
            return Err(DriverError::DeviceGone);
        }
        if self.is_quarantined(client) {
            return Err(DriverError::Io);
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.hw.write32(mmio::ENABLE, 0);
        self.hw.write32(mmio::INTR_ENABLE, 0);
        self.hw.free_irq();
        self.waiters.resolve_all(WaitOutcome::Faulted);
        self.detached = true;
    }
}

pub(crate) struct DeviceShared {
    index: usize,
    instance: InstanceId,
    config: DeviceConfig,
    dma: Arc<dyn DmaMemory>,
    state: Mutex<DeviceState>,
    cond: Condvar,
}

impl DeviceShared {
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_interrupt(&self) -> bool {
        let mut state = self.lock();
        let handled = state.service_interrupt();
        drop(state);
        if handled {
            self.cond.notify_all();
        }
        handled
    }

    fn signal(&self, client: ClientId) {
        let mut state = self.lock();
        if let Some(session) = state.sessions.get_mut(&client) {
            session.signal_pending = true;
            drop(state);
            self.cond.notify_all();
        }
    }

    /// Blocks until `BATCH_GET` reaches `target`, sharing the one hardware trigger with every
    /// other waiter.
    fn wait_for_slot<'a>(
        &'a self,
        mut state: MutexGuard<'a, DeviceState>,
        client: ClientId,
        target: u32,
        mode: WaitMode,
    ) -> (MutexGuard<'a, DeviceState>, Result<()>) {
        if state.detached {
            return (state, Err(DriverError::DeviceGone));
        }

        state.pause();
        let (get, put) = state.positions();
        if state.waiters.resolve_passed(get, put) > 0 {
            self.cond.notify_all();
        }
        let id = is_ahead(target, get, put).then(|| state.waiters.insert(target, client, get));
        state.rearm();
        state.resume();

        let Some(id) = id else {
            return (state, Ok(()));
        };
        tracing::trace!(%client, slot = target, get, put, "waiting for ring position");

        loop {
            if let Some(outcome) = state.waiters.take_outcome(id) {
                let result = if state.detached {
                    Err(DriverError::DeviceGone)
                } else if outcome == WaitOutcome::Completed && !state.is_quarantined(client) {
                    Ok(())
                } else {
                    Err(DriverError::Io)
                };
                return (state, result);
            }
            if mode == WaitMode::Interruptible && state.take_signal(client) {
                state.waiters.remove(id);
                if !state.detached {
                    state.pause();
                    state.rearm();
                    state.resume();
                }
                tracing::debug!(%client, slot = target, "wait cancelled");
                return (state, Err(DriverError::Cancelled));
            }
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.detached {
            state.shutdown();
        }
    }
}

/// Handle to an attached device. Clones refer to the same device.
#[derive(Clone)]
pub struct Device {
    shared: Arc<DeviceShared>,
}

impl Device {
    /// Resets the device, points it at a fresh ring and enables it.
    pub(crate) fn attach(
        index: usize,
        mut hw: Box<dyn Accelerator>,
        dma: Arc<dyn DmaMemory>,
        config: DeviceConfig,
    ) -> Result<Self> {
        config.validate()?;
        let ring = Ring::new(&dma, config.dma_mask())?;
        let ring_phys = ring.phys();

        hw.write32(mmio::ENABLE, 0);
        hw.write32(mmio::INTR_ENABLE, 0);
        hw.write32(mmio::RESET, Reset::all().bits());
        hw.write32(mmio::INTR, Intr::all().bits());
        hw.write32(mmio::BATCH_RING, (ring_phys >> ENTRY_PA_SHIFT) as u32);
        hw.write32(mmio::BATCH_GET, 0);
        hw.write32(mmio::BATCH_PUT, 0);
        hw.write32(mmio::BATCH_WAIT, WAIT_NONE);

        let shared = Arc::new(DeviceShared {
            index,
            instance: InstanceId::next(),
            config,
            dma,
            state: Mutex::new(DeviceState {
                hw,
                ring,
                waiters: WaitList::default(),
                sessions: HashMap::new(),
                next_client: 1,
                detached: false,
                stats: DeviceStats::default(),
            }),
            cond: Condvar::new(),
        });

        let weak: Weak<DeviceShared> = Arc::downgrade(&shared);
        {
            let mut state = shared.lock();
            state.hw.request_irq(Arc::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.handle_interrupt();
                }
            }));
            state.hw.write32(mmio::INTR_ENABLE, Intr::all().bits());
            state.resume();
        }

        tracing::debug!(index, ring = format_args!("{ring_phys:#x}"), "attached device");
        Ok(Self { shared })
    }

    /// Disables the device and releases its interrupt line. Blocked waiters fail with
    /// [`DriverError::DeviceGone`].
    pub(crate) fn detach(&self) {
        let mut state = self.shared.lock();
        if state.detached {
            return;
        }
        state.shutdown();
        drop(state);
        self.shared.cond.notify_all();
        tracing::debug!(index = self.shared.index, "detached device");
    }

    pub fn index(&self) -> usize {
        self.shared.index
    }

    /// Device node name.
    pub fn name(&self) -> String {
        format!("udoom{}", self.shared.index)
    }

    pub fn config(&self) -> DeviceConfig {
        self.shared.config
    }

    pub fn is_detached(&self) -> bool {
        self.shared.lock().detached
    }

    /// Interrupt service routine; also what the registered IRQ handler calls. Returns whether the
    /// device had anything pending.
    pub fn handle_interrupt(&self) -> bool {
        self.shared.handle_interrupt()
    }

    pub fn stats(&self) -> DeviceStats {
        self.shared.lock().stats
    }

    /// Current `(BATCH_GET, BATCH_PUT)`.
    pub fn ring_positions(&self) -> (u32, u32) {
        self.shared.lock().positions()
    }

    pub fn pending_waiters(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    /// The position the hardware trigger is armed at, or [`WAIT_NONE`].
    pub fn wait_trigger(&self) -> u32 {
        self.shared.lock().waiters.trigger()
    }

    pub fn create_buffer(&self, size: u32) -> Result<Buffer> {
        if self.is_detached() {
            return Err(DriverError::DeviceGone);
        }
        Buffer::allocate(
            &self.shared.dma,
            self.shared.config.dma_mask(),
            size,
            self.shared.instance,
        )
    }

    pub(crate) fn instance(&self) -> InstanceId {
        self.shared.instance
    }

    pub(crate) fn dma(&self) -> Arc<dyn DmaMemory> {
        Arc::clone(&self.shared.dma)
    }

    pub(crate) fn downgrade(&self) -> Weak<DeviceShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn open_session(&self) -> Result<ClientId> {
        let mut state = self.shared.lock();
        if state.detached {
            return Err(DriverError::DeviceGone);
        }
        let id = ClientId(state.next_client);
        state.next_client += 1;
        state.sessions.insert(id, Session::default());
        Ok(id)
    }

    pub(crate) fn is_quarantined(&self, client: ClientId) -> bool {
        self.shared.lock().is_quarantined(client)
    }

    /// Queues one job, blocking while the ring has no usable slot.
    pub(crate) fn submit(&self, client: ClientId, pdp: u32, va: u32, size: u32) -> Result<()> {
        if va % 4 != 0 || size % 4 != 0 {
            return Err(DriverError::Misaligned { va, size });
        }

        let mut state = self.shared.lock();
        loop {
            state.check_live(client)?;
            let (get, put) = state.positions();
            let after = next_slot(put);
            if after != get && !state.waiters.targets(after) {
                state.ring.write(put, &JobDescriptor { pdp, va, size }, client);
                if let Some(session) = state.sessions.get_mut(&client) {
                    session.last_end = Some(after);
                }
                state.hw.write32(mmio::BATCH_PUT, after);
                state.stats.jobs_submitted += 1;
                tracing::trace!(%client, slot = put, va = format_args!("{va:#x}"), size, "submitted job");
                return Ok(());
            }

            tracing::trace!(%client, get, put, "ring slot unavailable; waiting");
            let (guard, result) =
                self.shared
                    .wait_for_slot(state, client, next_slot(after), WaitMode::Interruptible);
            state = guard;
            result?;
        }
    }

    /// Blocks until the `jobs_back`-th most recent job of `client` still in the ring completes.
    pub(crate) fn wait_jobs(&self, client: ClientId, jobs_back: u32) -> Result<()> {
        let mut state = self.shared.lock();
        state.check_live(client)?;
        if jobs_back >= RING_SLOT_COUNT {
            return Ok(());
        }
        let (get, put) = state.positions();
        let Some(slot) = state.ring.find_job(client, get, put, jobs_back) else {
            return Ok(());
        };
        let (_state, result) =
            self.shared
                .wait_for_slot(state, client, next_slot(slot), WaitMode::Interruptible);
        result
    }

    /// Waits out every job the client still has in the ring, then forgets the session.
    pub(crate) fn close_session(&self, client: ClientId) {
        let mut state = self.shared.lock();
        if let Some(target) = state.sessions.get(&client).and_then(|s| s.last_end) {
            loop {
                let (guard, result) =
                    self.shared
                        .wait_for_slot(state, client, target, WaitMode::Uninterruptible);
                state = guard;
                // A fault elsewhere in the ring can cut the wait short.
                if result != Err(DriverError::Io) {
                    break;
                }
            }
        }
        state.ring.clear_client(client);
        state.sessions.remove(&client);
    }
}

impl TlbFlush for Device {
    fn invalidate(&self, pdp: u32) {
        let mut state = self.shared.lock();
        if !state.detached {
            state.hw.write32(mmio::TLB_INVALIDATE, pdp);
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("index", &self.shared.index)
            .field("instance", &self.shared.instance)
            .field("config", &self.shared.config)
            .finish()
    }
}

/// Raises the cancellation signal of one client.
///
/// The signal interrupts the client's current or next blocking `run`/`wait`, which then returns
/// [`DriverError::Cancelled`]. Raising it on a closed client does nothing.
#[derive(Clone)]
pub struct Canceller {
    device: Weak<DeviceShared>,
    client: ClientId,
}

impl Canceller {
    pub(crate) fn new(device: &Device, client: ClientId) -> Self {
        Self {
            device: device.downgrade(),
            client,
        }
    }

    pub fn cancel(&self) {
        if let Some(shared) = self.device.upgrade() {
            shared.signal(self.client);
        }
    }
}

impl fmt::Debug for Canceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canceller").field("client", &self.client).finish()
    }
}
