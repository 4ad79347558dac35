//! Interrupt service: acknowledges ring-position and fault interrupts and wakes waiters.

use udoom_abi::ring::next_slot;
use udoom_abi::{mmio, Intr, Reset};

use crate::device::DeviceState;

impl DeviceState {
    /// Acknowledges pending status, skips a faulted job and wakes every waiter the ring has
    /// passed. Returns `false` if nothing was pending.
    pub(crate) fn service_interrupt(&mut self) -> bool {
        if self.detached {
            return false;
        }

        let enabled = Intr::from_bits_truncate(self.hw.read32(mmio::INTR_ENABLE));
        let status = Intr::from_bits_truncate(self.hw.read32(mmio::INTR)) & enabled;
        if status.is_empty() {
            self.stats.spurious_interrupts += 1;
            tracing::trace!("spurious interrupt");
            return false;
        }
        self.stats.interrupts += 1;
        self.hw.write32(mmio::INTR, status.bits());

        // GET must not move between reading it and rearming the trigger.
        self.pause();
        let (mut get, put) = self.positions();
        if status.is_fault() {
            get = self.skip_faulted_job(status, get, put);
        }
        let woken = self.waiters.resolve_passed(get, put);
        self.rearm();
        self.resume();

        tracing::trace!(?status, get, put, woken, "interrupt serviced");
        true
    }

    /// Quarantines the owner of the job at `get` and moves `BATCH_GET` past it. Returns the new
    /// `BATCH_GET`.
    fn skip_faulted_job(&mut self, status: Intr, get: u32, put: u32) -> u32 {
        self.stats.faults += 1;
        let fault_va = self.hw.read32(mmio::FAULT_VA);

        match self.ring.owner(get) {
            Some(client) => {
                tracing::warn!(
                    %client,
                    slot = get,
                    fault_va = format_args!("{fault_va:#x}"),
                    ?status,
                    "job faulted; quarantining client"
                );
                if let Some(session) = self.sessions.get_mut(&client) {
                    session.quarantined = true;
                }
                self.waiters.resolve_client(client);
                self.ring.clear_queued(client, get, put);
            }
            None => {
                tracing::warn!(
                    slot = get,
                    fault_va = format_args!("{fault_va:#x}"),
                    ?status,
                    "job with no owner faulted"
                );
                self.ring.clear_slot(get);
            }
        }

        self.hw
            .write32(mmio::RESET, (Reset::PIPELINE | Reset::TLB_USER).bits());
        if get == put {
            // Nothing queued to skip.
            return get;
        }
        let next = next_slot(get);
        self.hw.write32(mmio::BATCH_GET, next);
        next
    }
}
