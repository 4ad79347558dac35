//! Driver side of the job ring: the descriptor page and who submitted each slot.

use std::sync::Arc;

use udoom_abi::ring::{next_slot, prev_slot, slot_index};
use udoom_abi::{DmaMemory, JobDescriptor, RING_SLOT_COUNT};

use crate::client::ClientId;
use crate::dma::DmaPage;
use crate::error::Result;

pub(crate) struct Ring {
    page: DmaPage,
    /// Submitter of the most recent job written to each slot. Cleared when a fault makes the
    /// record meaningless.
    owners: Vec<Option<ClientId>>,
}

impl Ring {
    pub(crate) fn new(dma: &Arc<dyn DmaMemory>, mask: u64) -> Result<Self> {
        Ok(Self {
            page: DmaPage::alloc(dma, mask)?,
            owners: vec![None; RING_SLOT_COUNT as usize],
        })
    }

    pub(crate) fn phys(&self) -> u64 {
        self.page.addr()
    }

    pub(crate) fn write(&mut self, slot: u32, desc: &JobDescriptor, owner: ClientId) {
        self.page.write(slot, &desc.encode());
        self.owners[slot_index(slot)] = Some(owner);
    }

    pub(crate) fn owner(&self, slot: u32) -> Option<ClientId> {
        self.owners[slot_index(slot)]
    }

    /// The `jobs_back`-th most recent slot in `[get, put)` owned by `client`.
    pub(crate) fn find_job(&self, client: ClientId, get: u32, put: u32, jobs_back: u32) -> Option<u32> {
        let mut remaining = jobs_back;
        let mut slot = put;
        while slot != get {
            slot = prev_slot(slot);
            if self.owner(slot) == Some(client) {
                if remaining == 0 {
                    return Some(slot);
                }
                remaining -= 1;
            }
        }
        None
    }

    /// Forgets `client`'s records for the queued slots `[get, put)`.
    pub(crate) fn clear_queued(&mut self, client: ClientId, get: u32, put: u32) -> usize {
        let mut cleared = 0;
        let mut slot = get;
        while slot != put {
            let owner = &mut self.owners[slot_index(slot)];
            if *owner == Some(client) {
                *owner = None;
                cleared += 1;
            }
            slot = next_slot(slot);
        }
        cleared
    }

    pub(crate) fn clear_slot(&mut self, slot: u32) {
        self.owners[slot_index(slot)] = None;
    }

    pub(crate) fn clear_client(&mut self, client: ClientId) {
        for owner in &mut self.owners {
            if *owner == Some(client) {
                *owner = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use udoom_abi::RING_SIZE_BYTES;
    use udoom_sim::{SimConfig, SimMemory};

    const A: ClientId = ClientId(1);
    const B: ClientId = ClientId(2);

    fn ring() -> Ring {
        let dma: Arc<dyn DmaMemory> = Arc::new(SimMemory::new(&SimConfig::default()));
        Ring::new(&dma, u64::MAX).unwrap()
    }

    fn desc(va: u32) -> JobDescriptor {
        JobDescriptor { pdp: 0x10, va, size: 20 }
    }

    #[test]
    fn find_job_counts_back_from_put() {
        let mut r = ring();
        // Slots 0..5: A B A A B
        for (i, owner) in [A, B, A, A, B].into_iter().enumerate() {
            r.write(i as u32 * 16, &desc(i as u32), owner);
        }
        assert_eq!(r.find_job(A, 0, 80, 0), Some(48));
        assert_eq!(r.find_job(A, 0, 80, 1), Some(32));
        assert_eq!(r.find_job(A, 0, 80, 2), Some(0));
        assert_eq!(r.find_job(A, 0, 80, 3), None);
        assert_eq!(r.find_job(B, 0, 80, 0), Some(64));

        // Slots before GET are complete and never reported.
        assert_eq!(r.find_job(A, 16, 80, 2), None);
        assert_eq!(r.find_job(A, 80, 80, 0), None);
    }

    #[test]
    fn find_job_walks_across_wrap() {
        let mut r = ring();
        let last = RING_SIZE_BYTES - 16;
        r.write(last, &desc(1), A);
        r.write(0, &desc(2), B);
        assert_eq!(r.find_job(A, last, 16, 0), Some(last));
        assert_eq!(r.find_job(B, last, 16, 0), Some(0));
    }

    #[test]
    fn clear_queued_only_touches_window_and_client() {
        let mut r = ring();
        for (i, owner) in [A, A, B, A].into_iter().enumerate() {
            r.write(i as u32 * 16, &desc(0), owner);
        }
        assert_eq!(r.clear_queued(A, 16, 64), 2);
        assert_eq!(r.owner(0), Some(A));
        assert_eq!(r.owner(16), None);
        assert_eq!(r.owner(32), Some(B));
        assert_eq!(r.owner(48), None);

        r.clear_client(A);
        assert_eq!(r.owner(0), None);
        assert_eq!(r.owner(32), Some(B));
    }

    #[test]
    fn descriptor_lands_in_ring_page() {
        let mut r = ring();
        r.write(32, &JobDescriptor { pdp: 7, va: 0x1000, size: 20 }, A);
        let mut raw = [0u8; 16];
        r.page.read(32, &mut raw);
        assert_eq!(JobDescriptor::decode(&raw), JobDescriptor { pdp: 7, va: 0x1000, size: 20 });
    }
}
