//! Command front-end: runs one job's packets against device memory.

use udoom_abi::cmd::{unpack_xy, CmdHeader};
use udoom_abi::{CmdOpcode, DmaMemory, Intr, JobDescriptor, CMD_SIZE_BYTES, CMD_WORDS};

use crate::memory::SimMemory;
use crate::mmu::{Fault, Tlb};

struct Surface {
    base: u32,
    pitch: u32,
}

struct Executor<'a> {
    mem: &'a SimMemory,
    tlb: &'a mut Tlb,
    pdp: u32,
}

impl Executor<'_> {
    fn read_u32(&mut self, va: u32) -> Result<u32, Fault> {
        let pa = self.tlb.translate(self.mem, self.pdp, va, false)?;
        Ok(self.mem.read_u32(pa))
    }

    fn plot(&mut self, surface: &Surface, x: u32, y: u32, color: u8) -> Result<(), Fault> {
        let va = surface
            .base
            .wrapping_add(y.wrapping_mul(surface.pitch))
            .wrapping_add(x);
        let pa = self.tlb.translate(self.mem, self.pdp, va, true)?;
        self.mem.write(pa, &[color]);
        Ok(())
    }

    fn draw_line(&mut self, s: &Surface, color: u8, from: (u16, u16), to: (u16, u16)) -> Result<(), Fault> {
        let (mut x, mut y) = (i32::from(from.0), i32::from(from.1));
        let (x1, y1) = (i32::from(to.0), i32::from(to.1));
        let dx = (x1 - x).abs();
        let dy = -(y1 - y).abs();
        let sx = if x < x1 { 1 } else { -1 };
        let sy = if y < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.plot(s, x as u32, y as u32, color)?;
            if x == x1 && y == y1 {
                return Ok(());
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn fill_rect(&mut self, s: &Surface, color: u8, origin: (u16, u16), size: (u16, u16)) -> Result<(), Fault> {
        let (x0, y0) = (u32::from(origin.0), u32::from(origin.1));
        for y in y0..y0 + u32::from(size.1) {
            for x in x0..x0 + u32::from(size.0) {
                self.plot(s, x, y, color)?;
            }
        }
        Ok(())
    }
}

/// Executes every packet of `job`. Stops at the first fault; pixels already drawn stay drawn.
pub(crate) fn run_job(mem: &SimMemory, tlb: &mut Tlb, job: &JobDescriptor) -> Result<(), Fault> {
    let mut exec = Executor {
        mem,
        tlb,
        pdp: job.pdp,
    };

    let mut offset = 0u32;
    while offset < job.size {
        let va = job.va.wrapping_add(offset);
        if job.size - offset < CMD_SIZE_BYTES {
            return Err(Fault::new(Intr::CMD_OVERRUN, va));
        }

        let mut words = [0u32; CMD_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            *word = exec.read_u32(va.wrapping_add(4 * i as u32))?;
        }
        let header = CmdHeader::decode(words[0]);
        let surface = Surface {
            base: words[1],
            pitch: words[2],
        };
        match CmdOpcode::from_u8(header.opcode) {
            Some(CmdOpcode::DrawLine) => {
                exec.draw_line(&surface, header.color, unpack_xy(words[3]), unpack_xy(words[4]))?
            }
            Some(CmdOpcode::FillRect) => {
                exec.fill_rect(&surface, header.color, unpack_xy(words[3]), unpack_xy(words[4]))?
            }
            None => return Err(Fault::new(Intr::FE_ERROR, va)),
        }
        offset += CMD_SIZE_BYTES;
    }
    Ok(())
}
