//! Per-client drawing workload.
//!
//! Each client maps a 64x64 byte surface plus a command area, queues one single-pixel fill per
//! job and finally reads the surface back to check every pixel landed.

use anyhow::{bail, Context, Result};
use udoom_abi::{CmdWriter, CMD_SIZE_BYTES};
use udoom_driver::{Client, Device, DriverError};

pub const SURFACE_WIDTH: u32 = 64;
pub const SURFACE_BYTES: u32 = SURFACE_WIDTH * SURFACE_WIDTH;
/// One job per surface pixel at most.
pub const MAX_JOBS: u32 = SURFACE_BYTES;

/// How often the client stops to wait for its own jobs.
const WAIT_EVERY: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub jobs: u32,
    /// Replace the job at this index with an invalid packet.
    pub fault_at: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientReport {
    pub device: usize,
    pub client: usize,
    pub submitted: u32,
    pub verified: u32,
    pub quarantined: bool,
}

/// Color of job `job` for client `client`; never zero so untouched pixels stand out.
pub fn color(client: usize, job: u32) -> u8 {
    ((client as u32 * 37 + job) % 255) as u8 + 1
}

/// Surface offset written by job `job`.
pub fn pixel_offset(job: u32) -> u32 {
    (job / SURFACE_WIDTH) * SURFACE_WIDTH + job % SURFACE_WIDTH
}

/// Builds one packet per job, back to back.
pub fn build_stream(client: usize, surface_va: u32, plan: &Plan) -> Vec<u8> {
    let mut w = CmdWriter::new();
    for job in 0..plan.jobs {
        if plan.fault_at == Some(job) {
            for _ in 0..CMD_SIZE_BYTES / 4 {
                w.raw(0xFF);
            }
            continue;
        }
        let (x, y) = (job % SURFACE_WIDTH, job / SURFACE_WIDTH);
        w.fill_rect(color(client, job), surface_va, SURFACE_WIDTH, x as u16, y as u16, 1, 1);
    }
    w.finish()
}

pub fn run_client(device: &Device, index: usize, plan: &Plan) -> Result<ClientReport> {
    if plan.jobs > MAX_JOBS {
        bail!("at most {MAX_JOBS} jobs per client, got {}", plan.jobs);
    }

    let client = Client::open(device).with_context(|| format!("failed to open {}", device.name()))?;
    let surface = client.create_buffer(SURFACE_BYTES).context("surface allocation")?;
    let surface_va = client.map_buffer(&surface, false).context("mapping surface")?;

    let stream = build_stream(index, surface_va, plan);
    let mut report = ClientReport {
        device: device.index(),
        client: index,
        submitted: 0,
        verified: 0,
        quarantined: false,
    };
    if stream.is_empty() {
        return Ok(report);
    }
    let cmds = client
        .create_buffer(stream.len() as u32)
        .context("command buffer allocation")?;
    cmds.write(0, &stream).context("writing command stream")?;
    let cmds_va = client.map_buffer(&cmds, true).context("mapping commands")?;

    let outcome = submit_all(&client, cmds_va, plan.jobs, &mut report.submitted);
    match outcome {
        Ok(()) => {}
        Err(DriverError::Io) => {
            report.quarantined = true;
            tracing::info!(client = index, device = device.index(), submitted = report.submitted, "client quarantined");
            return Ok(report);
        }
        Err(err) => return Err(err).with_context(|| format!("client {index} on {}", device.name())),
    }

    for job in 0..plan.jobs {
        let got = surface.read_u8(u64::from(pixel_offset(job)))?;
        let want = color(index, job);
        if got != want {
            bail!("client {index}: pixel of job {job} is {got:#04x}, expected {want:#04x}");
        }
        report.verified += 1;
    }
    Ok(report)
}

fn submit_all(client: &Client, cmds_va: u32, jobs: u32, submitted: &mut u32) -> udoom_driver::Result<()> {
    for job in 0..jobs {
        client.run(cmds_va + job * CMD_SIZE_BYTES, CMD_SIZE_BYTES)?;
        *submitted += 1;
        if job % WAIT_EVERY == WAIT_EVERY - 1 {
            client.wait(0)?;
        }
    }
    client.wait(0)
}
