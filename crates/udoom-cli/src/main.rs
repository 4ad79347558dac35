#![forbid(unsafe_code)]

mod workload;

use std::thread;

use anyhow::{bail, Context, Result};
use clap::Parser;
use udoom_driver::{DeviceConfig, DeviceRegistry, RegistryConfig, MAX_DEVICES};
use udoom_sim::{SimConfig, SimDevice};

use workload::{run_client, ClientReport, Plan, MAX_JOBS};

#[derive(Debug, Parser)]
#[command(about = "Runs a multi-client drawing workload against simulated udoom devices")]
struct Args {
    /// Number of devices to attach.
    #[arg(long, default_value_t = 1)]
    devices: usize,

    /// Clients per device, each on its own thread.
    #[arg(long, default_value_t = 4)]
    clients: usize,

    /// Jobs each client submits (one pixel per job).
    #[arg(long, default_value_t = 256)]
    jobs: u32,

    /// Make the client with this global index submit an invalid packet halfway through.
    #[arg(long)]
    inject_fault: Option<usize>,

    /// Width of the DMA addresses the devices can reach.
    #[arg(long, default_value_t = DeviceConfig::default().dma_mask_bits)]
    dma_mask_bits: u8,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if args.devices == 0 || args.devices > MAX_DEVICES {
        bail!("--devices must be between 1 and {MAX_DEVICES}");
    }
    if args.jobs > MAX_JOBS {
        bail!("--jobs must be at most {MAX_JOBS}");
    }
    let config = DeviceConfig {
        dma_mask_bits: args.dma_mask_bits,
    };

    let sims: Vec<SimDevice> = (0..args.devices)
        .map(|_| SimDevice::new(SimConfig::default()))
        .collect();
    let registry = DeviceRegistry::new(RegistryConfig {
        max_devices: args.devices,
    });
    let devices = sims
        .iter()
        .map(|sim| {
            registry
                .attach(Box::new(sim.accelerator()), sim.memory(), config)
                .context("failed to attach device")
        })
        .collect::<Result<Vec<_>>>()?;

    let reports = thread::scope(|scope| {
        let handles: Vec<_> = (0..args.devices * args.clients)
            .map(|index| {
                let device = &devices[index % args.devices];
                let plan = Plan {
                    jobs: args.jobs,
                    fault_at: (args.inject_fault == Some(index)).then_some(args.jobs / 2),
                };
                scope.spawn(move || run_client(device, index, &plan))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(report) => report,
                Err(_) => bail!("client thread panicked"),
            })
            .collect::<Vec<Result<ClientReport>>>()
    });

    let mut failed = 0;
    for report in &reports {
        match report {
            Ok(r) => println!(
                "udoom{} client {:>3}: submitted {:>5} verified {:>5}{}",
                r.device,
                r.client,
                r.submitted,
                r.verified,
                if r.quarantined { " (quarantined)" } else { "" }
            ),
            Err(err) => {
                failed += 1;
                eprintln!("error: {err:#}");
            }
        }
    }
    for device in &devices {
        let stats = device.stats();
        println!(
            "{}: {} jobs, {} interrupts ({} spurious), {} faults",
            device.name(),
            stats.jobs_submitted,
            stats.interrupts,
            stats.spurious_interrupts,
            stats.faults
        );
    }

    for index in 0..args.devices {
        registry.detach(index).context("failed to detach device")?;
    }
    if failed > 0 {
        bail!("{failed} client(s) failed");
    }
    Ok(())
}
