//! Binary entry point for the `f3probe` command-line tool.
//!
//! Parses arguments, opens either a real block device or (with
//! `--debug-file-size`) a file-backed emulator standing in for one, runs the
//! probe, and reports the result the way `f3probe.c`'s `main()` does.
//! Corresponds to `f3probe.c` (examples/original_source/f3probe.c).

use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use f3::device::file_emulator::FileDevice;
use f3::device::perf::PerfDevice;
use f3::device::safe::SafeDevice;
use f3::{probe_device, probe_device_max_blocks, util, FakeType};

#[cfg(unix)]
use f3::{BlockDevice, NoReset};

/// Fake-type presets accepted by `--debug-type`, used only with
/// `--debug-file-size` to emulate a specific kind of counterfeit drive.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum DebugFakeType {
    Good,
    Limbo,
    Wraparound,
}

/// Probe a block device for counterfeit flash memory. If counterfeit,
/// f3probe identifies the fake type and the real memory size.
#[derive(Parser, Debug)]
#[command(name = "f3probe", version)]
struct Cli {
    /// The block device to probe, e.g. /dev/sdb.
    block_dev: String,

    /// Enable debugging with a regular file of SIZE_GB gigabytes standing in
    /// for the real capacity.
    #[arg(short = 'd', long, value_name = "SIZE_GB", hide = true)]
    debug_file_size: Option<u64>,

    /// Fake (announced) size of the emulated flash, in gigabytes.
    #[arg(short = 'f', long, value_name = "SIZE_GB", hide = true, default_value_t = 2)]
    debug_fake_size: u64,

    /// Type of the fake flash to emulate.
    #[arg(short = 't', long, value_enum, hide = true, default_value_t = DebugFakeType::Limbo)]
    debug_type: DebugFakeType,

    /// Notification level: 0 = silent, 1 = results, 2 = progress, 3+ = verbose.
    #[arg(short = 'v', long, default_value_t = 1)]
    verbose: i32,
}

const GIGABYTE: u64 = 1 << 30;

fn open_debug_device(cli: &Cli, file_size_gb: u64) -> Result<Box<dyn f3::Device>> {
    let real_size_byte = file_size_gb * GIGABYTE;
    let announced_size_byte = cli.debug_fake_size * GIGABYTE;
    let (real_size_byte, wrap) = match cli.debug_type {
        DebugFakeType::Good => (announced_size_byte, 63),
        DebugFakeType::Limbo => (real_size_byte, 63),
        DebugFakeType::Wraparound => (real_size_byte, util::ilog2(real_size_byte.max(1))),
    };
    let dev = FileDevice::create(
        &cli.block_dev,
        real_size_byte,
        announced_size_byte,
        wrap,
        0,
        Some(4),
        false,
        false,
    )
    .with_context(|| format!("failed to create debug file device at {}", cli.block_dev))?;
    Ok(Box::new(dev))
}

#[cfg(unix)]
fn open_real_device(path: &str) -> Result<Box<dyn f3::Device>> {
    let dev = BlockDevice::open(path, Box::new(NoReset))
        .with_context(|| format!("failed to open block device {path}"))?;
    Ok(Box::new(dev))
}

#[cfg(not(unix))]
fn open_real_device(_path: &str) -> Result<Box<dyn f3::Device>> {
    bail!("raw block device access requires a Unix target; pass --debug-file-size to test with a file instead")
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    f3::config::set_notification_level(cli.verbose);

    let dev = match cli.debug_file_size {
        Some(size) => open_debug_device(&cli, size)?,
        None => open_real_device(&cli.block_dev)?,
    };

    // The prober writes trial blocks all over the device; wrap it in a
    // safe device so anything it overwrites is restored once probing
    // finishes, sized generously via `probe_device_max_blocks` up front
    // (the safe wrapper must be built before it can absorb any writes).
    let max_blocks = probe_device_max_blocks(dev.as_ref());
    let perf = PerfDevice::new(dev);
    let mut safe = SafeDevice::new(Box::new(perf), max_blocks, false).context("failed to size safe wrapper")?;

    let result = probe_device(&mut safe).context("probe failed")?;
    // `safe`'s Drop restores every block the probe touched before this
    // function returns.
    let (real_value, real_unit) = util::adjust_unit(result.real_size_byte);
    let (announced_value, announced_unit) = util::adjust_unit(result.announced_size_byte);

    match result.fake_type {
        FakeType::Good => {
            println!(
                "Nice! The device `{}' is the real thing, and its size is {:.2} {}",
                cli.block_dev, real_value, real_unit
            );
        }
        FakeType::Bad => {
            println!("Bad news: The device `{}' is dead, and reports no usable capacity", cli.block_dev);
        }
        FakeType::Limbo | FakeType::Wraparound | FakeType::Chain => {
            println!(
                "Bad news: The device `{}' is a counterfeit of type {}, and its announced size is {:.2} {}, but its *real* size is {:.2} {}",
                cli.block_dev,
                f3::fake_type_to_name(result.fake_type),
                announced_value,
                announced_unit,
                real_value,
                real_unit
            );
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("f3probe: {e:#}");
            ExitCode::FAILURE
        }
    }
}
