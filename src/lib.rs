// f3 — library support for detecting counterfeit flash storage.
// Rust port of AltraMayor/f3's libprobe/libdevs/libutils sources
// (examples/original_source/).

pub mod config;
pub mod device;
pub mod error;
pub mod probe;
pub mod stamp;
pub mod util;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level convenience re-exports for the most common API entry points.
// ─────────────────────────────────────────────────────────────────────────────

/// Runs the full probe against a device. Equivalent to `probe_device`.
pub use probe::{probe_device, probe_device_max_blocks, ProbeResult};

/// Error type returned throughout this crate. Equivalent to the original's
/// `int`-returning error convention (0 success, nonzero failure).
pub use error::ProbeError;

// ─────────────────────────────────────────────────────────────────────────────
// Device abstraction and wrappers (libdevs.h / libdevs.c)
// ─────────────────────────────────────────────────────────────────────────────

pub use device::{check_range, dev_param_to_type, dev_param_valid, fake_type_to_name, Device, FakeType};

pub use device::file_emulator::FileDevice;
pub use device::perf::{PerfCounters, PerfDevice};
pub use device::safe::SafeDevice;

#[cfg(unix)]
pub use device::block_device::{BlockDevice, CallbackReset, NoReset, ResetPolicy};

// ─────────────────────────────────────────────────────────────────────────────
// Stamp codec (libutils.c)
// ─────────────────────────────────────────────────────────────────────────────

pub use stamp::{
    classify_block, classify_block_tolerant, classify_block_tolerant_default, fill_buffer_with_block,
    validate_buffer_with_block, BlockState3, BlockState4, ValidationResult,
};
