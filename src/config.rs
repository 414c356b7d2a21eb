// config.rs — Compile-time configuration constants.
// Migrated from libdevs.h / libprobe.c (f3 upstream sources under
// examples/original_source/).
//
// Platform-detection macros the original carries in platform.h-equivalent
// headers are not needed here: Rust handles 64-bit sizes natively and the
// raw block adapter gates its unix-only syscalls with `#[cfg(unix)]` at the
// call site instead of a build-time constant.

use std::sync::atomic::{AtomicI32, Ordering};

// ---------------------------------------------------------------------------
// Block-order bounds
// ---------------------------------------------------------------------------

/// Smallest block order this crate will operate on (512-byte sectors).
/// Matches the smallest sector size `BLKSSZGET` commonly reports.
pub const MIN_BLOCK_ORDER: u32 = 9;

/// Largest block order a `Device` is allowed to report. 1 MiB blocks are
/// already far larger than any flash page; this is a sanity ceiling, not a
/// measured hardware limit.
pub const MAX_BLOCK_ORDER: u32 = 20;

/// Default block order used when neither the device nor the caller supplies
/// one (4 KiB), matching the common native sector size of modern media.
pub const DEFAULT_BLOCK_ORDER: u32 = 12;

// ---------------------------------------------------------------------------
// Cache-size search bounds (libprobe.c find_cache_size)
// ---------------------------------------------------------------------------

/// Smallest write-back cache size considered during doubling search: 1 MiB.
/// Equivalent to `MIN_CACHE_SIZE_BYTE` in libprobe.c.
pub const MIN_CACHE_SIZE_BYTE: u64 = 1 << 20;

/// Largest write-back cache size considered before giving up: 1 GiB.
/// Equivalent to `MAX_CACHE_SIZE_BYTE` in libprobe.c.
pub const MAX_CACHE_SIZE_BYTE: u64 = 1 << 30;

/// Chunk size used to bound per-call buffers when reading or writing a large
/// span of blocks, so a wide `[first_pos, last_pos]` range (cache-size
/// doubling can reach `MAX_CACHE_SIZE_BYTE`) is never staged in a single
/// allocation. Equivalent in spirit to `BIG_BLOCK_SIZE_BYTE` in libprobe.c.
pub const BIG_BLOCK_SIZE_BYTE: u64 = 1 << 16;

// ---------------------------------------------------------------------------
// Bisection cost model (libprobe.c estimate_n_bisect_blocks)
// ---------------------------------------------------------------------------

/// Ceiling on the bisection sample-count exponent. The sample count used
/// per round is `(1 << n) - 1` for `n` in `0..=MAX_N_BLOCK_ORDER`.
/// Equivalent to `MAX_N_BLOCK_ORDER` in libprobe.c.
pub const MAX_N_BLOCK_ORDER: u32 = 10;

/// Number of samples probed when a gap is small enough to sample linearly,
/// and the threshold below which `probabilistic_test`/`find_a_bad_block`
/// prefer linear sampling over random sampling.
/// Equivalent to `N_BLOCK_SAMPLES` in libprobe.c.
pub const N_BLOCK_SAMPLES: u64 = 64;

/// Safety-margin multiplier applied in `probe_device_max_blocks`'s memory
/// estimate. Carried over from libprobe.c unchanged; no further
/// justification is recorded there either (see DESIGN.md Open Questions).
pub const MAX_BLOCKS_FUDGE_FACTOR: u64 = 128;

// ---------------------------------------------------------------------------
// Stamp codec constants (libutils.c fill_buffer_with_block)
// ---------------------------------------------------------------------------

/// Multiplier of the stamp codec's linear congruential generator:
/// `next = prev * LCG_MULTIPLIER + LCG_INCREMENT`.
pub const LCG_MULTIPLIER: u64 = 4_294_967_311;

/// Increment of the stamp codec's linear congruential generator.
pub const LCG_INCREMENT: u64 = 17;

/// Default tolerance (in mismatched words) for the brew-style four-state
/// block classifier. Equivalent to `TOLERANCE` in libutils.c.
pub const DEFAULT_TOLERANCE: usize = 2;

// ---------------------------------------------------------------------------
// Display / notification global
// ---------------------------------------------------------------------------

/// Global notification level: 0 = silent, 1 = results/warnings, 2 = progress,
/// 3+ = verbose. Equivalent to the `g_displayLevel`-style global this
/// codebase already uses elsewhere, gating the `displaylevel!` macro.
pub static DISPLAY_LEVEL: AtomicI32 = AtomicI32::new(0);

/// Returns the current global notification level.
#[inline]
pub fn display_level() -> i32 {
    DISPLAY_LEVEL.load(Ordering::Relaxed)
}

/// Sets the global notification level. Returns the value stored.
pub fn set_notification_level(level: i32) -> i32 {
    DISPLAY_LEVEL.store(level, Ordering::Relaxed);
    level
}

/// Conditionally print a progress line to stderr at or above `level`.
/// Equivalent to the `DISPLAYLEVEL` macro convention used throughout the
/// original C sources.
#[macro_export]
macro_rules! displaylevel {
    ($level:expr, $($arg:tt)*) => {
        if $crate::config::display_level() >= $level {
            eprint!($($arg)*);
        }
    };
}
