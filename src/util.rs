// util.rs — Small numeric and formatting helpers shared by the device and
// probe modules. Migrated from libutils.c / libutils.h and utils.c
// (examples/original_source/), collapsed into a single module since none of
// these helpers is large enough to warrant its own file.

use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Bit-twiddling helpers (libutils.c ilog2 / clp2 / ceiling_log2)
// ---------------------------------------------------------------------------

/// Returns `floor(log2(x))` for `x > 0`. Equivalent to `ilog2`.
///
/// # Panics
/// Panics if `x == 0` (as does the original, which relies on `x` always
/// being a positive count by the time it reaches this helper).
pub fn ilog2(x: u64) -> u32 {
    assert!(x > 0, "ilog2 of zero is undefined");
    63 - x.leading_zeros()
}

/// Rounds `x` up to the next power of two. Equivalent to `clp2`
/// ("ceiling power of 2"), implemented via the same OR-shift cascade as the
/// original instead of `u64::next_power_of_two` so that `clp2(0) == 0` and
/// the behaviour at the top bit matches bit-for-bit.
pub fn clp2(x: u64) -> u64 {
    if x == 0 {
        return 0;
    }
    let mut x = x - 1;
    x |= x >> 1;
    x |= x >> 2;
    x |= x >> 4;
    x |= x >> 8;
    x |= x >> 16;
    x |= x >> 32;
    x + 1
}

/// Returns `ceil(log2(x))` for `x > 0`. Equivalent to `ceiling_log2`.
pub fn ceiling_log2(x: u64) -> u32 {
    assert!(x > 0, "ceiling_log2 of zero is undefined");
    ilog2(clp2(x).max(1))
}

// ---------------------------------------------------------------------------
// Alignment helpers (libutils.c align_head / align_mem)
// ---------------------------------------------------------------------------

/// Rounds `n_blocks` worth of header bookkeeping up to a whole block,
/// returning the number of *blocks* of padding needed ahead of a data
/// region so that the data region itself starts block-aligned.
/// Equivalent to `align_head`.
pub fn align_head(block_order: u32) -> u64 {
    // The header is always assumed to need at most one block's worth of
    // bookkeeping (bitmap, tag array); round that up to a whole block.
    let block_size = 1u64 << block_order;
    (block_size + block_size - 1) / block_size
}

/// Rounds a byte length up to a multiple of `1 << block_order`.
/// Equivalent to `align_mem`.
pub fn align_mem(n_bytes: u64, block_order: u32) -> u64 {
    let block_size = 1u64 << block_order;
    (n_bytes + block_size - 1) / block_size * block_size
}

// ---------------------------------------------------------------------------
// Byte-size formatting (utils.c adjust_unit)
// ---------------------------------------------------------------------------

/// A byte count paired with the unit it was scaled to, e.g. `(1.5, "GB")`.
/// Equivalent to the `(value, unit)` pair `adjust_unit` produces.
pub fn adjust_unit(byte_count: u64) -> (f64, &'static str) {
    const UNITS: [&str; 7] = ["Byte", "KB", "MB", "GB", "TB", "PB", "EB"];
    let mut value = byte_count as f64;
    let mut idx = 0;
    while value >= 1024.0 && idx < UNITS.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    (value, UNITS[idx])
}

/// Parses a byte-count argument with an optional unit suffix
/// (`s`ectors of 512 bytes, `k`ibi, `m`ebi, `g`ibi, `t`ebi — case
/// insensitive). Equivalent to `arg_to_ll_bytes`.
pub fn arg_to_ll_bytes(arg: &str) -> Option<u64> {
    let arg = arg.trim();
    if arg.is_empty() {
        return None;
    }
    let (digits, suffix) = match arg.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&arg[..arg.len() - 1], Some(c.to_ascii_lowercase())),
        _ => (arg, None),
    };
    let base: u64 = digits.parse().ok()?;
    let multiplier: u64 = match suffix {
        None => 1,
        Some('s') => 512,
        Some('k') => 1 << 10,
        Some('m') => 1 << 20,
        Some('g') => 1 << 30,
        Some('t') => 1 << 40,
        Some(_) => return None,
    };
    base.checked_mul(multiplier)
}

/// Formats a duration in microseconds as a human-readable string
/// (`"1h2m3.456s"`-style). Equivalent to `usec_to_str`.
pub fn usec_to_str(usec: u64) -> String {
    let total_secs = usec / 1_000_000;
    let frac_usec = usec % 1_000_000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let mut s = String::new();
    if hours > 0 {
        s.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        s.push_str(&format!("{minutes}m"));
    }
    s.push_str(&format!("{seconds}.{:06}s", frac_usec));
    s
}

// ---------------------------------------------------------------------------
// Seeded PRNG (libprobe.c uint64_rand / uint64_rand_range)
// ---------------------------------------------------------------------------

/// A small splitmix64-style generator used wherever the original reaches
/// for `rand()`: choosing the probe salt, sampling random offsets during
/// the bad-block search. No external `rand`-family crate is pulled in —
/// the generator here plays exactly the role `uint64_rand` does, seeded
/// once per process from the wall clock, matching the original's
/// `srand(time(NULL))`.
pub struct Rng {
    state: u64,
}

impl Rng {
    /// Seeds the generator from the current wall-clock time.
    /// Equivalent to `srand(time(NULL))` ahead of the first `uint64_rand`.
    pub fn from_time() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E37_79B9_7F4A_7C15);
        Self::new(seed ^ 0x9E37_79B9_7F4A_7C15)
    }

    /// Seeds the generator explicitly, for reproducible tests.
    pub fn new(seed: u64) -> Self {
        Rng {
            state: seed | 1, // must be odd for splitmix64
        }
    }

    /// Returns the next pseudo-random `u64`. Equivalent to `uint64_rand`,
    /// which combines two calls to `rand()` into a single 64-bit value.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Returns a pseudo-random value in `0..bound`.
    /// Equivalent to `uint64_rand_range`.
    pub fn next_u64_range(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.next_u64() % bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ilog2_powers_of_two() {
        assert_eq!(ilog2(1), 0);
        assert_eq!(ilog2(2), 1);
        assert_eq!(ilog2(1023), 9);
        assert_eq!(ilog2(1024), 10);
    }

    #[test]
    fn clp2_rounds_up() {
        assert_eq!(clp2(0), 0);
        assert_eq!(clp2(1), 1);
        assert_eq!(clp2(5), 8);
        assert_eq!(clp2(1024), 1024);
        assert_eq!(clp2(1025), 2048);
    }

    #[test]
    fn ceiling_log2_matches_clp2() {
        assert_eq!(ceiling_log2(5), 3);
        assert_eq!(ceiling_log2(8), 3);
        assert_eq!(ceiling_log2(9), 4);
    }

    #[test]
    fn align_mem_rounds_up_to_block() {
        assert_eq!(align_mem(1, 12), 4096);
        assert_eq!(align_mem(4096, 12), 4096);
        assert_eq!(align_mem(4097, 12), 8192);
    }

    #[test]
    fn adjust_unit_scales() {
        let (v, u) = adjust_unit(1536);
        assert_eq!(u, "KB");
        assert!((v - 1.5).abs() < 1e-9);
    }

    #[test]
    fn arg_to_ll_bytes_parses_suffixes() {
        assert_eq!(arg_to_ll_bytes("10"), Some(10));
        assert_eq!(arg_to_ll_bytes("1k"), Some(1024));
        assert_eq!(arg_to_ll_bytes("2G"), Some(2 << 30));
        assert_eq!(arg_to_ll_bytes("bogus"), None);
    }

    #[test]
    fn usec_to_str_formats_hours_minutes_seconds() {
        assert_eq!(usec_to_str(1_500_000), "0m1.500000s");
        assert_eq!(usec_to_str(3_661_000_000), "1h1m1.000000s");
    }

    #[test]
    fn rng_is_deterministic_for_a_fixed_seed() {
        let mut a = Rng::new(42);
        let mut b = Rng::new(42);
        assert_eq!(a.next_u64(), b.next_u64());
        assert_eq!(a.next_u64_range(100) < 100, true);
    }
}
