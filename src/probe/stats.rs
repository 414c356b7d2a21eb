// probe/stats.rs — Rolling write/reset timing statistics.
// Migrated from struct bisect_stats / estimate_n_bisect_blocks (libprobe.c).
//
// A reset is far more expensive than a single write, so bisection amortizes
// reset cost by writing several trial blocks per pass. `BisectStats`
// accumulates live estimates of per-write and per-reset cost so each pass
// can pick a sample count that keeps the two balanced.

use crate::config::MAX_N_BLOCK_ORDER;
use crate::util::ilog2;

/// Rolling counters used to estimate the per-write and per-reset cost of the
/// device currently under probe. Equivalent to `struct bisect_stats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BisectStats {
    pub write_count: u64,
    pub write_time_us: u64,
    pub reset_count: u64,
    pub reset_time_us: u64,
}

impl BisectStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_writes(&mut self, count: u64, time_us: u64) {
        self.write_count += count;
        self.write_time_us += time_us;
    }

    pub fn record_reset(&mut self, time_us: u64) {
        self.reset_count += 1;
        self.reset_time_us += time_us;
    }
}

/// Returns the number of trial blocks to write per bisection pass, chosen
/// so that `m <= log2(T_reset / (2*T_write) + 3)`, capped at
/// `2^MAX_N_BLOCK_ORDER - 1`. Until at least 3 writes and 1 reset have been
/// observed, defaults to `(1 << 2) - 1 = 3`.
///
/// Equivalent to `estimate_n_bisect_blocks`.
pub fn estimate_n_bisect_blocks(stats: &BisectStats) -> u64 {
    if stats.write_count < 3 || stats.reset_count < 1 {
        return (1u64 << 2) - 1;
    }

    let t_w_us = stats.write_time_us as f64 / stats.write_count as f64;
    let t_r_us = stats.reset_time_us as f64 / stats.reset_count as f64;
    let t_2w_us = if t_w_us > 0.0 { 2.0 * t_w_us } else { 1.0 };

    let ratio = (t_r_us / t_2w_us + 3.0).round().max(1.0) as u64;
    let n_block_order = ilog2(ratio).min(MAX_N_BLOCK_ORDER);

    (1u64 << n_block_order) - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_three_samples_before_enough_data() {
        let stats = BisectStats::new();
        assert_eq!(estimate_n_bisect_blocks(&stats), 3);
    }

    #[test]
    fn picks_more_samples_as_reset_grows_costlier_than_write() {
        // T_write = 1000us, T_reset = 100_000us -> ratio = 100_000/2000 + 3 = 53,
        // floor(log2(53)) = 5 -> n = 2^5 - 1 = 31 (DESIGN.md records why this
        // follows floor, not round-to-nearest, of log2: that's what the
        // original's `ilog2(round(...))` computes).
        let mut stats = BisectStats::new();
        stats.record_writes(3, 3_000); // T_write = 1000us
        stats.record_reset(100_000); // T_reset = 100_000us
        assert_eq!(estimate_n_bisect_blocks(&stats), 31);
    }

    #[test]
    fn caps_at_max_n_block_order() {
        let mut stats = BisectStats::new();
        stats.record_writes(1000, 1000); // T_write ~ 1us
        stats.record_reset(1_000_000_000); // enormous reset cost
        let n = estimate_n_bisect_blocks(&stats);
        assert_eq!(n, (1u64 << MAX_N_BLOCK_ORDER) - 1);
    }
}
