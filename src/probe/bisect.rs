// probe/bisect.rs — Adaptive bisection over the good/bad block boundary.
// Migrated from write_bisect_blocks / is_block_good / probe_bisect_blocks /
// bisect (libprobe.c).

use std::time::Instant;

use crate::device::Device;
use crate::error::ProbeError;
use crate::probe::reset::{high_level_reset, retry_once, write_stamped_blocks};
use crate::probe::stats::{estimate_n_bisect_blocks, BisectStats};
use crate::stamp::classify_block;

/// Reads the block at `pos` and reports whether it still carries a valid
/// stamp for exactly that position. Equivalent to `is_block_good`.
pub fn is_block_good(dev: &mut dyn Device, pos: u64, salt: u64) -> Result<bool, ProbeError> {
    let block_order = dev.block_order();
    let block_size = 1usize << block_order;
    let mut buf = vec![0u8; block_size];
    retry_once(|| dev.read_blocks(&mut buf, pos, pos))?;
    let expected_offset = pos << block_order;
    Ok(matches!(
        classify_block(&buf, block_order, expected_offset, salt),
        crate::stamp::BlockState3::Good
    ))
}

/// Linear sampling coefficients for one bisection pass: samples are taken
/// at positions `b, b+a, b+2a, ..., b + max_idx*a`, all strictly inside
/// `(left_pos, right_pos)`. Equivalent to the `(a, b, max_idx)` triple
/// `write_bisect_blocks` computes.
pub struct BisectCoeffs {
    pub a: u64,
    pub b: u64,
    pub max_idx: u64,
}

/// Writes up to `n_blocks` stamped trial blocks spaced linearly across the
/// gap `(left_pos, right_pos)`, returning the coefficients used so the
/// caller can binary-search the same positions by reading them back.
/// Equivalent to `write_bisect_blocks`.
pub fn write_bisect_blocks(
    dev: &mut dyn Device,
    left_pos: u64,
    right_pos: u64,
    n_blocks: u64,
    salt: u64,
) -> Result<BisectCoeffs, ProbeError> {
    assert!(n_blocks >= 1);
    assert!(left_pos < right_pos);
    assert!(right_pos - left_pos >= 2);

    let mut b = left_pos + 1;
    let span = (right_pos - b - 1) as f64;
    let mut a = (span / (n_blocks as f64 + 1.0)).round() as u64;
    if a == 0 {
        a = 1;
    }
    let mut max_idx = (right_pos - b - 1) / a;
    if max_idx >= n_blocks {
        // Shift the zero of the sampling function to the right so the
        // leftmost (already-known-good) block is never resampled.
        b += a;
        max_idx = n_blocks - 1;
    }
    let last_pos = a * max_idx + b;
    assert!(last_pos < right_pos);

    let mut pos = b;
    while pos <= last_pos {
        write_stamped_blocks(dev, pos, pos, salt)?;
        pos += a;
    }

    Ok(BisectCoeffs { a, b, max_idx })
}

/// Binary-searches the positions laid out by [`write_bisect_blocks`],
/// narrowing `left_pos`/`right_pos` to the tightest good/bad boundary the
/// sampled positions reveal. Equivalent to `probe_bisect_blocks`.
pub fn probe_bisect_blocks(
    dev: &mut dyn Device,
    left_pos: &mut u64,
    right_pos: &mut u64,
    salt: u64,
    coeffs: &BisectCoeffs,
) -> Result<(), ProbeError> {
    let mut left_idx: i64 = 0;
    let mut right_idx: i64 = coeffs.max_idx as i64;
    while left_idx <= right_idx {
        let idx = (left_idx + right_idx) / 2;
        let pos = coeffs.a * idx as u64 + coeffs.b;
        if is_block_good(dev, pos, salt)? {
            left_idx = idx + 1;
            *left_pos = pos;
        } else {
            right_idx = idx - 1;
            *right_pos = pos;
        }
    }
    Ok(())
}

/// Narrows the gap `(left_pos, right_pos)` — `left_pos` known good,
/// `right_pos` known bad — down to a single-block boundary, amortizing
/// reset cost by writing several trial blocks per pass (spec §4.7.4).
/// Equivalent to `bisect`.
pub fn bisect(
    dev: &mut dyn Device,
    stats: &mut BisectStats,
    mut left_pos: u64,
    right_pos: &mut u64,
    reset_pos: u64,
    cache_size_block: u64,
    need_reset: bool,
    salt: u64,
) -> Result<(), ProbeError> {
    assert!(*right_pos > left_pos);
    let mut gap = *right_pos - left_pos;

    while gap >= 2 {
        let n_blocks = estimate_n_bisect_blocks(stats);

        let t1 = Instant::now();
        let coeffs = write_bisect_blocks(dev, left_pos, *right_pos, n_blocks, salt)?;
        stats.record_writes(coeffs.max_idx + 1, t1.elapsed().as_micros() as u64);

        let t2 = Instant::now();
        high_level_reset(dev, reset_pos, cache_size_block, need_reset, salt)?;
        stats.record_reset(t2.elapsed().as_micros() as u64);

        probe_bisect_blocks(dev, &mut left_pos, right_pos, salt, &coeffs)?;

        gap = *right_pos - left_pos;
    }
    assert_eq!(gap, 1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::file_emulator::FileDevice;
    use tempfile::tempdir;

    #[test]
    fn bisect_converges_to_a_single_block_gap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bisect.img");
        let order = 9u32;
        // real = 256 blocks, announced = 1024 blocks: everything past 256 is bad.
        let real_blocks = 256u64;
        let announced_blocks = 1024u64;
        let mut dev = FileDevice::create(
            path,
            real_blocks << order,
            announced_blocks << order,
            63,
            order,
            None,
            false,
            false,
        )
        .unwrap();

        let salt = 0x1234_5678_9abc_def0;
        let mut stats = BisectStats::new();
        let mut right_pos = announced_blocks;
        bisect(&mut dev, &mut stats, 0, &mut right_pos, 0, 0, false, salt).unwrap();

        assert_eq!(right_pos, real_blocks);
    }
}
