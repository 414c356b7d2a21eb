// probe/mod.rs — Top-level adaptive-bisection probing orchestration.
// Migrated from probe_device / probe_device_max_blocks (libprobe.c).

pub mod bad_block;
pub mod bisect;
pub mod cache;
pub mod reset;
pub mod stats;
pub mod wrap;

use crate::config::{MAX_BLOCKS_FUDGE_FACTOR, MAX_CACHE_SIZE_BYTE, MAX_N_BLOCK_ORDER, N_BLOCK_SAMPLES};
use crate::device::{dev_param_to_type, Device, FakeType};
use crate::error::ProbeError;
use crate::util::{ceiling_log2, clp2, Rng};

use bad_block::find_a_bad_block;
use bisect::bisect;
use cache::find_cache_size;
use stats::BisectStats;
use wrap::find_wrap;

/// Everything `probe_device` determines about a device: its true capacity,
/// the capacity it announces, the address width at which it wraps, the
/// write-back cache it exposed during the probe, and the classification
/// those numbers imply. Equivalent to the out-parameters of `probe_device`.
#[derive(Debug, Clone, Copy)]
pub struct ProbeResult {
    pub real_size_byte: u64,
    pub announced_size_byte: u64,
    /// Bit width at which the device's address space folds back on itself.
    pub wrap: u32,
    pub cache_size_block: u64,
    pub need_reset: bool,
    pub block_order: u32,
    pub fake_type: FakeType,
}

/// Upper bound on the number of blocks `probe_device` may touch while
/// probing `dev`, useful for sizing a `SafeDevice` arena ahead of time.
/// Equivalent to `probe_device_max_blocks`.
pub fn probe_device_max_blocks(dev: &dyn Device) -> u64 {
    let block_order = dev.block_order();
    let num_blocks = dev.size_byte() >> block_order;
    let n = ceiling_log2(num_blocks.max(1)) as u64;

    (MAX_CACHE_SIZE_BYTE >> (block_order - 1))
        + 1
        + MAX_BLOCKS_FUDGE_FACTOR * (((n << MAX_N_BLOCK_ORDER) / MAX_N_BLOCK_ORDER as u64) + N_BLOCK_SAMPLES)
}

/// Runs the full adaptive-bisection probe against `dev`: determines the
/// write-back cache size, the wrap point, and then alternates bad-block
/// search with bisection until the true/fake boundary is pinned down to a
/// single block. Equivalent to `probe_device`.
///
/// Only genuinely unrecoverable conditions (a device that has vanished, an
/// unsupported adapter, a malformed argument, an allocation failure) are
/// returned as `Err`. An I/O failure that survives `retry_once`'s single
/// retry is instead reported as a terminal "bad drive" `ProbeResult`
/// (`real_size_byte = 0`), matching the original's `bad:` fallback path,
/// which always produces a result rather than propagating the failure.
pub fn probe_device(dev: &mut dyn Device) -> Result<ProbeResult, ProbeError> {
    let dev_size_byte = dev.size_byte();
    let block_order = dev.block_order();
    assert!(block_order <= 20);

    let left_pos = (1u64 << (20 - block_order)) - 1;
    let right_pos_initial = dev_size_byte >> block_order;
    assert!(left_pos < right_pos_initial);

    let mid_drive_pos = clp2(right_pos_initial / 2);
    assert!(left_pos < mid_drive_pos);
    assert!(mid_drive_pos < right_pos_initial);

    let salt = Rng::from_time().next_u64();

    match run_probe(dev, left_pos, right_pos_initial, mid_drive_pos, salt) {
        Ok(outcome) => Ok(finish(dev_size_byte, block_order, outcome)),
        Err(ProbeError::Io(_)) => Ok(ProbeResult {
            real_size_byte: 0,
            announced_size_byte: dev_size_byte,
            wrap: ceiling_log2(dev_size_byte),
            cache_size_block: 0,
            need_reset: false,
            block_order,
            fake_type: FakeType::Bad,
        }),
        Err(e) => Err(e),
    }
}

struct ProbeOutcome {
    right_pos: u64,
    wrap: u32,
    cache_size_block: u64,
    need_reset: bool,
}

fn run_probe(
    dev: &mut dyn Device,
    left_pos: u64,
    right_pos_initial: u64,
    mid_drive_pos: u64,
    salt: u64,
) -> Result<ProbeOutcome, ProbeError> {
    let block_order = dev.block_order();

    let cache_result = find_cache_size(dev, mid_drive_pos - 1, right_pos_initial, salt)?;
    assert!(mid_drive_pos <= cache_result.right_pos);
    let mut right_pos = cache_result.right_pos;
    let cache_size_block = cache_result.cache_size_block;
    let need_reset = cache_result.need_reset;
    let good_drive = cache_result.good_drive;
    let reset_pos = right_pos;

    right_pos = find_wrap(dev, left_pos, right_pos, reset_pos, cache_size_block, need_reset, salt)?;
    let wrap = ceiling_log2(right_pos << block_order);

    let mut stats = BisectStats::new();
    if !good_drive {
        if mid_drive_pos < right_pos {
            right_pos = mid_drive_pos;
        }
        bisect(dev, &mut stats, left_pos, &mut right_pos, reset_pos, cache_size_block, need_reset, salt)?;
    }

    loop {
        let found = find_a_bad_block(dev, left_pos, right_pos, reset_pos, cache_size_block, need_reset, salt)?;
        match found {
            Some(new_right) => {
                right_pos = new_right;
                bisect(dev, &mut stats, left_pos, &mut right_pos, reset_pos, cache_size_block, need_reset, salt)?;
            }
            None => break,
        }
    }

    if right_pos == left_pos + 1 {
        right_pos = 0;
    }

    Ok(ProbeOutcome {
        right_pos,
        wrap,
        cache_size_block,
        need_reset,
    })
}

fn finish(dev_size_byte: u64, block_order: u32, outcome: ProbeOutcome) -> ProbeResult {
    let real_size_byte = outcome.right_pos << block_order;
    let fake_type = dev_param_to_type(real_size_byte, dev_size_byte, outcome.wrap);
    ProbeResult {
        real_size_byte,
        announced_size_byte: dev_size_byte,
        wrap: outcome.wrap,
        cache_size_block: outcome.cache_size_block,
        need_reset: outcome.need_reset,
        block_order,
        fake_type,
    }
}
