// probe/cache.rs — Write-back cache size discovery.
// Migrated from find_cache_size / assess_reset_effect / count_good_blocks
// (libprobe.c).

use crate::device::Device;
use crate::error::ProbeError;
use crate::probe::bad_block::probabilistic_test;
use crate::probe::reset::{retry_once, write_stamped_blocks};
use crate::stamp::classify_block;

use crate::config::{BIG_BLOCK_SIZE_BYTE, MAX_CACHE_SIZE_BYTE, MIN_CACHE_SIZE_BYTE};

/// Counts how many blocks in `[first_pos, last_pos]` still carry a valid
/// stamp for their own position, reading in chunks of `BIG_BLOCK_SIZE_BYTE`
/// to bound memory use. Equivalent to `count_good_blocks`.
pub fn count_good_blocks(
    dev: &mut dyn Device,
    first_pos: u64,
    last_pos: u64,
    salt: u64,
) -> Result<u64, ProbeError> {
    let block_order = dev.block_order();
    let block_size = 1u64 << block_order;
    let step = (BIG_BLOCK_SIZE_BYTE >> block_order).max(1) - 1;

    let mut count = 0u64;
    let mut start_pos = first_pos;
    while start_pos <= last_pos {
        let mut next_pos = start_pos + step;
        if next_pos > last_pos {
            next_pos = last_pos;
        }
        let n = (next_pos - start_pos + 1) as usize;
        let mut buf = vec![0u8; n * block_size as usize];
        retry_once(|| dev.read_blocks(&mut buf, start_pos, next_pos))?;

        for (i, pos) in (start_pos..=next_pos).enumerate() {
            let expected_offset = pos << block_order;
            let chunk = &buf[i * block_size as usize..(i + 1) * block_size as usize];
            if classify_block(chunk, block_order, expected_offset, salt) == crate::stamp::BlockState3::Good {
                count += 1;
            }
        }

        start_pos = next_pos + 1;
    }
    Ok(count)
}

/// Outcome of resetting the device and comparing good-block counts
/// before/after, in the region `[first_pos, last_pos]`.
pub struct ResetAssessment {
    /// Device's write cache appears smaller than the region tested; the
    /// search for the cache size is over.
    pub done: bool,
    pub cache_size_block: u64,
    pub need_reset: bool,
}

/// Writes `[first_pos, last_pos]`, resets, and compares the surviving
/// good-block count to the region's size: if fewer blocks survived than
/// were written, the cache is smaller than the region and its exact size
/// is `after_reset_count_block`. Equivalent to `assess_reset_effect`.
pub fn assess_reset_effect(
    dev: &mut dyn Device,
    first_pos: u64,
    last_pos: u64,
    salt: u64,
) -> Result<ResetAssessment, ProbeError> {
    let write_target = last_pos + 1 - first_pos;

    let b4_reset_count = count_good_blocks(dev, first_pos, last_pos, salt)?;
    retry_once(|| dev.reset())?;
    let after_reset_count = count_good_blocks(dev, first_pos, last_pos, salt)?;

    if after_reset_count < write_target {
        assert!(after_reset_count <= b4_reset_count);
        Ok(ResetAssessment {
            done: true,
            cache_size_block: after_reset_count,
            need_reset: after_reset_count < b4_reset_count,
        })
    } else {
        Ok(ResetAssessment {
            done: false,
            cache_size_block: 0,
            need_reset: false,
        })
    }
}

/// Result of searching for the device's write-back cache size.
pub struct CacheSizeResult {
    pub right_pos: u64,
    pub cache_size_block: u64,
    pub need_reset: bool,
    pub good_drive: bool,
}

/// Searches for the device's write-back cache size by writing progressively
/// larger regions just inside `right_pos` and checking how much survives a
/// reset. The basis tests `MIN_CACHE_SIZE_BYTE`; the inductive step doubles
/// up to `MAX_CACHE_SIZE_BYTE`, escalating to a full reset assessment only
/// once a bad block turns up. Equivalent to `find_cache_size`.
pub fn find_cache_size(
    dev: &mut dyn Device,
    left_pos: u64,
    right_pos: u64,
    salt: u64,
) -> Result<CacheSizeResult, ProbeError> {
    let block_order = dev.block_order();
    let mut write_target = MIN_CACHE_SIZE_BYTE >> block_order;
    let final_write_target = MAX_CACHE_SIZE_BYTE >> block_order;
    assert!(write_target > 0);
    assert!(write_target < final_write_target);

    let end_pos = right_pos - 1;
    let last_pos = end_pos;
    let mut first_pos;

    if right_pos > left_pos + write_target {
        first_pos = right_pos - write_target;
    } else if right_pos > left_pos + 1 {
        first_pos = left_pos + 1;
    } else {
        return Ok(CacheSizeResult {
            right_pos: end_pos + 1,
            cache_size_block: 0,
            need_reset: false,
            good_drive: true,
        });
    }

    write_stamped_blocks(dev, first_pos, last_pos, salt)?;

    let assessment = assess_reset_effect(dev, first_pos, end_pos, salt)?;
    if assessment.done {
        return Ok(CacheSizeResult {
            right_pos: first_pos,
            cache_size_block: assessment.cache_size_block,
            need_reset: assessment.need_reset,
            good_drive: false,
        });
    }

    while write_target < final_write_target {
        write_target <<= 1;
        let inner_last_pos = first_pos - 1;
        if first_pos > left_pos + write_target {
            first_pos -= write_target;
        } else if first_pos > left_pos + 1 {
            first_pos = left_pos + 1;
        } else {
            break;
        }

        write_stamped_blocks(dev, first_pos, inner_last_pos, salt)?;

        let found_a_bad_block = probabilistic_test(dev, first_pos, end_pos, salt)?;
        if found_a_bad_block {
            let assessment = assess_reset_effect(dev, first_pos, end_pos, salt)?;
            assert!(assessment.done);
            return Ok(CacheSizeResult {
                right_pos: first_pos,
                cache_size_block: assessment.cache_size_block,
                need_reset: assessment.need_reset,
                good_drive: false,
            });
        }
    }

    Ok(CacheSizeResult {
        right_pos: end_pos + 1,
        cache_size_block: 0,
        need_reset: false,
        good_drive: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::file_emulator::FileDevice;
    use tempfile::tempdir;

    #[test]
    fn good_drive_reports_no_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("good.img");
        let order = 12u32;
        let n_blocks = 1u64 << 16;
        let mut dev = FileDevice::create(path, n_blocks << order, n_blocks << order, 63, order, None, false, false).unwrap();

        let left_pos = (1u64 << (20 - order)) - 1;
        let result = find_cache_size(&mut dev, left_pos, n_blocks, 0xDEAD).unwrap();
        assert!(result.good_drive);
        assert_eq!(result.cache_size_block, 0);
        assert_eq!(result.right_pos, n_blocks);
    }

    #[test]
    fn counts_survivors_after_reset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.img");
        let order = 12u32;
        let real_blocks = 1u64 << 10;
        let announced_blocks = 1u64 << 16;
        let mut dev = FileDevice::create(
            path,
            real_blocks << order,
            announced_blocks << order,
            63,
            order,
            Some(4),
            true,
            false,
        )
        .unwrap();

        write_stamped_blocks(&mut dev, real_blocks, real_blocks + 3, 0x99).unwrap();
        let count = count_good_blocks(&mut dev, real_blocks, real_blocks + 3, 0x99).unwrap();
        assert!(count <= 4);
    }
}
