// probe/bad_block.rs — Bad-block sampling.
// Migrated from probabilistic_test / find_a_bad_block / uint64_cmp
// (libprobe.c).

use crate::config::N_BLOCK_SAMPLES;
use crate::device::Device;
use crate::error::ProbeError;
use crate::probe::bisect::is_block_good;
use crate::probe::reset::{high_level_reset, write_stamped_blocks};
use crate::util::Rng;

/// Samples up to `N_BLOCK_SAMPLES` positions in `[first_pos, last_pos]`
/// (linearly if the range is small enough, otherwise at random) and reports
/// whether any sampled block has lost its stamp. With 64 samples and at
/// most 5% of blocks bad, a bad block is found with probability >= 96.2%.
/// Equivalent to `probabilistic_test`.
pub fn probabilistic_test(
    dev: &mut dyn Device,
    first_pos: u64,
    last_pos: u64,
    salt: u64,
) -> Result<bool, ProbeError> {
    if first_pos > last_pos {
        return Ok(false);
    }

    let gap = last_pos - first_pos + 1;
    let is_linear = gap <= N_BLOCK_SAMPLES;
    let n = if is_linear { gap } else { N_BLOCK_SAMPLES };

    let mut rng = Rng::from_time();
    for i in 0..n {
        let sample_pos = if is_linear {
            first_pos + i
        } else {
            first_pos + rng.next_u64_range(last_pos - first_pos + 1)
        };
        if !is_block_good(dev, sample_pos, salt)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Searches for the leftmost bad block strictly between `left_pos` (known
/// good) and `right_pos` (known bad or one past the end), writing samples
/// across the gap, resetting once, then reading back in ascending order so
/// the first failure found is guaranteed to be leftmost. Returns the new
/// `right_pos` when a bad block is found. Equivalent to `find_a_bad_block`.
pub fn find_a_bad_block(
    dev: &mut dyn Device,
    left_pos: u64,
    right_pos: u64,
    reset_pos: u64,
    cache_size_block: u64,
    need_reset: bool,
    salt: u64,
) -> Result<Option<u64>, ProbeError> {
    if right_pos <= left_pos + 1 {
        return Ok(None);
    }

    let gap = right_pos - left_pos - 1;
    let mut samples: Vec<u64>;

    if gap <= N_BLOCK_SAMPLES {
        samples = (0..gap).map(|i| left_pos + 1 + i).collect();
        write_stamped_blocks(dev, left_pos + 1, right_pos - 1, salt)?;
    } else {
        let mut rng = Rng::from_time();
        samples = (0..N_BLOCK_SAMPLES)
            .map(|_| left_pos + 1 + rng.next_u64_range(right_pos - 1 - left_pos))
            .collect();
        // Sorting guarantees that the first failure encountered on readback
        // below is the leftmost bad block, not merely *a* bad block.
        samples.sort_unstable();

        let mut prv_sample = left_pos;
        for &sample in &samples {
            if sample == prv_sample {
                continue;
            }
            prv_sample = sample;
            write_stamped_blocks(dev, sample, sample, salt)?;
        }
    }

    high_level_reset(dev, reset_pos, cache_size_block, need_reset, salt)?;

    let mut prv_sample = left_pos;
    for &sample in &samples {
        if sample == prv_sample {
            continue;
        }
        prv_sample = sample;
        if !is_block_good(dev, sample, salt)? {
            return Ok(Some(sample));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::file_emulator::FileDevice;
    use tempfile::tempdir;

    #[test]
    fn probabilistic_test_finds_nothing_on_a_fully_good_region() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("good.img");
        let order = 9u32;
        let n_blocks = 200u64;
        let mut dev = FileDevice::create(path, n_blocks << order, n_blocks << order, 63, order, None, false, false).unwrap();
        let salt = 0x42;
        write_stamped_blocks(&mut dev, 0, n_blocks - 1, salt).unwrap();
        assert!(!probabilistic_test(&mut dev, 0, n_blocks - 1, salt).unwrap());
    }

    #[test]
    fn find_a_bad_block_locates_the_leftmost_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.img");
        let order = 9u32;
        let real_blocks = 20u64;
        let announced_blocks = 100u64;
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
        let salt = 0x1357;
        let found = find_a_bad_block(&mut dev, 0, announced_blocks, 0, 0, false, salt).unwrap();
        assert_eq!(found, Some(real_blocks));
    }

    #[test]
    fn find_a_bad_block_reports_none_when_gap_too_small() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.img");
        let order = 9u32;
        let mut dev = FileDevice::create(path, 4 << order, 4 << order, 63, order, None, false, false).unwrap();
        let found = find_a_bad_block(&mut dev, 0, 1, 0, 0, false, 0x1).unwrap();
        assert_eq!(found, None);
    }
}
