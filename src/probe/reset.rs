// probe/reset.rs — Reset protocol and stamped-write helper.
// Migrated from high_level_reset / write_blocks (libprobe.c).

use crate::config::BIG_BLOCK_SIZE_BYTE;
use crate::device::Device;
use crate::error::ProbeError;
use crate::stamp::fill_buffer_with_block;

/// Retries `f` exactly once after an `Io` failure, tolerating transient
/// media hiccups (spec §4.7.1). Any other error kind, or a second failure,
/// is returned as-is.
pub fn retry_once<T>(mut f: impl FnMut() -> Result<T, ProbeError>) -> Result<T, ProbeError> {
    match f() {
        Ok(v) => Ok(v),
        Err(ProbeError::Io(_)) => f(),
        Err(e) => Err(e),
    }
}

/// Writes a fresh stamp into every block in `[first_pos, last_pos]`, in
/// chunks of `BIG_BLOCK_SIZE_BYTE` so a wide eviction region (cache-size
/// doubling can reach `MAX_CACHE_SIZE_BYTE`) is never staged as one
/// allocation. Mirrors `count_good_blocks`'s chunked read in `cache.rs`.
/// Equivalent to `write_blocks`.
pub fn write_stamped_blocks(
    dev: &mut dyn Device,
    first_pos: u64,
    last_pos: u64,
    salt: u64,
) -> Result<(), ProbeError> {
    let block_order = dev.block_order();
    let block_size = 1usize << block_order;
    let step = (BIG_BLOCK_SIZE_BYTE >> block_order).max(1) - 1;

    let mut start_pos = first_pos;
    while start_pos <= last_pos {
        let next_pos = (start_pos + step).min(last_pos);
        let n = (next_pos - start_pos + 1) as usize;
        let mut buf = vec![0u8; n * block_size];
        for (i, pos) in (start_pos..=next_pos).enumerate() {
            let offset = pos << block_order;
            fill_buffer_with_block(&mut buf[i * block_size..(i + 1) * block_size], block_order, offset, salt);
        }
        retry_once(|| dev.write_blocks(&buf, start_pos, next_pos))?;
        start_pos = next_pos + 1;
    }
    Ok(())
}

/// Writes `cache_size_block` blocks starting at `reset_pos` to evict any
/// on-device write cache, then optionally invokes `dev.reset()`.
/// Equivalent to `high_level_reset`. A `cache_size_block` of 0 skips the
/// eviction write entirely.
pub fn high_level_reset(
    dev: &mut dyn Device,
    reset_pos: u64,
    cache_size_block: u64,
    need_reset: bool,
    salt: u64,
) -> Result<(), ProbeError> {
    if cache_size_block > 0 {
        let last_pos = reset_pos + cache_size_block - 1;
        write_stamped_blocks(dev, reset_pos, last_pos, salt)?;
    }
    if need_reset {
        retry_once(|| dev.reset())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::file_emulator::FileDevice;
    use tempfile::tempdir;

    #[test]
    fn high_level_reset_writes_eviction_region_and_resets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reset.img");
        let order = 12u32;
        let mut dev = FileDevice::create(path, 1 << (order + 8), 1 << (order + 8), 63, order, None, false, false).unwrap();
        high_level_reset(&mut dev, 0, 4, true, 0xABCD).unwrap();
        let block_size = dev.block_size() as usize;
        let mut out = vec![0u8; block_size];
        dev.read_blocks(&mut out, 0, 0).unwrap();
        let result = crate::stamp::validate_buffer_with_block(&out, order, 0xABCD);
        assert!(result.valid);
        assert_eq!(result.found_offset, 0);
    }

    #[test]
    fn retry_once_recovers_from_a_single_transient_failure() {
        let mut attempts = 0;
        let result: Result<(), ProbeError> = retry_once(|| {
            attempts += 1;
            if attempts == 1 {
                Err(ProbeError::Io("transient".into()))
            } else {
                Ok(())
            }
        });
        assert!(result.is_ok());
        assert_eq!(attempts, 2);
    }

    #[test]
    fn retry_once_does_not_retry_non_io_errors() {
        let mut attempts = 0;
        let result: Result<(), ProbeError> = retry_once(|| {
            attempts += 1;
            Err(ProbeError::DeviceGone)
        });
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
